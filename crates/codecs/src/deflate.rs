//! RFC 1951 DEFLATE decompression, plus a minimal stored-block encoder.

use tracing::trace;

use crate::bitio::{BitOrder, BitReader};
use crate::error::DeflateError;
use crate::huffman::HuffmanTable;

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
const LENGTH_EXTRA: [u32; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
const DIST_BASE: [u32; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DIST_EXTRA: [u32; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13,
];

const CODE_LENGTH_ORDER: [usize; 19] =
    [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

fn fixed_literal_table() -> HuffmanTable {
    let mut lengths = [0u8; 288];
    for (i, l) in lengths.iter_mut().enumerate() {
        *l = match i {
            0..=143 => 8,
            144..=255 => 9,
            256..=279 => 7,
            _ => 8,
        };
    }
    HuffmanTable::from_lengths(&lengths).expect("fixed literal/length table is always valid")
}

fn fixed_distance_table() -> HuffmanTable {
    let lengths = [5u8; 30];
    HuffmanTable::from_lengths(&lengths).expect("fixed distance table is always valid")
}

/// Decompresses a raw DEFLATE bit stream (RFC 1951), with no GZIP/ZLIB
/// framing.
pub fn deflate_decompress(bytes: &[u8]) -> Result<Vec<u8>, DeflateError> {
    Ok(deflate_decompress_with_len(bytes)?.0)
}

/// As [`deflate_decompress`], but also returns the number of input bytes
/// the final block consumed (aligned to the next byte boundary). GZIP
/// and ZLIB framing need this to locate their trailing checksum without
/// re-parsing the stream.
pub(crate) fn deflate_decompress_with_len(bytes: &[u8]) -> Result<(Vec<u8>, usize), DeflateError> {
    let mut reader = BitReader::new(bytes, BitOrder::Lsb);
    let mut out = Vec::new();

    loop {
        let bfinal = reader.read_bits(1)?;
        let btype = reader.read_bits(2)?;
        trace!(bfinal, btype, "deflate block header");

        match btype {
            0b00 => decode_stored_block(&mut reader, &mut out)?,
            0b01 => decode_huffman_block(&mut reader, &mut out, &fixed_literal_table(), &fixed_distance_table())?,
            0b10 => {
                let (lit_table, dist_table) = read_dynamic_tables(&mut reader)?;
                decode_huffman_block(&mut reader, &mut out, &lit_table, &dist_table)?
            }
            _ => return Err(DeflateError::UnknownBlockType),
        }

        if bfinal == 1 {
            break;
        }
    }

    reader.align_to_byte();
    Ok((out, reader.byte_position()))
}

fn decode_stored_block(reader: &mut BitReader<'_>, out: &mut Vec<u8>) -> Result<(), DeflateError> {
    reader.align_to_byte();
    let len = reader.read_u16_le()?;
    let nlen = reader.read_u16_le()?;
    if len != !nlen {
        return Err(DeflateError::WrongBlockLengths);
    }
    for _ in 0..len {
        out.push(reader.read_aligned_byte()?);
    }
    Ok(())
}

fn read_dynamic_tables(reader: &mut BitReader<'_>) -> Result<(HuffmanTable, HuffmanTable), DeflateError> {
    let hlit = reader.read_bits(5)? as usize + 257;
    let hdist = reader.read_bits(5)? as usize + 1;
    let hclen = reader.read_bits(4)? as usize + 4;

    let mut cl_lengths = [0u8; 19];
    for &slot in CODE_LENGTH_ORDER.iter().take(hclen) {
        cl_lengths[slot] = reader.read_bits(3)? as u8;
    }
    let cl_table = HuffmanTable::from_lengths(&cl_lengths)?;

    let mut lengths = Vec::with_capacity(hlit + hdist);
    while lengths.len() < hlit + hdist {
        let symbol = cl_table.decode(reader)?;
        match symbol {
            0..=15 => lengths.push(symbol as u8),
            16 => {
                let prev = *lengths.last().ok_or(DeflateError::HuffmanTableError(
                    crate::error::HuffmanError::UnassignedPrefix,
                ))?;
                let repeat = 3 + reader.read_bits(2)?;
                for _ in 0..repeat {
                    lengths.push(prev);
                }
            }
            17 => {
                let repeat = 3 + reader.read_bits(3)?;
                for _ in 0..repeat {
                    lengths.push(0);
                }
            }
            18 => {
                let repeat = 11 + reader.read_bits(7)?;
                for _ in 0..repeat {
                    lengths.push(0);
                }
            }
            _ => unreachable!("code-length alphabet only has symbols 0..=18"),
        }
    }
    lengths.truncate(hlit + hdist);

    let lit_table = HuffmanTable::from_lengths(&lengths[..hlit])?;
    let dist_table = HuffmanTable::from_lengths(&lengths[hlit..])?;
    Ok((lit_table, dist_table))
}

fn decode_huffman_block(
    reader: &mut BitReader<'_>,
    out: &mut Vec<u8>,
    lit_table: &HuffmanTable,
    dist_table: &HuffmanTable,
) -> Result<(), DeflateError> {
    loop {
        let symbol = lit_table.decode(reader)?;
        match symbol {
            0..=255 => out.push(symbol as u8),
            256 => break,
            257..=285 => {
                let idx = (symbol - 257) as usize;
                let length = LENGTH_BASE[idx] as u32 + reader.read_bits(LENGTH_EXTRA[idx])?;

                let dist_symbol = dist_table.decode(reader)? as usize;
                if dist_symbol >= DIST_BASE.len() {
                    return Err(DeflateError::HuffmanTableError(
                        crate::error::HuffmanError::UnassignedPrefix,
                    ));
                }
                let distance = DIST_BASE[dist_symbol] + reader.read_bits(DIST_EXTRA[dist_symbol])?;

                if distance as usize > out.len() {
                    return Err(DeflateError::DistanceTooFar {
                        distance: distance as usize,
                        available: out.len(),
                    });
                }
                copy_back_reference(out, distance as usize, length as usize);
            }
            _ => unreachable!("literal/length alphabet only has symbols 0..=285"),
        }
    }
    Ok(())
}

/// Self-overlapping back-reference copy: when `length > distance` the
/// copied region must keep including bytes the copy itself just wrote,
/// so this proceeds byte-by-byte rather than via a single slice copy.
fn copy_back_reference(out: &mut Vec<u8>, distance: usize, length: usize) {
    let start = out.len() - distance;
    out.reserve(length);
    for i in 0..length {
        let byte = out[start + i];
        out.push(byte);
    }
}

/// Writes `bytes` as a single `BTYPE=00` stored block. Not part of the
/// core decoder contract; exists so GZIP/ZLIB round-trip fixtures can be
/// produced without an external compressor. DEFLATE allows stored block
/// lengths up to 65535 bytes, so longer inputs are split across multiple
/// blocks.
pub fn deflate_compress_stored(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut bit_buf: u32 = 0;
    let mut bit_count: u32 = 0;

    let mut push_bits = |out: &mut Vec<u8>, bit_buf: &mut u32, bit_count: &mut u32, value: u32, n: u32| {
        *bit_buf |= value << *bit_count;
        *bit_count += n;
        while *bit_count >= 8 {
            out.push((*bit_buf & 0xFF) as u8);
            *bit_buf >>= 8;
            *bit_count -= 8;
        }
    };

    const MAX_STORED_LEN: usize = 0xFFFF;
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![&bytes[0..0]]
    } else {
        bytes.chunks(MAX_STORED_LEN).collect()
    };

    for (i, chunk) in chunks.iter().enumerate() {
        let is_final = i + 1 == chunks.len();
        push_bits(&mut out, &mut bit_buf, &mut bit_count, u32::from(is_final), 1);
        push_bits(&mut out, &mut bit_buf, &mut bit_count, 0b00, 2);
        // Align to byte: flush any partial bits as zero padding.
        if bit_count > 0 {
            out.push((bit_buf & 0xFF) as u8);
            bit_buf = 0;
            bit_count = 0;
        }
        let len = chunk.len() as u16;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(!len).to_le_bytes());
        out.extend_from_slice(chunk);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_block_hello() {
        let data = [0x01, 0x05, 0x00, 0xFA, 0xFF, b'H', b'e', b'l', b'l', b'o'];
        assert_eq!(deflate_decompress(&data).unwrap(), b"Hello");
    }

    #[test]
    fn static_huffman_hello() {
        let data = [0xF3, 0x48, 0xCD, 0xC9, 0xC9, 0x07, 0x00];
        assert_eq!(deflate_decompress(&data).unwrap(), b"Hello");
    }

    #[test]
    fn stored_block_round_trip() {
        let payload = b"the quick brown fox jumps over the lazy dog";
        let compressed = deflate_compress_stored(payload);
        assert_eq!(deflate_decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn stored_block_round_trip_empty() {
        let compressed = deflate_compress_stored(b"");
        assert_eq!(deflate_decompress(&compressed).unwrap(), b"");
    }

    #[test]
    fn stored_block_round_trip_spans_max_length() {
        let payload = vec![0x42u8; 0xFFFF + 10];
        let compressed = deflate_compress_stored(&payload);
        assert_eq!(deflate_decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn wrong_stored_lengths_are_rejected() {
        let data = [0x01, 0x05, 0x00, 0x00, 0x00, b'H', b'e', b'l', b'l', b'o'];
        assert!(matches!(deflate_decompress(&data), Err(DeflateError::WrongBlockLengths)));
    }

    #[test]
    fn reserved_block_type_is_rejected() {
        // BFINAL=1, BTYPE=11
        let data = [0b0000_0111];
        assert!(matches!(deflate_decompress(&data), Err(DeflateError::UnknownBlockType)));
    }

    #[test]
    fn self_overlapping_back_reference_extends_output() {
        let mut out = b"A".to_vec();
        copy_back_reference(&mut out, 1, 5);
        assert_eq!(out, b"AAAAAA");
    }

    #[test]
    fn distance_past_output_is_rejected() {
        let mut reader_bytes = Vec::new();
        // Static huffman block, final, referencing a distance with no
        // preceding output: symbol 257 (length 3, extra 0) then distance
        // symbol 0 (distance 1) — but output is empty so distance(1) > 0.
        // Build by hand: BFINAL=1,BTYPE=01 then literal/length code for
        // 257 (7 bits, value 0b0000001 per fixed table) then distance
        // code for symbol 0 (5 bits, 0b00000).
        // Fixed lit/len table: symbols 256-279 have length 7, codes
        // assigned in order starting at 0b0000000 for 256. Symbol 257 is
        // the second 7-bit code: 0b0000001.
        let mut bits: Vec<u32> = vec![1, 1, 0]; // bfinal=1, btype=01 (LSB first: bit0=1,bit1=0)
        for i in (0..7).rev() {
            bits.push((0b0000001u32 >> i) & 1);
        }
        for i in (0..5).rev() {
            bits.push((0b00000u32 >> i) & 1);
        }
        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for (i, &bit) in bits.iter().enumerate() {
            if bit != 0 {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        reader_bytes.extend_from_slice(&bytes);
        assert!(matches!(deflate_decompress(&reader_bytes), Err(DeflateError::DistanceTooFar { .. })));
    }
}
