//! RFC 1952 GZIP member framing around the DEFLATE decoder.

use tracing::debug;

use crate::bitio::{BitOrder, BitReader};
use crate::checksum::crc32;
use crate::deflate::{deflate_compress_stored, deflate_decompress_with_len};
use crate::error::GzipError;

const MAGIC: [u8; 2] = [0x1F, 0x8B];
const METHOD_DEFLATE: u8 = 8;

const FLAG_FTEXT: u8 = 0x01;
const FLAG_FHCRC: u8 = 0x02;
const FLAG_FEXTRA: u8 = 0x04;
const FLAG_FNAME: u8 = 0x08;
const FLAG_FCOMMENT: u8 = 0x10;
const FLAG_RESERVED: u8 = 0xE0;

/// Decodes one or more concatenated GZIP members, returning the
/// concatenation of their decompressed payloads.
pub fn gzip_unarchive(bytes: &[u8]) -> Result<Vec<u8>, GzipError> {
    let mut out = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let (member_out, consumed) = decode_member(&bytes[offset..])?;
        out.extend_from_slice(&member_out);
        offset += consumed;
    }

    Ok(out)
}

fn decode_member(bytes: &[u8]) -> Result<(Vec<u8>, usize), GzipError> {
    if bytes.len() < 10 || bytes[0] != MAGIC[0] || bytes[1] != MAGIC[1] {
        return Err(GzipError::WrongMagic);
    }
    let method = bytes[2];
    if method != METHOD_DEFLATE {
        return Err(GzipError::WrongCompressionMethod(method));
    }
    let flags = bytes[3];
    if flags & FLAG_RESERVED != 0 {
        return Err(GzipError::WrongFlags);
    }

    let mut reader = BitReader::new(bytes, BitOrder::Lsb);
    reader.align_to_byte();
    for _ in 0..10 {
        reader.read_aligned_byte()?;
    }

    if flags & FLAG_FEXTRA != 0 {
        let xlen = reader.read_u16_le()?;
        for _ in 0..xlen {
            reader.read_aligned_byte()?;
        }
    }
    if flags & FLAG_FNAME != 0 {
        while reader.read_aligned_byte()? != 0 {}
    }
    if flags & FLAG_FCOMMENT != 0 {
        while reader.read_aligned_byte()? != 0 {}
    }
    if flags & FLAG_FHCRC != 0 {
        let header_end = reader.byte_position();
        let header_crc16 = (crc32(&bytes[..header_end]) & 0xFFFF) as u16;
        let stored = reader.read_u16_le()?;
        if stored != header_crc16 {
            return Err(GzipError::WrongHeaderCRC);
        }
    }

    let header_len = reader.byte_position();
    let (decompressed, consumed) = deflate_decompress_with_len(&bytes[header_len..])?;
    let trailer_offset = header_len + consumed;

    if bytes.len() < trailer_offset + 8 {
        return Err(GzipError::UnexpectedEnd);
    }
    let stored_crc = u32::from_le_bytes(bytes[trailer_offset..trailer_offset + 4].try_into().unwrap());
    let stored_isize =
        u32::from_le_bytes(bytes[trailer_offset + 4..trailer_offset + 8].try_into().unwrap());

    let actual_crc = crc32(&decompressed);
    if actual_crc != stored_crc {
        return Err(GzipError::WrongCRC { expected: stored_crc, actual: actual_crc });
    }
    let actual_isize = (decompressed.len() as u64 % (1u64 << 32)) as u32;
    if actual_isize != stored_isize {
        return Err(GzipError::WrongISize { expected: stored_isize, actual: actual_isize });
    }

    debug!(len = decompressed.len(), "gzip member decoded");
    Ok((decompressed, trailer_offset + 8))
}

/// Builds a single GZIP member wrapping a stored (uncompressed) DEFLATE
/// payload. Minimal header: no extra/name/comment fields, OS byte 255
/// ("unknown"), mtime 0.
pub fn gzip_archive(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.push(METHOD_DEFLATE);
    out.push(0); // flags
    out.extend_from_slice(&0u32.to_le_bytes()); // mtime
    out.push(0); // extra flags
    out.push(255); // OS unknown
    out.extend_from_slice(&deflate_compress_stored(bytes));
    out.extend_from_slice(&crc32(bytes).to_le_bytes());
    out.extend_from_slice(&((bytes.len() as u64 % (1u64 << 32)) as u32).to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_the_spec_hello_fixture() {
        let data = [
            0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xF3, 0x48, 0xCD, 0xC9,
            0xC9, 0x07, 0x00, 0x86, 0xA6, 0x10, 0x36, 0x05, 0x00, 0x00, 0x00,
        ];
        assert_eq!(gzip_unarchive(&data).unwrap(), b"Hello");
    }

    #[test]
    fn round_trips_through_the_built_in_encoder() {
        let payload = b"a slightly longer payload to exercise stored blocks";
        let archived = gzip_archive(payload);
        assert_eq!(gzip_unarchive(&archived).unwrap(), payload);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let data = [0x00, 0x00, 0x08, 0x00, 0, 0, 0, 0, 0, 0];
        assert!(matches!(gzip_unarchive(&data), Err(GzipError::WrongMagic)));
    }

    #[test]
    fn concatenated_members_are_joined() {
        let a = gzip_archive(b"first-");
        let b = gzip_archive(b"second");
        let mut both = a.clone();
        both.extend_from_slice(&b);
        assert_eq!(gzip_unarchive(&both).unwrap(), b"first-second");
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let mut archived = gzip_archive(b"payload");
        let len = archived.len();
        archived[len - 8] ^= 0xFF;
        assert!(matches!(gzip_unarchive(&archived), Err(GzipError::WrongCRC { .. })));
    }
}
