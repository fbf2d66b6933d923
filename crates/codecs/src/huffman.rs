//! Canonical Huffman table construction and single-symbol decode.
//!
//! Codes are assigned in increasing order of length and, within a
//! length, in increasing order of symbol value (the DEFLATE
//! convention). The table is stored as a flat, direct-addressed array
//! of size `2^max_len`, prefilled with `(symbol, length)` for every
//! possible tail of bits — decoding is then a single lookup plus a
//! rewind of the unused bits.

use crate::bitio::BitReader;
use crate::error::HuffmanError;

const MAX_BITS: u32 = 15;

#[derive(Debug, Clone)]
pub struct HuffmanTable {
    /// Indexed by the next `max_len` bits (LSB-first assembly); each
    /// entry is `(symbol, code_length)`, or `length == 0` if that prefix
    /// is unassigned.
    lookup: Vec<(u16, u8)>,
    max_len: u32,
}

impl HuffmanTable {
    /// Canonical build from a length-per-symbol vector. A length of zero
    /// means the symbol is absent. Empty and single-symbol alphabets are
    /// permitted.
    pub fn from_lengths(lengths: &[u8]) -> Result<Self, HuffmanError> {
        let max_len = lengths.iter().copied().max().unwrap_or(0) as u32;
        if max_len == 0 {
            return Ok(HuffmanTable { lookup: vec![(0, 0)], max_len: 0 });
        }
        if max_len > MAX_BITS {
            return Err(HuffmanError::OverSubscribed);
        }

        let mut count = vec![0u32; (max_len + 1) as usize];
        for &len in lengths {
            if len > 0 {
                count[len as usize] += 1;
            }
        }

        // Over-subscription check: at each length, the number of codes
        // used so far must not exceed the number of codes available.
        let mut code: u32 = 0;
        let mut first_code = vec![0u32; (max_len + 1) as usize];
        for len in 1..=max_len {
            code = (code + count[(len - 1) as usize]) << 1;
            first_code[len as usize] = code;
        }
        // A complete code's highest-length first code plus its count must
        // equal 2^max_len exactly; an over-subscribed code exceeds it.
        let total_leaves: u64 = (1..=max_len)
            .map(|len| u64::from(count[len as usize]) << (max_len - len))
            .sum();
        if total_leaves > (1u64 << max_len) {
            return Err(HuffmanError::OverSubscribed);
        }

        let table_size = 1usize << max_len;
        let mut lookup = vec![(0u16, 0u8); table_size];
        let mut next_code = first_code.clone();

        for (symbol, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let len = u32::from(len);
            let c = next_code[len as usize];
            next_code[len as usize] += 1;

            // `c` is the canonical MSB-first code of `len` bits. DEFLATE's
            // bit stream delivers Huffman codes MSB-first even though
            // everything else in the block is LSB-first, so every
            // `max_len`-bit tail consistent with this code (varying the
            // low-order padding bits, read LSB-first after the code
            // itself) maps to this symbol.
            let reversed = reverse_bits(c, len);
            let pad_bits = max_len - len;
            let step = 1usize << len;
            let mut index = reversed as usize;
            while index < table_size {
                lookup[index] = (symbol as u16, len as u8);
                index += step;
            }
            let _ = pad_bits;
        }

        Ok(HuffmanTable { lookup, max_len })
    }

    /// Construction from a sparse "bootstrap" list of `(start_symbol,
    /// length)` pairs defining piecewise-constant lengths: each pair
    /// sets `length` for every symbol from `start_symbol` up to (but not
    /// including) the next pair's `start_symbol`. Used by BZIP2's
    /// delta-coded per-tree length vectors once expanded to this form.
    pub fn from_bootstrap(pairs: &[(u16, u8)], alphabet_size: usize) -> Result<Self, HuffmanError> {
        let mut lengths = vec![0u8; alphabet_size];
        for window in pairs.windows(2) {
            let (start, len) = window[0];
            let end = window[1].0;
            for lengths_slot in lengths.iter_mut().take(end as usize).skip(start as usize) {
                *lengths_slot = len;
            }
        }
        if let Some(&(start, len)) = pairs.last() {
            for lengths_slot in lengths.iter_mut().skip(start as usize) {
                *lengths_slot = len;
            }
        }
        Self::from_lengths(&lengths)
    }

    /// Decodes one symbol from the bit stream, advancing the reader by
    /// exactly the matched code's length.
    pub fn decode(&self, reader: &mut BitReader<'_>) -> Result<u16, HuffmanError> {
        if self.max_len == 0 {
            return Err(HuffmanError::UnassignedPrefix);
        }
        let mut peeked = 0u32;
        let mut bits_read = 0u32;
        // Read up to max_len bits, but stop early (and rewind nothing)
        // once the stream is exhausted — a valid final symbol may need
        // fewer bits than max_len if it's at the very end of the stream.
        while bits_read < self.max_len {
            match reader.read_bit() {
                Ok(bit) => {
                    peeked |= bit << bits_read;
                    bits_read += 1;
                }
                Err(_) if bits_read > 0 => break,
                Err(_) => return Err(HuffmanError::UnexpectedEnd),
            }
        }

        let index = peeked as usize;
        let (symbol, len) = self.lookup[index];
        if len == 0 || u32::from(len) > bits_read {
            return Err(HuffmanError::UnassignedPrefix);
        }
        reader.rewind(bits_read - u32::from(len));
        Ok(symbol)
    }
}

fn reverse_bits(value: u32, n_bits: u32) -> u32 {
    let mut v = value;
    let mut r = 0u32;
    for _ in 0..n_bits {
        r = (r << 1) | (v & 1);
        v >>= 1;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitio::{BitOrder, BitReader};

    #[test]
    fn every_nonzero_symbol_round_trips() {
        // Canonical code: symbols 0..3 get lengths 2,1,3,3 (fixed example).
        let lengths = [2u8, 1, 3, 3];
        let table = HuffmanTable::from_lengths(&lengths).unwrap();

        // Canonical codes (MSB-first, per RFC 1951 convention):
        // len1: symbol1 -> 0
        // len2: symbol0 -> 10
        // len3: symbol2 -> 110, symbol3 -> 111
        // Encode a stream containing all four codes back to back, written
        // MSB-first per code but packed LSB-first per DEFLATE's bit order
        // (i.e. encode each code's bits in transmission order).
        let mut bits: Vec<u32> = Vec::new();
        for &(code, len) in &[(0b0u32, 1u32), (0b10, 2), (0b110, 3), (0b111, 3)] {
            for i in (0..len).rev() {
                bits.push((code >> i) & 1);
            }
        }
        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for (i, &bit) in bits.iter().enumerate() {
            if bit != 0 {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }

        let mut reader = BitReader::new(&bytes, BitOrder::Lsb);
        assert_eq!(table.decode(&mut reader).unwrap(), 1);
        assert_eq!(table.decode(&mut reader).unwrap(), 0);
        assert_eq!(table.decode(&mut reader).unwrap(), 2);
        assert_eq!(table.decode(&mut reader).unwrap(), 3);
    }

    #[test]
    fn over_subscribed_lengths_are_rejected() {
        // Two symbols both claiming the single length-1 code.
        let lengths = [1u8, 1, 1];
        assert!(HuffmanTable::from_lengths(&lengths).is_err());
    }

    #[test]
    fn single_symbol_alphabet_is_allowed() {
        let lengths = [1u8];
        let table = HuffmanTable::from_lengths(&lengths).unwrap();
        let bytes = [0u8];
        let mut reader = BitReader::new(&bytes, BitOrder::Lsb);
        assert_eq!(table.decode(&mut reader).unwrap(), 0);
    }

    #[test]
    fn bootstrap_expands_piecewise_constant_lengths() {
        // Symbols 0..2 get length 2, symbols 2..4 get length 2 as well,
        // forming a valid complete code over 4 symbols.
        let pairs = [(0u16, 2u8), (2, 2), (4, 0)];
        let table = HuffmanTable::from_bootstrap(&pairs, 4).unwrap();
        assert_eq!(table.max_len, 2);
    }
}
