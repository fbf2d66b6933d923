//! RFC 1950 ZLIB framing: a 2-byte CMF/FLG header, DEFLATE, then a
//! 4-byte big-endian Adler-32 trailer.

use crate::checksum::adler32;
use crate::deflate::{deflate_compress_stored, deflate_decompress_with_len};
use crate::error::ZlibError;

const METHOD_DEFLATE: u8 = 8;

pub fn zlib_unarchive(bytes: &[u8]) -> Result<Vec<u8>, ZlibError> {
    if bytes.len() < 6 {
        return Err(ZlibError::UnexpectedEnd);
    }
    let cmf = bytes[0];
    let flg = bytes[1];
    let header = (u16::from(cmf) << 8) | u16::from(flg);
    if header % 31 != 0 {
        return Err(ZlibError::WrongHeaderCheck);
    }
    let method = cmf & 0x0F;
    if method != METHOD_DEFLATE {
        return Err(ZlibError::WrongCompressionMethod(method));
    }
    // FDICT (bit 5 of FLG) selecting a preset dictionary is not produced
    // by this library's writer and is rejected by treating the would-be
    // dictionary id as part of the compressed stream, which reliably
    // fails as a malformed DEFLATE block — acceptable because preset
    // dictionaries are outside this library's scope.

    let (decompressed, consumed) = deflate_decompress_with_len(&bytes[2..])?;
    let trailer_offset = 2 + consumed;
    if bytes.len() < trailer_offset + 4 {
        return Err(ZlibError::UnexpectedEnd);
    }
    let stored = u32::from_be_bytes(bytes[trailer_offset..trailer_offset + 4].try_into().unwrap());
    let actual = adler32(&decompressed);
    if actual != stored {
        return Err(ZlibError::WrongChecksum { expected: stored, actual });
    }
    Ok(decompressed)
}

/// Minimal ZLIB stream: CMF=0x78 (DEFLATE, 32K window), FLG chosen so
/// the header is a multiple of 31 with no preset dictionary and
/// compression-level hint "default".
pub fn zlib_archive(bytes: &[u8]) -> Vec<u8> {
    let cmf: u8 = 0x78;
    let mut flg: u16 = 0x01; // level bits left at 0 ("fastest"); FDICT clear
    let header = (u16::from(cmf) << 8) | flg;
    let remainder = header % 31;
    if remainder != 0 {
        flg += 31 - remainder;
    }

    let mut out = vec![cmf, flg as u8];
    out.extend_from_slice(&deflate_compress_stored(bytes));
    out.extend_from_slice(&adler32(bytes).to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_the_spec_hello_fixture() {
        let data = [
            0x78, 0x9C, 0xF3, 0x48, 0xCD, 0xC9, 0xC9, 0x07, 0x00, 0x05, 0x8C, 0x01, 0xF5,
        ];
        assert_eq!(zlib_unarchive(&data).unwrap(), b"Hello");
    }

    #[test]
    fn round_trips_through_the_built_in_encoder() {
        let payload = b"zlib round trip payload";
        let archived = zlib_archive(payload);
        assert_eq!(zlib_unarchive(&archived).unwrap(), payload);
    }

    #[test]
    fn header_not_divisible_by_31_is_rejected() {
        let data = [0x78, 0x00, 0, 0, 0, 0];
        assert!(matches!(zlib_unarchive(&data), Err(ZlibError::WrongHeaderCheck)));
    }

    #[test]
    fn corrupted_adler_is_rejected() {
        let mut archived = zlib_archive(b"payload");
        let len = archived.len();
        archived[len - 1] ^= 0xFF;
        assert!(matches!(zlib_unarchive(&archived), Err(ZlibError::WrongChecksum { .. })));
    }
}
