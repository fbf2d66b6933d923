//! Raw 512-byte TAR header layout: field offsets, octal-ASCII numeric
//! parsing, checksum validation, and the UStar extension block.

use crate::error::TarError;

pub const BLOCK_SIZE: usize = 512;

pub const NAME: std::ops::Range<usize> = 0..100;
pub const MODE: std::ops::Range<usize> = 100..108;
pub const UID: std::ops::Range<usize> = 108..116;
pub const GID: std::ops::Range<usize> = 116..124;
pub const SIZE: std::ops::Range<usize> = 124..136;
pub const MTIME: std::ops::Range<usize> = 136..148;
pub const CHECKSUM: std::ops::Range<usize> = 148..156;
pub const TYPEFLAG: usize = 156;
pub const LINKNAME: std::ops::Range<usize> = 157..257;
pub const MAGIC: std::ops::Range<usize> = 257..263;
pub const VERSION: std::ops::Range<usize> = 263..265;
pub const UNAME: std::ops::Range<usize> = 265..297;
pub const GNAME: std::ops::Range<usize> = 297..329;
pub const DEVMAJOR: std::ops::Range<usize> = 329..337;
pub const DEVMINOR: std::ops::Range<usize> = 337..345;
pub const PREFIX: std::ops::Range<usize> = 345..500;

/// Typeflag byte values the reader and writer both recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFlag {
    Regular,
    HardLink,
    Symlink,
    CharDevice,
    BlockDevice,
    Directory,
    Fifo,
    Contiguous,
    GlobalExtendedHeader,
    LocalExtendedHeader,
    GnuLongName,
    GnuLongLink,
    Other(u8),
}

impl TypeFlag {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 | b'0' => TypeFlag::Regular,
            b'1' => TypeFlag::HardLink,
            b'2' => TypeFlag::Symlink,
            b'3' => TypeFlag::CharDevice,
            b'4' => TypeFlag::BlockDevice,
            b'5' => TypeFlag::Directory,
            b'6' => TypeFlag::Fifo,
            b'7' => TypeFlag::Contiguous,
            b'g' => TypeFlag::GlobalExtendedHeader,
            b'x' => TypeFlag::LocalExtendedHeader,
            b'L' => TypeFlag::GnuLongName,
            b'K' => TypeFlag::GnuLongLink,
            other => TypeFlag::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            TypeFlag::Regular => b'0',
            TypeFlag::HardLink => b'1',
            TypeFlag::Symlink => b'2',
            TypeFlag::CharDevice => b'3',
            TypeFlag::BlockDevice => b'4',
            TypeFlag::Directory => b'5',
            TypeFlag::Fifo => b'6',
            TypeFlag::Contiguous => b'7',
            TypeFlag::GlobalExtendedHeader => b'g',
            TypeFlag::LocalExtendedHeader => b'x',
            TypeFlag::GnuLongName => b'L',
            TypeFlag::GnuLongLink => b'K',
            TypeFlag::Other(b) => b,
        }
    }
}

/// Reads a NUL/space-terminated ASCII field, stopping at the first
/// terminator or the field's end.
pub fn read_ascii_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let trimmed = &bytes[..end];
    String::from_utf8_lossy(trimmed).trim_end().to_string()
}

/// Parses a numeric TAR field as base-8 ASCII directly. The field may be
/// space- or NUL-padded on either side. A direct base-8 parse is required:
/// re-decoding the digits as decimal and converting would silently corrupt
/// any value containing an '8' or '9'.
pub fn parse_octal_field(bytes: &[u8], field: &'static str) -> Result<u64, TarError> {
    let text = bytes
        .iter()
        .copied()
        .take_while(|&b| b != 0)
        .map(|b| b as char)
        .collect::<String>();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(trimmed, 8).map_err(|_| TarError::FieldNotNumber { field })
}

pub fn format_octal_field(value: u64, width: usize) -> Vec<u8> {
    let digits = format!("{:0>width$o}\0", value, width = width - 1);
    let mut out = digits.into_bytes();
    out.truncate(width);
    out
}

/// Validates a header's checksum field against both the unsigned- and
/// signed-byte sums of the rest of the header; historic writers disagree
/// on which convention they used, so either is accepted.
pub fn verify_checksum(header: &[u8; BLOCK_SIZE]) -> Result<(), TarError> {
    let recorded = parse_octal_field(&header[CHECKSUM], "checksum")? as u32;
    let unsigned = codecs::checksum::tar_checksum_unsigned(header);
    let signed = codecs::checksum::tar_checksum_signed(header);
    if recorded == unsigned || recorded as i32 == signed {
        Ok(())
    } else {
        Err(TarError::WrongHeaderChecksum { recorded, computed_unsigned: unsigned, computed_signed: signed })
    }
}

pub fn is_zero_block(block: &[u8; BLOCK_SIZE]) -> bool {
    block.iter().all(|&b| b == 0)
}

pub fn has_ustar_magic(header: &[u8; BLOCK_SIZE]) -> bool {
    &header[MAGIC] == b"ustar\0" || &header[MAGIC] == b"ustar "
}

/// Validates the 2-byte version field that follows a recognized UStar
/// magic. POSIX UStar uses `"00"`; GNU tar's variant of the same magic
/// carries two spaces instead.
pub fn verify_ustar_version(header: &[u8; BLOCK_SIZE]) -> Result<(), TarError> {
    let version: [u8; 8] = {
        let mut buf = [0u8; 8];
        buf[..6].copy_from_slice(&header[MAGIC]);
        buf[6..8].copy_from_slice(&header[VERSION]);
        buf
    };
    if &header[VERSION] == b"00" || &header[VERSION] == b"  " {
        Ok(())
    } else {
        Err(TarError::WrongUstarVersion(version))
    }
}
