//! Closed per-container error taxonomies, following the same
//! `thiserror` + `#[from]` convention as the `codecs` crate.

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum TarError {
    #[error("input is smaller than one 512-byte header record")]
    TooSmall,
    #[error("field {field} does not hold a valid octal ASCII number")]
    FieldNotNumber { field: &'static str },
    #[error("header checksum mismatch: recorded {recorded}, computed {computed_unsigned} (unsigned) or {computed_signed} (signed)")]
    WrongHeaderChecksum { recorded: u32, computed_unsigned: u32, computed_signed: i32 },
    #[error("unsupported ustar version magic {0:?}")]
    WrongUstarVersion([u8; 8]),
    #[error("name {0:?} is too long to encode in a ustar header and no long-name extension was requested")]
    NameTooLongForUstar(String),
    #[error("pax extended header record is not valid UTF-8")]
    PaxNotUtf8,
    #[error("malformed pax extended header record")]
    MalformedPaxRecord,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, ThisError)]
pub enum ZipError {
    #[error("no end-of-central-directory record found")]
    NoEndOfCentralDirectory,
    #[error("wrong signature: expected {expected:#010x}, found {found:#010x}")]
    WrongSignature { expected: u32, found: u32 },
    #[error("unsupported version needed to extract: {0}")]
    WrongVersion(u16),
    #[error("unsupported compression method {0}")]
    UnsupportedCompression(u16),
    #[error("crc32 mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch { expected: u32, computed: u32 },
    #[error("size mismatch: expected {expected}, computed {computed}")]
    SizeMismatch { expected: u64, computed: u64 },
    #[error("local header filename {local:?} does not match central directory filename {central:?}")]
    FilenameMismatch { local: String, central: String },
    #[error("filename is not valid CP437 or UTF-8")]
    BadFilenameEncoding,
    #[error("zip64 extra field is malformed or too short")]
    BadZip64Extra,
    #[error(transparent)]
    Deflate(#[from] codecs::error::DeflateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
