//! Closed, per-format error taxonomies, one `thiserror` enum per public
//! decoder, following the teacher's `error.rs` convention of a crate-wide
//! `Result<R, E = Error>` alias plus `#[from]` conversions.

use thiserror::Error as ThisError;

/// Internal-only: the bit reader ran past the end of its buffer. Always
/// converted into the caller-visible `UnexpectedEnd` variant of whichever
/// format error is in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnexpectedEnd;

#[derive(Debug, ThisError)]
pub enum HuffmanError {
    #[error("huffman code is over-subscribed")]
    OverSubscribed,
    #[error("bit stream yielded a prefix with no assigned symbol")]
    UnassignedPrefix,
    #[error("unexpected end of input while decoding a huffman symbol")]
    UnexpectedEnd,
}

impl From<UnexpectedEnd> for HuffmanError {
    fn from(_: UnexpectedEnd) -> Self {
        HuffmanError::UnexpectedEnd
    }
}

#[derive(Debug, ThisError)]
pub enum DeflateError {
    #[error("stored block LEN/NLEN are not bitwise complements")]
    WrongBlockLengths,
    #[error("reserved BTYPE=11 block")]
    UnknownBlockType,
    #[error("huffman table error: {0}")]
    HuffmanTableError(#[from] HuffmanError),
    #[error("back-reference distance {distance} exceeds {available} available output bytes")]
    DistanceTooFar { distance: usize, available: usize },
    #[error("unexpected end of input")]
    UnexpectedEnd,
}

impl From<UnexpectedEnd> for DeflateError {
    fn from(_: UnexpectedEnd) -> Self {
        DeflateError::UnexpectedEnd
    }
}

#[derive(Debug, ThisError)]
pub enum GzipError {
    #[error("wrong gzip magic")]
    WrongMagic,
    #[error("unsupported compression method {0}, only DEFLATE (8) is defined")]
    WrongCompressionMethod(u8),
    #[error("reserved flag bits set")]
    WrongFlags,
    #[error("header CRC16 mismatch")]
    WrongHeaderCRC,
    #[error("trailing CRC32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    WrongCRC { expected: u32, actual: u32 },
    #[error("trailing ISIZE mismatch: expected {expected}, got {actual}")]
    WrongISize { expected: u32, actual: u32 },
    #[error(transparent)]
    Deflate(#[from] DeflateError),
    #[error("unexpected end of input")]
    UnexpectedEnd,
}

impl From<UnexpectedEnd> for GzipError {
    fn from(_: UnexpectedEnd) -> Self {
        GzipError::UnexpectedEnd
    }
}

#[derive(Debug, ThisError)]
pub enum ZlibError {
    #[error("CMF/FLG header is not a multiple of 31")]
    WrongHeaderCheck,
    #[error("unsupported compression method {0}, only DEFLATE (8) is defined")]
    WrongCompressionMethod(u8),
    #[error("trailing Adler-32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    WrongChecksum { expected: u32, actual: u32 },
    #[error(transparent)]
    Deflate(#[from] DeflateError),
    #[error("unexpected end of input")]
    UnexpectedEnd,
}

impl From<UnexpectedEnd> for ZlibError {
    fn from(_: UnexpectedEnd) -> Self {
        ZlibError::UnexpectedEnd
    }
}

#[derive(Debug, ThisError)]
pub enum LzmaError {
    #[error("wrong lzma properties byte {0}")]
    WrongProperties(u8),
    #[error("range decoder did not end in a normalized state")]
    RangeCoderError,
    #[error("match distance {distance} exceeds {available} available output bytes")]
    DistanceTooFar { distance: usize, available: usize },
    #[error("lzma2 chunk control byte {0:#04x} is not a recognized chunk type")]
    WrongChunkControl(u8),
    #[error("decoded match length overruns the chunk's declared unpacked size")]
    LengthOverrun,
    #[error("unexpected end of input")]
    UnexpectedEnd,
}

impl From<UnexpectedEnd> for LzmaError {
    fn from(_: UnexpectedEnd) -> Self {
        LzmaError::UnexpectedEnd
    }
}

#[derive(Debug, ThisError)]
pub enum XzError {
    #[error("wrong xz stream magic")]
    WrongMagic,
    #[error("reserved flag bits set")]
    WrongFlags,
    #[error("unsupported check type {0}")]
    WrongCheckType(u8),
    #[error("stream header CRC32 mismatch")]
    WrongHeaderCRC,
    #[error("block header CRC32 mismatch")]
    WrongBlockHeaderCRC,
    #[error("unsupported filter id {0:#x}, only LZMA2 (0x21) and BCJ filters are required")]
    UnsupportedFilter(u64),
    #[error("index CRC32 mismatch")]
    WrongIndexCRC,
    #[error("stream footer backward size does not match the index")]
    WrongBackwardSize,
    #[error("stream footer flags do not match stream header flags")]
    FooterFlagsMismatch,
    #[error("wrong xz footer magic")]
    WrongFooterMagic,
    #[error("block or stream check value mismatch")]
    CheckMismatch,
    #[error(transparent)]
    Lzma(#[from] LzmaError),
    #[error("unexpected end of input")]
    UnexpectedEnd,
}

impl From<UnexpectedEnd> for XzError {
    fn from(_: UnexpectedEnd) -> Self {
        XzError::UnexpectedEnd
    }
}

#[derive(Debug, ThisError)]
pub enum Bzip2Error {
    #[error("wrong bzip2 magic")]
    WrongMagic,
    #[error("block size digit {0:?} is out of range '1'..='9'")]
    WrongBlockSizeDigit(u8),
    #[error("wrong block magic, neither a compressed-block nor end-of-stream marker")]
    WrongBlockMagic,
    #[error("randomized blocks are not supported (deprecated bzip2 feature)")]
    RandomizedBlockUnsupported,
    #[error("huffman table error: {0}")]
    HuffmanTableError(#[from] HuffmanError),
    #[error("block CRC32 mismatch")]
    WrongBlockCRC,
    #[error("combined stream CRC32 mismatch")]
    WrongStreamCRC,
    #[error("unexpected end of input")]
    UnexpectedEnd,
}

impl From<UnexpectedEnd> for Bzip2Error {
    fn from(_: UnexpectedEnd) -> Self {
        Bzip2Error::UnexpectedEnd
    }
}
