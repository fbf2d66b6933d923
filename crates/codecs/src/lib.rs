//! Stream decoders for the compression formats the `archive-formats`
//! crate layers containers on top of: DEFLATE and its GZIP/ZLIB framing,
//! XZ/LZMA2, and BZIP2.

pub mod bitio;
pub mod bzip2;
pub mod checksum;
pub mod deflate;
pub mod error;
pub mod gzip;
pub mod huffman;
pub mod lzma;
pub mod xz;
pub mod zlib;

pub use bzip2::bzip2_decompress;
pub use deflate::{deflate_compress_stored, deflate_decompress};
pub use gzip::{gzip_archive, gzip_unarchive};
pub use lzma::{lzma2_decompress, lzma_decompress};
pub use xz::xz_unarchive;
pub use zlib::{zlib_archive, zlib_unarchive};
