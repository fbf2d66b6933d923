//! TAR and ZIP archive containers, layered over the `codecs` crate's
//! stream decoders for entry payload decompression.

pub mod entry;
pub mod error;
pub mod tar;
pub mod zip;

pub use entry::{Container, EntryInfo, EntryKind, ExtraAttributes};
pub use error::{TarError, ZipError};
pub use tar::{tar_create, tar_info, tar_open, TarEntry, TarFormat, TarReader};
pub use zip::{zip_create, zip_info, zip_open, ZipArchive, ZipMethod};
