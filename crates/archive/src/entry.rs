//! The shared attribute record produced by both container readers.
//!
//! TAR and ZIP each carry their own header layout, but callers that just
//! want "what's in this archive" shouldn't have to know either one. Both
//! readers normalize into `EntryInfo`, a tagged record rather than a class
//! hierarchy: one `kind` discriminant plus an inline `extra` payload for
//! whatever is specific to the container it came from.

use std::fmt;

/// What kind of filesystem object an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    HardLink,
    CharDevice,
    BlockDevice,
    Fifo,
    Other(u8),
}

/// Container-specific fields that don't generalize across TAR and ZIP.
#[derive(Debug, Clone, Default)]
pub enum ExtraAttributes {
    #[default]
    None,
    Tar {
        devmajor: u32,
        devminor: u32,
    },
    Zip {
        dos_attributes: u32,
        external_attributes: u32,
        comment: Option<String>,
        unrecognized_extra: Vec<(u16, Vec<u8>)>,
    },
}

/// A normalized view of one archive member, independent of whether it came
/// from a TAR or ZIP reader.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub name: String,
    pub link_target: Option<String>,
    pub size: u64,
    pub kind: EntryKind,
    pub mtime: i64,
    pub atime: Option<i64>,
    pub ctime: Option<i64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub uname: Option<String>,
    pub gname: Option<String>,
    pub mode: u32,
    pub extra: ExtraAttributes,
}

impl fmt::Display for EntryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.name, self.size)
    }
}

/// The small capability set both container formats implement: open a
/// streaming reader, list entries without their data, and report which
/// format-specific variant a reader was built as. Kept as a trait rather
/// than a shared base type so TAR and ZIP stay plain records underneath.
pub trait Container {
    type Entry;
    type Error;

    fn info(&self) -> Result<Vec<EntryInfo>, Self::Error>;
    fn format_name(&self) -> &'static str;
}
