//! TAR container reader and writer: 512-byte header records, UStar/GNU/PAX
//! extensions, and iterator-based streaming so memory stays bounded by the
//! largest single entry rather than the whole archive.

mod header;
mod pax;

use std::io::Read;

use tracing::debug;

use crate::entry::{EntryInfo, EntryKind, ExtraAttributes};
use crate::error::TarError;
use header::{
    format_octal_field, has_ustar_magic, is_zero_block, parse_octal_field, read_ascii_field,
    verify_checksum, TypeFlag, BLOCK_SIZE, DEVMAJOR, DEVMINOR, GID, GNAME, LINKNAME, MODE, MTIME,
    NAME, PREFIX, SIZE, TYPEFLAG, UID, UNAME,
};
pub use pax::PaxOverrides;

/// A single decoded TAR member: its normalized attributes plus the bytes
/// of its payload (for regular files; directories and links carry none).
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub info: EntryInfo,
    pub data: Vec<u8>,
}

/// On-disk TAR variant a writer targets. Each affects how names, owners,
/// and out-of-range fields are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarFormat {
    /// Historic pre-POSIX format: no magic, no owner names, no prefix
    /// splitting. Names over 100 bytes cannot be represented.
    PrePosix,
    /// POSIX.1-1988 UStar: `ustar\0` magic, owner names, and a 155-byte
    /// prefix field that can extend names past 100 bytes.
    Ustar,
    /// GNU tar: UStar-compatible headers plus `'L'`/`'K'` long-name and
    /// long-link records for names the UStar prefix split can't cover.
    Gnu,
    /// POSIX.1-2001 PAX: a local extended header (`'x'`) ahead of any
    /// entry whose name, owner id, or timestamp doesn't fit its classic
    /// field encoding.
    Pax,
}

fn entry_kind_for_typeflag(flag: TypeFlag) -> EntryKind {
    match flag {
        TypeFlag::Regular | TypeFlag::Contiguous => EntryKind::Regular,
        TypeFlag::HardLink => EntryKind::HardLink,
        TypeFlag::Symlink => EntryKind::Symlink,
        TypeFlag::CharDevice => EntryKind::CharDevice,
        TypeFlag::BlockDevice => EntryKind::BlockDevice,
        TypeFlag::Directory => EntryKind::Directory,
        TypeFlag::Fifo => EntryKind::Fifo,
        TypeFlag::Other(b) => EntryKind::Other(b),
        TypeFlag::GlobalExtendedHeader
        | TypeFlag::LocalExtendedHeader
        | TypeFlag::GnuLongName
        | TypeFlag::GnuLongLink => EntryKind::Other(flag.to_byte()),
    }
}

/// Streaming TAR reader: one header-plus-data pass per `next()` call, with
/// global PAX overrides and pending GNU long-name/long-link records
/// carried as explicit state between entries.
pub struct TarReader<R> {
    reader: R,
    global_pax: PaxOverrides,
    pending_long_name: Option<String>,
    pending_long_link: Option<String>,
    finished: bool,
}

pub fn tar_open<R: Read>(reader: R) -> TarReader<R> {
    TarReader {
        reader,
        global_pax: PaxOverrides::default(),
        pending_long_name: None,
        pending_long_link: None,
        finished: false,
    }
}

impl<R: Read> TarReader<R> {
    fn read_block(&mut self) -> Result<Option<[u8; BLOCK_SIZE]>, TarError> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut read = 0usize;
        while read < BLOCK_SIZE {
            let n = self.reader.read(&mut block[read..])?;
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(TarError::TooSmall);
            }
            read += n;
        }
        Ok(Some(block))
    }

    fn read_payload(&mut self, size: u64) -> Result<Vec<u8>, TarError> {
        let mut data = vec![0u8; size as usize];
        self.reader.read_exact(&mut data)?;
        let padded = (size as usize).div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let remainder = padded - size as usize;
        if remainder > 0 {
            let mut pad = vec![0u8; remainder];
            self.reader.read_exact(&mut pad)?;
        }
        Ok(data)
    }

    fn next_entry(&mut self) -> Result<Option<TarEntry>, TarError> {
        let mut local_pax: Option<PaxOverrides> = None;

        loop {
            let Some(mut block) = self.read_block()? else {
                return Ok(None);
            };
            if is_zero_block(&block) {
                // End of archive is marked by two consecutive all-zero
                // records; a single zero block ahead of real data is not
                // terminal, so the next block must be inspected before
                // deciding.
                let Some(next) = self.read_block()? else {
                    return Ok(None);
                };
                if is_zero_block(&next) {
                    return Ok(None);
                }
                block = next;
            }
            verify_checksum(&block)?;
            if has_ustar_magic(&block) {
                header::verify_ustar_version(&block)?;
            }

            let typeflag = TypeFlag::from_byte(block[TYPEFLAG]);
            match typeflag {
                TypeFlag::GlobalExtendedHeader => {
                    let size = parse_octal_field(&block[SIZE], "size")?;
                    let payload = self.read_payload(size)?;
                    let records = pax::parse_pax_records(&payload)?;
                    self.global_pax = self.global_pax.merged_over(&records);
                    continue;
                }
                TypeFlag::LocalExtendedHeader => {
                    let size = parse_octal_field(&block[SIZE], "size")?;
                    let payload = self.read_payload(size)?;
                    local_pax = Some(pax::parse_pax_records(&payload)?);
                    continue;
                }
                TypeFlag::GnuLongName => {
                    let size = parse_octal_field(&block[SIZE], "size")?;
                    let payload = self.read_payload(size)?;
                    self.pending_long_name = Some(read_ascii_field(&payload));
                    continue;
                }
                TypeFlag::GnuLongLink => {
                    let size = parse_octal_field(&block[SIZE], "size")?;
                    let payload = self.read_payload(size)?;
                    self.pending_long_link = Some(read_ascii_field(&payload));
                    continue;
                }
                _ => {}
            }

            let effective_pax = match &local_pax {
                Some(local) => self.global_pax.merged_over(local),
                None => self.global_pax.clone(),
            };

            // PAX overrides win over a GNU long-name/long-link record on
            // conflict, so the pending GNU value is only used as a
            // fallback — but it's still taken either way, so it never
            // leaks into the next entry.
            let header_name = read_ascii_field(&block[NAME]);
            let pending_long_name = self.pending_long_name.take();
            let name = effective_pax.path.clone().unwrap_or_else(|| {
                pending_long_name.unwrap_or_else(|| {
                    if has_ustar_magic(&block) {
                        let prefix = read_ascii_field(&block[PREFIX]);
                        if prefix.is_empty() {
                            header_name.clone()
                        } else {
                            format!("{prefix}/{header_name}")
                        }
                    } else {
                        header_name.clone()
                    }
                })
            });

            let pending_long_link = self.pending_long_link.take();
            let linkname = effective_pax
                .linkpath
                .clone()
                .unwrap_or_else(|| pending_long_link.unwrap_or_else(|| read_ascii_field(&block[LINKNAME])));

            let header_size = parse_octal_field(&block[SIZE], "size")?;
            let size = effective_pax.size.unwrap_or(header_size);
            let mode = parse_octal_field(&block[MODE], "mode")? as u32;
            let header_mtime = parse_octal_field(&block[MTIME], "mtime")? as i64;
            let mtime = effective_pax.mtime.map(|v| v as i64).unwrap_or(header_mtime);
            let atime = effective_pax.atime.map(|v| v as i64);
            let ctime = effective_pax.ctime.map(|v| v as i64);
            let uid = effective_pax
                .uid
                .map(|v| v as u32)
                .or_else(|| parse_octal_field(&block[UID], "uid").ok().map(|v| v as u32));
            let gid = effective_pax
                .gid
                .map(|v| v as u32)
                .or_else(|| parse_octal_field(&block[GID], "gid").ok().map(|v| v as u32));
            let uname = effective_pax.uname.clone().or_else(|| {
                let s = read_ascii_field(&block[UNAME]);
                (!s.is_empty()).then_some(s)
            });
            let gname = effective_pax.gname.clone().or_else(|| {
                let s = read_ascii_field(&block[GNAME]);
                (!s.is_empty()).then_some(s)
            });

            let kind = entry_kind_for_typeflag(typeflag);
            let extra = if has_ustar_magic(&block) {
                ExtraAttributes::Tar {
                    devmajor: parse_octal_field(&block[DEVMAJOR], "devmajor").unwrap_or(0) as u32,
                    devminor: parse_octal_field(&block[DEVMINOR], "devminor").unwrap_or(0) as u32,
                }
            } else {
                ExtraAttributes::None
            };

            let is_dir_type = matches!(kind, EntryKind::Directory);
            let data = if is_dir_type || matches!(kind, EntryKind::Symlink | EntryKind::HardLink) {
                Vec::new()
            } else {
                self.read_payload(size)?
            };

            let info = EntryInfo {
                name,
                link_target: (!linkname.is_empty()).then_some(linkname),
                size,
                kind,
                mtime,
                atime,
                ctime,
                uid,
                gid,
                uname,
                gname,
                mode,
                extra,
            };
            return Ok(Some(TarEntry { info, data }));
        }
    }
}

impl<R: Read> Iterator for TarReader<R> {
    type Item = Result<TarEntry, TarError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Lists every entry's attributes without materializing file data beyond
/// what's needed to skip past it.
pub fn tar_info(bytes: &[u8]) -> Result<Vec<EntryInfo>, TarError> {
    tar_open(bytes).map(|r| r.map(|e| e.info)).collect()
}

fn write_octal(buf: &mut [u8], range: std::ops::Range<usize>, value: u64) {
    let field = format_octal_field(value, range.len());
    buf[range].copy_from_slice(&field);
}

fn write_ascii(buf: &mut [u8], range: std::ops::Range<usize>, value: &str) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(range.len());
    buf[range.start..range.start + n].copy_from_slice(&bytes[..n]);
}

/// Splits `name` into a UStar `(prefix, name)` pair if possible: the
/// prefix must end just before a `/` and both halves must fit their
/// historic field widths (155 and 100 bytes).
fn split_ustar_name(name: &str) -> Option<(String, String)> {
    if name.len() <= 100 {
        return Some((String::new(), name.to_string()));
    }
    let bytes = name.as_bytes();
    for (i, &b) in bytes.iter().enumerate().rev() {
        if b == b'/' && i <= 155 && bytes.len() - i - 1 <= 100 {
            let prefix = &name[..i];
            let rest = &name[i + 1..];
            return Some((prefix.to_string(), rest.to_string()));
        }
    }
    None
}

fn typeflag_for_kind(kind: EntryKind) -> TypeFlag {
    match kind {
        EntryKind::Regular => TypeFlag::Regular,
        EntryKind::Directory => TypeFlag::Directory,
        EntryKind::Symlink => TypeFlag::Symlink,
        EntryKind::HardLink => TypeFlag::HardLink,
        EntryKind::CharDevice => TypeFlag::CharDevice,
        EntryKind::BlockDevice => TypeFlag::BlockDevice,
        EntryKind::Fifo => TypeFlag::Fifo,
        EntryKind::Other(b) => TypeFlag::Other(b),
    }
}

fn pad_to_block(out: &mut Vec<u8>, len: usize) {
    let padded = len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    out.resize(out.len() + (padded - len), 0);
}

fn write_header_block(info: &EntryInfo, name: &str, prefix: &str, ustar_like: bool, size_override: Option<u64>) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    write_ascii(&mut block, NAME, name);
    write_octal(&mut block, MODE, u64::from(info.mode));
    write_octal(&mut block, UID, u64::from(info.uid.unwrap_or(0)));
    write_octal(&mut block, GID, u64::from(info.gid.unwrap_or(0)));
    write_octal(&mut block, SIZE, size_override.unwrap_or(info.size));
    write_octal(&mut block, MTIME, info.mtime.max(0) as u64);
    block[TYPEFLAG] = typeflag_for_kind(info.kind).to_byte();
    if let Some(link) = &info.link_target {
        write_ascii(&mut block, LINKNAME, link);
    }
    if ustar_like {
        block[header::MAGIC].copy_from_slice(b"ustar\0");
        block[header::VERSION].copy_from_slice(b"00");
        write_ascii(&mut block, UNAME, info.uname.as_deref().unwrap_or(""));
        write_ascii(&mut block, GNAME, info.gname.as_deref().unwrap_or(""));
        write_ascii(&mut block, PREFIX, prefix);
        if let ExtraAttributes::Tar { devmajor, devminor } = info.extra {
            write_octal(&mut block, DEVMAJOR, u64::from(devmajor));
            write_octal(&mut block, DEVMINOR, u64::from(devminor));
        }
    }

    // Checksum is computed last, with its own field held as eight spaces.
    block[header::CHECKSUM].copy_from_slice(b"        ");
    let sum = codecs::checksum::tar_checksum_unsigned(&block);
    let field = format!("{sum:06o}\0 ");
    block[header::CHECKSUM].copy_from_slice(field.as_bytes());
    block
}

fn write_extension_record(out: &mut Vec<u8>, name: &str, typeflag: u8, payload: &[u8]) {
    let mut header = [0u8; BLOCK_SIZE];
    write_ascii(&mut header, NAME, name);
    write_octal(&mut header, MODE, 0);
    write_octal(&mut header, UID, 0);
    write_octal(&mut header, GID, 0);
    write_octal(&mut header, SIZE, payload.len() as u64);
    write_octal(&mut header, MTIME, 0);
    header[TYPEFLAG] = typeflag;
    header[header::CHECKSUM].copy_from_slice(b"        ");
    let sum = codecs::checksum::tar_checksum_unsigned(&header);
    let field = format!("{sum:06o}\0 ");
    header[header::CHECKSUM].copy_from_slice(field.as_bytes());

    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    pad_to_block(out, out.len());
}

fn pax_record(key: &str, value: &str) -> String {
    // LENGTH counts itself, so solve for it by growing the guess until the
    // recorded length and the actual record length agree.
    let mut length = key.len() + value.len() + 3;
    loop {
        let candidate = format!("{length} {key}={value}\n");
        if candidate.len() == length {
            return candidate;
        }
        length = candidate.len();
    }
}

/// Writes a complete TAR archive for `entries` in the given on-disk
/// format, terminated by the required two all-zero 512-byte records.
pub fn tar_create(entries: &[(EntryInfo, Vec<u8>)], format: TarFormat) -> Result<Vec<u8>, TarError> {
    let mut out = Vec::new();

    for (info, data) in entries {
        match format {
            TarFormat::PrePosix => {
                if info.name.len() > 100 {
                    return Err(TarError::NameTooLongForUstar(info.name.clone()));
                }
                let header = write_header_block(info, &info.name, "", false, None);
                out.extend_from_slice(&header);
            }
            TarFormat::Ustar => {
                let (prefix, name) = split_ustar_name(&info.name).ok_or_else(|| TarError::NameTooLongForUstar(info.name.clone()))?;
                let header = write_header_block(info, &name, &prefix, true, None);
                out.extend_from_slice(&header);
            }
            TarFormat::Gnu => {
                if info.name.len() > 100 {
                    write_extension_record(&mut out, "././@LongLink", TypeFlag::GnuLongName.to_byte(), format!("{}\0", info.name).as_bytes());
                }
                if let Some(link) = &info.link_target {
                    if link.len() > 100 {
                        write_extension_record(&mut out, "././@LongLink", TypeFlag::GnuLongLink.to_byte(), format!("{link}\0").as_bytes());
                    }
                }
                let truncated_name = &info.name[..info.name.len().min(100)];
                let header = write_header_block(info, truncated_name, "", true, None);
                out.extend_from_slice(&header);
            }
            TarFormat::Pax => {
                let mut pax_payload = String::new();
                if split_ustar_name(&info.name).is_none() {
                    pax_payload.push_str(&pax_record("path", &info.name));
                }
                if let Some(link) = &info.link_target {
                    if link.len() > 100 {
                        pax_payload.push_str(&pax_record("linkpath", link));
                    }
                }
                if info.uid.is_some_and(|v| v > 0o7_777_777) {
                    pax_payload.push_str(&pax_record("uid", &info.uid.unwrap().to_string()));
                }
                if info.gid.is_some_and(|v| v > 0o7_777_777) {
                    pax_payload.push_str(&pax_record("gid", &info.gid.unwrap().to_string()));
                }

                if !pax_payload.is_empty() {
                    write_extension_record(&mut out, "PaxHeader", TypeFlag::LocalExtendedHeader.to_byte(), pax_payload.as_bytes());
                }
                let (prefix, name) = split_ustar_name(&info.name).unwrap_or_else(|| (String::new(), info.name.chars().take(100).collect()));
                let header = write_header_block(info, &name, &prefix, true, None);
                out.extend_from_slice(&header);
            }
        }

        out.extend_from_slice(data);
        let out_len = out.len();
        pad_to_block(&mut out, out_len);
    }

    out.resize(out.len() + 2 * BLOCK_SIZE, 0);
    debug!(entries = entries.len(), format = ?format, len = out.len(), "tar archive written");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ustar_header(name: &str, size: u64, mode: u32, mtime: u64) -> [u8; BLOCK_SIZE] {
        let info = EntryInfo {
            name: name.to_string(),
            link_target: None,
            size,
            kind: EntryKind::Regular,
            mtime: mtime as i64,
            atime: None,
            ctime: None,
            uid: None,
            gid: None,
            uname: None,
            gname: None,
            mode,
            extra: ExtraAttributes::None,
        };
        write_header_block(&info, name, "", true, None)
    }

    #[test]
    fn reads_a_single_ustar_entry() {
        let header = ustar_header("readme.txt", 5, 0o644, 0);
        let mut archive = Vec::new();
        archive.extend_from_slice(&header);
        archive.extend_from_slice(b"Hello");
        let archive_len = archive.len();
        pad_to_block(&mut archive, archive_len);
        archive.resize(archive.len() + 2 * BLOCK_SIZE, 0);

        let entries: Vec<_> = tar_open(Cursor::new(archive)).collect::<Result<_, _>>().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].info.name, "readme.txt");
        assert_eq!(entries[0].info.size, 5);
        assert_eq!(entries[0].data, b"Hello");
    }

    #[test]
    fn pax_path_wins_over_gnu_long_name_on_conflict() {
        let mut archive = Vec::new();
        write_extension_record(&mut archive, "././@LongLink", TypeFlag::GnuLongName.to_byte(), b"gnu-name.txt\0");
        let pax_payload = pax_record("path", "pax-name.txt");
        write_extension_record(&mut archive, "PaxHeader", TypeFlag::LocalExtendedHeader.to_byte(), pax_payload.as_bytes());
        let header = ustar_header("ignored.txt", 3, 0o644, 0);
        archive.extend_from_slice(&header);
        archive.extend_from_slice(b"abc");
        let archive_len = archive.len();
        pad_to_block(&mut archive, archive_len);
        archive.resize(archive.len() + 2 * BLOCK_SIZE, 0);

        let entries: Vec<_> = tar_open(Cursor::new(archive)).collect::<Result<_, _>>().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].info.name, "pax-name.txt");
    }

    #[test]
    fn gnu_long_name_applies_when_no_pax_override_present() {
        let mut archive = Vec::new();
        write_extension_record(&mut archive, "././@LongLink", TypeFlag::GnuLongName.to_byte(), b"gnu-name.txt\0");
        let header = ustar_header("ignored.txt", 3, 0o644, 0);
        archive.extend_from_slice(&header);
        archive.extend_from_slice(b"abc");
        let archive_len = archive.len();
        pad_to_block(&mut archive, archive_len);
        archive.resize(archive.len() + 2 * BLOCK_SIZE, 0);

        let entries: Vec<_> = tar_open(Cursor::new(archive)).collect::<Result<_, _>>().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].info.name, "gnu-name.txt");
    }

    #[test]
    fn octal_field_parses_base_eight_directly() {
        // "0000010" is decimal-looking but must be read as octal 10 = 8.
        assert_eq!(parse_octal_field(b"0000010\0", "size").unwrap(), 8);
    }

    #[test]
    fn round_trips_through_pax_format() {
        let long_name = "a/".repeat(60) + "file.txt";
        let info = EntryInfo {
            name: long_name.clone(),
            link_target: None,
            size: 3,
            kind: EntryKind::Regular,
            mtime: 1000,
            atime: None,
            ctime: None,
            uid: Some(1000),
            gid: Some(1000),
            uname: Some("me".to_string()),
            gname: Some("me".to_string()),
            mode: 0o644,
            extra: ExtraAttributes::None,
        };
        let archive = tar_create(&[(info, b"abc".to_vec())], TarFormat::Pax).unwrap();
        let entries: Vec<_> = tar_open(Cursor::new(archive)).collect::<Result<_, _>>().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].info.name, long_name);
        assert_eq!(entries[0].data, b"abc");
    }

    #[test]
    fn ustar_prefix_split_recombines_effective_name() {
        let name = format!("{}/{}", "d".repeat(150), "file.txt");
        assert!(split_ustar_name(&name).is_some());
    }

    #[test]
    fn two_zero_blocks_end_iteration() {
        let archive = vec![0u8; 2 * BLOCK_SIZE];
        let entries: Vec<_> = tar_open(Cursor::new(archive)).collect::<Result<_, _>>().unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn single_zero_block_is_not_end_of_archive() {
        let header = ustar_header("a.txt", 5, 0o644, 0);
        let mut archive = vec![0u8; BLOCK_SIZE];
        archive.extend_from_slice(&header);
        archive.extend_from_slice(b"Hello");
        let archive_len = archive.len();
        pad_to_block(&mut archive, archive_len);
        archive.resize(archive.len() + 2 * BLOCK_SIZE, 0);

        let entries: Vec<_> = tar_open(Cursor::new(archive)).collect::<Result<_, _>>().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].info.name, "a.txt");
        assert_eq!(entries[0].data, b"Hello");
    }
}
