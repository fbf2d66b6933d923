//! ZIP container reader and writer, driven off the central directory
//! rather than a linear scan: the central directory is the authoritative
//! index, and each local header is only consulted to reconcile CRC/size
//! fields the data-descriptor flag left unresolved when it was written.

mod cp437;
mod extra;
mod header;

use std::io::{Read, Seek, SeekFrom};

use codecs::{deflate_compress_stored, deflate_decompress};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::debug;

use crate::entry::{Container, EntryInfo, EntryKind, ExtraAttributes};
use crate::error::ZipError;
use header::{CentralDirectoryHeader, EndOfCentralDirectory, GeneralPurposeFlags, LocalFileHeader};

/// Compression method a writer may target. The reader accepts any method
/// code (surfacing `UnsupportedCompression` for ones it can't decode) but
/// only these two can be produced by [`zip_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum ZipMethod {
    Store = 0,
    Deflate = 8,
}

fn decode_filename(bytes: &[u8], flags: GeneralPurposeFlags) -> Result<String, ZipError> {
    if flags.is_utf8() {
        String::from_utf8(bytes.to_vec()).map_err(|_| ZipError::BadFilenameEncoding)
    } else {
        Ok(cp437::decode(bytes))
    }
}

fn entry_kind_from_attrs(external_attrs: u32, name: &str, size: u64) -> EntryKind {
    let unix_mode = (external_attrs >> 16) & 0xFFFF;
    let file_type = unix_mode & 0xF000;
    if unix_mode != 0 {
        return match file_type {
            0x4000 => EntryKind::Directory,
            0xA000 => EntryKind::Symlink,
            0x2000 => EntryKind::CharDevice,
            0x6000 => EntryKind::BlockDevice,
            0x1000 => EntryKind::Fifo,
            _ => EntryKind::Regular,
        };
    }
    const DOS_DIRECTORY: u32 = 0x10;
    if external_attrs & DOS_DIRECTORY != 0 {
        return EntryKind::Directory;
    }
    if name.ends_with('/') && size == 0 {
        return EntryKind::Directory;
    }
    EntryKind::Regular
}

fn resolve_mtime(central: &CentralDirectoryHeader, parsed: &extra::ParsedExtra) -> i64 {
    parsed
        .ext_timestamp_mtime
        .or(parsed.ntfs_mtime)
        .unwrap_or_else(|| header::dos_to_unix_time(central.dos_date, central.dos_time))
}

fn entry_info_from_central(central: &CentralDirectoryHeader) -> Result<EntryInfo, ZipError> {
    let name = decode_filename(&central.filename, central.flags)?;
    let needs_c = central.compressed_size == 0xFFFF_FFFF;
    let needs_u = central.uncompressed_size == 0xFFFF_FFFF;
    let parsed = extra::parse_extra_fields(&central.extra, needs_u, needs_c, false);

    let uid = parsed.unix_new_uid.or(parsed.unix_old_uid.map(u32::from));
    let gid = parsed.unix_new_gid.or(parsed.unix_old_gid.map(u32::from));
    let atime = parsed.ext_timestamp_atime.or(parsed.ntfs_atime);
    let ctime = parsed.ext_timestamp_ctime.or(parsed.ntfs_ctime);
    let mtime = resolve_mtime(central, &parsed);
    let kind = entry_kind_from_attrs(central.external_attrs, &name, central.uncompressed_size);

    Ok(EntryInfo {
        name,
        link_target: None,
        size: central.uncompressed_size,
        kind,
        mtime,
        atime,
        ctime,
        uid,
        gid,
        uname: None,
        gname: None,
        mode: (central.external_attrs >> 16) & 0xFFF,
        extra: ExtraAttributes::Zip {
            dos_attributes: central.external_attrs & 0xFF,
            external_attributes: central.external_attrs,
            comment: (!central.comment.is_empty())
                .then(|| String::from_utf8_lossy(&central.comment).into_owned()),
            unrecognized_extra: parsed.unrecognized,
        },
    })
}

/// A parsed ZIP archive: the central directory is read eagerly at
/// `zip_open` time, but entry data is only decompressed on demand from
/// the underlying reader.
pub struct ZipArchive<R> {
    reader: R,
    central: Vec<CentralDirectoryHeader>,
}

pub fn zip_open<R: Read + Seek>(mut reader: R) -> Result<ZipArchive<R>, ZipError> {
    let eocd = EndOfCentralDirectory::find(&mut reader)?;
    reader.seek(SeekFrom::Start(u64::from(eocd.central_dir_offset)))?;
    let mut central = Vec::with_capacity(eocd.central_dir_entries as usize);
    for _ in 0..eocd.central_dir_entries {
        central.push(CentralDirectoryHeader::parse(&mut reader)?);
    }
    debug!(entries = central.len(), "zip central directory parsed");
    Ok(ZipArchive { reader, central })
}

impl<R: Read + Seek> ZipArchive<R> {
    pub fn len(&self) -> usize {
        self.central.len()
    }

    pub fn is_empty(&self) -> bool {
        self.central.is_empty()
    }

    pub fn entry_info(&self, index: usize) -> Result<EntryInfo, ZipError> {
        entry_info_from_central(&self.central[index])
    }

    /// Seeks to entry `index`'s local header, reconciles its fields
    /// against the central directory, decompresses its payload, and
    /// verifies the result's CRC32 and size.
    pub fn read_entry(&mut self, index: usize) -> Result<Vec<u8>, ZipError> {
        let central = &self.central[index];
        self.reader.seek(SeekFrom::Start(central.local_header_offset))?;
        let local = LocalFileHeader::parse(&mut self.reader)?;

        let central_name = decode_filename(&central.filename, central.flags)?;
        let local_name = decode_filename(&local.filename, local.flags)?;
        if central_name != local_name {
            return Err(ZipError::FilenameMismatch { local: local_name, central: central_name });
        }

        let (crc, compressed_size, uncompressed_size) = if local.flags.has_data_descriptor() {
            (central.crc32, central.compressed_size, central.uncompressed_size)
        } else {
            (local.crc32, local.compressed_size, local.uncompressed_size)
        };

        let mut compressed = vec![0u8; compressed_size as usize];
        self.reader.read_exact(&mut compressed)?;

        let data = match ZipMethod::try_from_primitive(local.method) {
            Ok(ZipMethod::Store) => compressed,
            Ok(ZipMethod::Deflate) => deflate_decompress(&compressed)?,
            Err(_) => return Err(ZipError::UnsupportedCompression(local.method)),
        };

        if data.len() as u64 != uncompressed_size {
            return Err(ZipError::SizeMismatch { expected: uncompressed_size, computed: data.len() as u64 });
        }
        let computed_crc = codecs::checksum::crc32(&data);
        if computed_crc != crc {
            return Err(ZipError::CrcMismatch { expected: crc, computed: computed_crc });
        }
        Ok(data)
    }
}

impl<R: Read + Seek> Container for ZipArchive<R> {
    type Entry = EntryInfo;
    type Error = ZipError;

    fn info(&self) -> Result<Vec<EntryInfo>, ZipError> {
        self.central.iter().map(entry_info_from_central).collect()
    }

    fn format_name(&self) -> &'static str {
        "zip"
    }
}

/// Lists every entry's attributes from an in-memory ZIP image without
/// reading any entry's file data.
pub fn zip_info(bytes: &[u8]) -> Result<Vec<EntryInfo>, ZipError> {
    let archive = zip_open(std::io::Cursor::new(bytes))?;
    archive.central.iter().map(entry_info_from_central).collect()
}

fn unix_mode_for_kind(kind: EntryKind, mode: u32) -> u32 {
    let file_type = match kind {
        EntryKind::Directory => 0x4000,
        EntryKind::Symlink => 0xA000,
        EntryKind::CharDevice => 0x2000,
        EntryKind::BlockDevice => 0x6000,
        EntryKind::Fifo => 0x1000,
        _ => 0x8000,
    };
    (file_type | (mode & 0xFFF)) << 16
}

/// Writes a ZIP archive with local headers, entry data, the central
/// directory, and a comment-free end-of-central-directory record. Every
/// entry is buffered fully before its header is written, so sizes and
/// CRCs are always known up front and no data descriptor is ever needed.
/// Zip64 is never emitted; this writer targets archives whose total size
/// and per-entry sizes fit in 32 bits.
pub fn zip_create(entries: &[(EntryInfo, Vec<u8>, ZipMethod)]) -> Result<Vec<u8>, ZipError> {
    let mut out = Vec::new();
    let mut central_records: Vec<Vec<u8>> = Vec::with_capacity(entries.len());

    for (info, data, method) in entries {
        let local_header_offset = out.len() as u32;
        let crc = codecs::checksum::crc32(data);
        let compressed = match method {
            ZipMethod::Store => data.clone(),
            ZipMethod::Deflate => deflate_compress_stored(data),
        };

        let name_bytes = info.name.as_bytes().to_vec();
        let flags = GeneralPurposeFlags::UTF8.bits();
        let method_code: u16 = (*method).into();
        let (dos_date, dos_time) = unix_time_to_dos(info.mtime);

        let mut local = Vec::new();
        local.extend_from_slice(&header::LOCAL_FILE_HEADER_SIG.to_le_bytes());
        local.extend_from_slice(&20u16.to_le_bytes());
        local.extend_from_slice(&flags.to_le_bytes());
        local.extend_from_slice(&method_code.to_le_bytes());
        local.extend_from_slice(&dos_time.to_le_bytes());
        local.extend_from_slice(&dos_date.to_le_bytes());
        local.extend_from_slice(&crc.to_le_bytes());
        local.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        local.extend_from_slice(&(data.len() as u32).to_le_bytes());
        local.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        local.extend_from_slice(&0u16.to_le_bytes());
        local.extend_from_slice(&name_bytes);
        out.extend_from_slice(&local);
        out.extend_from_slice(&compressed);

        let mut central = Vec::new();
        central.extend_from_slice(&header::CENTRAL_DIR_HEADER_SIG.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&flags.to_le_bytes());
        central.extend_from_slice(&method_code.to_le_bytes());
        central.extend_from_slice(&dos_time.to_le_bytes());
        central.extend_from_slice(&dos_date.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&unix_mode_for_kind(info.kind, info.mode).to_le_bytes());
        central.extend_from_slice(&local_header_offset.to_le_bytes());
        central.extend_from_slice(&name_bytes);
        central_records.push(central);
    }

    let central_dir_offset = out.len() as u32;
    for record in &central_records {
        out.extend_from_slice(record);
    }
    let central_dir_size = out.len() as u32 - central_dir_offset;

    let mut eocd = Vec::new();
    eocd.extend_from_slice(&header::END_OF_CENTRAL_DIR_SIG.to_le_bytes());
    eocd.extend_from_slice(&0u16.to_le_bytes());
    eocd.extend_from_slice(&0u16.to_le_bytes());
    eocd.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    eocd.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    eocd.extend_from_slice(&central_dir_size.to_le_bytes());
    eocd.extend_from_slice(&central_dir_offset.to_le_bytes());
    eocd.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&eocd);

    debug!(entries = entries.len(), len = out.len(), "zip archive written");
    Ok(out)
}

fn unix_time_to_dos(unix_seconds: i64) -> (u16, u16) {
    const SECONDS_PER_DAY: i64 = 86_400;
    let days = unix_seconds.div_euclid(SECONDS_PER_DAY);
    let secs_of_day = unix_seconds.rem_euclid(SECONDS_PER_DAY);

    let (year, month, day) = civil_from_days(days);
    let dos_date = (((year - 1980).max(0) as u16) << 9) | ((month as u16) << 5) | day as u16;

    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;
    let dos_time = ((hour as u16) << 11) | ((minute as u16) << 5) | (second / 2) as u16;
    (dos_date, dos_time)
}

/// Inverse of the days-from-civil algorithm used for DOS timestamp
/// decoding: days-since-epoch to a proleptic Gregorian `(year, month,
/// day)` triple.
fn civil_from_days(z: i64) -> (i32, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y as i32, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_single_stored_entry() {
        let info = EntryInfo {
            name: "a.txt".to_string(),
            link_target: None,
            size: 2,
            kind: EntryKind::Regular,
            mtime: 0,
            atime: None,
            ctime: None,
            uid: None,
            gid: None,
            uname: None,
            gname: None,
            mode: 0o644,
            extra: ExtraAttributes::None,
        };
        let archive_bytes = zip_create(&[(info, b"Hi".to_vec(), ZipMethod::Store)]).unwrap();

        let mut archive = zip_open(Cursor::new(archive_bytes)).unwrap();
        assert_eq!(archive.len(), 1);
        let entry_info = archive.entry_info(0).unwrap();
        assert_eq!(entry_info.name, "a.txt");
        assert_eq!(entry_info.size, 2);
        let data = archive.read_entry(0).unwrap();
        assert_eq!(data, b"Hi");
    }

    #[test]
    fn round_trips_a_deflated_entry() {
        let info = EntryInfo {
            name: "b.txt".to_string(),
            link_target: None,
            size: 11,
            kind: EntryKind::Regular,
            mtime: 0,
            atime: None,
            ctime: None,
            uid: None,
            gid: None,
            uname: None,
            gname: None,
            mode: 0o644,
            extra: ExtraAttributes::None,
        };
        let archive_bytes = zip_create(&[(info, b"Hello World".to_vec(), ZipMethod::Deflate)]).unwrap();
        let mut archive = zip_open(Cursor::new(archive_bytes)).unwrap();
        let data = archive.read_entry(0).unwrap();
        assert_eq!(data, b"Hello World");
    }

    #[test]
    fn cp437_decodes_high_half_bytes() {
        assert_eq!(cp437::decode(&[0x80]), "Ç");
    }

    #[test]
    fn no_eocd_is_rejected() {
        let data = vec![0u8; 10];
        assert!(matches!(zip_open(Cursor::new(data)), Err(ZipError::NoEndOfCentralDirectory)));
    }
}
