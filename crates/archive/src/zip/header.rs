//! Fixed-width portions of the three ZIP record types this reader cares
//! about, plus the backward scan that locates the end-of-central-directory
//! record.

use std::io::{Read, Seek, SeekFrom};

use bitflags::bitflags;

use crate::error::ZipError;

pub const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4B50;
pub const CENTRAL_DIR_HEADER_SIG: u32 = 0x0201_4B50;
pub const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4B50;

bitflags! {
    /// General-purpose bit flags from local and central directory headers.
    /// Only the two bits this reader acts on are named; the rest round-trip
    /// opaquely through the raw `bits()` value stored alongside.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GeneralPurposeFlags: u16 {
        const DATA_DESCRIPTOR = 1 << 3;
        const UTF8 = 1 << 11;
    }
}

impl GeneralPurposeFlags {
    pub fn has_data_descriptor(self) -> bool {
        self.contains(GeneralPurposeFlags::DATA_DESCRIPTOR)
    }

    pub fn is_utf8(self) -> bool {
        self.contains(GeneralPurposeFlags::UTF8)
    }
}

const EOCD_FIXED_SIZE: usize = 22;
const MAX_COMMENT_LEN: usize = 65_535;

#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub central_dir_entries: u16,
    pub central_dir_size: u32,
    pub central_dir_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    /// Scans backward from the end of the file for the EOCD signature,
    /// the way a trailing comment of unknown length forces every reader
    /// to: the record's own length is fixed, but the comment after it is
    /// not, so the signature can be anywhere in the last `22 + 65535`
    /// bytes.
    pub fn find<R: Read + Seek>(reader: &mut R) -> Result<Self, ZipError> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        let search_window = (EOCD_FIXED_SIZE + MAX_COMMENT_LEN).min(file_len as usize);
        let start = file_len - search_window as u64;
        reader.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; search_window];
        reader.read_exact(&mut buf)?;

        let sig = END_OF_CENTRAL_DIR_SIG.to_le_bytes();
        let found = buf
            .windows(4)
            .rposition(|w| w == sig)
            .ok_or(ZipError::NoEndOfCentralDirectory)?;

        let record = &buf[found..];
        if record.len() < EOCD_FIXED_SIZE {
            return Err(ZipError::NoEndOfCentralDirectory);
        }
        let central_dir_entries = u16::from_le_bytes([record[10], record[11]]);
        let central_dir_size = u32::from_le_bytes(record[12..16].try_into().unwrap());
        let central_dir_offset = u32::from_le_bytes(record[16..20].try_into().unwrap());
        let comment_len = u16::from_le_bytes([record[20], record[21]]) as usize;
        let comment = record.get(22..22 + comment_len).unwrap_or(&[]).to_vec();

        Ok(EndOfCentralDirectory { central_dir_entries, central_dir_size, central_dir_offset, comment })
    }
}

#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: GeneralPurposeFlags,
    pub method: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_number_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub local_header_offset: u64,
    pub filename: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self, ZipError> {
        let mut fixed = [0u8; 42];
        reader.read_exact(&mut fixed)?;
        let sig = u32::from_le_bytes(fixed[0..4].try_into().unwrap());
        if sig != CENTRAL_DIR_HEADER_SIG {
            return Err(ZipError::WrongSignature { expected: CENTRAL_DIR_HEADER_SIG, found: sig });
        }
        let version_made_by = u16::from_le_bytes(fixed[4..6].try_into().unwrap());
        let version_needed = u16::from_le_bytes(fixed[6..8].try_into().unwrap());
        let flags = GeneralPurposeFlags::from_bits_retain(u16::from_le_bytes(fixed[8..10].try_into().unwrap()));
        let method = u16::from_le_bytes(fixed[10..12].try_into().unwrap());
        let dos_time = u16::from_le_bytes(fixed[12..14].try_into().unwrap());
        let dos_date = u16::from_le_bytes(fixed[14..16].try_into().unwrap());
        let crc32 = u32::from_le_bytes(fixed[16..20].try_into().unwrap());
        let compressed_size_32 = u32::from_le_bytes(fixed[20..24].try_into().unwrap());
        let uncompressed_size_32 = u32::from_le_bytes(fixed[24..28].try_into().unwrap());
        let filename_len = u16::from_le_bytes(fixed[28..30].try_into().unwrap()) as usize;
        let extra_len = u16::from_le_bytes(fixed[30..32].try_into().unwrap()) as usize;
        let comment_len = u16::from_le_bytes(fixed[32..34].try_into().unwrap()) as usize;
        let disk_number_start = u16::from_le_bytes(fixed[34..36].try_into().unwrap());
        let internal_attrs = u16::from_le_bytes(fixed[36..38].try_into().unwrap());
        let external_attrs = u32::from_le_bytes(fixed[38..42].try_into().unwrap());

        let mut rest = vec![0u8; 4 + filename_len + extra_len + comment_len];
        reader.read_exact(&mut rest)?;
        let local_header_offset_32 = u32::from_le_bytes(rest[0..4].try_into().unwrap());
        let filename = rest[4..4 + filename_len].to_vec();
        let extra = rest[4 + filename_len..4 + filename_len + extra_len].to_vec();
        let comment = rest[4 + filename_len + extra_len..].to_vec();

        let needs_zip64_compressed = compressed_size_32 == 0xFFFF_FFFF;
        let needs_zip64_uncompressed = uncompressed_size_32 == 0xFFFF_FFFF;
        let needs_zip64_offset = local_header_offset_32 == 0xFFFF_FFFF;
        let parsed_extra = super::extra::parse_extra_fields(
            &extra,
            needs_zip64_uncompressed,
            needs_zip64_compressed,
            needs_zip64_offset,
        );

        Ok(CentralDirectoryHeader {
            version_made_by,
            version_needed,
            flags,
            method,
            dos_time,
            dos_date,
            crc32,
            compressed_size: parsed_extra.zip64_compressed_size.unwrap_or(u64::from(compressed_size_32)),
            uncompressed_size: parsed_extra.zip64_uncompressed_size.unwrap_or(u64::from(uncompressed_size_32)),
            disk_number_start,
            internal_attrs,
            external_attrs,
            local_header_offset: parsed_extra.zip64_local_header_offset.unwrap_or(u64::from(local_header_offset_32)),
            filename,
            extra,
            comment,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub flags: GeneralPurposeFlags,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub filename: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self, ZipError> {
        let mut fixed = [0u8; 30];
        reader.read_exact(&mut fixed)?;
        let sig = u32::from_le_bytes(fixed[0..4].try_into().unwrap());
        if sig != LOCAL_FILE_HEADER_SIG {
            return Err(ZipError::WrongSignature { expected: LOCAL_FILE_HEADER_SIG, found: sig });
        }
        let flags = GeneralPurposeFlags::from_bits_retain(u16::from_le_bytes(fixed[6..8].try_into().unwrap()));
        let method = u16::from_le_bytes(fixed[8..10].try_into().unwrap());
        let crc32 = u32::from_le_bytes(fixed[14..18].try_into().unwrap());
        let compressed_size_32 = u32::from_le_bytes(fixed[18..22].try_into().unwrap());
        let uncompressed_size_32 = u32::from_le_bytes(fixed[22..26].try_into().unwrap());
        let filename_len = u16::from_le_bytes(fixed[26..28].try_into().unwrap()) as usize;
        let extra_len = u16::from_le_bytes(fixed[28..30].try_into().unwrap()) as usize;

        let mut rest = vec![0u8; filename_len + extra_len];
        reader.read_exact(&mut rest)?;
        let filename = rest[..filename_len].to_vec();
        let extra = rest[filename_len..].to_vec();

        let needs_zip64_compressed = compressed_size_32 == 0xFFFF_FFFF;
        let needs_zip64_uncompressed = uncompressed_size_32 == 0xFFFF_FFFF;
        let parsed_extra =
            super::extra::parse_extra_fields(&extra, needs_zip64_uncompressed, needs_zip64_compressed, false);

        Ok(LocalFileHeader {
            flags,
            method,
            crc32,
            compressed_size: parsed_extra.zip64_compressed_size.unwrap_or(u64::from(compressed_size_32)),
            uncompressed_size: parsed_extra.zip64_uncompressed_size.unwrap_or(u64::from(uncompressed_size_32)),
            filename,
            extra,
        })
    }
}

/// Converts DOS date/time fields (as packed in both local and central
/// headers) into Unix seconds, assuming UTC.
pub fn dos_to_unix_time(date: u16, time: u16) -> i64 {
    let day = (date & 0x1F) as u32;
    let month = ((date >> 5) & 0x0F) as u32;
    let year = 1980 + ((date >> 9) & 0x7F) as i32;
    let second = ((time & 0x1F) * 2) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let hour = ((time >> 11) & 0x1F) as u32;

    let days = days_from_civil(year, month, day);
    i64::from(days) * 86_400 + i64::from(hour) * 3600 + i64::from(minute) * 60 + i64::from(second)
}

/// Howard Hinnant's days-from-civil algorithm, proleptic Gregorian,
/// days since the Unix epoch.
fn days_from_civil(y: i32, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = (m as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    i64::from(era) * 146_097 + doe - 719_468
}
