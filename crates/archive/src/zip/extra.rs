//! ZIP extra-field records: `(tag: u16 LE, length: u16 LE, payload)`
//! sequences trailing both local and central directory headers.

/// Decoded fields drawn from recognized extra-field tags. Unknown tags
/// are kept verbatim on [`crate::entry::ExtraAttributes::Zip`] rather
/// than dropped.
#[derive(Debug, Clone, Default)]
pub struct ParsedExtra {
    pub zip64_uncompressed_size: Option<u64>,
    pub zip64_compressed_size: Option<u64>,
    pub zip64_local_header_offset: Option<u64>,
    pub ext_timestamp_mtime: Option<i64>,
    pub ext_timestamp_atime: Option<i64>,
    pub ext_timestamp_ctime: Option<i64>,
    pub ntfs_mtime: Option<i64>,
    pub ntfs_atime: Option<i64>,
    pub ntfs_ctime: Option<i64>,
    pub unix_new_uid: Option<u32>,
    pub unix_new_gid: Option<u32>,
    pub unix_old_uid: Option<u16>,
    pub unix_old_gid: Option<u16>,
    pub unrecognized: Vec<(u16, Vec<u8>)>,
}

const TAG_ZIP64: u16 = 0x0001;
const TAG_EXTENDED_TIMESTAMP: u16 = 0x5455;
const TAG_NTFS: u16 = 0x000A;
const TAG_UNIX_NEW: u16 = 0x7875;
const TAG_UNIX_OLD: u16 = 0x5855;

/// Windows FILETIME epoch (1601-01-01) to Unix epoch (1970-01-01), in
/// 100-nanosecond ticks.
const NTFS_EPOCH_OFFSET_TICKS: i64 = 116_444_736_000_000_000;

fn read_u16(b: &[u8]) -> Option<u16> {
    b.get(0..2).map(|s| u16::from_le_bytes([s[0], s[1]]))
}

fn read_u32(b: &[u8]) -> Option<u32> {
    b.get(0..4).map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

fn read_u64(b: &[u8]) -> Option<u64> {
    b.get(0..8).map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}

fn read_i64(b: &[u8]) -> Option<i64> {
    read_u64(b).map(|v| v as i64)
}

/// Parses every `(tag, len, payload)` record from an extra-field blob.
/// `needs_zip64_uncompressed`/`needs_zip64_compressed`/`needs_zip64_offset`
/// say which 32-bit fields were `0xFFFFFFFF` in the fixed part of the
/// header, since the Zip64 record only stores replacements for those,
/// in that fixed order, rather than being self-describing.
pub fn parse_extra_fields(
    data: &[u8],
    needs_zip64_uncompressed: bool,
    needs_zip64_compressed: bool,
    needs_zip64_offset: bool,
) -> ParsedExtra {
    let mut parsed = ParsedExtra::default();
    let mut pos = 0usize;
    while pos + 4 <= data.len() {
        let tag = read_u16(&data[pos..]).unwrap();
        let len = read_u16(&data[pos + 2..]).unwrap() as usize;
        pos += 4;
        if pos + len > data.len() {
            break;
        }
        let payload = &data[pos..pos + len];
        pos += len;

        match tag {
            TAG_ZIP64 => {
                let mut cursor = 0usize;
                if needs_zip64_uncompressed {
                    if let Some(v) = read_u64(&payload[cursor..]) {
                        parsed.zip64_uncompressed_size = Some(v);
                        cursor += 8;
                    }
                }
                if needs_zip64_compressed {
                    if let Some(v) = read_u64(&payload[cursor..]) {
                        parsed.zip64_compressed_size = Some(v);
                        cursor += 8;
                    }
                }
                if needs_zip64_offset {
                    if let Some(v) = read_u64(&payload[cursor..]) {
                        parsed.zip64_local_header_offset = Some(v);
                    }
                }
            }
            TAG_EXTENDED_TIMESTAMP => {
                if payload.is_empty() {
                    continue;
                }
                let flags = payload[0];
                let mut cursor = 1usize;
                if flags & 0x01 != 0 {
                    if let Some(v) = read_u32(&payload[cursor..]) {
                        parsed.ext_timestamp_mtime = Some(i64::from(v));
                        cursor += 4;
                    }
                }
                if flags & 0x02 != 0 {
                    if let Some(v) = read_u32(&payload[cursor..]) {
                        parsed.ext_timestamp_atime = Some(i64::from(v));
                        cursor += 4;
                    }
                }
                if flags & 0x04 != 0 {
                    if let Some(v) = read_u32(&payload[cursor..]) {
                        parsed.ext_timestamp_ctime = Some(i64::from(v));
                    }
                }
            }
            TAG_NTFS => {
                // 4 reserved bytes, then a sequence of (tag=0x0001, size=24,
                // mtime, atime, ctime as 64-bit FILETIME values).
                if payload.len() >= 4 + 4 + 24 {
                    let attr_tag = read_u16(&payload[4..]).unwrap_or(0);
                    if attr_tag == 0x0001 {
                        let base = 8;
                        if let Some(ticks) = read_i64(&payload[base..]) {
                            parsed.ntfs_mtime = Some((ticks - NTFS_EPOCH_OFFSET_TICKS) / 10_000_000);
                        }
                        if let Some(ticks) = read_i64(&payload[base + 8..]) {
                            parsed.ntfs_atime = Some((ticks - NTFS_EPOCH_OFFSET_TICKS) / 10_000_000);
                        }
                        if let Some(ticks) = read_i64(&payload[base + 16..]) {
                            parsed.ntfs_ctime = Some((ticks - NTFS_EPOCH_OFFSET_TICKS) / 10_000_000);
                        }
                    }
                }
            }
            TAG_UNIX_NEW => {
                // Layout: version(1) uid_size(1) uid gid_size(1) gid;
                // version 1 is the only one ever defined.
                if payload.first() == Some(&1) {
                    let mut cursor = 1usize;
                    let uid_size = payload.get(cursor).copied().unwrap_or(0) as usize;
                    cursor += 1;
                    if let Some(bytes) = payload.get(cursor..cursor + uid_size) {
                        parsed.unix_new_uid = Some(le_bytes_to_u32(bytes));
                        cursor += uid_size;
                    }
                    let gid_size = payload.get(cursor).copied().unwrap_or(0) as usize;
                    cursor += 1;
                    if let Some(bytes) = payload.get(cursor..cursor + gid_size) {
                        parsed.unix_new_gid = Some(le_bytes_to_u32(bytes));
                    }
                }
            }
            TAG_UNIX_OLD => {
                // Bytes 0..8 are atime/mtime, superseded here by Extended
                // Timestamp and NTFS; only the uid/gid this tag uniquely
                // provides are kept.
                if payload.len() >= 12 {
                    parsed.unix_old_uid = read_u16(&payload[8..]);
                    parsed.unix_old_gid = read_u16(&payload[10..]);
                }
            }
            other => parsed.unrecognized.push((other, payload.to_vec())),
        }
    }
    parsed
}

fn le_bytes_to_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    u32::from_le_bytes(buf)
}
