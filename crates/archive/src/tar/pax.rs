//! PAX extended header records: `LENGTH KEY=VALUE\n`, where `LENGTH` in
//! decimal counts its own digits, the space, and the trailing newline.

use std::collections::BTreeMap;

use crate::error::TarError;

/// Attribute overrides carried by a PAX extended header. Local records
/// apply to the single entry that follows and are then discarded; global
/// records persist across entries until superseded by a later global
/// header. Modeled as an explicit state object rather than hidden
/// reader-internal fields so the "what overrides are active right now"
/// question has one obvious place to look.
#[derive(Debug, Clone, Default)]
pub struct PaxOverrides {
    pub path: Option<String>,
    pub linkpath: Option<String>,
    pub size: Option<u64>,
    pub mtime: Option<f64>,
    pub atime: Option<f64>,
    pub ctime: Option<f64>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub uname: Option<String>,
    pub gname: Option<String>,
    pub charset: Option<String>,
    pub comment: Option<String>,
    pub hdrcharset: Option<String>,
    /// Keys this library doesn't interpret, kept verbatim.
    pub unrecognized: BTreeMap<String, String>,
}

impl PaxOverrides {
    /// Merges `other` on top of `self`, with `other`'s fields taking
    /// priority wherever set. Used to apply a local header over whatever
    /// global overrides are currently active.
    pub fn merged_over(&self, other: &PaxOverrides) -> PaxOverrides {
        PaxOverrides {
            path: other.path.clone().or_else(|| self.path.clone()),
            linkpath: other.linkpath.clone().or_else(|| self.linkpath.clone()),
            size: other.size.or(self.size),
            mtime: other.mtime.or(self.mtime),
            atime: other.atime.or(self.atime),
            ctime: other.ctime.or(self.ctime),
            uid: other.uid.or(self.uid),
            gid: other.gid.or(self.gid),
            uname: other.uname.clone().or_else(|| self.uname.clone()),
            gname: other.gname.clone().or_else(|| self.gname.clone()),
            charset: other.charset.clone().or_else(|| self.charset.clone()),
            comment: other.comment.clone().or_else(|| self.comment.clone()),
            hdrcharset: other.hdrcharset.clone().or_else(|| self.hdrcharset.clone()),
            unrecognized: {
                let mut merged = self.unrecognized.clone();
                merged.extend(other.unrecognized.clone());
                merged
            },
        }
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), TarError> {
        match key {
            "path" => self.path = Some(value),
            "linkpath" => self.linkpath = Some(value),
            "size" => self.size = Some(value.parse().map_err(|_| TarError::MalformedPaxRecord)?),
            "mtime" => self.mtime = Some(value.parse().map_err(|_| TarError::MalformedPaxRecord)?),
            "atime" => self.atime = Some(value.parse().map_err(|_| TarError::MalformedPaxRecord)?),
            "ctime" => self.ctime = Some(value.parse().map_err(|_| TarError::MalformedPaxRecord)?),
            "uid" => self.uid = Some(value.parse().map_err(|_| TarError::MalformedPaxRecord)?),
            "gid" => self.gid = Some(value.parse().map_err(|_| TarError::MalformedPaxRecord)?),
            "uname" => self.uname = Some(value),
            "gname" => self.gname = Some(value),
            "charset" => self.charset = Some(value),
            "comment" => self.comment = Some(value),
            "hdrcharset" => self.hdrcharset = Some(value),
            other => {
                self.unrecognized.insert(other.to_string(), value);
            }
        }
        Ok(())
    }
}

/// Parses a PAX extended-header payload (the decompressed data of a `g`
/// or `x` typeflag entry) into its key/value overrides.
pub fn parse_pax_records(payload: &[u8]) -> Result<PaxOverrides, TarError> {
    let text = std::str::from_utf8(payload).map_err(|_| TarError::PaxNotUtf8)?;
    let mut overrides = PaxOverrides::default();
    let mut rest = text;
    while !rest.is_empty() {
        let space = rest.find(' ').ok_or(TarError::MalformedPaxRecord)?;
        let length: usize = rest[..space].parse().map_err(|_| TarError::MalformedPaxRecord)?;
        if length == 0 || length > rest.len() {
            return Err(TarError::MalformedPaxRecord);
        }
        let record = &rest[..length];
        let body = &record[space + 1..];
        let body = body.strip_suffix('\n').ok_or(TarError::MalformedPaxRecord)?;
        let eq = body.find('=').ok_or(TarError::MalformedPaxRecord)?;
        let key = &body[..eq];
        let value = &body[eq + 1..];
        overrides.set(key, value.to_string())?;
        rest = &rest[length..];
    }
    Ok(overrides)
}
