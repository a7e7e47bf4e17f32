//! File specification — how callers name a (possibly multi-chunk) file.
//!
//! Three accepted spellings:
//!
//! * a local filesystem path: `recordings/walk.vrs`
//! * a JSON object:
//!   `{"chunks":["a.vrs","a.vrs_1"],"chunk_sizes":[123,45],"storage":"diskfile",
//!    "filename":"a.vrs","source_uri":"..."}`
//! * a URI: `<scheme>:<opaque>?k=v&...` where the scheme names an external
//!   file handler and the query parameters configure it.
//!
//! The JSON form round-trips losslessly: `parse(to_json(spec)) == spec`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VrsError};

/// Storage name for plain local files.
pub const STORAGE_DISK_FILE: &str = "diskfile";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileSpec {
    /// Chunk paths in logical order.  A single-chunk local file has one entry.
    #[serde(default)]
    pub chunks: Vec<String>,
    /// Chunk sizes when known (same order as `chunks`); may be empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_sizes: Vec<u64>,
    /// File handler name; `diskfile` for local storage.
    #[serde(default)]
    pub storage: String,
    /// Display name of the logical file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    /// The URI this spec was parsed from, when it came from one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_uri: String,
    /// URI query parameters (sorted for deterministic serialization).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

impl FileSpec {
    /// Spec for a single local file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let p = path.as_ref();
        Self {
            chunks: vec![p.to_string_lossy().into_owned()],
            storage: STORAGE_DISK_FILE.to_string(),
            filename: p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ..Self::default()
        }
    }

    /// Parse any of the three accepted spellings.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VrsError::InvalidParameter("empty file spec".into()));
        }
        if trimmed.starts_with('{') {
            return Self::from_json(trimmed);
        }
        if let Some((scheme, rest)) = split_uri(trimmed) {
            return Ok(Self::from_uri(scheme, rest, trimmed));
        }
        Ok(Self::from_path(trimmed))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut spec: FileSpec = serde_json::from_str(json)?;
        if spec.storage.is_empty() {
            spec.storage = STORAGE_DISK_FILE.to_string();
        }
        if spec.chunks.is_empty() {
            return Err(VrsError::InvalidParameter(
                "file spec JSON has no chunks".into(),
            ));
        }
        if !spec.chunk_sizes.is_empty() && spec.chunk_sizes.len() != spec.chunks.len() {
            return Err(VrsError::InvalidParameter(format!(
                "{} chunk_sizes for {} chunks",
                spec.chunk_sizes.len(),
                spec.chunks.len()
            )));
        }
        Ok(spec)
    }

    fn from_uri(scheme: &str, rest: &str, full: &str) -> Self {
        let (opaque, query) = match rest.split_once('?') {
            Some((o, q)) => (o, Some(q)),
            None => (rest, None),
        };
        let mut extras = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((k, v)) => extras.insert(k.to_string(), v.to_string()),
                    None => extras.insert(pair.to_string(), String::new()),
                };
            }
        }
        Self {
            chunks: vec![opaque.to_string()],
            storage: scheme.to_string(),
            source_uri: full.to_string(),
            extras,
            ..Self::default()
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn is_disk_file(&self) -> bool {
        self.storage == STORAGE_DISK_FILE
    }

    /// Total size across chunks, when sizes are known.
    pub fn known_size(&self) -> Option<u64> {
        if self.chunk_sizes.len() == self.chunks.len() && !self.chunks.is_empty() {
            Some(self.chunk_sizes.iter().sum())
        } else {
            None
        }
    }
}

/// Split `scheme:rest` when `scheme` is a plausible URI scheme.  Single-letter
/// schemes are rejected so Windows drive paths (`C:\...`) parse as paths.
fn split_uri(s: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = s.split_once(':')?;
    if scheme.len() < 2 {
        return None;
    }
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-')) {
        return None;
    }
    Some((scheme, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path() {
        let spec = FileSpec::parse("recordings/walk.vrs").unwrap();
        assert!(spec.is_disk_file());
        assert_eq!(spec.chunks, vec!["recordings/walk.vrs"]);
        assert_eq!(spec.filename, "walk.vrs");
    }

    #[test]
    fn json_round_trip() {
        let spec = FileSpec::parse(
            r#"{"chunks":["a.vrs","a.vrs_1"],"chunk_sizes":[100,50],"storage":"diskfile","filename":"a.vrs"}"#,
        )
        .unwrap();
        assert_eq!(spec.known_size(), Some(150));
        let back = FileSpec::parse(&spec.to_json()).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn json_size_mismatch_is_rejected() {
        assert!(FileSpec::parse(r#"{"chunks":["a"],"chunk_sizes":[1,2]}"#).is_err());
    }

    #[test]
    fn uri_with_query() {
        let spec = FileSpec::parse("gaia:1234567?cache=1&token=abc").unwrap();
        assert_eq!(spec.storage, "gaia");
        assert_eq!(spec.chunks, vec!["1234567"]);
        assert_eq!(spec.extras.get("cache").map(String::as_str), Some("1"));
        assert_eq!(spec.source_uri, "gaia:1234567?cache=1&token=abc");
    }

    #[test]
    fn windows_drive_is_a_path() {
        let spec = FileSpec::parse(r"C:\captures\walk.vrs").unwrap();
        assert!(spec.is_disk_file());
    }
}
