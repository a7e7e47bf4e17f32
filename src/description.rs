//! The Description block — file tags and the stream roster as JSON.
//!
//! Body layout: `json_len:u32le`, UTF-8 JSON, `crc32:u32le` over the JSON
//! bytes.  The same JSON shape (one stream's entry) is the payload of a
//! `Tags` record when a stream joins after records already flowed.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VrsError};
use crate::format::crc32;
use crate::stream_id::StreamId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDescription {
    pub type_id: u16,
    pub instance_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    /// Free-form user tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// VRS-internal tags: record formats (`RF:`), layout schemas (`DL:`),
    /// the flavor tag.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vrs_tags: BTreeMap<String, String>,
}

impl StreamDescription {
    pub fn stream_id(&self) -> StreamId {
        StreamId::new(self.type_id, self.instance_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDescription {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<StreamDescription>,
}

impl FileDescription {
    pub fn find_stream(&self, id: StreamId) -> Option<&StreamDescription> {
        self.streams.iter().find(|s| s.stream_id() == id)
    }
}

/// Serialize a length-prefixed, CRC-protected JSON body.
pub fn write_json_body<W: Write, T: Serialize>(value: &T, mut w: W) -> Result<u64> {
    let json = serde_json::to_vec(value)?;
    w.write_u32::<LittleEndian>(json.len() as u32)?;
    w.write_all(&json)?;
    w.write_u32::<LittleEndian>(crc32(&json))?;
    Ok(4 + json.len() as u64 + 4)
}

/// Parse a body written by [`write_json_body`].
pub fn read_json_body<R: Read, T: for<'de> Deserialize<'de>>(mut r: R) -> Result<T> {
    let len = r
        .read_u32::<LittleEndian>()
        .map_err(|_| VrsError::InvalidFileFormat("description body truncated".into()))?
        as usize;
    let mut json = vec![0u8; len];
    r.read_exact(&mut json)
        .map_err(|_| VrsError::InvalidFileFormat("description JSON truncated".into()))?;
    let stored = r
        .read_u32::<LittleEndian>()
        .map_err(|_| VrsError::InvalidFileFormat("description CRC missing".into()))?;
    let actual = crc32(&json);
    if stored != actual {
        return Err(VrsError::InvalidFileFormat(format!(
            "description CRC32 mismatch: expected {actual:#010x}, got {stored:#010x}"
        )));
    }
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> FileDescription {
        let mut description = FileDescription::default();
        description
            .file_tags
            .insert("session_id".into(), "walk-42".into());
        let mut stream = StreamDescription {
            type_id: 100,
            instance_id: 1,
            flavor: Some("camera/slam".into()),
            ..StreamDescription::default()
        };
        stream.tags.insert("position".into(), "left".into());
        stream
            .vrs_tags
            .insert("RF:Data:1".into(), "data_layout+image/raw".into());
        description.streams.push(stream);
        description
    }

    #[test]
    fn round_trip() {
        let description = sample();
        let mut buf = Vec::new();
        let written = write_json_body(&description, &mut buf).unwrap();
        assert_eq!(written as usize, buf.len());
        let back: FileDescription = read_json_body(Cursor::new(&buf)).unwrap();
        assert_eq!(back, description);
        assert_eq!(
            back.find_stream(StreamId::new(100, 1)).unwrap().flavor.as_deref(),
            Some("camera/slam")
        );
    }

    #[test]
    fn corrupted_json_is_rejected() {
        let mut buf = Vec::new();
        write_json_body(&sample(), &mut buf).unwrap();
        buf[6] ^= 0xFF;
        assert!(matches!(
            read_json_body::<_, FileDescription>(Cursor::new(&buf)),
            Err(VrsError::InvalidFileFormat(_))
        ));
    }
}
