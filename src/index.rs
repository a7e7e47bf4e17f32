//! The record index — both the on-disk IndexRecord table and the in-memory
//! random-access index.
//!
//! # On-disk layout (IndexRecord block body)
//!
//! ```text
//! count:u32le, then count × 21-byte entries, then crc32:u32le
//!
//! entry: timestamp:f64le, offset:i64le, stream_id:u32le, record_type:u8
//! ```
//!
//! Entries are stored in the global sort order `(timestamp, stream id,
//! record type, offset)` — the same strict total order the writer emits
//! records in.  Rebuilding the index of an intact file reproduces the
//! existing table byte for byte.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, VrsError};
use crate::format::crc32;
use crate::stream_id::{RecordType, StreamId};

/// Byte size of one serialized index entry.
pub const INDEX_ENTRY_SIZE: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry {
    pub timestamp: f64,
    /// Absolute logical offset of the record's block header.
    pub offset: i64,
    pub stream_id: StreamId,
    pub record_type: RecordType,
}

impl IndexEntry {
    /// The strict total sort key.  Timestamps are compared with IEEE total
    /// ordering; the writer never produces NaN timestamps.
    pub fn sort_key(&self) -> (f64, StreamId, RecordType, i64) {
        (self.timestamp, self.stream_id, self.record_type, self.offset)
    }

    pub fn cmp_order(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp
            .total_cmp(&other.timestamp)
            .then_with(|| self.stream_id.cmp(&other.stream_id))
            .then_with(|| self.record_type.cmp(&other.record_type))
            .then_with(|| self.offset.cmp(&other.offset))
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.stream_id.as_u32().to_le_bytes());
        buf.push(self.record_type as u8);
    }
}

/// Serialize the index table (IndexRecord block body).
pub fn write_index<W: Write>(entries: &[IndexEntry], mut w: W) -> Result<()> {
    let mut body = Vec::with_capacity(entries.len() * INDEX_ENTRY_SIZE);
    for entry in entries {
        entry.write_to(&mut body);
    }
    w.write_u32::<LittleEndian>(entries.len() as u32)?;
    w.write_all(&body)?;
    w.write_u32::<LittleEndian>(crc32(&body))?;
    Ok(())
}

/// Serialized size of an index with `count` entries.
pub fn index_body_size(count: usize) -> u64 {
    4 + (count * INDEX_ENTRY_SIZE) as u64 + 4
}

/// Parse an IndexRecord block body.  A CRC mismatch or short table yields
/// `IndexCorrupt`; the caller is expected to fall back to an index rebuild.
pub fn read_index<R: Read>(mut r: R) -> Result<Vec<IndexEntry>> {
    let count = r
        .read_u32::<LittleEndian>()
        .map_err(|_| VrsError::IndexCorrupt("missing entry count".into()))? as usize;

    let mut body = vec![0u8; count * INDEX_ENTRY_SIZE];
    r.read_exact(&mut body)
        .map_err(|_| VrsError::IndexCorrupt(format!("table truncated ({count} entries declared)")))?;

    let stored_crc = r
        .read_u32::<LittleEndian>()
        .map_err(|_| VrsError::IndexCorrupt("missing table CRC".into()))?;
    let actual_crc = crc32(&body);
    if stored_crc != actual_crc {
        return Err(VrsError::IndexCorrupt(format!(
            "table CRC32 mismatch: expected {actual_crc:#010x}, got {stored_crc:#010x}"
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for chunk in body.chunks_exact(INDEX_ENTRY_SIZE) {
        let timestamp = f64::from_le_bytes(chunk[0..8].try_into().unwrap());
        let offset = i64::from_le_bytes(chunk[8..16].try_into().unwrap());
        let stream_id = StreamId::from_u32(u32::from_le_bytes(chunk[16..20].try_into().unwrap()));
        let record_type = RecordType::from_u8(chunk[20])
            .ok_or_else(|| VrsError::IndexCorrupt(format!("unknown record type {}", chunk[20])))?;
        entries.push(IndexEntry { timestamp, offset, stream_id, record_type });
    }
    Ok(entries)
}

/// Check that `entries` respect the global sort order.
pub fn is_sorted(entries: &[IndexEntry]) -> bool {
    entries
        .windows(2)
        .all(|w| w[0].cmp_order(&w[1]) != std::cmp::Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_entries() -> Vec<IndexEntry> {
        vec![
            IndexEntry {
                timestamp: 1.0,
                offset: 64,
                stream_id: StreamId::new(100, 1),
                record_type: RecordType::State,
            },
            IndexEntry {
                timestamp: 1.0,
                offset: 128,
                stream_id: StreamId::new(100, 1),
                record_type: RecordType::Configuration,
            },
            IndexEntry {
                timestamp: 2.5,
                offset: 192,
                stream_id: StreamId::new(100, 1),
                record_type: RecordType::Data,
            },
        ]
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let entries = sample_entries();
        let mut buf = Vec::new();
        write_index(&entries, &mut buf).unwrap();
        assert_eq!(buf.len() as u64, index_body_size(entries.len()));

        let back = read_index(Cursor::new(&buf)).unwrap();
        assert_eq!(back, entries);

        let mut buf2 = Vec::new();
        write_index(&back, &mut buf2).unwrap();
        assert_eq!(buf, buf2);
    }

    #[test]
    fn crc_mismatch_is_index_corrupt() {
        let mut buf = Vec::new();
        write_index(&sample_entries(), &mut buf).unwrap();
        let mid = buf.len() / 2;
        buf[mid] ^= 0xFF;
        assert!(matches!(
            read_index(Cursor::new(&buf)),
            Err(VrsError::IndexCorrupt(_))
        ));
    }

    #[test]
    fn truncated_table_is_index_corrupt() {
        let mut buf = Vec::new();
        write_index(&sample_entries(), &mut buf).unwrap();
        buf.truncate(buf.len() - 10);
        assert!(matches!(
            read_index(Cursor::new(&buf)),
            Err(VrsError::IndexCorrupt(_))
        ));
    }

    #[test]
    fn sort_order_breaks_ties_in_sequence() {
        let entries = sample_entries();
        assert!(is_sorted(&entries));
        // State(1) sorts before Configuration(2) at equal timestamps.
        let mut swapped = entries.clone();
        swapped.swap(0, 1);
        assert!(!is_sorted(&swapped));
    }
}
