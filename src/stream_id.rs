//! Stream identity — (type id, instance id) pairs, unique within a file.
//!
//! A [`StreamId`] names one sensor stream: the 16-bit type id is the device
//! category, the 16-bit instance id disambiguates multiple devices of the
//! same category inside one file.  Instance id 0 is reserved as invalid.
//!
//! The textual form is `"<type>-<instance>"`, e.g. `"1000-1"`.  That name is
//! what the CLI prints and parses; it is never written to disk (records carry
//! the packed `u32` form, see `format.rs`).

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Record type ──────────────────────────────────────────────────────────────

/// Role of a record within its stream.
///
/// The numeric value is the on-disk `record_type` byte and the tie-break key
/// of the global record sort `(timestamp, stream id, record type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordType {
    Undefined = 0,
    /// Snapshot of mutable device state, replayed to prime decoders.
    State = 1,
    /// Device configuration (resolution, calibration, sample rate...).
    Configuration = 2,
    /// The actual sensor payload stream.
    Data = 3,
    /// Late-added stream tags, serialized inline in the record stream.
    Tags = 4,
}

impl RecordType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RecordType::Undefined),
            1 => Some(RecordType::State),
            2 => Some(RecordType::Configuration),
            3 => Some(RecordType::Data),
            4 => Some(RecordType::Tags),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordType::Undefined => "undefined",
            RecordType::State => "state",
            RecordType::Configuration => "configuration",
            RecordType::Data => "data",
            RecordType::Tags => "tags",
        }
    }

    /// Parse a CLI name.  Accepts the full name or its first letter.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "undefined" => Some(RecordType::Undefined),
            "state" | "s" => Some(RecordType::State),
            "configuration" | "config" | "c" => Some(RecordType::Configuration),
            "data" | "d" => Some(RecordType::Data),
            "tags" | "t" => Some(RecordType::Tags),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Recordable type id ───────────────────────────────────────────────────────

/// Device category of a stream.  Plain 16-bit value; well-known categories
/// are listed below, everything else is user-defined.
pub type RecordableTypeId = u16;

/// Reserved: never a valid stream category.
pub const TYPE_ID_UNDEFINED: RecordableTypeId = 0;
/// Generic image stream (cameras).
pub const TYPE_ID_IMAGE_STREAM: RecordableTypeId = 100;
/// Generic audio stream (microphones).
pub const TYPE_ID_AUDIO_STREAM: RecordableTypeId = 101;
/// Generic motion/IMU stream.
pub const TYPE_ID_MOTION_STREAM: RecordableTypeId = 102;
/// First id of the range reserved for unit tests.
pub const TYPE_ID_UNIT_TEST: RecordableTypeId = 998;
pub const TYPE_ID_UNIT_TEST_2: RecordableTypeId = 999;

// ── StreamId ─────────────────────────────────────────────────────────────────

/// (type id, instance id) — unique per file, instance id > 0 when valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub type_id: RecordableTypeId,
    pub instance_id: u16,
}

impl StreamId {
    pub fn new(type_id: RecordableTypeId, instance_id: u16) -> Self {
        Self { type_id, instance_id }
    }

    /// The reserved invalid id (instance 0).
    pub fn invalid() -> Self {
        Self { type_id: TYPE_ID_UNDEFINED, instance_id: 0 }
    }

    pub fn is_valid(self) -> bool {
        self.instance_id > 0
    }

    /// Packed on-disk form: type id in the high 16 bits, instance id low.
    pub fn as_u32(self) -> u32 {
        (self.type_id as u32) << 16 | self.instance_id as u32
    }

    pub fn from_u32(v: u32) -> Self {
        Self { type_id: (v >> 16) as u16, instance_id: (v & 0xFFFF) as u16 }
    }

    /// Textual numeric name, `"<type>-<instance>"`.
    pub fn numeric_name(self) -> String {
        format!("{}-{}", self.type_id, self.instance_id)
    }

    /// Parse `"<type>-<instance>"`.  Returns `None` for anything else,
    /// including the partial forms the CLI filter grammar accepts (`T-`,
    /// `T+N`, `T-<flavor>`) — those are handled by the filter parser.
    pub fn parse(s: &str) -> Option<Self> {
        let (t, i) = s.split_once('-')?;
        let type_id = t.parse::<u16>().ok()?;
        let instance_id = i.parse::<u16>().ok()?;
        if instance_id == 0 {
            return None;
        }
        Some(Self { type_id, instance_id })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.type_id, self.instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks() {
        let id = StreamId::new(1000, 3);
        assert_eq!(StreamId::from_u32(id.as_u32()), id);
        assert_eq!(id.numeric_name(), "1000-3");
        assert_eq!(StreamId::parse("1000-3"), Some(id));
    }

    #[test]
    fn rejects_instance_zero() {
        assert!(!StreamId::invalid().is_valid());
        assert_eq!(StreamId::parse("1000-0"), None);
        assert_eq!(StreamId::parse("1000-"), None);
        assert_eq!(StreamId::parse("1000"), None);
    }

    #[test]
    fn record_type_sort_order() {
        assert!(RecordType::State < RecordType::Configuration);
        assert!(RecordType::Configuration < RecordType::Data);
        assert!(RecordType::Data < RecordType::Tags);
    }
}
