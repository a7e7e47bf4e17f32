//! Recordables — the write-side stream objects.
//!
//! A [`Stream`] owns a stream's identity (type id, registry-assigned
//! instance id, optional flavor), its user and VRS-internal tags, and its
//! [`RecordManager`].  Devices implement [`Recordable`] on top of one: the
//! writer calls the configuration/state hooks once per attach so every
//! stream starts with its decoder pre-roll, then the device produces data
//! records at its own pace.
//!
//! Instance ids come from a process-wide registry, so two devices of the
//! same type recording concurrently (even into different files) never
//! collide.  Tests reset the registry between cases.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use crate::compress::CompressionPreset;
use crate::datalayout::DataLayout;
use crate::error::Result;
use crate::record::RecordManager;
use crate::record_format::{data_layout_tag_name, record_format_tag_name, RecordFormat};
use crate::stream_id::{RecordType, RecordableTypeId, StreamId};

/// Tag name under which a stream's flavor is persisted.
pub const TAG_FLAVOR: &str = "VRS:flavor";

// ── Instance-id registry ─────────────────────────────────────────────────────

static INSTANCE_REGISTRY: Mutex<Option<HashMap<RecordableTypeId, BTreeSet<u16>>>> =
    Mutex::new(None);

/// Acquire the lowest free instance id (≥ 1) for `type_id`.
pub fn acquire_instance_id(type_id: RecordableTypeId) -> u16 {
    let mut guard = INSTANCE_REGISTRY.lock().unwrap();
    let map = guard.get_or_insert_with(HashMap::new);
    let used = map.entry(type_id).or_default();
    let mut candidate = 1u16;
    while used.contains(&candidate) {
        candidate += 1;
    }
    used.insert(candidate);
    candidate
}

/// Release an instance id so later streams can reuse it.
pub fn release_instance_id(type_id: RecordableTypeId, instance_id: u16) {
    let mut guard = INSTANCE_REGISTRY.lock().unwrap();
    if let Some(map) = guard.as_mut() {
        if let Some(used) = map.get_mut(&type_id) {
            used.remove(&instance_id);
        }
    }
}

/// Forget every assignment.  Test-only in spirit; takes effect immediately.
pub fn reset_instance_registry() {
    *INSTANCE_REGISTRY.lock().unwrap() = None;
}

// ── Stream ───────────────────────────────────────────────────────────────────

/// Identity, tags, record formats, and the record queue of one stream.
pub struct Stream {
    stream_id: StreamId,
    flavor: Option<String>,
    tags: Mutex<StreamTags>,
    manager: RecordManager,
}

#[derive(Debug, Clone, Default)]
pub struct StreamTags {
    pub user: BTreeMap<String, String>,
    pub vrs: BTreeMap<String, String>,
}

impl Stream {
    pub fn new(type_id: RecordableTypeId, compression: CompressionPreset) -> Self {
        Self::with_flavor(type_id, None, compression)
    }

    pub fn with_flavor(
        type_id: RecordableTypeId,
        flavor: Option<&str>,
        compression: CompressionPreset,
    ) -> Self {
        let stream_id = StreamId::new(type_id, acquire_instance_id(type_id));
        let mut tags = StreamTags::default();
        if let Some(flavor) = flavor {
            tags.vrs.insert(TAG_FLAVOR.to_string(), flavor.to_string());
        }
        Self {
            stream_id,
            flavor: flavor.map(String::from),
            tags: Mutex::new(tags),
            manager: RecordManager::new(stream_id, compression),
        }
    }

    pub fn id(&self) -> StreamId {
        self.stream_id
    }

    pub fn flavor(&self) -> Option<&str> {
        self.flavor.as_deref()
    }

    pub fn record_manager(&self) -> &RecordManager {
        &self.manager
    }

    /// Snapshot of the stream's tags.
    pub fn tags(&self) -> StreamTags {
        self.tags.lock().unwrap().clone()
    }

    pub fn set_tag(&self, name: &str, value: &str) {
        self.tags
            .lock()
            .unwrap()
            .user
            .insert(name.to_string(), value.to_string());
    }

    /// Register a record format for (type, version), along with the schemas
    /// of its data-layout blocks, as VRS-internal tags.  `layouts[i]` is the
    /// layout of the format's i-th data-layout block.
    pub fn add_record_format(
        &self,
        record_type: RecordType,
        format_version: u32,
        format: &RecordFormat,
        layouts: &[&DataLayout],
    ) -> Result<()> {
        format.validate_static_sizes()?;
        let mut tags = self.tags.lock().unwrap();
        tags.vrs.insert(
            record_format_tag_name(record_type, format_version),
            format.to_string(),
        );
        let mut layout_iter = layouts.iter();
        for (block_index, block) in format.blocks().iter().enumerate() {
            if block.content_type() == crate::record_format::ContentType::DataLayout {
                if let Some(layout) = layout_iter.next() {
                    tags.vrs.insert(
                        data_layout_tag_name(record_type, format_version, block_index),
                        layout.to_json_string(),
                    );
                }
            }
        }
        Ok(())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        release_instance_id(self.stream_id.type_id, self.stream_id.instance_id);
    }
}

// ── Recordable ───────────────────────────────────────────────────────────────

/// A device that records one stream.  The writer calls the two hooks when
/// the recordable is attached, guaranteeing a configuration and a state
/// record precede any data record of the stream.
pub trait Recordable: Send + Sync {
    fn stream(&self) -> &Stream;

    /// Enqueue one configuration record describing the device setup.
    fn create_configuration_record(&self) -> Result<()>;

    /// Enqueue one state record priming the decoder.
    fn create_state_record(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_id::TYPE_ID_UNIT_TEST;

    // Each test uses its own type id: the registry is process-wide and the
    // test harness runs cases concurrently.

    #[test]
    fn registry_assigns_lowest_free_ids() {
        let type_id = 900;
        let a = acquire_instance_id(type_id);
        let b = acquire_instance_id(type_id);
        assert_eq!((a, b), (1, 2));
        release_instance_id(type_id, 1);
        assert_eq!(acquire_instance_id(type_id), 1);
        assert_eq!(acquire_instance_id(type_id), 3);
    }

    #[test]
    fn streams_get_unique_ids_and_release_on_drop() {
        let type_id = 901;
        let s1 = Stream::new(type_id, CompressionPreset::None);
        let s2 = Stream::new(type_id, CompressionPreset::None);
        assert_ne!(s1.id(), s2.id());
        let freed = s1.id().instance_id;
        drop(s1);
        let s3 = Stream::new(type_id, CompressionPreset::None);
        assert_eq!(s3.id().instance_id, freed);
    }

    #[test]
    fn record_format_registration_writes_tags() {
        let stream = Stream::with_flavor(
            TYPE_ID_UNIT_TEST,
            Some("test/flavor"),
            CompressionPreset::None,
        );
        let mut builder = crate::datalayout::DataLayoutBuilder::new();
        let _counter = builder.value::<u32>("counter");
        let layout = builder.build();
        let format = RecordFormat::parse("data_layout+image/raw/10x20/pixel=grey8").unwrap();
        stream
            .add_record_format(RecordType::Data, 1, &format, &[&layout])
            .unwrap();

        let tags = stream.tags();
        assert_eq!(
            tags.vrs.get("RF:Data:1").map(String::as_str),
            Some("data_layout+image/raw/10x20/pixel=grey8")
        );
        assert!(tags.vrs.contains_key("DL:Data:1:0"));
        assert_eq!(tags.vrs.get(TAG_FLAVOR).map(String::as_str), Some("test/flavor"));
    }
}
