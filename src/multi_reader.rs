//! MultiRecordFileReader — one merged, globally-ordered view over several
//! related files.
//!
//! Files are *related* when their [`RELATED_FILE_TAGS`] agree: for every tag
//! in the set, all files carrying it must carry the same value.  Opening an
//! unrelated file in the same set fails with `UnsupportedFeature`.
//!
//! Colliding StreamIds are disambiguated with a stable rule: walking files
//! in input order, each stream keeps its id when still free, otherwise it
//! receives the lowest free instance id of its type.  The original id stays
//! reachable through the back-mapping, so per-file tags resolve unchanged.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::description::StreamDescription;
use crate::error::{Result, VrsError};
use crate::index::IndexEntry;
use crate::reader::{RecordFileReader, StreamInfo, StreamPlayer};
use crate::stream_id::{RecordType, StreamId};

/// File tags that must agree across the files of one multi-file session.
pub const RELATED_FILE_TAGS: &[&str] = &["session_id"];

/// One record of the merged sequence.
#[derive(Debug, Clone, Copy)]
pub struct MergedEntry {
    /// Stream id in the merged (disambiguated) namespace.
    pub stream_id: StreamId,
    pub timestamp: f64,
    pub record_type: RecordType,
    /// Which input file the record lives in.
    pub reader_index: usize,
    /// The record's index entry within that file.
    pub entry: IndexEntry,
}

pub struct MultiRecordFileReader {
    readers: Vec<RecordFileReader>,
    index: Vec<MergedEntry>,
    /// (file, original id) → merged id.
    forward: HashMap<(usize, StreamId), StreamId>,
    /// merged id → (file, original id).
    back: HashMap<StreamId, (usize, StreamId)>,
}

impl std::fmt::Debug for MultiRecordFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiRecordFileReader")
            .field("readers", &self.readers.len())
            .field("index", &self.index)
            .field("forward", &self.forward)
            .field("back", &self.back)
            .finish()
    }
}

impl MultiRecordFileReader {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        if paths.is_empty() {
            return Err(VrsError::InvalidParameter("no files to open".into()));
        }
        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            readers.push(RecordFileReader::open(path)?);
        }
        Self::from_readers(readers)
    }

    pub fn from_readers(readers: Vec<RecordFileReader>) -> Result<Self> {
        check_related(&readers)?;

        // Stable stream-id assignment, input-file order.
        let mut used: HashMap<u16, BTreeSet<u16>> = HashMap::new();
        let mut forward = HashMap::new();
        let mut back = HashMap::new();
        for (reader_index, reader) in readers.iter().enumerate() {
            for original in reader.stream_ids() {
                let taken = used.entry(original.type_id).or_default();
                let merged = if !taken.contains(&original.instance_id) {
                    original
                } else {
                    let mut candidate = 1u16;
                    while taken.contains(&candidate) {
                        candidate += 1;
                    }
                    StreamId::new(original.type_id, candidate)
                };
                taken.insert(merged.instance_id);
                forward.insert((reader_index, original), merged);
                back.insert(merged, (reader_index, original));
            }
        }

        // Merge the per-file indexes into one global order.
        let mut index = Vec::new();
        for (reader_index, reader) in readers.iter().enumerate() {
            for entry in reader.index() {
                let merged_id = forward[&(reader_index, entry.stream_id)];
                index.push(MergedEntry {
                    stream_id: merged_id,
                    timestamp: entry.timestamp,
                    record_type: entry.record_type,
                    reader_index,
                    entry: *entry,
                });
            }
        }
        index.sort_by(|a, b| {
            a.timestamp
                .total_cmp(&b.timestamp)
                .then_with(|| a.stream_id.cmp(&b.stream_id))
                .then_with(|| a.record_type.cmp(&b.record_type))
                .then_with(|| a.reader_index.cmp(&b.reader_index))
                .then_with(|| a.entry.offset.cmp(&b.entry.offset))
        });

        Ok(Self { readers, index, forward, back })
    }

    pub fn file_count(&self) -> usize {
        self.readers.len()
    }

    pub fn record_count(&self) -> usize {
        self.index.len()
    }

    /// Merged stream ids, sorted.
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.back.keys().copied().collect();
        ids.sort();
        ids
    }

    /// The merged id a file's original stream got, if any.
    pub fn merged_id(&self, reader_index: usize, original: StreamId) -> Option<StreamId> {
        self.forward.get(&(reader_index, original)).copied()
    }

    /// (file index, original id) behind a merged id.
    pub fn original_id(&self, merged: StreamId) -> Option<(usize, StreamId)> {
        self.back.get(&merged).copied()
    }

    /// The ORIGINAL stream's tags, reached through the merged id.
    pub fn get_tags(&self, merged: StreamId) -> Option<&StreamDescription> {
        let (reader_index, original) = self.original_id(merged)?;
        self.readers[reader_index].get_tags(original)
    }

    pub fn stream_info(&self, merged: StreamId) -> Option<&StreamInfo> {
        let (reader_index, original) = self.original_id(merged)?;
        self.readers[reader_index].stream_info(original)
    }

    pub fn merged_index(&self) -> &[MergedEntry] {
        &self.index
    }

    pub fn reader(&self, reader_index: usize) -> Option<&RecordFileReader> {
        self.readers.get(reader_index)
    }

    /// Raw (still compressed) payload of one merged record.
    pub fn load_record_verbatim(
        &mut self,
        merged: &MergedEntry,
    ) -> Result<(crate::format::RecordProlog, Vec<u8>)> {
        self.readers[merged.reader_index].load_record_verbatim(&merged.entry)
    }

    pub fn get_record_global(&self, nth: usize) -> Option<&MergedEntry> {
        self.index.get(nth)
    }

    /// Register a player for a merged stream id.
    pub fn set_stream_player(&mut self, merged: StreamId, player: Box<dyn StreamPlayer>) -> Result<()> {
        let (reader_index, original) = self
            .original_id(merged)
            .ok_or_else(|| VrsError::StreamNotFound(merged.numeric_name()))?;
        self.readers[reader_index].set_stream_player(original, player);
        Ok(())
    }

    /// Read one merged record, dispatching to the owning file's player.
    pub fn read_record(&mut self, nth: usize) -> Result<bool> {
        let merged = match self.index.get(nth) {
            Some(m) => *m,
            None => {
                return Err(VrsError::InvalidParameter(format!(
                    "record {nth} of {}",
                    self.index.len()
                )))
            }
        };
        self.readers[merged.reader_index].read_record(merged.entry)
    }

    /// Read everything in merged global order.
    pub fn read_all_records(&mut self) -> Result<usize> {
        let mut dispatched = 0usize;
        for nth in 0..self.index.len() {
            if self.read_record(nth)? {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }
}

/// All files must agree on every related tag any of them carries.
fn check_related(readers: &[RecordFileReader]) -> Result<()> {
    for &tag in RELATED_FILE_TAGS {
        let mut seen: Option<(&str, usize)> = None;
        for (i, reader) in readers.iter().enumerate() {
            if let Some(value) = reader.file_tags().get(tag).map(String::as_str) {
                match seen {
                    None => seen = Some((value, i)),
                    Some((first, first_index)) if first != value => {
                        return Err(VrsError::UnsupportedFeature(format!(
                            "unrelated files: tag '{tag}' is '{first}' in file {first_index} \
                             but '{value}' in file {i}"
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
    }
    Ok(())
}
