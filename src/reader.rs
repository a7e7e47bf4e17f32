//! RecordFileReader — open, index load or rebuild, sequential and random
//! record access.
//!
//! # Opening
//!
//! Open reads the FileHeader, follows `description_offset` to the stream
//! roster (falling back to the head copy written at creation time when the
//! tail was never patched in), then loads the IndexRecord.  A missing or
//! corrupt index is rebuilt by scanning block headers from
//! `first_record_offset` and re-deriving `(timestamp, stream id, type,
//! offset)` from each record's prolog — a truncated trailing record stays in
//! the index (reading it reports `NotEnoughData`), and any `Tags` records
//! found during the scan contribute their stream descriptions.
//!
//! # Dispatch
//!
//! Reading a record consults the stream's registered [`StreamPlayer`]:
//! `process_record_header` decides whether the payload is wanted, then
//! `process_record` receives the decompressed bytes.  Records of streams
//! with no player are skipped.  Per-record decode errors are reported to the
//! caller but do not poison the reader — playback continues with the next
//! record.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::{info, warn};

use crate::chunked_file::ChunkedFileReader;
use crate::compress::decode_record_payload;
use crate::description::{read_json_body, FileDescription, StreamDescription};
use crate::error::{Result, VrsError};
use crate::file_spec::FileSpec;
use crate::format::{
    BlockHeader, BlockType, FileHeader, RecordProlog, BLOCK_HEADER_SIZE, RECORD_PROLOG_SIZE,
};
use crate::index::{read_index, IndexEntry};
use crate::record_format::{parse_record_format_tag_name, RecordFormat};
use crate::stream_id::{RecordType, StreamId};

// ── RecordInfo & StreamPlayer ────────────────────────────────────────────────

/// What a player learns about a record before seeing its payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordInfo {
    pub stream_id: StreamId,
    pub record_type: RecordType,
    pub format_version: u32,
    pub timestamp: f64,
    pub uncompressed_size: u64,
    /// Logical offset of the record's block header in the file.
    pub offset: i64,
}

/// Receives the records of one stream during playback.
pub trait StreamPlayer {
    /// Return false to skip this record's payload entirely.
    fn process_record_header(&mut self, _info: &RecordInfo) -> bool {
        true
    }

    /// The record's decompressed payload.
    fn process_record(&mut self, info: &RecordInfo, payload: &[u8]) -> Result<()>;
}

// ── Stream info (read side) ──────────────────────────────────────────────────

/// Description plus the parsed record formats of one stream.
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    pub description: StreamDescription,
    formats: HashMap<(RecordType, u32), RecordFormat>,
}

impl StreamInfo {
    pub fn from_description(description: StreamDescription) -> Self {
        let mut formats = HashMap::new();
        for (tag, value) in &description.vrs_tags {
            if let Some(key) = parse_record_format_tag_name(tag) {
                match RecordFormat::parse(value) {
                    Ok(format) => {
                        formats.insert(key, format);
                    }
                    Err(e) => warn!("stream {}: bad format tag {tag}: {e}", description.stream_id()),
                }
            }
        }
        Self { description, formats }
    }

    pub fn record_format(&self, record_type: RecordType, version: u32) -> Option<&RecordFormat> {
        self.formats.get(&(record_type, version))
    }

    pub fn record_formats(&self) -> impl Iterator<Item = (&(RecordType, u32), &RecordFormat)> {
        self.formats.iter()
    }

    /// The JSON schema persisted for one data-layout block.
    pub fn layout_schema(
        &self,
        record_type: RecordType,
        version: u32,
        block_index: usize,
    ) -> Option<&str> {
        self.description
            .vrs_tags
            .get(&crate::record_format::data_layout_tag_name(record_type, version, block_index))
            .map(String::as_str)
    }
}

// ── RecordFileReader ─────────────────────────────────────────────────────────

pub struct RecordFileReader {
    file: ChunkedFileReader,
    header: FileHeader,
    description: FileDescription,
    streams: HashMap<StreamId, StreamInfo>,
    index: Vec<IndexEntry>,
    /// Positions into `index`, per stream, in global order.
    per_stream: HashMap<StreamId, Vec<usize>>,
    index_rebuilt: bool,
    players: HashMap<StreamId, Box<dyn StreamPlayer>>,
}

impl RecordFileReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_spec(&FileSpec::from_path(path.as_ref()))
    }

    pub fn open_spec(spec: &FileSpec) -> Result<Self> {
        let mut file = ChunkedFileReader::open_spec(spec)?;
        let header = FileHeader::read(&mut file)?;

        // Description: tail copy if patched in, head copy otherwise.
        let mut description = match Self::read_description_at(&mut file, header.description_offset)
        {
            Ok(Some(d)) => d,
            Ok(None) | Err(_) => Self::read_description_at(
                &mut file,
                crate::format::FILE_HEADER_BLOCK_SIZE as u64,
            )
            .ok()
            .flatten()
            .unwrap_or_default(),
        };

        // Index: stored table, or a rebuild scan.
        let mut index_rebuilt = false;
        let index = match Self::read_stored_index(&mut file, &header) {
            Ok(index) => index,
            Err(e) => {
                info!("index unavailable ({e}); rebuilding by scan");
                index_rebuilt = true;
                Self::rebuild_index(&mut file, &header, &mut description)?
            }
        };

        let mut per_stream: HashMap<StreamId, Vec<usize>> = HashMap::new();
        for (i, entry) in index.iter().enumerate() {
            per_stream.entry(entry.stream_id).or_default().push(i);
        }

        let streams = description
            .streams
            .iter()
            .map(|s| (s.stream_id(), StreamInfo::from_description(s.clone())))
            .collect();

        Ok(Self {
            file,
            header,
            description,
            streams,
            index,
            per_stream,
            index_rebuilt,
            players: HashMap::new(),
        })
    }

    fn read_description_at(
        file: &mut ChunkedFileReader,
        offset: u64,
    ) -> Result<Option<FileDescription>> {
        if offset == 0 || offset >= file.total_size() {
            return Ok(None);
        }
        file.seek(SeekFrom::Start(offset))?;
        let block = BlockHeader::read(&mut *file)?;
        if block.block_type != BlockType::Description {
            return Ok(None);
        }
        Ok(Some(read_json_body(&mut *file)?))
    }

    fn read_stored_index(
        file: &mut ChunkedFileReader,
        header: &FileHeader,
    ) -> Result<Vec<IndexEntry>> {
        if header.index_offset == 0 {
            return Err(VrsError::IndexMissing);
        }
        if header.index_offset >= file.total_size() {
            return Err(VrsError::IndexCorrupt("index offset beyond EOF".into()));
        }
        file.seek(SeekFrom::Start(header.index_offset))?;
        let block = BlockHeader::read(&mut *file)?;
        if block.block_type != BlockType::IndexRecord {
            return Err(VrsError::IndexCorrupt(format!(
                "expected IndexRecord at {}, found {}",
                header.index_offset,
                block.block_type.name()
            )));
        }
        read_index(&mut *file)
    }

    /// Sequentially scan block headers, reconstructing the index from record
    /// prologs.  Tags records found along the way enrich `description`.
    fn rebuild_index(
        file: &mut ChunkedFileReader,
        header: &FileHeader,
        description: &mut FileDescription,
    ) -> Result<Vec<IndexEntry>> {
        let total = file.total_size();
        let mut offset = header.first_record_offset;
        let mut index = Vec::new();

        while offset + (BLOCK_HEADER_SIZE as u64) <= total {
            file.seek(SeekFrom::Start(offset))?;
            let block = match BlockHeader::read(&mut *file) {
                Ok(b) => b,
                Err(_) => break, // trailing garbage; stop here
            };
            match block.block_type {
                BlockType::Record => {
                    if block.body_size() < RECORD_PROLOG_SIZE as u64 {
                        break;
                    }
                    let prolog = match RecordProlog::read(&mut *file) {
                        Ok(p) => p,
                        Err(_) => break, // prolog cut off by truncation
                    };
                    index.push(IndexEntry {
                        timestamp: prolog.timestamp,
                        offset: offset as i64,
                        stream_id: prolog.stream_id,
                        record_type: prolog.record_type,
                    });
                    if prolog.record_type == RecordType::Tags {
                        // Merge the late stream's description, ignoring
                        // damage — the scan itself must go on.
                        if offset + block.block_size <= total {
                            if let Ok(stream) =
                                read_json_body::<_, StreamDescription>(&mut *file)
                            {
                                if description.find_stream(stream.stream_id()).is_none() {
                                    description.streams.push(stream);
                                }
                            }
                        }
                    }
                    if offset + block.block_size > total {
                        // Truncated payload: keep the entry (reading it will
                        // report NotEnoughData) and stop the scan.
                        break;
                    }
                }
                BlockType::EndOfRecords | BlockType::IndexRecord | BlockType::Description => {
                    // Past the data region; nothing else to index.
                    break;
                }
                BlockType::FileHeader | BlockType::Tags => {}
            }
            offset += block.block_size;
        }

        info!("index rebuilt with {} records", index.len());
        Ok(index)
    }

    // ── Introspection ────────────────────────────────────────────────────────

    pub fn file_header(&self) -> &FileHeader {
        &self.header
    }

    pub fn description(&self) -> &FileDescription {
        &self.description
    }

    pub fn file_tags(&self) -> &std::collections::BTreeMap<String, String> {
        &self.description.file_tags
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn stream_info(&self, id: StreamId) -> Option<&StreamInfo> {
        self.streams.get(&id)
    }

    pub fn get_tags(&self, id: StreamId) -> Option<&StreamDescription> {
        self.streams.get(&id).map(|s| &s.description)
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    /// Whether the index had to be reconstructed by scanning.
    pub fn index_was_rebuilt(&self) -> bool {
        self.index_rebuilt
    }

    pub fn record_count(&self) -> usize {
        self.index.len()
    }

    pub fn record_count_for(&self, id: StreamId, record_type: Option<RecordType>) -> usize {
        match &record_type {
            None => self.per_stream.get(&id).map_or(0, Vec::len),
            Some(rt) => self
                .per_stream
                .get(&id)
                .map_or(0, |v| v.iter().filter(|&&i| self.index[i].record_type == *rt).count()),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.file.total_size()
    }

    // ── Random access lookups ────────────────────────────────────────────────

    /// Nth record of the whole file, in global order.
    pub fn get_record_global(&self, nth: usize) -> Option<&IndexEntry> {
        self.index.get(nth)
    }

    /// Nth record of a stream.
    pub fn get_record_nth(&self, id: StreamId, nth: usize) -> Option<&IndexEntry> {
        let positions = self.per_stream.get(&id)?;
        positions.get(nth).map(|&i| &self.index[i])
    }

    /// Nth record of a stream with the given type.
    pub fn get_record(&self, id: StreamId, record_type: RecordType, nth: usize) -> Option<&IndexEntry> {
        let positions = self.per_stream.get(&id)?;
        positions
            .iter()
            .filter(|&&i| self.index[i].record_type == record_type)
            .nth(nth)
            .map(|&i| &self.index[i])
    }

    /// The stream's record with the greatest timestamp ≤ `t`.
    pub fn get_record_by_time(&self, id: StreamId, t: f64) -> Option<&IndexEntry> {
        let positions = self.per_stream.get(&id)?;
        let mut best: Option<&IndexEntry> = None;
        for &i in positions {
            let entry = &self.index[i];
            if entry.timestamp <= t {
                best = Some(entry);
            } else {
                break; // positions follow the global (timestamp-major) order
            }
        }
        best
    }

    // ── Playback ─────────────────────────────────────────────────────────────

    pub fn set_stream_player(&mut self, id: StreamId, player: Box<dyn StreamPlayer>) {
        self.players.insert(id, player);
    }

    pub fn remove_stream_player(&mut self, id: StreamId) -> Option<Box<dyn StreamPlayer>> {
        self.players.remove(&id)
    }

    /// Read one indexed record and dispatch it to the stream's player.
    /// Returns `Ok(false)` when the stream has no player (record skipped).
    pub fn read_record(&mut self, entry: IndexEntry) -> Result<bool> {
        let player = match self.players.get_mut(&entry.stream_id) {
            Some(p) => p,
            None => return Ok(false),
        };
        let (info, payload) = match load_record(&mut self.file, &entry) {
            Ok(loaded) => loaded,
            Err(e) => return Err(e),
        };
        if !player.process_record_header(&info) {
            return Ok(true);
        }
        player.process_record(&info, &payload)?;
        Ok(true)
    }

    /// Read every record in global order.  Per-record failures are counted
    /// and logged, not fatal; the first error is returned at the end.
    pub fn read_all_records(&mut self) -> Result<usize> {
        let entries: Vec<IndexEntry> = self.index.clone();
        let mut dispatched = 0usize;
        let mut first_error: Option<VrsError> = None;
        for entry in entries {
            match self.read_record(entry) {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("record at offset {} failed: {e}", entry.offset);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(dispatched),
        }
    }

    /// Read just the first configuration record of one stream.
    pub fn read_first_configuration_record(&mut self, id: StreamId) -> Result<bool> {
        match self.get_record(id, RecordType::Configuration, 0).copied() {
            Some(entry) => self.read_record(entry),
            None => Ok(false),
        }
    }

    /// Configuration pre-roll for every stream.
    pub fn read_first_configuration_records(&mut self) -> Result<()> {
        for id in self.stream_ids() {
            self.read_first_configuration_record(id)?;
        }
        Ok(())
    }

    /// Load a record's decompressed payload without dispatching it.
    pub fn load_record_payload(&mut self, entry: &IndexEntry) -> Result<(RecordInfo, Vec<u8>)> {
        load_record(&mut self.file, entry)
    }

    /// Load a record's raw (still compressed) payload plus its prolog —
    /// the verbatim-copy path.
    pub fn load_record_verbatim(
        &mut self,
        entry: &IndexEntry,
    ) -> Result<(RecordProlog, Vec<u8>)> {
        load_record_raw(&mut self.file, entry)
    }
}

// ── Record loading ───────────────────────────────────────────────────────────

fn load_record_raw(
    file: &mut ChunkedFileReader,
    entry: &IndexEntry,
) -> Result<(RecordProlog, Vec<u8>)> {
    file.seek(SeekFrom::Start(entry.offset as u64))?;
    let block = BlockHeader::read(&mut *file)?;
    if block.block_type != BlockType::Record {
        return Err(VrsError::InvalidFileFormat(format!(
            "index points at a {} block at offset {}",
            block.block_type.name(),
            entry.offset
        )));
    }
    let prolog = RecordProlog::read(&mut *file)?;
    let payload_len = (block.body_size() as usize).saturating_sub(RECORD_PROLOG_SIZE);
    let mut payload = vec![0u8; payload_len];
    let mut filled = 0usize;
    while filled < payload.len() {
        match file.read(&mut payload[filled..]) {
            Ok(0) => {
                return Err(VrsError::NotEnoughData {
                    needed: payload_len as u64,
                    available: filled as u64,
                })
            }
            Ok(n) => filled += n,
            Err(e) => return Err(VrsError::Io(e)),
        }
    }
    Ok((prolog, payload))
}

fn load_record(
    file: &mut ChunkedFileReader,
    entry: &IndexEntry,
) -> Result<(RecordInfo, Vec<u8>)> {
    let (prolog, raw) = load_record_raw(file, entry)?;
    let payload = decode_record_payload(
        prolog.compression,
        &raw,
        prolog.uncompressed_size as usize,
    )?;
    let info = RecordInfo {
        stream_id: prolog.stream_id,
        record_type: prolog.record_type,
        format_version: prolog.format_version,
        timestamp: prolog.timestamp,
        uncompressed_size: prolog.uncompressed_size,
        offset: entry.offset,
    };
    Ok((info, payload))
}
