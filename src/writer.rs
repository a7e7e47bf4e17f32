//! RecordFileWriter — multi-producer record ingestion with background
//! compression, global ordering, and asynchronous flush.
//!
//! # Modes
//!
//! * **Batch** — produce everything, then [`RecordFileWriter::write_to_file`]
//!   runs one synchronous pass.
//! * **Async** — [`RecordFileWriter::create_file_async`] starts the writer
//!   thread; producers keep creating records;
//!   [`RecordFileWriter::write_records_async`] posts a drain request;
//!   [`RecordFileWriter::auto_write_records_async`] spawns a ticker;
//!   [`RecordFileWriter::close_file_async`] +
//!   [`RecordFileWriter::wait_for_file_closed`] flush and close.
//! * **Split-chunk** — with `max_chunk_size_mb` set, the writer rotates to
//!   `path_1`, `path_2`, ... between records, never splitting one.
//!
//! # Ordering
//!
//! Each drain asks every stream for records up to the cutoff (per-stream
//! batches arrive sorted), merges them into one batch sorted by
//! `(timestamp, stream id, record type, creation sequence)`, compresses
//! payloads on the compression pool, appends through the chunk I/O, and
//! records every emission in the in-memory index.  Records with equal sort
//! keys keep arrival order.  A record older than something already emitted
//! is still written — ordering holds among the records of one batch; callers
//! wanting stragglers merged use an older cutoff.
//!
//! # File assembly
//!
//! `FileHeader` is written first and patched on close with the tail offsets.
//! Records follow, then `EndOfRecords`, the tail `IndexRecord`, and the
//! `Description` block.  Streams attached after creation get a `Tags` record
//! inline before their first data record, and still appear in the final
//! description.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, info};

use crate::chunk_io::{AsyncDiskChunk, DiskChunkOptions};
use crate::chunked_file::chunk_path;
use crate::compress::{compress, CompressionMethod, CompressionPreset};
use crate::description::{write_json_body, FileDescription, StreamDescription};
use crate::error::{LatchedError, Result, VrsError};
use crate::format::{BlockHeader, BlockType, FileHeader, RecordProlog, RECORD_PROLOG_SIZE};
use crate::index::{index_body_size, write_index, IndexEntry};
use crate::record::Record;
use crate::recordable::Recordable;
use crate::stream_id::{RecordType, StreamId};

/// File tag holding the wall-clock creation time (RFC 3339), written
/// automatically unless the caller set it.
pub const TAG_CAPTURE_TIME: &str = "capture_time";

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RecordFileWriterOptions {
    /// Compression worker threads; 0 compresses inline on the writer thread.
    pub compression_pool_size: usize,
    /// Rotate to a new chunk when the current one exceeds this many MiB.
    pub max_chunk_size_mb: Option<u64>,
    pub chunk_options: DiskChunkOptions,
}

impl Default for RecordFileWriterOptions {
    fn default() -> Self {
        Self {
            compression_pool_size: 2,
            max_chunk_size_mb: None,
            chunk_options: DiskChunkOptions::default(),
        }
    }
}

// ── Compression pool ─────────────────────────────────────────────────────────

/// Compresses a batch of records, replacing buffers with framed payloads.
/// With the `parallel` feature and a nonzero pool size, work fans out over a
/// dedicated rayon pool; otherwise it runs inline.
struct CompressionPool {
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

/// A record plus its resolved wire form, ready for emission.
struct PreparedRecord {
    record: Record,
    method: CompressionMethod,
    payload: Vec<u8>,
}

impl CompressionPool {
    fn new(size: usize) -> Self {
        #[cfg(feature = "parallel")]
        {
            let pool = if size > 0 {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(size)
                    .thread_name(|i| format!("vrs-compress-{i}"))
                    .build()
                    .ok()
            } else {
                None
            };
            Self { pool }
        }
        #[cfg(not(feature = "parallel"))]
        {
            let _ = size;
            Self {}
        }
    }

    fn prepare(
        &self,
        records: Vec<Record>,
        presets: &BTreeMap<StreamId, CompressionPreset>,
    ) -> Result<Vec<PreparedRecord>> {
        let prepare_one = |record: Record| -> Result<PreparedRecord> {
            let preset = record
                .preset
                .or_else(|| presets.get(&record.stream_id).copied())
                .unwrap_or(CompressionPreset::None);
            if preset.method() == CompressionMethod::None {
                return Ok(PreparedRecord {
                    method: CompressionMethod::None,
                    payload: record.buffer.clone(),
                    record,
                });
            }
            let packed = compress(&record.buffer, preset)?;
            // Incompressible payloads ship raw: smaller and cheaper to read.
            if packed.len() >= record.buffer.len() {
                Ok(PreparedRecord {
                    method: CompressionMethod::None,
                    payload: record.buffer.clone(),
                    record,
                })
            } else {
                Ok(PreparedRecord { method: preset.method(), payload: packed, record })
            }
        };

        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            use rayon::prelude::*;
            return pool.install(|| {
                records
                    .into_par_iter()
                    .map(prepare_one)
                    .collect::<Result<Vec<_>>>()
            });
        }
        records.into_iter().map(prepare_one).collect()
    }
}

// ── FileEmitter ──────────────────────────────────────────────────────────────

/// Owns the open chunks and the in-memory index; shared by the batch pass,
/// the async writer thread, and the record-copy pipeline.
pub(crate) struct FileEmitter {
    first_chunk_path: PathBuf,
    chunk: AsyncDiskChunk,
    chunk_index: usize,
    /// Logical offset of the current chunk's first byte.
    chunk_base: u64,
    chunk_options: DiskChunkOptions,
    max_chunk_bytes: Option<u64>,
    header: FileHeader,
    index: Vec<IndexEntry>,
    /// Streams already announced (in the initial roster or via Tags record).
    described: HashSet<StreamId>,
}

impl FileEmitter {
    /// Create the file: FileHeader, then a head copy of the Description so
    /// the stream roster survives a crash before the tail is written.
    pub(crate) fn create(
        path: &Path,
        options: &RecordFileWriterOptions,
        initial: &FileDescription,
    ) -> Result<Self> {
        let mut chunk = AsyncDiskChunk::create(path, options.chunk_options.clone())?;

        let mut body = Vec::new();
        let body_size = write_json_body(initial, &mut body)?;
        let mut description_block = Vec::new();
        BlockHeader::new(BlockType::Description, body_size).write(&mut description_block)?;
        description_block.extend_from_slice(&body);

        let mut header = FileHeader::new();
        header.first_record_offset =
            crate::format::FILE_HEADER_BLOCK_SIZE as u64 + description_block.len() as u64;

        let mut head = Vec::new();
        header.write(&mut head)?;
        chunk.write(&head)?;
        chunk.write(&description_block)?;
        Ok(Self {
            first_chunk_path: path.to_path_buf(),
            chunk,
            chunk_index: 0,
            chunk_base: 0,
            chunk_options: options.chunk_options.clone(),
            max_chunk_bytes: options.max_chunk_size_mb.map(|mb| mb * 1024 * 1024),
            header,
            index: Vec::new(),
            described: HashSet::new(),
        })
    }

    /// Logical append offset across all chunks.
    fn logical_offset(&self) -> u64 {
        self.chunk_base + self.chunk.size()
    }

    /// Close the current chunk and open the next one, if the size threshold
    /// is exceeded.  Called only between records.
    fn maybe_rotate(&mut self) -> Result<()> {
        let limit = match self.max_chunk_bytes {
            Some(l) => l,
            None => return Ok(()),
        };
        if self.chunk.size() < limit {
            return Ok(());
        }
        let closed_size = self.chunk.size();
        let old = std::mem::replace(
            &mut self.chunk,
            AsyncDiskChunk::create(
                chunk_path(&self.first_chunk_path, self.chunk_index + 1),
                self.chunk_options.clone(),
            )?,
        );
        old.close()?;
        self.chunk_index += 1;
        self.chunk_base += closed_size;
        info!("rotated to chunk {} at logical offset {}", self.chunk_index, self.chunk_base);
        Ok(())
    }

    /// Emit one record block (header + prolog + wire payload) and index it.
    /// The prolog's compression byte and uncompressed size must already
    /// describe `payload` — verbatim copies pass it through untouched.
    pub(crate) fn emit_prolog_record(
        &mut self,
        prolog: &RecordProlog,
        payload: &[u8],
    ) -> Result<()> {
        self.maybe_rotate()?;
        let offset = self.logical_offset();

        let body_size = RECORD_PROLOG_SIZE as u64 + payload.len() as u64;
        let mut head = Vec::with_capacity(16 + RECORD_PROLOG_SIZE);
        BlockHeader::new(BlockType::Record, body_size).write(&mut head)?;
        prolog.write(&mut head)?;
        self.chunk.write(&head)?;
        self.chunk.write(payload)?;

        self.index.push(IndexEntry {
            timestamp: prolog.timestamp,
            offset: offset as i64,
            stream_id: prolog.stream_id,
            record_type: prolog.record_type,
        });
        Ok(())
    }

    /// Emit one prepared record.
    fn emit_record(&mut self, prepared: &PreparedRecord) -> Result<()> {
        let record = &prepared.record;
        let prolog = RecordProlog {
            stream_id: record.stream_id,
            record_type: record.record_type,
            format_version: record.format_version,
            timestamp: record.timestamp,
            compression: prepared.method as u8,
            uncompressed_size: record.buffer.len() as u64,
        };
        self.emit_prolog_record(&prolog, &prepared.payload)
    }

    /// Announce a late-arriving stream with an inline Tags record.
    fn emit_tags_record(&mut self, description: &StreamDescription, timestamp: f64) -> Result<()> {
        self.maybe_rotate()?;
        let offset = self.logical_offset();
        let mut payload = Vec::new();
        write_json_body(description, &mut payload)?;

        let body_size = RECORD_PROLOG_SIZE as u64 + payload.len() as u64;
        let mut block = Vec::with_capacity(16 + RECORD_PROLOG_SIZE + payload.len());
        BlockHeader::new(BlockType::Record, body_size).write(&mut block)?;
        RecordProlog {
            stream_id: description.stream_id(),
            record_type: RecordType::Tags,
            format_version: 0,
            timestamp,
            compression: CompressionMethod::None as u8,
            uncompressed_size: payload.len() as u64,
        }
        .write(&mut block)?;
        block.extend_from_slice(&payload);
        self.chunk.write(&block)?;

        self.index.push(IndexEntry {
            timestamp,
            offset: offset as i64,
            stream_id: description.stream_id(),
            record_type: RecordType::Tags,
        });
        Ok(())
    }

    /// Write the tail — EndOfRecords, Description, then the IndexRecord as
    /// the file's very last block; patch the FileHeader; close the chunk.
    /// The index goes last so a crash mid-tail costs only the (rebuildable)
    /// index, never the stream roster.
    pub(crate) fn finish(mut self, description: &FileDescription) -> Result<()> {
        let mut tail = Vec::new();
        BlockHeader::new(BlockType::EndOfRecords, 0).write(&mut tail)?;
        self.chunk.write(&tail)?;

        // Tail description.
        let description_offset = self.logical_offset();
        let mut body = Vec::new();
        let body_size = write_json_body(description, &mut body)?;
        let mut description_block = Vec::new();
        BlockHeader::new(BlockType::Description, body_size).write(&mut description_block)?;
        description_block.extend_from_slice(&body);
        self.chunk.write(&description_block)?;

        // Tail index, last.
        let index_offset = self.logical_offset();
        let mut index_block = Vec::new();
        BlockHeader::new(BlockType::IndexRecord, index_body_size(self.index.len()))
            .write(&mut index_block)?;
        write_index(&self.index, &mut index_block)?;
        self.chunk.write(&index_block)?;

        self.chunk.flush()?;

        // Patch the FileHeader with the tail offsets.  When the file rotated,
        // the header lives in the already-closed first chunk, so patch
        // through a plain handle.
        self.header.index_offset = index_offset;
        self.header.description_offset = description_offset;
        let mut patched = Vec::new();
        self.header.write(&mut patched)?;
        if self.chunk_index == 0 {
            self.chunk.overwrite_at(0, &patched)?;
            self.chunk.close()?;
        } else {
            self.chunk.close()?;
            use std::io::{Seek, SeekFrom, Write};
            let mut first = std::fs::OpenOptions::new()
                .write(true)
                .open(&self.first_chunk_path)?;
            first.seek(SeekFrom::Start(0))?;
            first.write_all(&patched)?;
            first.sync_all()?;
        }
        Ok(())
    }
}

// ── Writer thread plumbing ───────────────────────────────────────────────────

enum WriterCommand {
    WriteRecords { cutoff: f64 },
    Close,
}

struct AsyncState {
    tx: Sender<WriterCommand>,
    handle: thread::JoinHandle<Result<()>>,
    ticker_stop: Arc<AtomicBool>,
    ticker: Option<thread::JoinHandle<()>>,
}

// ── RecordFileWriter ─────────────────────────────────────────────────────────

pub struct RecordFileWriter {
    recordables: Arc<Mutex<Vec<Arc<dyn Recordable>>>>,
    file_tags: BTreeMap<String, String>,
    options: RecordFileWriterOptions,
    error: Arc<LatchedError>,
    state: Option<AsyncState>,
}

impl RecordFileWriter {
    pub fn new() -> Self {
        Self::with_options(RecordFileWriterOptions::default())
    }

    pub fn with_options(options: RecordFileWriterOptions) -> Self {
        Self {
            recordables: Arc::new(Mutex::new(Vec::new())),
            file_tags: BTreeMap::new(),
            options,
            error: Arc::new(LatchedError::new()),
            state: None,
        }
    }

    /// File tags land in the Description block; set them before closing.
    pub fn set_file_tag(&mut self, name: &str, value: &str) {
        self.file_tags.insert(name.to_string(), value.to_string());
    }

    /// Stamp the creation time unless the caller supplied one.
    fn ensure_capture_time_tag(&mut self) {
        self.file_tags
            .entry(TAG_CAPTURE_TIME.to_string())
            .or_insert_with(|| chrono::Utc::now().to_rfc3339());
    }

    /// Attach a stream.  Ensures the stream has a configuration and a state
    /// record pending, creating placeholders through the hooks if needed.
    pub fn add_recordable(&mut self, recordable: Arc<dyn Recordable>) -> Result<()> {
        let manager = recordable.stream().record_manager();
        if !manager.has_pending_type(RecordType::Configuration) {
            recordable.create_configuration_record()?;
        }
        if !manager.has_pending_type(RecordType::State) {
            recordable.create_state_record()?;
        }
        self.recordables.lock().unwrap().push(recordable);
        Ok(())
    }

    fn stream_presets(
        recordables: &[Arc<dyn Recordable>],
    ) -> BTreeMap<StreamId, CompressionPreset> {
        recordables
            .iter()
            .map(|r| {
                let manager = r.stream().record_manager();
                (manager.stream_id(), manager.compression())
            })
            .collect()
    }

    fn stream_description(recordable: &Arc<dyn Recordable>) -> StreamDescription {
        let stream = recordable.stream();
        let tags = stream.tags();
        StreamDescription {
            type_id: stream.id().type_id,
            instance_id: stream.id().instance_id,
            flavor: stream.flavor().map(String::from),
            tags: tags.user,
            vrs_tags: tags.vrs,
        }
    }

    fn file_description(
        file_tags: &BTreeMap<String, String>,
        recordables: &[Arc<dyn Recordable>],
    ) -> FileDescription {
        FileDescription {
            file_tags: file_tags.clone(),
            streams: recordables.iter().map(Self::stream_description).collect(),
        }
    }

    /// Collect up to `cutoff` from every stream, merge, compress, emit.
    fn drain_into(
        emitter: &mut FileEmitter,
        pool: &CompressionPool,
        recordables: &[Arc<dyn Recordable>],
        cutoff: f64,
    ) -> Result<()> {
        let mut batch: Vec<Record> = Vec::new();
        for recordable in recordables {
            recordable
                .stream()
                .record_manager()
                .collect_old_records(cutoff, &mut batch);
        }
        if batch.is_empty() {
            return Ok(());
        }

        // Global order: (timestamp, stream id, record type, arrival seq).
        batch.sort_by(|a, b| {
            a.timestamp
                .total_cmp(&b.timestamp)
                .then_with(|| a.stream_id.cmp(&b.stream_id))
                .then_with(|| (a.record_type as u8).cmp(&(b.record_type as u8)))
                .then_with(|| a.sequence.cmp(&b.sequence))
        });

        // Late streams announce themselves before their first record.
        for record in &batch {
            if !emitter.described.contains(&record.stream_id) {
                if let Some(recordable) = recordables
                    .iter()
                    .find(|r| r.stream().id() == record.stream_id)
                {
                    let description = Self::stream_description(recordable);
                    emitter.emit_tags_record(&description, record.timestamp)?;
                    emitter.described.insert(record.stream_id);
                }
            }
        }

        let presets = Self::stream_presets(recordables);
        let batch_len = batch.len();
        let prepared = pool.prepare(batch, &presets)?;
        for record in &prepared {
            emitter.emit_record(record)?;
        }
        debug!("drained {batch_len} records (cutoff {cutoff})");

        // Recycle buffers to the per-stream pools.
        let mut by_stream: BTreeMap<StreamId, Vec<Record>> = BTreeMap::new();
        for prepared in prepared {
            by_stream
                .entry(prepared.record.stream_id)
                .or_default()
                .push(prepared.record);
        }
        for (stream_id, records) in by_stream {
            if let Some(recordable) = recordables.iter().find(|r| r.stream().id() == stream_id) {
                recordable.stream().record_manager().recycle(records);
            }
        }
        Ok(())
    }

    // ── Batch mode ───────────────────────────────────────────────────────────

    /// One synchronous pass: write every pending record of every stream.
    pub fn write_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.state.is_some() {
            return Err(VrsError::InvalidState(
                "write_to_file while an async file is open".into(),
            ));
        }
        self.ensure_capture_time_tag();
        let recordables = self.recordables.lock().unwrap().clone();
        let initial = Self::file_description(&self.file_tags, &recordables);
        let mut emitter = FileEmitter::create(path.as_ref(), &self.options, &initial)?;
        for recordable in &recordables {
            emitter.described.insert(recordable.stream().id());
        }
        let pool = CompressionPool::new(self.options.compression_pool_size);
        Self::drain_into(&mut emitter, &pool, &recordables, f64::MAX)?;
        emitter.finish(&Self::file_description(&self.file_tags, &recordables))
    }

    // ── Async mode ───────────────────────────────────────────────────────────

    /// Open `path` and start the background writer thread.
    pub fn create_file_async<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.state.is_some() {
            return Err(VrsError::InvalidState("a file is already open".into()));
        }
        self.ensure_capture_time_tag();
        let initial = Self::file_description(&self.file_tags, &self.recordables.lock().unwrap());
        let mut emitter = FileEmitter::create(path.as_ref(), &self.options, &initial)?;
        let recordables = Arc::clone(&self.recordables);
        for recordable in recordables.lock().unwrap().iter() {
            emitter.described.insert(recordable.stream().id());
        }
        let pool = CompressionPool::new(self.options.compression_pool_size);
        let file_tags = self.file_tags.clone();
        let error = Arc::clone(&self.error);
        let (tx, rx) = mpsc::channel::<WriterCommand>();

        let handle = thread::Builder::new()
            .name("vrs-writer".into())
            .spawn(move || -> Result<()> {
                for command in rx {
                    match command {
                        WriterCommand::WriteRecords { cutoff } => {
                            let snapshot = recordables.lock().unwrap().clone();
                            if let Err(e) = Self::drain_into(&mut emitter, &pool, &snapshot, cutoff)
                            {
                                error!("record drain failed: {e}");
                                error.set(e);
                            }
                        }
                        WriterCommand::Close => {
                            let snapshot = recordables.lock().unwrap().clone();
                            Self::drain_into(&mut emitter, &pool, &snapshot, f64::MAX)?;
                            let description = Self::file_description(&file_tags, &snapshot);
                            emitter.finish(&description)?;
                            return Ok(());
                        }
                    }
                }
                // Channel dropped without Close: still finish the file.
                let snapshot = recordables.lock().unwrap().clone();
                Self::drain_into(&mut emitter, &pool, &snapshot, f64::MAX)?;
                emitter.finish(&Self::file_description(&file_tags, &snapshot))
            })
            .map_err(|e| VrsError::Io(e.into()))?;

        self.state = Some(AsyncState {
            tx,
            handle,
            ticker_stop: Arc::new(AtomicBool::new(false)),
            ticker: None,
        });
        Ok(())
    }

    /// Ask the writer thread to drain records with `timestamp ≤ cutoff`.
    /// Non-blocking; the work happens on the writer thread.
    pub fn write_records_async(&self, cutoff: f64) -> Result<()> {
        let state = self.state.as_ref().ok_or(VrsError::NotOpen)?;
        state
            .tx
            .send(WriterCommand::WriteRecords { cutoff })
            .map_err(|_| VrsError::InvalidState("writer thread is gone".into()))
    }

    /// Spawn a ticker posting a drain every `period`, with the cutoff
    /// computed per tick (typically `now - preroll`).
    pub fn auto_write_records_async<F>(&mut self, period: Duration, cutoff_fn: F) -> Result<()>
    where
        F: Fn() -> f64 + Send + 'static,
    {
        let state = self.state.as_mut().ok_or(VrsError::NotOpen)?;
        if state.ticker.is_some() {
            return Err(VrsError::InvalidRequest("auto-write already active".into()));
        }
        let tx = state.tx.clone();
        let stop = Arc::clone(&state.ticker_stop);
        let handle = thread::Builder::new()
            .name("vrs-autoflush".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(period);
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if tx.send(WriterCommand::WriteRecords { cutoff: cutoff_fn() }).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| VrsError::Io(e.into()))?;
        state.ticker = Some(handle);
        Ok(())
    }

    /// Request flush-and-close.  Queued records are written, in-flight
    /// compression completes, the tail blocks are emitted.
    pub fn close_file_async(&self) -> Result<()> {
        let state = self.state.as_ref().ok_or(VrsError::NotOpen)?;
        state
            .tx
            .send(WriterCommand::Close)
            .map_err(|_| VrsError::InvalidState("writer thread is gone".into()))
    }

    /// Block until the file is fully written and closed.
    pub fn wait_for_file_closed(&mut self) -> Result<()> {
        let state = match self.state.take() {
            Some(s) => s,
            None => return Ok(()),
        };
        state.ticker_stop.store(true, Ordering::Relaxed);
        // Unblock a send-less close: dropping tx ends the command loop.
        let _ = state.tx.send(WriterCommand::Close);
        drop(state.tx);
        if let Some(ticker) = state.ticker {
            let _ = ticker.join();
        }
        let thread_result = state
            .handle
            .join()
            .map_err(|_| VrsError::InvalidState("writer thread panicked".into()))?;
        thread_result?;
        self.error.check()
    }
}

impl Default for RecordFileWriter {
    fn default() -> Self {
        Self::new()
    }
}
