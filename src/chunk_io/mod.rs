//! Asynchronous, aligned disk I/O for one file chunk.
//!
//! Append-only streaming writes land in a fixed pool of aligned buffers; a
//! background worker drains them with positioned writes so producers never
//! wait on the disk unless the pool is exhausted.  Reads share the handle and
//! force a synchronous flush first, so a reader always observes every byte
//! previously accepted by `write`.
//!
//! # Buffer state machine
//!
//! ```text
//! Free ──(writer grabs)──▶ Filling ──(buffer full / flush)──▶ Queued
//!   ▲                                                            │
//!   └────────────(completion, pump next)◀── InFlight ◀──(pump)───┘
//! ```
//!
//! One buffer at a time is `Filling` (exclusive to the writer thread).  The
//! pump moves `Queued` buffers to `InFlight` up to the configured depth.
//! Completions run on the worker thread and are translated into pool state
//! changes under the mutex — the chunk's invariants are never touched from a
//! foreign callback directly.
//!
//! # Engines
//!
//! * `Synchronous`     — buffered writes performed on the caller thread.
//! * `SyncPositioned`  — as above, but always `pwrite` at explicit offsets.
//! * `AsyncAio`        — queued writes completed by the background worker.
//!
//! # Direct I/O
//!
//! The options carry memory/offset alignment (4 KiB defaults) and the direct
//! flag; buffer sizes and file offsets honor them, and an unaligned tail
//! write demotes the handle out of direct mode for the rest of its life
//! rather than leaving it half-direct.  The flag itself is advisory on
//! platforms where the runtime cannot set `O_DIRECT`.
//!
//! # Errors
//!
//! Worker-side failures are latched and surface on the next `write`, `read`
//! or `flush` (`LatchedError`).  A positioned write that stalls at zero bytes
//! reports `PartialWriteError`; a read past EOF reports `NotEnoughData`.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::{debug, warn};

use crate::error::{LatchedError, Result, VrsError};

// ── Options ──────────────────────────────────────────────────────────────────

pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024 * 1024;
pub const MIN_BUFFER_SIZE: usize = 512;
pub const MAX_BUFFER_SIZE: usize = 512 * 1024 * 1024;
pub const DEFAULT_BUFFER_COUNT: usize = 4;
pub const MAX_BUFFER_COUNT: usize = 512;
pub const MAX_IO_DEPTH: usize = 512;
pub const DEFAULT_ALIGNMENT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoEngine {
    /// Buffered writes on the caller thread.
    Synchronous,
    /// Positioned writes queued to the background worker.
    #[default]
    AsyncAio,
    /// Positioned writes on the caller thread.
    SyncPositioned,
}

#[derive(Debug, Clone)]
pub struct DiskChunkOptions {
    pub engine: IoEngine,
    pub direct_io: bool,
    pub buffer_size: usize,
    pub buffer_count: usize,
    /// Maximum writes in flight at once; defaults to `buffer_count`.
    pub io_depth: Option<usize>,
    pub mem_alignment: usize,
    pub offset_alignment: usize,
}

impl Default for DiskChunkOptions {
    fn default() -> Self {
        Self {
            engine: IoEngine::default(),
            direct_io: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_count: DEFAULT_BUFFER_COUNT,
            io_depth: None,
            mem_alignment: DEFAULT_ALIGNMENT,
            offset_alignment: DEFAULT_ALIGNMENT,
        }
    }
}

impl DiskChunkOptions {
    /// Clamp every field into its documented range.
    pub fn clamped(mut self) -> Self {
        self.buffer_size = self.buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self.buffer_count = self.buffer_count.clamp(1, MAX_BUFFER_COUNT);
        self.io_depth = Some(
            self.io_depth
                .unwrap_or(self.buffer_count)
                .clamp(1, MAX_IO_DEPTH),
        );
        self.mem_alignment = self.mem_alignment.max(1).next_power_of_two();
        self.offset_alignment = self.offset_alignment.max(1).next_power_of_two();
        self
    }

    fn depth(&self) -> usize {
        self.io_depth.unwrap_or(self.buffer_count)
    }
}

// ── Aligned buffer ───────────────────────────────────────────────────────────

/// A fixed-capacity byte buffer whose data start is aligned to the requested
/// boundary.  Alignment is achieved with allocation slack; the buffer never
/// reallocates after construction.
#[derive(Debug)]
pub struct AlignedBuffer {
    storage: Vec<u8>,
    start: usize,
    capacity: usize,
    len: usize,
}

impl AlignedBuffer {
    pub fn new(capacity: usize, alignment: usize) -> Self {
        let mut storage = vec![0u8; capacity + alignment];
        let addr = storage.as_mut_ptr() as usize;
        let start = addr.next_multiple_of(alignment) - addr;
        Self { storage, start, capacity, len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.start..self.start + self.len]
    }

    /// Append as much of `data` as fits; returns the number of bytes taken.
    pub fn fill(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.remaining());
        let dst = self.start + self.len;
        self.storage[dst..dst + take].copy_from_slice(&data[..take]);
        self.len += take;
        take
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

// ── Shared pool state ────────────────────────────────────────────────────────

struct PoolState {
    free: Vec<AlignedBuffer>,
    queued: VecDeque<WriteJob>,
    in_flight: usize,
    /// High-water mark of concurrent in-flight writes, for diagnostics.
    max_in_flight: usize,
    closed: bool,
}

struct WriteJob {
    offset: u64,
    buffer: AlignedBuffer,
}

struct ChunkShared {
    state: Mutex<PoolState>,
    cond: Condvar,
    error: LatchedError,
}

// ── AsyncDiskChunk ───────────────────────────────────────────────────────────

pub struct AsyncDiskChunk {
    file: Arc<File>,
    options: DiskChunkOptions,
    shared: Arc<ChunkShared>,
    worker: Option<thread::JoinHandle<()>>,
    job_tx: Option<Sender<WriteJob>>,
    /// Buffer currently accumulating `write` data (state: Filling).
    current: Option<AlignedBuffer>,
    /// File offset the next queued buffer will be written at.
    write_offset: u64,
    /// Direct mode still honored; cleared after the first unaligned write.
    direct_active: bool,
    /// Set once `close` ran, so Drop does not flush twice.
    finished: bool,
}

impl AsyncDiskChunk {
    /// Create (truncate) `path` for writing, with read access through the
    /// same handle.
    pub fn create<P: AsRef<Path>>(path: P, options: DiskChunkOptions) -> Result<Self> {
        let options = options.clamped();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        Ok(Self::with_file(file, options))
    }

    fn with_file(file: File, options: DiskChunkOptions) -> Self {
        let file = Arc::new(file);
        let mut free = Vec::with_capacity(options.buffer_count);
        for _ in 0..options.buffer_count {
            free.push(AlignedBuffer::new(options.buffer_size, options.mem_alignment));
        }
        // The writer immediately claims one buffer as Filling.
        let current = free.pop();

        let shared = Arc::new(ChunkShared {
            state: Mutex::new(PoolState {
                free,
                queued: VecDeque::new(),
                in_flight: 0,
                max_in_flight: 0,
                closed: false,
            }),
            cond: Condvar::new(),
            error: LatchedError::new(),
        });

        let (worker, job_tx) = if options.engine == IoEngine::AsyncAio {
            let (tx, rx) = mpsc::channel::<WriteJob>();
            let handle = spawn_completion_worker(Arc::clone(&file), Arc::clone(&shared), rx);
            (Some(handle), Some(tx))
        } else {
            (None, None)
        };

        let direct_active = options.direct_io;
        Self {
            file,
            options,
            shared,
            worker,
            job_tx,
            current,
            write_offset: 0,
            direct_active,
            finished: false,
        }
    }

    pub fn options(&self) -> &DiskChunkOptions {
        &self.options
    }

    /// Logical size: everything accepted by `write` so far.  Queued and
    /// in-flight buffers are already covered by `write_offset`, which is
    /// advanced when a buffer leaves the Filling state.
    pub fn size(&self) -> u64 {
        self.write_offset + self.current.as_ref().map_or(0, |b| b.len() as u64)
    }

    /// Highest number of writes that were in flight simultaneously.
    pub fn max_in_flight(&self) -> usize {
        self.shared.state.lock().unwrap().max_in_flight
    }

    // ── Writing ──────────────────────────────────────────────────────────────

    /// Append `data`.  May block waiting for a free buffer when the pool is
    /// exhausted; surfaces any latched worker error first.
    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        self.shared.error.check()?;
        while !data.is_empty() {
            let mut buffer = match self.current.take() {
                Some(b) => b,
                None => self.acquire_free_buffer()?,
            };
            let taken = buffer.fill(data);
            data = &data[taken..];
            if buffer.remaining() == 0 {
                self.enqueue(buffer)?;
            } else {
                self.current = Some(buffer);
            }
        }
        Ok(())
    }

    /// Queue `buffer` for writing at the current append offset.
    fn enqueue(&mut self, buffer: AlignedBuffer) -> Result<()> {
        if buffer.is_empty() {
            let mut state = self.shared.state.lock().unwrap();
            state.free.push(buffer);
            return Ok(());
        }
        let offset = self.write_offset;
        self.write_offset += buffer.len() as u64;

        if self.direct_active && buffer.len() % self.options.offset_alignment != 0 {
            // Tail write not a multiple of the offset alignment: direct mode
            // cannot complete it.  Demote the handle for all later writes so
            // the file never alternates between direct and buffered I/O.
            debug!(
                "unaligned write of {} bytes at {offset}; leaving direct mode",
                buffer.len()
            );
            self.direct_active = false;
        }

        match self.options.engine {
            IoEngine::AsyncAio => {
                {
                    let mut state = self.shared.state.lock().unwrap();
                    state.queued.push_back(WriteJob { offset, buffer });
                }
                self.pump();
                Ok(())
            }
            IoEngine::Synchronous | IoEngine::SyncPositioned => {
                let result = write_all_at(&self.file, buffer.as_slice(), offset);
                let mut state = self.shared.state.lock().unwrap();
                let mut buffer = buffer;
                buffer.clear();
                state.free.push(buffer);
                drop(state);
                result
            }
        }
    }

    /// Move queued jobs to the worker until the depth limit is reached.
    fn pump(&self) {
        let tx = match &self.job_tx {
            Some(tx) => tx,
            None => return,
        };
        let mut state = self.shared.state.lock().unwrap();
        while state.in_flight < self.options.depth() {
            let job = match state.queued.pop_front() {
                Some(j) => j,
                None => break,
            };
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            if tx.send(job).is_err() {
                // Worker is gone.  Latch, and drop the queue so flush cannot
                // wait forever on completions that will never arrive.
                state.in_flight -= 1;
                state.queued.clear();
                self.shared
                    .error
                    .set(VrsError::InvalidState("chunk I/O worker terminated".into()));
                break;
            }
        }
    }

    /// Block until a Free buffer is available.
    fn acquire_free_buffer(&mut self) -> Result<AlignedBuffer> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(mut b) = state.free.pop() {
                b.clear();
                return Ok(b);
            }
            self.shared.error.check()?;
            state = self.shared.cond.wait(state).unwrap();
        }
    }

    // ── Flushing & reading ───────────────────────────────────────────────────

    /// Write out the partial Filling buffer and wait for every queued and
    /// in-flight write to complete.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(buffer) = self.current.take() {
            self.enqueue(buffer)?;
        }
        self.pump();

        let mut state = self.shared.state.lock().unwrap();
        while state.in_flight > 0 || !state.queued.is_empty() {
            state = self.shared.cond.wait(state).unwrap();
            // A completion may free depth for more queued jobs.
            drop(state);
            self.pump();
            state = self.shared.state.lock().unwrap();
        }
        drop(state);
        self.shared.error.check()
    }

    /// Positioned read.  Flushes all pending writes first, so the read sees
    /// every byte previously accepted.  Returns `NotEnoughData` when the file
    /// ends before `buf` is filled.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.flush()?;
        let n = read_full_at(&self.file, buf, offset)?;
        if n < buf.len() {
            return Err(VrsError::NotEnoughData {
                needed: buf.len() as u64,
                available: n as u64,
            });
        }
        Ok(())
    }

    /// Patch previously written bytes in place (file header updates).
    /// Flushes first; the overwrite must not extend the file.
    pub fn overwrite_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.flush()?;
        if offset + data.len() as u64 > self.write_offset {
            return Err(VrsError::InvalidParameter(format!(
                "overwrite {}..{} beyond written size {}",
                offset,
                offset + data.len() as u64,
                self.write_offset
            )));
        }
        write_all_at(&self.file, data, offset)
    }

    /// Flush everything, stop the worker, and close the handle.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.finished = true;
        let flush_result = self.flush();
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
        }
        self.job_tx.take(); // disconnects the channel, stopping the worker
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("chunk I/O worker panicked during shutdown");
            }
        }
        flush_result?;
        self.file.sync_all()?;
        self.shared.error.check()
    }
}

impl Drop for AsyncDiskChunk {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.shutdown();
        }
    }
}

// ── Completion worker ────────────────────────────────────────────────────────

/// Consume write jobs until the channel disconnects.  Completion events are
/// translated into pool-state updates under the shared mutex; failures latch.
fn spawn_completion_worker(
    file: Arc<File>,
    shared: Arc<ChunkShared>,
    rx: Receiver<WriteJob>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("vrs-chunk-io".into())
        .spawn(move || {
            for job in rx {
                let result = write_all_at(&file, job.buffer.as_slice(), job.offset);
                if let Err(e) = result {
                    shared.error.set(e);
                }
                let mut state = shared.state.lock().unwrap();
                state.in_flight -= 1;
                let mut buffer = job.buffer;
                buffer.clear();
                state.free.push(buffer);
                drop(state);
                shared.cond.notify_all();
            }
        })
        .expect("failed to spawn chunk I/O worker")
}

// ── Positioned I/O helpers ───────────────────────────────────────────────────

fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> Result<()> {
    let requested = data.len() as u64;
    let mut written = 0u64;
    while !data.is_empty() {
        match file.write_at(data, offset) {
            Ok(0) => {
                return Err(VrsError::PartialWriteError { requested, written });
            }
            Ok(n) => {
                written += n as u64;
                offset += n as u64;
                data = &data[n..];
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(VrsError::Io(e)),
        }
    }
    Ok(())
}

fn read_full_at(file: &File, buf: &mut [u8], mut offset: u64) -> Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                offset += n as u64;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(VrsError::Io(e)),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_options(engine: IoEngine) -> DiskChunkOptions {
        DiskChunkOptions {
            engine,
            buffer_size: MIN_BUFFER_SIZE,
            buffer_count: 2,
            ..DiskChunkOptions::default()
        }
    }

    #[test]
    fn options_are_clamped() {
        let opts = DiskChunkOptions {
            buffer_size: 1,
            buffer_count: 100_000,
            io_depth: Some(0),
            ..DiskChunkOptions::default()
        }
        .clamped();
        assert_eq!(opts.buffer_size, MIN_BUFFER_SIZE);
        assert_eq!(opts.buffer_count, MAX_BUFFER_COUNT);
        assert_eq!(opts.io_depth, Some(1));
    }

    #[test]
    fn aligned_buffer_is_aligned() {
        for align in [512usize, 4096] {
            let b = AlignedBuffer::new(1024, align);
            assert_eq!(b.as_slice().as_ptr() as usize % align, 0);
        }
    }

    #[test]
    fn write_flush_read_round_trip_all_engines() {
        for engine in [IoEngine::Synchronous, IoEngine::SyncPositioned, IoEngine::AsyncAio] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("chunk.bin");
            let mut chunk = AsyncDiskChunk::create(&path, tiny_options(engine)).unwrap();

            // Spans several buffers to exercise the pool.
            let data: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
            chunk.write(&data).unwrap();
            chunk.write(&data).unwrap();
            chunk.flush().unwrap();
            assert_eq!(chunk.size(), 2 * data.len() as u64);

            let mut back = vec![0u8; data.len() * 2];
            chunk.read_at(0, &mut back).unwrap();
            assert_eq!(&back[..data.len()], &data[..]);
            assert_eq!(&back[data.len()..], &data[..]);

            let depth = chunk.options().depth();
            assert!(chunk.max_in_flight() <= depth, "engine {engine:?}");
            chunk.close().unwrap();

            let on_disk = std::fs::read(&path).unwrap();
            assert_eq!(on_disk.len(), data.len() * 2);
        }
    }

    #[test]
    fn read_past_eof_is_not_enough_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk =
            AsyncDiskChunk::create(dir.path().join("c.bin"), tiny_options(IoEngine::AsyncAio))
                .unwrap();
        chunk.write(b"short").unwrap();
        let mut buf = [0u8; 64];
        assert!(matches!(
            chunk.read_at(0, &mut buf),
            Err(VrsError::NotEnoughData { .. })
        ));
        chunk.close().unwrap();
    }

    #[test]
    fn overwrite_patches_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.bin");
        let mut chunk = AsyncDiskChunk::create(&path, tiny_options(IoEngine::AsyncAio)).unwrap();
        chunk.write(&[0u8; 1024]).unwrap();
        chunk.overwrite_at(10, b"patched").unwrap();
        chunk.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[10..17], b"patched");
    }

    #[test]
    fn overwrite_beyond_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk =
            AsyncDiskChunk::create(dir.path().join("c.bin"), tiny_options(IoEngine::AsyncAio))
                .unwrap();
        chunk.write(&[0u8; 16]).unwrap();
        assert!(matches!(
            chunk.overwrite_at(8, &[0u8; 16]),
            Err(VrsError::InvalidParameter(_))
        ));
        chunk.close().unwrap();
    }
}
