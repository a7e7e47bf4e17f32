//! In-memory records and per-stream record queues.
//!
//! A [`Record`] owns its serialized payload.  Producers materialize records
//! through [`RecordManager::create_record`], which serializes the caller's
//! [`DataSource`] into an owned buffer immediately — the producer's stack
//! buffers and layouts are free to be reused the moment the call returns.
//! Compression happens later, on the writer side, never on the producer
//! thread.
//!
//! Ownership: a record belongs to its producer until enqueued; from then on
//! only the writer thread touches it.  After emission the writer recycles
//! record buffers back to the manager's pool (bounded), keeping steady-state
//! allocation near zero.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::compress::CompressionPreset;
use crate::datalayout::DataLayout;
use crate::error::Result;
use crate::stream_id::{RecordType, StreamId};

/// Records kept in the free pool per stream, unless reconfigured.
pub const DEFAULT_POOL_CAP: usize = 10;
/// Pending records per stream before `create_record` blocks (backpressure).
pub const DEFAULT_MAX_PENDING: usize = 10_000;

// ── DataSource ───────────────────────────────────────────────────────────────

/// One segment of a record payload.
pub enum DataSourcePart<'a> {
    /// A data layout; serialized as `fixed + var index + var region`.
    Layout(&'a mut DataLayout),
    /// Raw bytes, copied verbatim.
    Bytes(&'a [u8]),
    /// `size` bytes produced by a callback writing into the record buffer.
    Fill {
        size: usize,
        fill: Box<dyn FnOnce(&mut [u8]) + Send + 'a>,
    },
}

/// The payload description handed to `create_record` — any mix of layouts,
/// byte chunks, and fill callbacks, concatenated in order.
#[derive(Default)]
pub struct DataSource<'a> {
    parts: Vec<DataSourcePart<'a>>,
}

impl<'a> DataSource<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layout(layout: &'a mut DataLayout) -> Self {
        Self::new().and_layout(layout)
    }

    pub fn bytes(bytes: &'a [u8]) -> Self {
        Self::new().and_bytes(bytes)
    }

    pub fn and_layout(mut self, layout: &'a mut DataLayout) -> Self {
        self.parts.push(DataSourcePart::Layout(layout));
        self
    }

    pub fn and_bytes(mut self, bytes: &'a [u8]) -> Self {
        self.parts.push(DataSourcePart::Bytes(bytes));
        self
    }

    pub fn and_fill<F>(mut self, size: usize, fill: F) -> Self
    where
        F: FnOnce(&mut [u8]) + Send + 'a,
    {
        self.parts.push(DataSourcePart::Fill { size, fill: Box::new(fill) });
        self
    }

    /// Serialize every part into `out` (appended).
    pub fn collect_into(self, out: &mut Vec<u8>) {
        for part in self.parts {
            match part {
                DataSourcePart::Layout(layout) => {
                    let bytes = layout.serialize();
                    out.extend_from_slice(&bytes);
                }
                DataSourcePart::Bytes(bytes) => out.extend_from_slice(bytes),
                DataSourcePart::Fill { size, fill } => {
                    let start = out.len();
                    out.resize(start + size, 0);
                    fill(&mut out[start..]);
                }
            }
        }
    }
}

// ── Record ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Record {
    pub stream_id: StreamId,
    pub record_type: RecordType,
    pub format_version: u32,
    pub timestamp: f64,
    /// Uncompressed serialized payload.
    pub buffer: Vec<u8>,
    /// Per-record compression override; `None` uses the stream preset.
    pub preset: Option<CompressionPreset>,
    /// Creation sequence, breaking sort ties between equal timestamps.
    pub sequence: u64,
}

impl Record {
    /// Sort key within a stream: (timestamp, type, creation sequence).
    pub fn stream_order_key(&self) -> (f64, u8, u64) {
        (self.timestamp, self.record_type as u8, self.sequence)
    }

    fn cmp_stream_order(&self, other: &Record) -> std::cmp::Ordering {
        self.timestamp
            .total_cmp(&other.timestamp)
            .then_with(|| (self.record_type as u8).cmp(&(other.record_type as u8)))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

// ── RecordManager ────────────────────────────────────────────────────────────

struct ManagerInner {
    pending: VecDeque<Record>,
    free: Vec<Record>,
    sequence: u64,
}

/// Per-stream record queue and buffer pool.  Internally synchronized:
/// producers enqueue while the writer thread drains.
pub struct RecordManager {
    stream_id: StreamId,
    inner: Mutex<ManagerInner>,
    space: Condvar,
    pool_cap: usize,
    max_pending: usize,
    compression: CompressionPreset,
}

impl RecordManager {
    pub fn new(stream_id: StreamId, compression: CompressionPreset) -> Self {
        Self {
            stream_id,
            inner: Mutex::new(ManagerInner {
                pending: VecDeque::new(),
                free: Vec::new(),
                sequence: 0,
            }),
            space: Condvar::new(),
            pool_cap: DEFAULT_POOL_CAP,
            max_pending: DEFAULT_MAX_PENDING,
            compression,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn compression(&self) -> CompressionPreset {
        self.compression
    }

    /// Serialize `source` into a pooled record and enqueue it.  Blocks when
    /// the pending queue is at capacity (writer backpressure).  Records may
    /// arrive with out-of-order timestamps; ordering happens on collection.
    pub fn create_record(
        &self,
        timestamp: f64,
        record_type: RecordType,
        format_version: u32,
        source: DataSource<'_>,
    ) -> Result<()> {
        let mut record = {
            let mut inner = self.inner.lock().unwrap();
            while inner.pending.len() >= self.max_pending {
                inner = self.space.wait(inner).unwrap();
            }
            inner.sequence += 1;
            let sequence = inner.sequence;
            let mut record = inner.free.pop().unwrap_or_else(|| Record {
                stream_id: self.stream_id,
                record_type,
                format_version,
                timestamp,
                buffer: Vec::new(),
                preset: None,
                sequence,
            });
            record.stream_id = self.stream_id;
            record.record_type = record_type;
            record.format_version = format_version;
            record.timestamp = timestamp;
            record.preset = None;
            record.sequence = sequence;
            record.buffer.clear();
            record
        };

        // Serialization runs outside the lock; the record is still exclusive
        // to this producer until the push below.
        source.collect_into(&mut record.buffer);

        let mut inner = self.inner.lock().unwrap();
        inner.pending.push_back(record);
        Ok(())
    }

    /// Number of records waiting for the writer.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Whether any pending record has the given type (preamble checks).
    pub fn has_pending_type(&self, record_type: RecordType) -> bool {
        self.inner
            .lock()
            .unwrap()
            .pending
            .iter()
            .any(|r| r.record_type == record_type)
    }

    /// Move every pending record with `timestamp ≤ cutoff` into `out`, in
    /// (timestamp, type, sequence) order.
    pub fn collect_old_records(&self, cutoff: f64, out: &mut Vec<Record>) {
        let mut inner = self.inner.lock().unwrap();
        let mut batch: Vec<Record> = Vec::new();
        let mut keep: VecDeque<Record> = VecDeque::with_capacity(inner.pending.len());
        for record in inner.pending.drain(..) {
            if record.timestamp <= cutoff {
                batch.push(record);
            } else {
                keep.push_back(record);
            }
        }
        inner.pending = keep;
        drop(inner);
        self.space.notify_all();

        batch.sort_by(|a, b| a.cmp_stream_order(b));
        out.extend(batch);
    }

    /// Return emitted records to the pool (up to the pool cap).
    pub fn recycle(&self, records: impl IntoIterator<Item = Record>) {
        let mut inner = self.inner.lock().unwrap();
        for mut record in records {
            if inner.free.len() >= self.pool_cap {
                break;
            }
            record.buffer.clear();
            inner.free.push(record);
        }
    }

    /// Drop all pooled buffers (tests, memory trimming).
    pub fn purge_pool(&self) {
        self.inner.lock().unwrap().free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalayout::DataLayoutBuilder;

    fn manager() -> RecordManager {
        RecordManager::new(StreamId::new(998, 1), CompressionPreset::None)
    }

    #[test]
    fn data_source_concatenates_parts() {
        let mut b = DataLayoutBuilder::new();
        let counter = b.value::<u32>("counter");
        let mut layout = b.build();
        counter.set(&mut layout, 7).unwrap();

        let mut out = Vec::new();
        DataSource::layout(&mut layout)
            .and_bytes(b"tail")
            .and_fill(3, |buf| buf.copy_from_slice(b"xyz"))
            .collect_into(&mut out);

        assert_eq!(&out[..4], &7u32.to_le_bytes());
        assert_eq!(&out[4..8], b"tail");
        assert_eq!(&out[8..], b"xyz");
    }

    #[test]
    fn collect_sorts_and_filters_by_cutoff() {
        let mgr = manager();
        for (ts, rt) in [
            (3.0, RecordType::Data),
            (1.0, RecordType::Data),
            (2.0, RecordType::Data),
            (1.0, RecordType::Configuration),
            (9.0, RecordType::Data),
        ] {
            mgr.create_record(ts, rt, 1, DataSource::new()).unwrap();
        }

        let mut out = Vec::new();
        mgr.collect_old_records(5.0, &mut out);
        let keys: Vec<(f64, u8)> = out
            .iter()
            .map(|r| (r.timestamp, r.record_type as u8))
            .collect();
        assert_eq!(
            keys,
            vec![
                (1.0, RecordType::Configuration as u8),
                (1.0, RecordType::Data as u8),
                (2.0, RecordType::Data as u8),
                (3.0, RecordType::Data as u8),
            ]
        );
        assert_eq!(mgr.pending_count(), 1);
    }

    #[test]
    fn equal_timestamps_preserve_arrival_order() {
        let mgr = manager();
        for i in 0..5u32 {
            let payload = i.to_le_bytes();
            mgr.create_record(1.0, RecordType::Data, 1, DataSource::bytes(&payload))
                .unwrap();
        }
        let mut out = Vec::new();
        mgr.collect_old_records(1.0, &mut out);
        for (i, record) in out.iter().enumerate() {
            assert_eq!(record.buffer, (i as u32).to_le_bytes());
        }
    }

    #[test]
    fn pool_recycles_buffers_up_to_cap() {
        let mgr = manager();
        for _ in 0..20 {
            mgr.create_record(1.0, RecordType::Data, 1, DataSource::bytes(&[1, 2, 3]))
                .unwrap();
        }
        let mut out = Vec::new();
        mgr.collect_old_records(1.0, &mut out);
        assert_eq!(out.len(), 20);
        mgr.recycle(out);
        let inner = mgr.inner.lock().unwrap();
        assert_eq!(inner.free.len(), DEFAULT_POOL_CAP);
    }
}
