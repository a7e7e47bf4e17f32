//! Error taxonomy for the VRS container.
//!
//! Every fallible operation in the crate returns [`Result`].  The kinds are
//! deliberately distinct so callers can react precisely: a truncated
//! compression frame (`NotEnoughData`) is recoverable during playback, while
//! an `InvalidFileFormat` on open is fatal.
//!
//! Async layers (the disk chunk) cannot surface failures at the call that
//! caused them; they latch the first error into a [`LatchedError`] and report
//! it on the next synchronous operation or on flush.  No silent corruption:
//! every failure either returns an error or is latched.

use std::io;
use std::sync::Mutex;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VrsError>;

#[derive(Error, Debug)]
pub enum VrsError {
    // ── Caller mistakes ──────────────────────────────────────────────────────
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("File is not open")]
    NotOpen,

    // ── Data availability ────────────────────────────────────────────────────
    #[error("Not enough data: needed {needed} bytes, only {available} available")]
    NotEnoughData { needed: u64, available: u64 },
    #[error("Partial write: {written} of {requested} bytes written")]
    PartialWriteError { requested: u64, written: u64 },
    #[error("Truncated compression frame")]
    TruncatedFrame,

    // ── File & record structure ──────────────────────────────────────────────
    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),
    #[error("Invalid record format: {0}")]
    InvalidRecordFormat(String),
    #[error("Index record is corrupt: {0}")]
    IndexCorrupt(String),
    #[error("Index record is missing")]
    IndexMissing,

    // ── Compression ──────────────────────────────────────────────────────────
    #[error("Compression failure: {0}")]
    CompressionFailure(String),
    #[error("Decompression failure: {0}")]
    DecompressionFailure(String),

    // ── DataLayout ───────────────────────────────────────────────────────────
    #[error("DataLayout schema mismatch: {0}")]
    DataLayoutSchemaMismatch(String),
    #[error("Required piece unavailable after mapping: {0}")]
    RequiredPieceUnavailable(String),

    // ── Lookup & capability ──────────────────────────────────────────────────
    #[error("Stream not found: {0}")]
    StreamNotFound(String),
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    // ── Pass-through ─────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VrsError {
    /// Short stable name for one-line diagnostics (CLI `rage`, logs).
    pub fn kind_name(&self) -> &'static str {
        match self {
            VrsError::InvalidParameter(_) => "InvalidParameter",
            VrsError::InvalidRequest(_) => "InvalidRequest",
            VrsError::InvalidState(_) => "InvalidState",
            VrsError::NotOpen => "NotOpen",
            VrsError::NotEnoughData { .. } => "NotEnoughData",
            VrsError::PartialWriteError { .. } => "PartialWriteError",
            VrsError::TruncatedFrame => "TruncatedFrame",
            VrsError::InvalidFileFormat(_) => "InvalidFileFormat",
            VrsError::InvalidRecordFormat(_) => "InvalidRecordFormat",
            VrsError::IndexCorrupt(_) => "IndexCorrupt",
            VrsError::IndexMissing => "IndexMissing",
            VrsError::CompressionFailure(_) => "CompressionFailure",
            VrsError::DecompressionFailure(_) => "DecompressionFailure",
            VrsError::DataLayoutSchemaMismatch(_) => "DataLayoutSchemaMismatch",
            VrsError::RequiredPieceUnavailable(_) => "RequiredPieceUnavailable",
            VrsError::StreamNotFound(_) => "StreamNotFound",
            VrsError::UnsupportedFeature(_) => "UnsupportedFeature",
            VrsError::OutOfMemory(_) => "OutOfMemory",
            VrsError::Io(_) => "Io",
            VrsError::Json(_) => "Json",
        }
    }
}

// ── Latched errors ───────────────────────────────────────────────────────────

/// Holds the first error produced by a background thread until a synchronous
/// call can surface it.  Later errors are dropped; the first one wins.
#[derive(Debug, Default)]
pub struct LatchedError {
    slot: Mutex<Option<VrsError>>,
}

impl LatchedError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `err` unless an earlier error is already held.
    pub fn set(&self, err: VrsError) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Take the latched error, clearing the latch.
    pub fn take(&self) -> Option<VrsError> {
        self.slot.lock().unwrap().take()
    }

    /// Return `Ok(())` if no error is latched, else the latched error.
    pub fn check(&self) -> Result<()> {
        match self.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latched_error_keeps_first() {
        let latch = LatchedError::new();
        assert!(latch.check().is_ok());
        latch.set(VrsError::NotOpen);
        latch.set(VrsError::IndexMissing);
        match latch.take() {
            Some(VrsError::NotOpen) => {}
            other => panic!("expected first latched error, got {other:?}"),
        }
        assert!(latch.check().is_ok());
    }
}
