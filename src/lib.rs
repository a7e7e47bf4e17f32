//! # vrs — VRS sensor-stream container reference implementation
//!
//! Format guarantees (frozen in file-format version 1):
//! - All numeric fields are little-endian; floats are IEEE-754; never negotiated
//! - Every on-disk block is self-describing: magic, type, total size
//! - The FileHeader and the index table carry mandatory CRC32s
//! - The IndexRecord sits at the tail; the full record list is
//!   reconstructible by scanning block headers from `first_record_offset`
//!   without it, and an idempotent rebuild is byte-identical
//! - Records appear in the strict global order
//!   `(timestamp, stream id, record type, offset)`
//! - Record payloads are chains of typed content blocks described by
//!   string RecordFormats and JSON DataLayout schemas stored as stream tags;
//!   schema evolution is handled by structural mapping, never by version
//!   sniffing

pub mod chunk_io;
pub mod chunked_file;
pub mod compress;
pub mod datalayout;
pub mod description;
pub mod error;
pub mod file_spec;
pub mod filter;
pub mod format;
pub mod index;
pub mod multi_reader;
pub mod player;
pub mod reader;
pub mod record;
pub mod record_format;
pub mod recordable;
pub mod stream_id;
pub mod writer;

// Flat re-exports for the most common types.
pub use compress::{CompressionMethod, CompressionPreset};
pub use datalayout::{DataLayout, DataLayoutBuilder};
pub use error::{Result, VrsError};
pub use file_spec::FileSpec;
pub use filter::{copy_records, CopyMode, RecordFilter};
pub use format::{BlockHeader, BlockType, FileHeader, BLOCK_HEADER_SIZE, BLOCK_MAGIC};
pub use index::IndexEntry;
pub use multi_reader::MultiRecordFileReader;
pub use player::{RecordFormatPlayer, RecordFormatStreamPlayer};
pub use reader::{RecordFileReader, RecordInfo, StreamPlayer};
pub use record::{DataSource, Record, RecordManager};
pub use record_format::{ContentBlock, ContentType, ImageFormat, PixelFormat, RecordFormat};
pub use recordable::{Recordable, Stream};
pub use stream_id::{RecordType, StreamId};
pub use writer::{RecordFileWriter, RecordFileWriterOptions};
