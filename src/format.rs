//! File format primitives — block headers, file header, record prolog.
//!
//! # Block header (16 bytes, all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic       = 0x21535256  ("VRS!" as LE u32)
//!    4      4   block_type  1=FileHeader 2=Description 3=Tags
//!                           4=IndexRecord 5=Record 6=EndOfRecords
//!    8      8   block_size  total block bytes, INCLUDING this header
//! ```
//!
//! # File header block (body = 48 bytes after the block header)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   format_version       = 1
//!    4      8   description_offset   0 = no description written
//!   12      8   index_offset         0 = index at tail (or absent)
//!   20      8   first_record_offset  offset of the first record block
//!   28     16   file_uuid            unique per file
//!   44      4   crc32                CRC32 of body[0..44]
//! ```
//!
//! # Record block body
//!
//! Every Record block starts with a 26-byte prolog:
//! `stream_id:u32`, `record_type:u8`, `format_version:u32`,
//! `timestamp:f64`, `compression:u8`, `uncompressed_size:u64`,
//! followed by the (possibly frame-compressed) content-block payload.
//!
//! # Endianness & alignment
//!
//! Every numeric field is little-endian; floating point is IEEE-754.  Readers
//! never dereference in-file bytes as native values — all parsing copies into
//! aligned temporaries via `from_le_bytes`.  A reader supporting format
//! version V reads any file of version V' ≤ V.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use uuid::Uuid;

use crate::error::{Result, VrsError};
use crate::stream_id::{RecordType, StreamId};

// ── Constants ────────────────────────────────────────────────────────────────

/// On-disk magic for every block header.  LE u32, reads as "VRS!".
pub const BLOCK_MAGIC: u32 = 0x2153_5256;

/// Fixed byte size of the generic block header.
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Current file format version.  Bumped only on layout changes; readers
/// accept any version less than or equal to the version they implement.
pub const FILE_FORMAT_VERSION: u32 = 1;

/// Byte size of the FileHeader block body (without the block header).
pub const FILE_HEADER_BODY_SIZE: usize = 48;

/// Total on-disk size of the FileHeader block at offset 0.
pub const FILE_HEADER_BLOCK_SIZE: usize = BLOCK_HEADER_SIZE + FILE_HEADER_BODY_SIZE;

/// Byte size of the record prolog at the start of every Record block body.
pub const RECORD_PROLOG_SIZE: usize = 26;

// ── Block type ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlockType {
    /// Anchor at offset 0; patched in place when the file is closed.
    FileHeader = 1,
    /// JSON describing file tags and every stream (typically at the tail).
    Description = 2,
    /// Inline tags for a stream added after records already flowed.
    Tags = 3,
    /// The record index table (head or tail).
    IndexRecord = 4,
    /// One data-bearing record.
    Record = 5,
    /// Empty sentinel marking a cleanly closed record region.
    EndOfRecords = 6,
}

impl BlockType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(BlockType::FileHeader),
            2 => Some(BlockType::Description),
            3 => Some(BlockType::Tags),
            4 => Some(BlockType::IndexRecord),
            5 => Some(BlockType::Record),
            6 => Some(BlockType::EndOfRecords),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BlockType::FileHeader => "FileHeader",
            BlockType::Description => "Description",
            BlockType::Tags => "Tags",
            BlockType::IndexRecord => "IndexRecord",
            BlockType::Record => "Record",
            BlockType::EndOfRecords => "EndOfRecords",
        }
    }
}

// ── Block header ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_type: BlockType,
    /// Total block size in bytes, header included.
    pub block_size: u64,
}

impl BlockHeader {
    pub fn new(block_type: BlockType, body_size: u64) -> Self {
        Self { block_type, block_size: BLOCK_HEADER_SIZE as u64 + body_size }
    }

    /// Payload bytes after the header.
    pub fn body_size(&self) -> u64 {
        self.block_size - BLOCK_HEADER_SIZE as u64
    }

    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(BLOCK_MAGIC)?;
        w.write_u32::<LittleEndian>(self.block_type as u32)?;
        w.write_u64::<LittleEndian>(self.block_size)
    }

    /// Read and validate a 16-byte block header.
    ///
    /// Fails on a bad magic, an unknown block type, or a size smaller than
    /// the header itself.  The caller MUST NOT read the body on error.
    pub fn read<R: Read>(mut r: R) -> Result<Self> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        r.read_exact(&mut buf).map_err(map_eof)?;
        Self::parse(&buf)
    }

    /// Parse a header from an in-memory 16-byte buffer.
    pub fn parse(buf: &[u8; BLOCK_HEADER_SIZE]) -> Result<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != BLOCK_MAGIC {
            return Err(VrsError::InvalidFileFormat(format!(
                "bad block magic: expected {BLOCK_MAGIC:#010x}, got {magic:#010x}"
            )));
        }
        let raw_type = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let block_type = BlockType::from_u32(raw_type)
            .ok_or_else(|| VrsError::InvalidFileFormat(format!("unknown block type {raw_type}")))?;
        let block_size = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        if block_size < BLOCK_HEADER_SIZE as u64 {
            return Err(VrsError::InvalidFileFormat(format!(
                "block size {block_size} smaller than header"
            )));
        }
        Ok(Self { block_type, block_size })
    }
}

// ── File header ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub format_version: u32,
    /// Byte offset of the Description block, 0 if none was written.
    pub description_offset: u64,
    /// Byte offset of the IndexRecord block, 0 ⇒ look at the tail.
    pub index_offset: u64,
    /// Byte offset of the first Record block.
    pub first_record_offset: u64,
    pub file_uuid: Uuid,
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            format_version: FILE_FORMAT_VERSION,
            description_offset: 0,
            index_offset: 0,
            first_record_offset: FILE_HEADER_BLOCK_SIZE as u64,
            file_uuid: Uuid::new_v4(),
        }
    }

    /// Write the full FileHeader block (block header + 48-byte body).
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        BlockHeader::new(BlockType::FileHeader, FILE_HEADER_BODY_SIZE as u64).write(&mut w)?;

        let mut body = [0u8; FILE_HEADER_BODY_SIZE];
        body[0..4].copy_from_slice(&self.format_version.to_le_bytes());
        body[4..12].copy_from_slice(&self.description_offset.to_le_bytes());
        body[12..20].copy_from_slice(&self.index_offset.to_le_bytes());
        body[20..28].copy_from_slice(&self.first_record_offset.to_le_bytes());
        body[28..44].copy_from_slice(self.file_uuid.as_bytes());

        let mut h = Hasher::new();
        h.update(&body[..44]);
        body[44..48].copy_from_slice(&h.finalize().to_le_bytes());

        w.write_all(&body)
    }

    /// Read the FileHeader block from the start of a stream.
    pub fn read<R: Read>(mut r: R) -> Result<Self> {
        let header = BlockHeader::read(&mut r)?;
        if header.block_type != BlockType::FileHeader {
            return Err(VrsError::InvalidFileFormat(format!(
                "expected FileHeader block at offset 0, found {}",
                header.block_type.name()
            )));
        }
        if header.body_size() < FILE_HEADER_BODY_SIZE as u64 {
            return Err(VrsError::InvalidFileFormat(format!(
                "FileHeader body {} bytes, expected at least {FILE_HEADER_BODY_SIZE}",
                header.body_size()
            )));
        }

        let mut body = [0u8; FILE_HEADER_BODY_SIZE];
        r.read_exact(&mut body).map_err(map_eof)?;

        let mut h = Hasher::new();
        h.update(&body[..44]);
        let expected = h.finalize();
        let stored = u32::from_le_bytes(body[44..48].try_into().unwrap());
        if stored != expected {
            return Err(VrsError::InvalidFileFormat(format!(
                "FileHeader CRC32 mismatch: expected {expected:#010x}, got {stored:#010x}"
            )));
        }

        let format_version = u32::from_le_bytes(body[0..4].try_into().unwrap());
        if format_version > FILE_FORMAT_VERSION {
            return Err(VrsError::InvalidFileFormat(format!(
                "file format version {format_version} newer than supported {FILE_FORMAT_VERSION}"
            )));
        }

        Ok(Self {
            format_version,
            description_offset: u64::from_le_bytes(body[4..12].try_into().unwrap()),
            index_offset: u64::from_le_bytes(body[12..20].try_into().unwrap()),
            first_record_offset: u64::from_le_bytes(body[20..28].try_into().unwrap()),
            file_uuid: Uuid::from_bytes(body[28..44].try_into().unwrap()),
        })
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

// ── Record prolog ────────────────────────────────────────────────────────────

/// The fixed 26-byte prefix of every Record block body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordProlog {
    pub stream_id: StreamId,
    pub record_type: RecordType,
    pub format_version: u32,
    pub timestamp: f64,
    /// Compression method byte (see `compress::CompressionMethod`).
    pub compression: u8,
    pub uncompressed_size: u64,
}

impl RecordProlog {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.stream_id.as_u32())?;
        w.write_u8(self.record_type as u8)?;
        w.write_u32::<LittleEndian>(self.format_version)?;
        w.write_f64::<LittleEndian>(self.timestamp)?;
        w.write_u8(self.compression)?;
        w.write_u64::<LittleEndian>(self.uncompressed_size)
    }

    pub fn read<R: Read>(mut r: R) -> Result<Self> {
        let stream_id = StreamId::from_u32(r.read_u32::<LittleEndian>().map_err(map_eof)?);
        let raw_type = r.read_u8().map_err(map_eof)?;
        let record_type = RecordType::from_u8(raw_type)
            .ok_or_else(|| VrsError::InvalidFileFormat(format!("unknown record type {raw_type}")))?;
        let format_version = r.read_u32::<LittleEndian>().map_err(map_eof)?;
        let timestamp = r.read_f64::<LittleEndian>().map_err(map_eof)?;
        let compression = r.read_u8().map_err(map_eof)?;
        let uncompressed_size = r.read_u64::<LittleEndian>().map_err(map_eof)?;
        Ok(Self { stream_id, record_type, format_version, timestamp, compression, uncompressed_size })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Translate an unexpected EOF into `NotEnoughData` so truncation is
/// distinguishable from genuine I/O failures.
pub(crate) fn map_eof(e: io::Error) -> VrsError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        VrsError::NotEnoughData { needed: 0, available: 0 }
    } else {
        VrsError::Io(e)
    }
}

/// CRC32 of a byte slice — the header/index checksum used across the format.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut h = Hasher::new();
    h.update(bytes);
    h.finalize()
}
