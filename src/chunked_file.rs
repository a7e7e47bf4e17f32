//! Multi-chunk logical files.
//!
//! A logical VRS file may be stored as several physical chunks sharing a
//! filename stem: `walk.vrs`, `walk.vrs_1`, `walk.vrs_2`, ...  Logical
//! offsets map to (chunk index, offset within chunk); every chunk except
//! possibly the last has a known size.  Records never span chunk boundaries
//! — the writer rotates between records — so a reader resolving an index
//! offset always finds the whole record inside one chunk.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Result, VrsError};
use crate::file_spec::FileSpec;

/// Suffix used for chunk N (N ≥ 1): `<stem>_N`.
pub fn chunk_path(first_chunk: &Path, chunk_index: usize) -> PathBuf {
    if chunk_index == 0 {
        first_chunk.to_path_buf()
    } else {
        let mut name = first_chunk.as_os_str().to_os_string();
        name.push(format!("_{chunk_index}"));
        PathBuf::from(name)
    }
}

/// Enumerate the chunks of a logical file: the given path plus every
/// consecutively numbered sibling that exists.
pub fn discover_chunks(first_chunk: &Path) -> Result<Vec<PathBuf>> {
    if !first_chunk.exists() {
        return Err(VrsError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found", first_chunk.display()),
        )));
    }
    let mut chunks = vec![first_chunk.to_path_buf()];
    loop {
        let next = chunk_path(first_chunk, chunks.len());
        if !next.exists() {
            break;
        }
        chunks.push(next);
    }
    Ok(chunks)
}

// ── ChunkedFileReader ────────────────────────────────────────────────────────

struct OpenChunk {
    file: File,
    /// Logical offset of this chunk's first byte.
    logical_start: u64,
    size: u64,
}

/// Read + Seek over the concatenation of a file's chunks.
pub struct ChunkedFileReader {
    chunks: Vec<OpenChunk>,
    total_size: u64,
    position: u64,
}

impl ChunkedFileReader {
    /// Open a file spec.  Only `diskfile` storage is supported here; other
    /// schemes belong to external file handlers.
    pub fn open_spec(spec: &FileSpec) -> Result<Self> {
        if !spec.is_disk_file() {
            return Err(VrsError::UnsupportedFeature(format!(
                "no file handler for storage '{}'",
                spec.storage
            )));
        }
        let first = spec
            .chunks
            .first()
            .ok_or_else(|| VrsError::InvalidParameter("file spec has no chunks".into()))?;

        // A spec listing a single chunk still gets sibling discovery, so a
        // plain path opens all of `f.vrs`, `f.vrs_1`, ...
        let paths: Vec<PathBuf> = if spec.chunks.len() > 1 {
            spec.chunks.iter().map(PathBuf::from).collect()
        } else {
            discover_chunks(Path::new(first))?
        };
        Self::open_paths(&paths)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let paths = discover_chunks(path.as_ref())?;
        Self::open_paths(&paths)
    }

    fn open_paths(paths: &[PathBuf]) -> Result<Self> {
        let mut chunks = Vec::with_capacity(paths.len());
        let mut logical_start = 0u64;
        for path in paths {
            let file = File::open(path)?;
            let size = file.metadata()?.len();
            chunks.push(OpenChunk { file, logical_start, size });
            logical_start += size;
        }
        Ok(Self { chunks, total_size: logical_start, position: 0 })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Sizes of the individual chunks, in order.
    pub fn chunk_sizes(&self) -> Vec<u64> {
        self.chunks.iter().map(|c| c.size).collect()
    }

    /// Map a logical offset to its chunk.  Offsets at `total_size` resolve
    /// past the last chunk and read zero bytes.
    fn chunk_at(&self, offset: u64) -> Option<usize> {
        self.chunks
            .iter()
            .position(|c| offset >= c.logical_start && offset < c.logical_start + c.size)
    }
}

impl Read for ChunkedFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.total_size {
            return Ok(0);
        }
        let idx = match self.chunk_at(self.position) {
            Some(i) => i,
            None => return Ok(0),
        };
        let chunk = &mut self.chunks[idx];
        let within = self.position - chunk.logical_start;
        chunk.file.seek(SeekFrom::Start(within))?;

        // Clamp to the chunk end; the caller loops across boundaries.
        let available = (chunk.size - within) as usize;
        let want = buf.len().min(available);
        let n = chunk.file.read(&mut buf[..want])?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for ChunkedFileReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(o) => o as i64,
            SeekFrom::End(d) => self.total_size as i64 + d,
            SeekFrom::Current(d) => self.position as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of chunked file",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_chunks(dir: &Path, parts: &[&[u8]]) -> PathBuf {
        let first = dir.join("f.vrs");
        for (i, part) in parts.iter().enumerate() {
            let path = chunk_path(&first, i);
            File::create(path).unwrap().write_all(part).unwrap();
        }
        first
    }

    #[test]
    fn chunk_paths_are_numbered() {
        let first = Path::new("/tmp/f.vrs");
        assert_eq!(chunk_path(first, 0), PathBuf::from("/tmp/f.vrs"));
        assert_eq!(chunk_path(first, 2), PathBuf::from("/tmp/f.vrs_2"));
    }

    #[test]
    fn reads_across_chunk_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_chunks(dir.path(), &[b"hello ", b"chunked ", b"world"]);

        let mut reader = ChunkedFileReader::open(&first).unwrap();
        assert_eq!(reader.chunk_count(), 3);
        assert_eq!(reader.total_size(), 19);

        let mut all = Vec::new();
        reader.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"hello chunked world");

        // Seek into the middle chunk and read across its end.
        reader.seek(SeekFrom::Start(4)).unwrap();
        let mut buf = [0u8; 10];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"o chunked ");
    }

    #[test]
    fn discovery_stops_at_gap() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("g.vrs");
        File::create(&first).unwrap().write_all(b"a").unwrap();
        // g.vrs_2 without g.vrs_1 must not be picked up.
        File::create(dir.path().join("g.vrs_2")).unwrap().write_all(b"c").unwrap();

        let chunks = discover_chunks(&first).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn seek_past_end_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_chunks(dir.path(), &[b"abc"]);
        let mut reader = ChunkedFileReader::open(&first).unwrap();
        reader.seek(SeekFrom::Start(100)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
