//! Frame-oriented Lz4/Zstd compression for record payloads.
//!
//! # Frame layout (9-byte header, little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      1   method            1=Lz4 2=Zstd
//!    1      4   compressed_len    bytes following this header
//!    5      4   uncompressed_len  bytes the frame decodes to
//! ```
//!
//! Frames are concatenated back to back; a payload larger than
//! [`MAX_FRAME_INPUT`] is split across several frames.  Uncompressed payloads
//! (preset `None`) are stored raw with no frame headers — the record prolog's
//! compression byte says which decoding path applies.
//!
//! # Truncation
//!
//! The decoder never produces partial output silently: a frame header cut
//! short, a frame body shorter than `compressed_len`, or a total output
//! smaller than the expected size all return `NotEnoughData`, leaving the
//! caller to decide whether the record is salvageable.

use crate::error::{Result, VrsError};

/// Largest input fed to a single frame.  Keeps `compressed_len` comfortably
/// within its u32 field even for incompressible data.
pub const MAX_FRAME_INPUT: usize = 256 * 1024 * 1024;

/// Byte size of the per-frame header.
pub const FRAME_HEADER_SIZE: usize = 9;

// ── Method & presets ─────────────────────────────────────────────────────────

/// On-disk compression method byte (record prolog + frame headers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionMethod {
    None = 0,
    Lz4 = 1,
    Zstd = 2,
}

impl CompressionMethod {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Lz4),
            2 => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Lz4 => "lz4",
            CompressionMethod::Zstd => "zstd",
        }
    }
}

/// Per-stream size/speed trade-off.  Only affects writing; reading
/// auto-detects the method from the frame headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionPreset {
    None,
    Lz4Fast,
    Lz4Tight,
    #[default]
    ZstdFast,
    ZstdLight,
    ZstdMedium,
    ZstdTight,
}

impl CompressionPreset {
    pub fn method(self) -> CompressionMethod {
        match self {
            CompressionPreset::None => CompressionMethod::None,
            CompressionPreset::Lz4Fast | CompressionPreset::Lz4Tight => CompressionMethod::Lz4,
            CompressionPreset::ZstdFast
            | CompressionPreset::ZstdLight
            | CompressionPreset::ZstdMedium
            | CompressionPreset::ZstdTight => CompressionMethod::Zstd,
        }
    }

    /// Zstd level for the Zstd presets; ignored by Lz4 (lz4_flex has a single
    /// speed point).
    pub fn level(self) -> i32 {
        match self {
            CompressionPreset::None | CompressionPreset::Lz4Fast | CompressionPreset::Lz4Tight => 0,
            CompressionPreset::ZstdFast => 1,
            CompressionPreset::ZstdLight => 3,
            CompressionPreset::ZstdMedium => 9,
            CompressionPreset::ZstdTight => 19,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionPreset::None => "none",
            CompressionPreset::Lz4Fast => "lz4-fast",
            CompressionPreset::Lz4Tight => "lz4-tight",
            CompressionPreset::ZstdFast => "zstd-fast",
            CompressionPreset::ZstdLight => "zstd-light",
            CompressionPreset::ZstdMedium => "zstd-medium",
            CompressionPreset::ZstdTight => "zstd-tight",
        }
    }

    /// Parse a CLI name.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(CompressionPreset::None),
            "lz4" | "lz4-fast" => Some(CompressionPreset::Lz4Fast),
            "lz4-tight" => Some(CompressionPreset::Lz4Tight),
            "zstd" | "zstd-fast" => Some(CompressionPreset::ZstdFast),
            "zstd-light" => Some(CompressionPreset::ZstdLight),
            "zstd-medium" => Some(CompressionPreset::ZstdMedium),
            "zstd-tight" => Some(CompressionPreset::ZstdTight),
            _ => None,
        }
    }

    pub const ALL: [CompressionPreset; 7] = [
        CompressionPreset::None,
        CompressionPreset::Lz4Fast,
        CompressionPreset::Lz4Tight,
        CompressionPreset::ZstdFast,
        CompressionPreset::ZstdLight,
        CompressionPreset::ZstdMedium,
        CompressionPreset::ZstdTight,
    ];
}

// ── Compression ──────────────────────────────────────────────────────────────

/// Compress `data` into concatenated frames.
///
/// Preset `None` returns the input verbatim (no frame headers); the caller
/// records the method in the record prolog so the reader picks the right
/// decoding path.
pub fn compress(data: &[u8], preset: CompressionPreset) -> Result<Vec<u8>> {
    let method = preset.method();
    if method == CompressionMethod::None {
        return Ok(data.to_vec());
    }

    let mut out = Vec::with_capacity(data.len() / 2 + FRAME_HEADER_SIZE);
    for chunk in data.chunks(MAX_FRAME_INPUT).chain(empty_input_once(data)) {
        let compressed = match method {
            CompressionMethod::Lz4 => lz4_flex::block::compress(chunk),
            CompressionMethod::Zstd => zstd::encode_all(chunk, preset.level())
                .map_err(|e| VrsError::CompressionFailure(e.to_string()))?,
            CompressionMethod::None => unreachable!(),
        };
        out.push(method as u8);
        out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&compressed);
    }
    Ok(out)
}

/// `chunks()` yields nothing for an empty input, but an empty record payload
/// still needs one (empty) frame so the decoder sees a well-formed stream.
fn empty_input_once(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    if data.is_empty() { Some(&data[..]) } else { None }.into_iter()
}

// ── Decompression ────────────────────────────────────────────────────────────

/// Decompress a concatenation of frames.
///
/// `expected_size` is the record prolog's `uncompressed_size`; output not
/// reaching it (typically because the payload was truncated on disk) yields
/// `NotEnoughData`.  The method is auto-detected per frame.
pub fn decompress(payload: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_size);
    let mut pos = 0usize;

    while out.len() < expected_size {
        if payload.len() - pos < FRAME_HEADER_SIZE {
            // A trailing partial frame header — the payload was cut short.
            return Err(VrsError::NotEnoughData {
                needed: expected_size as u64,
                available: out.len() as u64,
            });
        }
        let method_byte = payload[pos];
        let method = CompressionMethod::from_u8(method_byte).ok_or(VrsError::TruncatedFrame)?;
        let compressed_len =
            u32::from_le_bytes(payload[pos + 1..pos + 5].try_into().unwrap()) as usize;
        let uncompressed_len =
            u32::from_le_bytes(payload[pos + 5..pos + 9].try_into().unwrap()) as usize;
        pos += FRAME_HEADER_SIZE;

        if payload.len() - pos < compressed_len {
            return Err(VrsError::NotEnoughData {
                needed: expected_size as u64,
                available: out.len() as u64,
            });
        }
        let body = &payload[pos..pos + compressed_len];
        pos += compressed_len;

        let decoded = match method {
            CompressionMethod::Lz4 => lz4_flex::block::decompress(body, uncompressed_len)
                .map_err(|e| VrsError::DecompressionFailure(e.to_string()))?,
            CompressionMethod::Zstd => zstd::decode_all(body)
                .map_err(|e| VrsError::DecompressionFailure(e.to_string()))?,
            CompressionMethod::None => body.to_vec(),
        };
        if decoded.len() != uncompressed_len {
            return Err(VrsError::DecompressionFailure(format!(
                "frame decoded to {} bytes, header declared {uncompressed_len}",
                decoded.len()
            )));
        }
        out.extend_from_slice(&decoded);
    }

    if out.len() != expected_size {
        return Err(VrsError::DecompressionFailure(format!(
            "payload decoded to {} bytes, record declared {expected_size}",
            out.len()
        )));
    }
    Ok(out)
}

/// Decode a record payload given the prolog's compression byte.
///
/// Method 0 means the payload is stored raw; anything else is framed.
pub fn decode_record_payload(
    compression: u8,
    payload: &[u8],
    expected_size: usize,
) -> Result<Vec<u8>> {
    match CompressionMethod::from_u8(compression) {
        Some(CompressionMethod::None) => {
            if payload.len() < expected_size {
                return Err(VrsError::NotEnoughData {
                    needed: expected_size as u64,
                    available: payload.len() as u64,
                });
            }
            Ok(payload[..expected_size].to_vec())
        }
        Some(_) => decompress(payload, expected_size),
        None => Err(VrsError::DecompressionFailure(format!(
            "unknown compression method byte {compression}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> Vec<u8> {
        // Compressible but non-trivial content.
        (0..64 * 1024u32).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn round_trip_all_presets() {
        let data = sample_data();
        for preset in CompressionPreset::ALL {
            let packed = compress(&data, preset).unwrap();
            let unpacked = decode_record_payload(preset.method() as u8, &packed, data.len()).unwrap();
            assert_eq!(unpacked, data, "preset {}", preset.name());
        }
    }

    #[test]
    fn empty_payload_round_trips() {
        for preset in CompressionPreset::ALL {
            let packed = compress(&[], preset).unwrap();
            let unpacked = decode_record_payload(preset.method() as u8, &packed, 0).unwrap();
            assert!(unpacked.is_empty());
        }
    }

    #[test]
    fn truncation_yields_not_enough_data() {
        let data = sample_data();
        for preset in [CompressionPreset::Lz4Fast, CompressionPreset::ZstdFast] {
            let packed = compress(&data, preset).unwrap();
            for cut in [1usize, 5, 25, 100, packed.len() - 1] {
                let truncated = &packed[..packed.len() - cut];
                match decompress(truncated, data.len()) {
                    Err(VrsError::NotEnoughData { .. }) => {}
                    other => panic!("cut {cut}: expected NotEnoughData, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn frames_concatenate() {
        let a = vec![7u8; 1000];
        let b = vec![9u8; 500];
        let mut packed = compress(&a, CompressionPreset::ZstdFast).unwrap();
        packed.extend(compress(&b, CompressionPreset::Lz4Fast).unwrap());
        let out = decompress(&packed, a.len() + b.len()).unwrap();
        assert_eq!(&out[..1000], &a[..]);
        assert_eq!(&out[1000..], &b[..]);
    }

    #[test]
    fn preset_names_round_trip() {
        for preset in CompressionPreset::ALL {
            assert_eq!(CompressionPreset::from_name(preset.name()), Some(preset));
        }
    }
}
