//! Record formats — the content-block chain describing a record's payload.
//!
//! A format is a `+`-joined chain of block specs, e.g.
//! `data_layout/size=48+image/raw/640x480/pixel=grey8`.  The string grammar
//! round-trips losslessly: parsing the canonical text of a spec reproduces
//! the spec.  Within a record the blocks are contiguous; every block except
//! possibly the last must have a size computable from its spec (or, for
//! image/audio blocks, from data-layout conventions at read time) so the
//! decoder can locate the next block.  At most one block of unknown size is
//! allowed, and only in last position.
//!
//! Formats and the JSON schemas of their data-layout blocks persist as
//! VRS-internal stream tags named `RF:<type>:<version>` and
//! `DL:<type>:<version>:<blockIndex>`.

use std::fmt;

use crate::error::{Result, VrsError};
use crate::stream_id::RecordType;

// ── Tag names ────────────────────────────────────────────────────────────────

fn record_type_tag(rt: RecordType) -> &'static str {
    match rt {
        RecordType::Undefined => "Undefined",
        RecordType::State => "State",
        RecordType::Configuration => "Configuration",
        RecordType::Data => "Data",
        RecordType::Tags => "Tags",
    }
}

/// Stream-tag name persisting the format of (record type, version).
pub fn record_format_tag_name(rt: RecordType, format_version: u32) -> String {
    format!("RF:{}:{}", record_type_tag(rt), format_version)
}

/// Stream-tag name persisting the data-layout schema of one block.
pub fn data_layout_tag_name(rt: RecordType, format_version: u32, block_index: usize) -> String {
    format!("DL:{}:{}:{}", record_type_tag(rt), format_version, block_index)
}

/// Reverse of [`record_format_tag_name`]; used when enumerating stream tags.
pub fn parse_record_format_tag_name(tag: &str) -> Option<(RecordType, u32)> {
    let rest = tag.strip_prefix("RF:")?;
    let (type_name, version) = rest.split_once(':')?;
    let rt = match type_name {
        "Undefined" => RecordType::Undefined,
        "State" => RecordType::State,
        "Configuration" => RecordType::Configuration,
        "Data" => RecordType::Data,
        "Tags" => RecordType::Tags,
        _ => return None,
    };
    Some((rt, version.parse().ok()?))
}

// ── Pixel formats ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Grey8,
    Grey10,
    Grey12,
    Grey16,
    Bgr8,
    Rgb8,
    Rgba8,
    Depth32F,
    Yuy2,
    Raw10,
    /// Planar 4:2:0 — full-size Y plane, then half-size U and V planes.
    YuvI420Split,
}

impl PixelFormat {
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Grey8 => "grey8",
            PixelFormat::Grey10 => "grey10",
            PixelFormat::Grey12 => "grey12",
            PixelFormat::Grey16 => "grey16",
            PixelFormat::Bgr8 => "bgr8",
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Depth32F => "depth32f",
            PixelFormat::Yuy2 => "yuy2",
            PixelFormat::Raw10 => "raw10",
            PixelFormat::YuvI420Split => "yuv_i420_split",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Some(match s {
            "grey8" => PixelFormat::Grey8,
            "grey10" => PixelFormat::Grey10,
            "grey12" => PixelFormat::Grey12,
            "grey16" => PixelFormat::Grey16,
            "bgr8" => PixelFormat::Bgr8,
            "rgb8" => PixelFormat::Rgb8,
            "rgba8" => PixelFormat::Rgba8,
            "depth32f" => PixelFormat::Depth32F,
            "yuy2" => PixelFormat::Yuy2,
            "raw10" => PixelFormat::Raw10,
            "yuv_i420_split" => PixelFormat::YuvI420Split,
            _ => return None,
        })
    }

    /// Numeric form stored in `image_pixel_format` data-layout pieces.
    pub fn as_u32(self) -> u32 {
        match self {
            PixelFormat::Grey8 => 1,
            PixelFormat::Grey10 => 2,
            PixelFormat::Grey12 => 3,
            PixelFormat::Grey16 => 4,
            PixelFormat::Bgr8 => 5,
            PixelFormat::Rgb8 => 6,
            PixelFormat::Rgba8 => 7,
            PixelFormat::Depth32F => 8,
            PixelFormat::Yuy2 => 9,
            PixelFormat::Raw10 => 10,
            PixelFormat::YuvI420Split => 11,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => PixelFormat::Grey8,
            2 => PixelFormat::Grey10,
            3 => PixelFormat::Grey12,
            4 => PixelFormat::Grey16,
            5 => PixelFormat::Bgr8,
            6 => PixelFormat::Rgb8,
            7 => PixelFormat::Rgba8,
            8 => PixelFormat::Depth32F,
            9 => PixelFormat::Yuy2,
            10 => PixelFormat::Raw10,
            11 => PixelFormat::YuvI420Split,
            _ => return None,
        })
    }

    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::YuvI420Split => 3,
            _ => 1,
        }
    }

    /// Default bytes per line of `plane` for a `width`-pixel image.
    pub fn default_plane_stride(self, width: u32, plane: usize) -> u32 {
        match self {
            PixelFormat::Grey8 => width,
            // 10/12-bit greys are stored in 2-byte samples.
            PixelFormat::Grey10 | PixelFormat::Grey12 | PixelFormat::Grey16 => width * 2,
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => width * 3,
            PixelFormat::Rgba8 | PixelFormat::Depth32F => width * 4,
            PixelFormat::Yuy2 => width * 2,
            // Packed 10-bit: 4 pixels in 5 bytes.
            PixelFormat::Raw10 => (width * 10).div_ceil(8),
            PixelFormat::YuvI420Split => {
                if plane == 0 {
                    width
                } else {
                    width.div_ceil(2)
                }
            }
        }
    }

    pub fn plane_height(self, height: u32, plane: usize) -> u32 {
        match self {
            PixelFormat::YuvI420Split if plane > 0 => height.div_ceil(2),
            _ => height,
        }
    }
}

// ── Image spec ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Raw,
    Jpg,
    Png,
    Jxl,
    Video,
}

impl ImageFormat {
    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Raw => "raw",
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Jxl => "jxl",
            ImageFormat::Video => "video",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Some(match s {
            "raw" => ImageFormat::Raw,
            "jpg" => ImageFormat::Jpg,
            "png" => ImageFormat::Png,
            "jxl" => ImageFormat::Jxl,
            "video" => ImageFormat::Video,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageContentBlockSpec {
    pub format: Option<ImageFormat>,
    pub pixel_format: Option<PixelFormat>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Bytes per line of plane 0; further planes derive from the pixel
    /// format's plane geometry.
    pub stride: Option<u32>,
    pub codec_name: Option<String>,
    /// 0–100; only meaningful for video blocks.
    pub codec_quality: Option<u8>,
    pub keyframe_timestamp: Option<f64>,
    pub keyframe_index: Option<u32>,
}

impl ImageContentBlockSpec {
    pub fn raw(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format: Some(ImageFormat::Raw),
            pixel_format: Some(pixel_format),
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn plane_stride(&self, plane: usize) -> Option<u32> {
        let pixel = self.pixel_format?;
        let width = self.width?;
        if plane == 0 {
            return Some(self.stride.unwrap_or_else(|| pixel.default_plane_stride(width, 0)));
        }
        // Secondary planes always use default geometry.
        Some(pixel.default_plane_stride(width, plane))
    }

    /// Total raw byte size: sum of `stride × height` over planes.  `None`
    /// for compressed formats and for raw specs missing dimensions.
    pub fn block_size(&self) -> Option<usize> {
        if self.format != Some(ImageFormat::Raw) {
            return None;
        }
        let pixel = self.pixel_format?;
        let height = self.height?;
        let mut total = 0usize;
        for plane in 0..pixel.plane_count() {
            let stride = self.plane_stride(plane)? as usize;
            let rows = pixel.plane_height(height, plane) as usize;
            total += stride * rows;
        }
        Some(total)
    }

    fn format_parts(&self, out: &mut Vec<String>) {
        if let Some(format) = self.format {
            out.push(format.name().to_string());
        }
        if let (Some(w), Some(h)) = (self.width, self.height) {
            out.push(format!("{w}x{h}"));
        }
        if let Some(pixel) = self.pixel_format {
            out.push(format!("pixel={}", pixel.name()));
        }
        if let Some(stride) = self.stride {
            out.push(format!("stride={stride}"));
        }
        if let Some(codec) = &self.codec_name {
            out.push(format!("codec={}", escape_codec_name(codec)));
        }
        if let Some(quality) = self.codec_quality {
            out.push(format!("codec_quality={quality}"));
        }
        if let Some(ts) = self.keyframe_timestamp {
            out.push(format!("keyframe_timestamp={ts}"));
        }
        if let Some(index) = self.keyframe_index {
            out.push(format!("keyframe_index={index}"));
        }
    }

    fn parse_part(&mut self, part: &str) -> bool {
        if let Some(format) = ImageFormat::from_name(part) {
            self.format = Some(format);
            return true;
        }
        if let Some((w, h)) = parse_dimensions(part) {
            self.width = Some(w);
            self.height = Some(h);
            return true;
        }
        if let Some((key, value)) = part.split_once('=') {
            return match key {
                "pixel" => match PixelFormat::from_name(value) {
                    Some(p) => {
                        self.pixel_format = Some(p);
                        true
                    }
                    None => false,
                },
                "stride" => parse_into(value, &mut self.stride),
                "codec" => {
                    self.codec_name = Some(unescape_codec_name(value));
                    true
                }
                "codec_quality" => parse_into(value, &mut self.codec_quality),
                "keyframe_timestamp" => parse_into(value, &mut self.keyframe_timestamp),
                "keyframe_index" => parse_into(value, &mut self.keyframe_index),
                _ => false,
            };
        }
        false
    }
}

// ── Audio spec ───────────────────────────────────────────────────────────────

/// PCM sample encodings.  Names match the grammar (`int16le`, `uint24be`,
/// `float64be`, `uint8mulaw`, `uint8alaw`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSampleFormat {
    Int8,
    UInt8,
    Int16Le,
    Int16Be,
    UInt16Le,
    UInt16Be,
    Int24Le,
    Int24Be,
    UInt24Le,
    UInt24Be,
    Int32Le,
    Int32Be,
    UInt32Le,
    UInt32Be,
    Float32Le,
    Float32Be,
    Float64Le,
    Float64Be,
    MuLaw,
    ALaw,
}

impl AudioSampleFormat {
    pub fn name(self) -> &'static str {
        use AudioSampleFormat::*;
        match self {
            Int8 => "int8",
            UInt8 => "uint8",
            Int16Le => "int16le",
            Int16Be => "int16be",
            UInt16Le => "uint16le",
            UInt16Be => "uint16be",
            Int24Le => "int24le",
            Int24Be => "int24be",
            UInt24Le => "uint24le",
            UInt24Be => "uint24be",
            Int32Le => "int32le",
            Int32Be => "int32be",
            UInt32Le => "uint32le",
            UInt32Be => "uint32be",
            Float32Le => "float32le",
            Float32Be => "float32be",
            Float64Le => "float64le",
            Float64Be => "float64be",
            MuLaw => "uint8mulaw",
            ALaw => "uint8alaw",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        use AudioSampleFormat::*;
        Some(match s {
            "int8" => Int8,
            "uint8" => UInt8,
            "int16le" => Int16Le,
            "int16be" => Int16Be,
            "uint16le" => UInt16Le,
            "uint16be" => UInt16Be,
            "int24le" => Int24Le,
            "int24be" => Int24Be,
            "uint24le" => UInt24Le,
            "uint24be" => UInt24Be,
            "int32le" => Int32Le,
            "int32be" => Int32Be,
            "uint32le" => UInt32Le,
            "uint32be" => UInt32Be,
            "float32le" => Float32Le,
            "float32be" => Float32Be,
            "float64le" => Float64Le,
            "float64be" => Float64Be,
            "uint8mulaw" => MuLaw,
            "uint8alaw" => ALaw,
            _ => return None,
        })
    }

    pub fn bytes_per_sample(self) -> usize {
        use AudioSampleFormat::*;
        match self {
            Int8 | UInt8 | MuLaw | ALaw => 1,
            Int16Le | Int16Be | UInt16Le | UInt16Be => 2,
            Int24Le | Int24Be | UInt24Le | UInt24Be => 3,
            Int32Le | Int32Be | UInt32Le | UInt32Be | Float32Le | Float32Be => 4,
            Float64Le | Float64Be => 8,
        }
    }

    /// Numeric form stored in `audio_sample_format` data-layout pieces.
    pub fn as_u32(self) -> u32 {
        self as u32 + 1
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        use AudioSampleFormat::*;
        const ALL: [AudioSampleFormat; 20] = [
            Int8, UInt8, Int16Le, Int16Be, UInt16Le, UInt16Be, Int24Le, Int24Be, UInt24Le,
            UInt24Be, Int32Le, Int32Be, UInt32Le, UInt32Be, Float32Le, Float32Be, Float64Le,
            Float64Be, MuLaw, ALaw,
        ];
        v.checked_sub(1).and_then(|i| ALL.get(i as usize).copied())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioContentBlockSpec {
    pub sample_format: Option<AudioSampleFormat>,
    pub channel_count: Option<u8>,
    pub sample_rate: Option<u32>,
    pub sample_count: Option<u32>,
    /// Bytes per sample frame (all channels); defaults to
    /// `channels × bytes_per_sample`.
    pub stride: Option<u8>,
}

impl AudioContentBlockSpec {
    pub fn pcm(sample_format: AudioSampleFormat, channel_count: u8, sample_rate: u32) -> Self {
        Self {
            sample_format: Some(sample_format),
            channel_count: Some(channel_count),
            sample_rate: Some(sample_rate),
            ..Self::default()
        }
    }

    pub fn frame_stride(&self) -> Option<usize> {
        if let Some(stride) = self.stride {
            return Some(stride as usize);
        }
        Some(self.sample_format?.bytes_per_sample() * self.channel_count? as usize)
    }

    /// Byte size when the sample count is known.
    pub fn block_size(&self) -> Option<usize> {
        Some(self.sample_count? as usize * self.frame_stride()?)
    }

    fn format_parts(&self, out: &mut Vec<String>) {
        out.push("pcm".to_string());
        if let Some(format) = self.sample_format {
            out.push(format.name().to_string());
        }
        if let Some(channels) = self.channel_count {
            out.push(format!("channels={channels}"));
        }
        if let Some(rate) = self.sample_rate {
            out.push(format!("rate={rate}"));
        }
        if let Some(samples) = self.sample_count {
            out.push(format!("samples={samples}"));
        }
        if let Some(stride) = self.stride {
            out.push(format!("stride={stride}"));
        }
    }

    fn parse_part(&mut self, part: &str) -> bool {
        if part == "pcm" {
            return true;
        }
        if let Some(format) = AudioSampleFormat::from_name(part) {
            self.sample_format = Some(format);
            return true;
        }
        if let Some((key, value)) = part.split_once('=') {
            return match key {
                "channels" => parse_into(value, &mut self.channel_count),
                "rate" => parse_into(value, &mut self.sample_rate),
                "samples" => parse_into(value, &mut self.sample_count),
                "stride" => parse_into(value, &mut self.stride),
                _ => false,
            };
        }
        false
    }
}

// ── ContentBlock ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Empty,
    DataLayout,
    Image,
    Audio,
    Custom,
}

impl ContentType {
    pub fn name(self) -> &'static str {
        match self {
            ContentType::Empty => "empty",
            ContentType::DataLayout => "data_layout",
            ContentType::Image => "image",
            ContentType::Audio => "audio",
            ContentType::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Empty,
    /// Size may be declared (`data_layout/size=48`); otherwise it is derived
    /// from the block bytes and the stream's schema at read time.
    DataLayout { size: Option<usize> },
    Image(ImageContentBlockSpec),
    Audio(AudioContentBlockSpec),
    Custom { size: Option<usize> },
}

impl ContentBlock {
    pub fn content_type(&self) -> ContentType {
        match self {
            ContentBlock::Empty => ContentType::Empty,
            ContentBlock::DataLayout { .. } => ContentType::DataLayout,
            ContentBlock::Image(_) => ContentType::Image,
            ContentBlock::Audio(_) => ContentType::Audio,
            ContentBlock::Custom { .. } => ContentType::Custom,
        }
    }

    /// Size from the spec alone; `None` means unknown until read time.
    pub fn block_size(&self) -> Option<usize> {
        match self {
            ContentBlock::Empty => Some(0),
            ContentBlock::DataLayout { size } => *size,
            ContentBlock::Image(spec) => spec.block_size(),
            ContentBlock::Audio(spec) => spec.block_size(),
            ContentBlock::Custom { size } => *size,
        }
    }

    /// Parse one block spec (no `+`).
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.split('/');
        let head = parts.next().unwrap_or("");
        let mut block = match head {
            "empty" => ContentBlock::Empty,
            "data_layout" => ContentBlock::DataLayout { size: None },
            "image" => ContentBlock::Image(ImageContentBlockSpec::default()),
            "audio" => ContentBlock::Audio(AudioContentBlockSpec::default()),
            "custom" => ContentBlock::Custom { size: None },
            other => {
                return Err(VrsError::InvalidRecordFormat(format!(
                    "unknown content type '{other}' in '{text}'"
                )))
            }
        };
        for part in parts {
            let understood = match &mut block {
                ContentBlock::Empty => false,
                ContentBlock::DataLayout { size } | ContentBlock::Custom { size } => {
                    match part.split_once('=') {
                        Some(("size", value)) => parse_into(value, size),
                        _ => false,
                    }
                }
                ContentBlock::Image(spec) => spec.parse_part(part),
                ContentBlock::Audio(spec) => spec.parse_part(part),
            };
            if !understood {
                return Err(VrsError::InvalidRecordFormat(format!(
                    "unrecognized spec part '{part}' in '{text}'"
                )));
            }
        }
        Ok(block)
    }
}

impl fmt::Display for ContentBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![self.content_type().name().to_string()];
        match self {
            ContentBlock::Empty => {}
            ContentBlock::DataLayout { size } | ContentBlock::Custom { size } => {
                if let Some(size) = size {
                    parts.push(format!("size={size}"));
                }
            }
            ContentBlock::Image(spec) => spec.format_parts(&mut parts),
            ContentBlock::Audio(spec) => spec.format_parts(&mut parts),
        }
        f.write_str(&parts.join("/"))
    }
}

// ── RecordFormat ─────────────────────────────────────────────────────────────

/// Ordered chain of content blocks for one (record type, format version).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordFormat {
    blocks: Vec<ContentBlock>,
}

impl RecordFormat {
    pub fn new(blocks: Vec<ContentBlock>) -> Self {
        Self { blocks }
    }

    pub fn from_block(block: ContentBlock) -> Self {
        Self { blocks: vec![block] }
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    pub fn used_blocks_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks_of_type_count(&self, content_type: ContentType) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.content_type() == content_type)
            .count()
    }

    pub fn first_content_block(&self) -> Option<&ContentBlock> {
        self.blocks.first()
    }

    /// Parse a `+`-joined chain.
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(VrsError::InvalidRecordFormat("empty record format".into()));
        }
        let mut blocks = Vec::new();
        for part in text.split('+') {
            blocks.push(ContentBlock::parse(part)?);
        }
        Ok(Self { blocks })
    }

    /// Check the static size rule: a block of unknown spec size may only be
    /// the last one.  Image/audio blocks are exempt — their sizes may be
    /// supplied by data-layout conventions during dispatch, where this rule
    /// is enforced again with full information.
    pub fn validate_static_sizes(&self) -> Result<()> {
        for (i, block) in self.blocks.iter().enumerate() {
            if i + 1 == self.blocks.len() {
                break;
            }
            let resolvable_later = matches!(
                block,
                ContentBlock::Image(_) | ContentBlock::Audio(_) | ContentBlock::DataLayout { .. }
            );
            if block.block_size().is_none() && !resolvable_later {
                return Err(VrsError::InvalidRecordFormat(format!(
                    "block {i} ({block}) has unknown size but is not last"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.blocks.iter().map(|b| b.to_string()).collect();
        f.write_str(&parts.join("+"))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn parse_dimensions(part: &str) -> Option<(u32, u32)> {
    let (w, h) = part.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut Option<T>) -> bool {
    match value.parse() {
        Ok(v) => {
            *slot = Some(v);
            true
        }
        Err(_) => false,
    }
}

/// Percent-escape the characters that would break the `/`-and-`+` grammar.
fn escape_codec_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' | '+' | '/' | ' ' | '"' | '\\' | '=' => {
                out.push('%');
                out.push_str(&format!("{:02X}", c as u32));
            }
            _ => out.push(c),
        }
    }
    out
}

fn unescape_codec_name(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(hex) = escaped.get(i + 1..i + 3) {
                if let Ok(v) = u8::from_str_radix(hex, 16) {
                    out.push(v as char);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(text: &str) {
        let format = RecordFormat::parse(text).unwrap();
        assert_eq!(format.to_string(), text, "canonical text must round-trip");
        let again = RecordFormat::parse(&format.to_string()).unwrap();
        assert_eq!(again, format);
    }

    #[test]
    fn canonical_round_trips() {
        round_trip("data_layout");
        round_trip("data_layout/size=48");
        round_trip("image/raw/640x480/pixel=grey8/stride=648");
        round_trip("image/jpg/10x20");
        round_trip("image/video/codec_quality=100");
        round_trip("image/video/640x480/pixel=grey12/codec_quality=35");
        round_trip("audio/pcm/uint24be/channels=1/rate=32000");
        round_trip("audio/pcm/float64be/channels=2/rate=32000/samples=100/stride=16");
        round_trip("custom/size=20");
        round_trip("empty+image/png/1x2");
        round_trip("data_layout/size=48+image/raw/10x20/pixel=bgr8");
    }

    #[test]
    fn codec_names_escape() {
        let spec = ImageContentBlockSpec {
            format: Some(ImageFormat::Video),
            codec_name: Some("H.264 % + / \\ \"".to_string()),
            ..ImageContentBlockSpec::default()
        };
        let block = ContentBlock::Image(spec.clone());
        let text = block.to_string();
        assert!(!text.contains(' '));
        assert!(!text.contains('+'));
        let back = ContentBlock::parse(&text).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn raw_image_sizes() {
        let block = ContentBlock::parse("image/raw/10x20/pixel=grey8").unwrap();
        assert_eq!(block.block_size(), Some(200));

        let block = ContentBlock::parse("image/raw/100x120/pixel=grey8/stride=105").unwrap();
        assert_eq!(block.block_size(), Some(105 * 120));

        let block = ContentBlock::parse("image/raw/10x20/pixel=depth32f").unwrap();
        assert_eq!(block.block_size(), Some(10 * 20 * 4));

        // 640x480 planar 4:2:0 = w*h*3/2.
        let block = ContentBlock::parse("image/raw/640x480/pixel=yuv_i420_split").unwrap();
        assert_eq!(block.block_size(), Some(640 * 480 * 3 / 2));

        // Packed 10-bit: 4 pixels in 5 bytes.
        let block = ContentBlock::parse("image/raw/640x480/pixel=raw10").unwrap();
        assert_eq!(block.block_size(), Some(800 * 480));

        // Compressed formats have no spec-computable size.
        assert_eq!(ContentBlock::parse("image/jpg").unwrap().block_size(), None);
        assert_eq!(ContentBlock::parse("image/video/codec=H.264").unwrap().block_size(), None);
    }

    #[test]
    fn audio_sizes() {
        let block =
            ContentBlock::parse("audio/pcm/float64be/channels=2/rate=32000/samples=100/stride=16")
                .unwrap();
        assert_eq!(block.block_size(), Some(1600));

        let block = ContentBlock::parse("audio/pcm/uint8mulaw/channels=1/rate=8000/samples=800")
            .unwrap();
        assert_eq!(block.block_size(), Some(800));

        // No sample count — size unknown.
        let block = ContentBlock::parse("audio/pcm/int24be/channels=3/rate=12345").unwrap();
        assert_eq!(block.block_size(), None);
    }

    #[test]
    fn counting_blocks() {
        let format = RecordFormat::parse("custom/size=70+image/raw/20x30/pixel=bgr8").unwrap();
        assert_eq!(format.used_blocks_count(), 2);
        assert_eq!(format.blocks_of_type_count(ContentType::Custom), 1);
        assert_eq!(format.blocks_of_type_count(ContentType::Image), 1);
        assert_eq!(format.blocks_of_type_count(ContentType::Audio), 0);
    }

    #[test]
    fn static_size_rule() {
        // Unknown-size custom block before another block: rejected.
        let format = RecordFormat::parse("custom+image/png").unwrap();
        assert!(format.validate_static_sizes().is_err());
        // Unknown-size image before a later block: allowed statically, the
        // player resolves it from conventions or rejects at dispatch.
        let format = RecordFormat::parse("image+data_layout").unwrap();
        assert!(format.validate_static_sizes().is_ok());
        // Unknown size in last position is always fine.
        let format = RecordFormat::parse("data_layout+custom").unwrap();
        assert!(format.validate_static_sizes().is_ok());
    }

    #[test]
    fn tag_names() {
        assert_eq!(record_format_tag_name(RecordType::Data, 4), "RF:Data:4");
        assert_eq!(
            data_layout_tag_name(RecordType::Configuration, 2, 0),
            "DL:Configuration:2:0"
        );
        assert_eq!(
            parse_record_format_tag_name("RF:Data:4"),
            Some((RecordType::Data, 4))
        );
        assert_eq!(parse_record_format_tag_name("DL:Data:4:0"), None);
    }
}
