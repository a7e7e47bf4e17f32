//! Data-layout conventions — well-known piece names that let image and audio
//! content blocks describe themselves through a neighboring (or preceding
//! configuration) data-layout block.
//!
//! A stream whose image blocks have no static size writes these pieces; the
//! stream player harvests them to size the block at read time.  The names
//! are part of the format and must not change.

use super::accessors::DataPieceValue;
use super::layout::{DataLayout, DataLayoutBuilder};
use crate::record_format::{
    AudioContentBlockSpec, AudioSampleFormat, ImageContentBlockSpec, PixelFormat,
};

pub const IMAGE_WIDTH: &str = "image_width";
pub const IMAGE_HEIGHT: &str = "image_height";
pub const IMAGE_BYTES_PER_PIXEL: &str = "image_bytes_per_pixel";
pub const IMAGE_PIXEL_FORMAT: &str = "image_pixel_format";
pub const IMAGE_STRIDE: &str = "image_stride";

pub const AUDIO_SAMPLE_FORMAT: &str = "audio_sample_format";
pub const AUDIO_CHANNEL_COUNT: &str = "audio_channel_count";
pub const AUDIO_SAMPLE_RATE: &str = "audio_sample_rate";
pub const AUDIO_SAMPLE_COUNT: &str = "audio_sample_count";
pub const AUDIO_FRAME_STRIDE: &str = "audio_frame_stride";

// ── Image spec harvesting ────────────────────────────────────────────────────

/// Declares the image-convention pieces and reads them out of any source
/// layout that carries them.
pub struct ImageSpecLayout {
    layout: DataLayout,
    width: DataPieceValue<u32>,
    height: DataPieceValue<u32>,
    pixel_format: DataPieceValue<u32>,
    stride: DataPieceValue<u32>,
}

impl ImageSpecLayout {
    pub fn new() -> Self {
        let mut builder = DataLayoutBuilder::new();
        let width = builder.value::<u32>(IMAGE_WIDTH);
        let height = builder.value::<u32>(IMAGE_HEIGHT);
        let pixel_format = builder.value::<u32>(IMAGE_PIXEL_FORMAT);
        let stride = builder.value::<u32>(IMAGE_STRIDE);
        Self { layout: builder.build(), width, height, pixel_format, stride }
    }

    /// Write-side: a layout carrying the convention pieces, plus setters.
    pub fn layout_mut(&mut self) -> &mut DataLayout {
        &mut self.layout
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn set(&mut self, width: u32, height: u32, pixel_format: PixelFormat) {
        let _ = self.width.set(&mut self.layout, width);
        let _ = self.height.set(&mut self.layout, height);
        let _ = self.pixel_format.set(&mut self.layout, pixel_format.as_u32());
    }

    pub fn set_stride(&mut self, stride: u32) {
        let _ = self.stride.set(&mut self.layout, stride);
    }

    /// Read the convention pieces out of `source`.  Returns a raw image spec
    /// when width, height, and a valid pixel format are all present.
    pub fn harvest(&mut self, source: &DataLayout) -> Option<ImageContentBlockSpec> {
        self.layout.read_from(source).ok()?;
        if !self.width.is_available(&self.layout)
            || !self.height.is_available(&self.layout)
            || !self.pixel_format.is_available(&self.layout)
        {
            return None;
        }
        let pixel = PixelFormat::from_u32(self.pixel_format.get(&self.layout))?;
        let width = self.width.get(&self.layout);
        let height = self.height.get(&self.layout);
        if width == 0 || height == 0 {
            return None;
        }
        let mut spec = ImageContentBlockSpec::raw(pixel, width, height);
        if self.stride.is_available(&self.layout) {
            let stride = self.stride.get(&self.layout);
            if stride > 0 {
                spec.stride = Some(stride);
            }
        }
        Some(spec)
    }
}

impl Default for ImageSpecLayout {
    fn default() -> Self {
        Self::new()
    }
}

// ── Audio spec harvesting ────────────────────────────────────────────────────

pub struct AudioSpecLayout {
    layout: DataLayout,
    sample_format: DataPieceValue<u32>,
    channel_count: DataPieceValue<u8>,
    sample_rate: DataPieceValue<u32>,
    sample_count: DataPieceValue<u32>,
    frame_stride: DataPieceValue<u8>,
}

impl AudioSpecLayout {
    pub fn new() -> Self {
        let mut builder = DataLayoutBuilder::new();
        let sample_format = builder.value::<u32>(AUDIO_SAMPLE_FORMAT);
        let channel_count = builder.value::<u8>(AUDIO_CHANNEL_COUNT);
        let sample_rate = builder.value::<u32>(AUDIO_SAMPLE_RATE);
        let sample_count = builder.value::<u32>(AUDIO_SAMPLE_COUNT);
        let frame_stride = builder.value::<u8>(AUDIO_FRAME_STRIDE);
        Self { layout: builder.build(), sample_format, channel_count, sample_rate, sample_count, frame_stride }
    }

    pub fn layout_mut(&mut self) -> &mut DataLayout {
        &mut self.layout
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn set(&mut self, format: AudioSampleFormat, channels: u8, rate: u32) {
        let _ = self.sample_format.set(&mut self.layout, format.as_u32());
        let _ = self.channel_count.set(&mut self.layout, channels);
        let _ = self.sample_rate.set(&mut self.layout, rate);
    }

    pub fn set_sample_count(&mut self, count: u32) {
        let _ = self.sample_count.set(&mut self.layout, count);
    }

    /// Read the convention pieces out of `source`.  A spec is returned when
    /// at least the sample format and channel count are present; the sample
    /// count (needed for sizing) may still be absent.
    pub fn harvest(&mut self, source: &DataLayout) -> Option<AudioContentBlockSpec> {
        self.layout.read_from(source).ok()?;
        if !self.sample_format.is_available(&self.layout)
            || !self.channel_count.is_available(&self.layout)
        {
            return None;
        }
        let format = AudioSampleFormat::from_u32(self.sample_format.get(&self.layout))?;
        let channels = self.channel_count.get(&self.layout);
        if channels == 0 {
            return None;
        }
        let mut spec = AudioContentBlockSpec {
            sample_format: Some(format),
            channel_count: Some(channels),
            ..AudioContentBlockSpec::default()
        };
        if self.sample_rate.is_available(&self.layout) {
            spec.sample_rate = Some(self.sample_rate.get(&self.layout));
        }
        if self.sample_count.is_available(&self.layout) {
            let count = self.sample_count.get(&self.layout);
            if count > 0 {
                spec.sample_count = Some(count);
            }
        }
        if self.frame_stride.is_available(&self.layout) {
            let stride = self.frame_stride.get(&self.layout);
            if stride > 0 {
                spec.stride = Some(stride);
            }
        }
        Some(spec)
    }
}

impl Default for AudioSpecLayout {
    fn default() -> Self {
        Self::new()
    }
}
