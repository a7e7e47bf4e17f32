//! RecordFormatStreamPlayer — format-aware content-block dispatch.
//!
//! For each record, the player looks up the stream's RecordFormat for
//! (record type, format version) and walks the content-block chain in order:
//!
//! * **DataLayout** — load the persisted schema, bind the record bytes, call
//!   `on_data_layout_read`, and harvest image/audio conventions carried by
//!   the layout for later blocks.
//! * **Image** — size resolution order: conventions harvested from a
//!   data-layout block of this same record (they override a stale static
//!   spec), then the block's explicit spec, then conventions remembered from
//!   earlier records (configuration pre-roll), then for video or compressed
//!   formats in last position the rest of the record.
//! * **Audio** — analogous, using the audio conventions.
//! * **Custom** — declared size, or the rest of the record in last position.
//!
//! A block whose size cannot be determined before a later block exists gets
//! `on_unsupported_block` and stops the record — the rule "at most one
//! unknown-size block, and only last" is enforced here, during dispatch,
//! because sizes may legally depend on data read earlier in the same record.

use std::collections::HashMap;

use log::warn;

use crate::datalayout::conventions::{AudioSpecLayout, ImageSpecLayout};
use crate::datalayout::DataLayout;
use crate::error::Result;
use crate::reader::{RecordInfo, StreamInfo, StreamPlayer};
use crate::record_format::{
    AudioContentBlockSpec, ContentBlock, ImageContentBlockSpec, ImageFormat, RecordFormat,
};
use crate::stream_id::RecordType;

// ── Handler trait ────────────────────────────────────────────────────────────

/// User callbacks for decoded content blocks.  Every method defaults to a
/// no-op so handlers implement only what they consume.
pub trait RecordFormatPlayer: Send {
    fn on_data_layout_read(
        &mut self,
        _info: &RecordInfo,
        _block_index: usize,
        _layout: &DataLayout,
    ) -> Result<()> {
        Ok(())
    }

    fn on_image_read(
        &mut self,
        _info: &RecordInfo,
        _block_index: usize,
        _spec: &ImageContentBlockSpec,
        _bytes: &[u8],
    ) -> Result<()> {
        Ok(())
    }

    fn on_audio_read(
        &mut self,
        _info: &RecordInfo,
        _block_index: usize,
        _spec: &AudioContentBlockSpec,
        _bytes: &[u8],
    ) -> Result<()> {
        Ok(())
    }

    fn on_custom_block_read(
        &mut self,
        _info: &RecordInfo,
        _block_index: usize,
        _bytes: &[u8],
    ) -> Result<()> {
        Ok(())
    }

    /// A block the player could not size or decode.  Dispatch of this record
    /// stops here; playback continues with the next record.
    fn on_unsupported_block(
        &mut self,
        _info: &RecordInfo,
        _block_index: usize,
        _block: &ContentBlock,
    ) {
    }
}

// ── Per-block decode state ───────────────────────────────────────────────────

struct BlockState {
    /// Schema parsed from the stream's `DL:` tag, refilled per record.
    schema: DataLayout,
}

// ── RecordFormatStreamPlayer ─────────────────────────────────────────────────

pub struct RecordFormatStreamPlayer<H: RecordFormatPlayer> {
    handler: H,
    formats: HashMap<(RecordType, u32), RecordFormat>,
    layouts: HashMap<(RecordType, u32, usize), Option<BlockState>>,
    layout_schemas: HashMap<(RecordType, u32, usize), String>,
    image_harvest: ImageSpecLayout,
    audio_harvest: AudioSpecLayout,
    /// Conventions remembered across records (configuration pre-roll).
    last_image_spec: Option<ImageContentBlockSpec>,
    last_audio_spec: Option<AudioContentBlockSpec>,
}

impl<H: RecordFormatPlayer> RecordFormatStreamPlayer<H> {
    /// Build a player for one stream from its read-side info.
    pub fn new(info: &StreamInfo, handler: H) -> Self {
        let mut formats = HashMap::new();
        let mut layout_schemas = HashMap::new();
        for (&(record_type, version), format) in info.record_formats() {
            for (block_index, _) in format.blocks().iter().enumerate() {
                if let Some(schema) = info.layout_schema(record_type, version, block_index) {
                    layout_schemas
                        .insert((record_type, version, block_index), schema.to_string());
                }
            }
            formats.insert((record_type, version), format.clone());
        }
        Self {
            handler,
            formats,
            layouts: HashMap::new(),
            layout_schemas,
            image_harvest: ImageSpecLayout::new(),
            audio_harvest: AudioSpecLayout::new(),
            last_image_spec: None,
            last_audio_spec: None,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Parse the schema of one data-layout block on first use, then take it
    /// out of the cache for this record (the caller puts it back).
    fn take_block_state(&mut self, key: (RecordType, u32, usize)) -> Option<BlockState> {
        if !self.layouts.contains_key(&key) {
            let state = self.layout_schemas.get(&key).and_then(|json| {
                match DataLayout::from_json_string(json) {
                    Ok(schema) => Some(BlockState { schema }),
                    Err(e) => {
                        warn!("bad layout schema for {key:?}: {e}");
                        None
                    }
                }
            });
            self.layouts.insert(key, state);
        }
        self.layouts.get_mut(&key).and_then(Option::take)
    }

    fn put_block_state(&mut self, key: (RecordType, u32, usize), state: BlockState) {
        self.layouts.insert(key, Some(state));
    }
}

/// Size of a serialized layout in `bytes`: fixed region + var index, plus
/// the var region extent derived from the index entries themselves.
fn layout_data_size(schema: &DataLayout, bytes: &[u8]) -> Option<usize> {
    let fixed = schema.fixed_size();
    let var_count = schema.var_piece_count();
    let index_end = fixed + var_count * 8;
    if bytes.len() < index_end {
        return None;
    }
    let mut var_end = 0usize;
    for i in 0..var_count {
        let at = fixed + i * 8;
        let offset = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
        let len = u32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap()) as usize;
        var_end = var_end.max(offset + len);
    }
    Some(index_end + var_end)
}

impl<H: RecordFormatPlayer> StreamPlayer for RecordFormatStreamPlayer<H> {
    fn process_record(&mut self, info: &RecordInfo, payload: &[u8]) -> Result<()> {
        let format = match self.formats.get(&(info.record_type, info.format_version)) {
            Some(f) => f.clone(),
            None => {
                // No registered format: the whole payload is an opaque block.
                self.handler
                    .on_unsupported_block(info, 0, &ContentBlock::Custom { size: None });
                return Ok(());
            }
        };

        let blocks = format.blocks();
        let mut pos = 0usize;
        // Conventions read from a data-layout block of THIS record; they
        // override static image specs that the producer outgrew.
        let mut record_image_spec: Option<ImageContentBlockSpec> = None;
        let mut record_audio_spec: Option<AudioContentBlockSpec> = None;

        for (block_index, block) in blocks.iter().enumerate() {
            let is_last = block_index + 1 == blocks.len();
            let remaining = payload.len() - pos;

            match block {
                ContentBlock::Empty => {}

                ContentBlock::DataLayout { size } => {
                    let key = (info.record_type, info.format_version, block_index);
                    let mut state = match self.take_block_state(key) {
                        Some(s) => s,
                        None => {
                            self.handler.on_unsupported_block(info, block_index, block);
                            return Ok(());
                        }
                    };
                    let size = (*size).or_else(|| layout_data_size(&state.schema, &payload[pos..]));

                    let mut unsupported = true;
                    let mut dispatch = Ok(());
                    if let Some(size) = size.filter(|&s| s <= remaining) {
                        if state.schema.set_data(&payload[pos..pos + size]).is_ok() {
                            if let Some(spec) = self.image_harvest.harvest(&state.schema) {
                                record_image_spec = Some(spec.clone());
                                self.last_image_spec = Some(spec);
                            }
                            if let Some(spec) = self.audio_harvest.harvest(&state.schema) {
                                record_audio_spec = Some(spec.clone());
                                self.last_audio_spec = Some(spec);
                            }
                            dispatch =
                                self.handler.on_data_layout_read(info, block_index, &state.schema);
                            pos += size;
                            unsupported = false;
                        }
                    }
                    self.put_block_state(key, state);
                    if unsupported {
                        self.handler.on_unsupported_block(info, block_index, block);
                        return Ok(());
                    }
                    dispatch?;
                }

                ContentBlock::Image(static_spec) => {
                    let mut resolved = static_spec.clone();
                    let mut size = None;
                    // Conventions carried by this record override the static
                    // raw spec — the producer may have outgrown it.
                    if let Some(conv) = record_image_spec.as_ref() {
                        if matches!(static_spec.format, Some(ImageFormat::Raw) | None) {
                            if let Some(conv_size) = conv.block_size() {
                                resolved = conv.clone();
                                resolved.format = static_spec.format.or(Some(ImageFormat::Raw));
                                size = Some(conv_size);
                            }
                        }
                    }
                    if size.is_none() {
                        size = static_spec.block_size();
                    }
                    // Conventions remembered from the configuration pre-roll.
                    if size.is_none() {
                        if let Some(conv) = self.last_image_spec.as_ref() {
                            if matches!(static_spec.format, Some(ImageFormat::Raw) | None) {
                                if let Some(conv_size) = conv.block_size() {
                                    resolved = conv.clone();
                                    resolved.format =
                                        static_spec.format.or(Some(ImageFormat::Raw));
                                    size = Some(conv_size);
                                }
                            }
                        }
                    }
                    if size.is_none() && is_last {
                        // Video and compressed stills own the record's tail.
                        size = Some(remaining);
                    }
                    let size = match size {
                        Some(s) if s <= remaining => s,
                        _ => {
                            self.handler.on_unsupported_block(info, block_index, block);
                            return Ok(());
                        }
                    };
                    self.handler.on_image_read(
                        info,
                        block_index,
                        &resolved,
                        &payload[pos..pos + size],
                    )?;
                    pos += size;
                }

                ContentBlock::Audio(static_spec) => {
                    let mut resolved = static_spec.clone();
                    let mut size = static_spec.block_size();
                    if size.is_none() {
                        if let Some(conv) = record_audio_spec
                            .as_ref()
                            .or(self.last_audio_spec.as_ref())
                        {
                            let mut merged = conv.clone();
                            if merged.sample_rate.is_none() {
                                merged.sample_rate = static_spec.sample_rate;
                            }
                            if let Some(conv_size) = merged.block_size() {
                                resolved = merged;
                                size = Some(conv_size);
                            }
                        }
                    }
                    if size.is_none() && is_last {
                        size = Some(remaining);
                    }
                    let size = match size {
                        Some(s) if s <= remaining => s,
                        _ => {
                            self.handler.on_unsupported_block(info, block_index, block);
                            return Ok(());
                        }
                    };
                    self.handler.on_audio_read(
                        info,
                        block_index,
                        &resolved,
                        &payload[pos..pos + size],
                    )?;
                    pos += size;
                }

                ContentBlock::Custom { size } => {
                    let size = match size {
                        Some(s) => *s,
                        None if is_last => remaining,
                        None => {
                            self.handler.on_unsupported_block(info, block_index, block);
                            return Ok(());
                        }
                    };
                    if size > remaining {
                        self.handler.on_unsupported_block(info, block_index, block);
                        return Ok(());
                    }
                    self.handler
                        .on_custom_block_read(info, block_index, &payload[pos..pos + size])?;
                    pos += size;
                }
            }
        }
        Ok(())
    }
}
