//! Property tests: grammar and schema round trips, compressor totality.

use proptest::prelude::*;

use vrs::compress::{compress, decompress, CompressionPreset};
use vrs::error::VrsError;
use vrs::file_spec::FileSpec;
use vrs::record_format::{
    AudioContentBlockSpec, AudioSampleFormat, ContentBlock, ImageContentBlockSpec, ImageFormat,
    PixelFormat, RecordFormat,
};

// ── Strategies ───────────────────────────────────────────────────────────────

fn pixel_format() -> impl Strategy<Value = PixelFormat> {
    prop_oneof![
        Just(PixelFormat::Grey8),
        Just(PixelFormat::Grey16),
        Just(PixelFormat::Bgr8),
        Just(PixelFormat::Rgb8),
        Just(PixelFormat::Rgba8),
        Just(PixelFormat::Depth32F),
        Just(PixelFormat::Yuy2),
        Just(PixelFormat::Raw10),
        Just(PixelFormat::YuvI420Split),
    ]
}

fn sample_format() -> impl Strategy<Value = AudioSampleFormat> {
    prop_oneof![
        Just(AudioSampleFormat::Int16Le),
        Just(AudioSampleFormat::UInt24Be),
        Just(AudioSampleFormat::Float64Be),
        Just(AudioSampleFormat::MuLaw),
        Just(AudioSampleFormat::ALaw),
    ]
}

fn image_block() -> impl Strategy<Value = ContentBlock> {
    (
        prop_oneof![
            Just(ImageFormat::Raw),
            Just(ImageFormat::Jpg),
            Just(ImageFormat::Png),
            Just(ImageFormat::Jxl),
            Just(ImageFormat::Video),
        ],
        proptest::option::of((1u32..4000, 1u32..4000)),
        proptest::option::of(pixel_format()),
        proptest::option::of(1u32..10_000),
        proptest::option::of(0u8..=100),
    )
        .prop_map(|(format, dims, pixel, stride, quality)| {
            let mut spec = ImageContentBlockSpec {
                format: Some(format),
                pixel_format: pixel,
                ..ImageContentBlockSpec::default()
            };
            if let Some((w, h)) = dims {
                spec.width = Some(w);
                spec.height = Some(h);
            }
            spec.stride = stride;
            if format == ImageFormat::Video {
                spec.codec_quality = quality;
            }
            ContentBlock::Image(spec)
        })
}

fn audio_block() -> impl Strategy<Value = ContentBlock> {
    (
        proptest::option::of(sample_format()),
        proptest::option::of(1u8..=8),
        proptest::option::of(8000u32..=192_000),
        proptest::option::of(1u32..=65_536),
    )
        .prop_map(|(sample_format, channels, rate, samples)| {
            ContentBlock::Audio(AudioContentBlockSpec {
                sample_format,
                channel_count: channels,
                sample_rate: rate,
                sample_count: samples,
                stride: None,
            })
        })
}

fn content_block() -> impl Strategy<Value = ContentBlock> {
    prop_oneof![
        Just(ContentBlock::Empty),
        proptest::option::of(1usize..100_000)
            .prop_map(|size| ContentBlock::DataLayout { size }),
        proptest::option::of(1usize..100_000).prop_map(|size| ContentBlock::Custom { size }),
        image_block(),
        audio_block(),
    ]
}

proptest! {
    // ── RecordFormat grammar ─────────────────────────────────────────────────

    #[test]
    fn record_format_text_round_trips(blocks in proptest::collection::vec(content_block(), 1..5)) {
        let format = RecordFormat::new(blocks);
        let text = format.to_string();
        let parsed = RecordFormat::parse(&text).unwrap();
        prop_assert_eq!(&parsed, &format);
        // And the canonical text is a fixed point.
        prop_assert_eq!(parsed.to_string(), text);
    }

    // ── FileSpec JSON ────────────────────────────────────────────────────────

    #[test]
    fn file_spec_json_round_trips(
        chunks in proptest::collection::vec("[a-z0-9_./-]{1,24}", 1..4),
        sizes in proptest::option::of(proptest::collection::vec(0u64..1 << 40, 1..4)),
        filename in "[a-z0-9_.]{0,16}",
    ) {
        let chunk_sizes = match sizes {
            Some(s) if s.len() == chunks.len() => s,
            _ => Vec::new(),
        };
        let spec = FileSpec {
            chunks,
            chunk_sizes,
            storage: "diskfile".to_string(),
            filename,
            ..FileSpec::default()
        };
        let parsed = FileSpec::parse(&spec.to_json()).unwrap();
        prop_assert_eq!(parsed, spec);
    }

    // ── Compressor totality ──────────────────────────────────────────────────

    #[test]
    fn compress_decompress_round_trips(
        data in proptest::collection::vec(any::<u8>(), 0..4096),
        preset_index in 0usize..CompressionPreset::ALL.len(),
    ) {
        let preset = CompressionPreset::ALL[preset_index];
        let packed = compress(&data, preset).unwrap();
        let unpacked = vrs::compress::decode_record_payload(
            preset.method() as u8,
            &packed,
            data.len(),
        ).unwrap();
        prop_assert_eq!(unpacked, data);
    }

    #[test]
    fn truncated_streams_never_decode_silently(
        data in proptest::collection::vec(any::<u8>(), 64..2048),
        cut in 1usize..64,
    ) {
        let packed = compress(&data, CompressionPreset::ZstdFast).unwrap();
        prop_assume!(cut < packed.len());
        let truncated = &packed[..packed.len() - cut];
        match decompress(truncated, data.len()) {
            Err(VrsError::NotEnoughData { .. }) => {}
            other => prop_assert!(false, "expected NotEnoughData, got {:?}", other.map(|v| v.len())),
        }
    }
}
