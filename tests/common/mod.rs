//! Synthetic devices shared by the integration tests: a fake camera, a fake
//! microphone, and a fake motion sensor, each a [`Recordable`] producing
//! deterministic payloads that the read-side tests can verify byte for byte.

// Each test binary compiles this module and uses a different subset of it.
#![allow(dead_code)]

use std::sync::Mutex;

use vrs::compress::CompressionPreset;
use vrs::datalayout::conventions;
use vrs::datalayout::{DataLayout, DataLayoutBuilder, DataPieceValue};
use vrs::error::Result;
use vrs::record::DataSource;
use vrs::record_format::{AudioSampleFormat, PixelFormat, RecordFormat};
use vrs::recordable::{Recordable, Stream};
use vrs::stream_id::RecordType;

pub const CAMERA_TYPE_ID: u16 = 100;
pub const AUDIO_TYPE_ID: u16 = 101;
pub const MOTION_TYPE_ID: u16 = 102;

pub const CAMERA_CONFIG_VERSION: u32 = 1;
pub const CAMERA_DATA_VERSION: u32 = 1;

// ── Deterministic frame content ──────────────────────────────────────────────

/// Frame 0 is pseudo-random (fixed seed); later frames are a cheap pattern.
pub fn frame_bytes(frame: usize, width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; width * height];
    if frame == 0 {
        let mut state = 0x1234_5678u32;
        for byte in out.iter_mut() {
            // xorshift32
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            *byte = (state & 0xFF) as u8;
        }
    } else {
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = ((i + frame * 31) & 0xFF) as u8;
        }
    }
    out
}

pub fn audio_block(block: usize, samples: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let sample = ((block * samples + i) as i64 % 20_000 - 10_000) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

// ── Camera ───────────────────────────────────────────────────────────────────

struct CameraConfig {
    layout: DataLayout,
    width: DataPieceValue<u32>,
    height: DataPieceValue<u32>,
    pixel_format: DataPieceValue<u32>,
    serial: DataPieceValue<u32>,
}

impl CameraConfig {
    fn new() -> Self {
        let mut b = DataLayoutBuilder::new();
        let width = b.value::<u32>(conventions::IMAGE_WIDTH);
        let height = b.value::<u32>(conventions::IMAGE_HEIGHT);
        let pixel_format = b.value::<u32>(conventions::IMAGE_PIXEL_FORMAT);
        let serial = b.value::<u32>("camera_serial");
        Self { layout: b.build(), width, height, pixel_format, serial }
    }
}

struct CameraData {
    layout: DataLayout,
    frame_counter: DataPieceValue<u64>,
    exposure: DataPieceValue<f64>,
}

impl CameraData {
    fn new() -> Self {
        let mut b = DataLayoutBuilder::new();
        let frame_counter = b.value::<u64>("frame_counter");
        let exposure = b.value_with_default::<f64>("exposure", 0.002);
        Self { layout: b.build(), frame_counter, exposure }
    }
}

pub struct TestCamera {
    stream: Stream,
    pub width: u32,
    pub height: u32,
    config: Mutex<CameraConfig>,
    data: Mutex<CameraData>,
}

impl TestCamera {
    pub fn new(width: u32, height: u32, compression: CompressionPreset) -> Self {
        let stream = Stream::with_flavor(CAMERA_TYPE_ID, Some("test/camera"), compression);
        let config = CameraConfig::new();
        let data = CameraData::new();
        stream
            .add_record_format(
                RecordType::Configuration,
                CAMERA_CONFIG_VERSION,
                &RecordFormat::parse("data_layout").unwrap(),
                &[&config.layout],
            )
            .unwrap();
        stream
            .add_record_format(
                RecordType::State,
                1,
                &RecordFormat::parse("empty").unwrap(),
                &[],
            )
            .unwrap();
        stream
            .add_record_format(
                RecordType::Data,
                CAMERA_DATA_VERSION,
                &RecordFormat::parse(&format!(
                    "data_layout+image/raw/{width}x{height}/pixel=grey8"
                ))
                .unwrap(),
                &[&data.layout],
            )
            .unwrap();
        Self { stream, width, height, config: Mutex::new(config), data: Mutex::new(data) }
    }

    pub fn create_frame(&self, timestamp: f64, frame: usize) -> Result<()> {
        let image = frame_bytes(frame, self.width as usize, self.height as usize);
        let mut guard = self.data.lock().unwrap();
        let CameraData { layout, frame_counter, exposure } = &mut *guard;
        frame_counter.set(layout, frame as u64)?;
        exposure.set(layout, 0.002 + frame as f64 * 1e-6)?;
        self.stream.record_manager().create_record(
            timestamp,
            RecordType::Data,
            CAMERA_DATA_VERSION,
            DataSource::layout(layout).and_bytes(&image),
        )
    }
}

impl Recordable for TestCamera {
    fn stream(&self) -> &Stream {
        &self.stream
    }

    fn create_configuration_record(&self) -> Result<()> {
        let mut guard = self.config.lock().unwrap();
        let CameraConfig { layout, width, height, pixel_format, serial } = &mut *guard;
        width.set(layout, self.width)?;
        height.set(layout, self.height)?;
        pixel_format.set(layout, PixelFormat::Grey8.as_u32())?;
        serial.set(layout, 4711)?;
        self.stream.record_manager().create_record(
            0.0,
            RecordType::Configuration,
            CAMERA_CONFIG_VERSION,
            DataSource::layout(layout),
        )
    }

    fn create_state_record(&self) -> Result<()> {
        self.stream.record_manager().create_record(
            0.0,
            RecordType::State,
            1,
            DataSource::new(),
        )
    }
}

// ── Microphone ───────────────────────────────────────────────────────────────

pub const AUDIO_SAMPLES_PER_BLOCK: usize = 256;
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;

pub struct TestMicrophone {
    stream: Stream,
}

impl TestMicrophone {
    fn config_layout() -> (DataLayout, DataPieceValue<u32>, DataPieceValue<u8>, DataPieceValue<u32>)
    {
        let mut b = DataLayoutBuilder::new();
        let format = b.value::<u32>(conventions::AUDIO_SAMPLE_FORMAT);
        let channels = b.value::<u8>(conventions::AUDIO_CHANNEL_COUNT);
        let rate = b.value::<u32>(conventions::AUDIO_SAMPLE_RATE);
        (b.build(), format, channels, rate)
    }

    pub fn new(compression: CompressionPreset) -> Self {
        let stream = Stream::with_flavor(AUDIO_TYPE_ID, Some("test/mic"), compression);
        let (config, _, _, _) = Self::config_layout();
        stream
            .add_record_format(
                RecordType::Configuration,
                1,
                &RecordFormat::parse("data_layout").unwrap(),
                &[&config],
            )
            .unwrap();
        stream
            .add_record_format(
                RecordType::State,
                1,
                &RecordFormat::parse("empty").unwrap(),
                &[],
            )
            .unwrap();
        stream
            .add_record_format(
                RecordType::Data,
                1,
                &RecordFormat::parse(&format!(
                    "audio/pcm/int16le/channels=1/rate={AUDIO_SAMPLE_RATE}/samples={AUDIO_SAMPLES_PER_BLOCK}"
                ))
                .unwrap(),
                &[],
            )
            .unwrap();
        Self { stream }
    }

    pub fn create_audio_block(&self, timestamp: f64, block: usize) -> Result<()> {
        let payload = audio_block(block, AUDIO_SAMPLES_PER_BLOCK);
        self.stream.record_manager().create_record(
            timestamp,
            RecordType::Data,
            1,
            DataSource::bytes(&payload),
        )
    }
}

impl Recordable for TestMicrophone {
    fn stream(&self) -> &Stream {
        &self.stream
    }

    fn create_configuration_record(&self) -> Result<()> {
        let (mut layout, format, channels, rate) = Self::config_layout();
        format.set(&mut layout, AudioSampleFormat::Int16Le.as_u32())?;
        channels.set(&mut layout, 1)?;
        rate.set(&mut layout, AUDIO_SAMPLE_RATE)?;
        self.stream.record_manager().create_record(
            0.0,
            RecordType::Configuration,
            1,
            DataSource::layout(&mut layout),
        )
    }

    fn create_state_record(&self) -> Result<()> {
        self.stream
            .record_manager()
            .create_record(0.0, RecordType::State, 1, DataSource::new())
    }
}

// ── Motion sensor ────────────────────────────────────────────────────────────

pub struct TestMotionSensor {
    stream: Stream,
}

impl TestMotionSensor {
    pub fn new(compression: CompressionPreset) -> Self {
        let stream = Stream::with_flavor(MOTION_TYPE_ID, Some("test/imu"), compression);
        let sample = Self::sample_layout();
        stream
            .add_record_format(
                RecordType::Configuration,
                1,
                &RecordFormat::parse("empty").unwrap(),
                &[],
            )
            .unwrap();
        stream
            .add_record_format(
                RecordType::State,
                1,
                &RecordFormat::parse("empty").unwrap(),
                &[],
            )
            .unwrap();
        stream
            .add_record_format(
                RecordType::Data,
                1,
                &RecordFormat::parse("data_layout").unwrap(),
                &[&sample],
            )
            .unwrap();
        Self { stream }
    }

    fn sample_layout() -> DataLayout {
        let mut b = DataLayoutBuilder::new();
        b.value::<u64>("sample_counter");
        b.value::<vrs::datalayout::Point3Dd>("acceleration");
        b.value::<vrs::datalayout::Point3Dd>("angular_velocity");
        b.build()
    }

    pub fn create_sample(&self, timestamp: f64, counter: u64) -> Result<()> {
        let mut b = DataLayoutBuilder::new();
        let count = b.value::<u64>("sample_counter");
        let accel = b.value::<vrs::datalayout::Point3Dd>("acceleration");
        let gyro = b.value::<vrs::datalayout::Point3Dd>("angular_velocity");
        let mut layout = b.build();
        count.set(&mut layout, counter)?;
        accel.set(&mut layout, vrs::datalayout::Point([0.0, 0.0, 9.81]))?;
        gyro.set(&mut layout, vrs::datalayout::Point([0.1 * counter as f64, 0.0, 0.0]))?;
        self.stream.record_manager().create_record(
            timestamp,
            RecordType::Data,
            1,
            DataSource::layout(&mut layout),
        )
    }
}

impl Recordable for TestMotionSensor {
    fn stream(&self) -> &Stream {
        &self.stream
    }

    fn create_configuration_record(&self) -> Result<()> {
        self.stream
            .record_manager()
            .create_record(0.0, RecordType::Configuration, 1, DataSource::new())
    }

    fn create_state_record(&self) -> Result<()> {
        self.stream
            .record_manager()
            .create_record(0.0, RecordType::State, 1, DataSource::new())
    }
}
