//! End-to-end write/read round trips with synthetic devices.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{
    audio_block, frame_bytes, TestCamera, TestMicrophone, TestMotionSensor,
    AUDIO_SAMPLES_PER_BLOCK, CAMERA_TYPE_ID,
};
use vrs::compress::CompressionPreset;
use vrs::datalayout::DataLayout;
use vrs::error::Result;
use vrs::player::{RecordFormatPlayer, RecordFormatStreamPlayer};
use vrs::reader::{RecordFileReader, RecordInfo};
use vrs::record_format::{AudioContentBlockSpec, ImageContentBlockSpec};
use vrs::stream_id::RecordType;
use vrs::Recordable;
use vrs::writer::{RecordFileWriter, RecordFileWriterOptions};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const FRAME_COUNT: usize = 150;
/// 15 kHz simulated frame clock.
const FRAME_INTERVAL: f64 = 1.0 / 15_000.0;

#[derive(Default)]
struct CameraCheck {
    configurations: usize,
    states: usize,
    images: Vec<(f64, bool)>,
}

struct CameraVerifier {
    check: Arc<Mutex<CameraCheck>>,
    next_frame: usize,
}

impl RecordFormatPlayer for CameraVerifier {
    fn on_data_layout_read(
        &mut self,
        info: &RecordInfo,
        _block_index: usize,
        layout: &DataLayout,
    ) -> Result<()> {
        if info.record_type == RecordType::Configuration {
            self.check.lock().unwrap().configurations += 1;
            assert_eq!(layout.values_json()["image_width"], WIDTH);
            assert_eq!(layout.values_json()["camera_serial"], 4711);
        }
        Ok(())
    }

    fn on_image_read(
        &mut self,
        info: &RecordInfo,
        _block_index: usize,
        spec: &ImageContentBlockSpec,
        bytes: &[u8],
    ) -> Result<()> {
        assert_eq!(spec.width, Some(WIDTH));
        assert_eq!(spec.height, Some(HEIGHT));
        let expected = frame_bytes(self.next_frame, WIDTH as usize, HEIGHT as usize);
        let matches = bytes == expected;
        self.check
            .lock()
            .unwrap()
            .images
            .push((info.timestamp, matches));
        self.next_frame += 1;
        Ok(())
    }
}

/// A state-record observer: counts records the format player sees as empty.
struct StateCounter {
    check: Arc<Mutex<CameraCheck>>,
}

impl vrs::reader::StreamPlayer for StateCounter {
    fn process_record(&mut self, info: &RecordInfo, _payload: &[u8]) -> Result<()> {
        if info.record_type == RecordType::State {
            self.check.lock().unwrap().states += 1;
        }
        Ok(())
    }
}

fn record_camera_file(path: &std::path::Path, pool_size: usize) {
    let camera = Arc::new(TestCamera::new(WIDTH, HEIGHT, CompressionPreset::ZstdFast));
    let mut writer = RecordFileWriter::with_options(RecordFileWriterOptions {
        compression_pool_size: pool_size,
        ..RecordFileWriterOptions::default()
    });
    writer.set_file_tag("session_id", "round-trip");
    writer.add_recordable(camera.clone()).unwrap();

    writer.create_file_async(path).unwrap();
    for frame in 0..FRAME_COUNT {
        camera
            .create_frame(0.001 + frame as f64 * FRAME_INTERVAL, frame)
            .unwrap();
        if frame % 50 == 0 {
            writer.write_records_async(f64::MAX).unwrap();
        }
    }
    writer.close_file_async().unwrap();
    writer.wait_for_file_closed().unwrap();
}

#[test]
fn camera_round_trip_across_pool_sizes() {
    let concurrency = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    for pool_size in [1usize, concurrency, 16] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.vrs");
        record_camera_file(&path, pool_size);

        let mut reader = RecordFileReader::open(&path).unwrap();
        assert!(!reader.index_was_rebuilt());
        assert_eq!(reader.file_tags().get("session_id").unwrap(), "round-trip");

        let camera_id = reader
            .stream_ids()
            .into_iter()
            .find(|id| id.type_id == CAMERA_TYPE_ID)
            .expect("camera stream missing");
        assert_eq!(
            reader.record_count_for(camera_id, Some(RecordType::Configuration)),
            1
        );
        assert_eq!(reader.record_count_for(camera_id, Some(RecordType::State)), 1);
        assert_eq!(
            reader.record_count_for(camera_id, Some(RecordType::Data)),
            FRAME_COUNT
        );

        let check = Arc::new(Mutex::new(CameraCheck::default()));
        let info = reader.stream_info(camera_id).unwrap();
        let player = RecordFormatStreamPlayer::new(
            info,
            CameraVerifier { check: Arc::clone(&check), next_frame: 0 },
        );
        reader.set_stream_player(camera_id, Box::new(player));
        reader.read_all_records().unwrap();

        let check = check.lock().unwrap();
        assert_eq!(check.configurations, 1, "pool size {pool_size}");
        assert_eq!(check.images.len(), FRAME_COUNT);
        assert!(check.images.iter().all(|(_, ok)| *ok), "image bytes differ");
        // Replay is in timestamp order.
        assert!(check
            .images
            .windows(2)
            .all(|w| w[0].0 <= w[1].0));
    }
}

#[test]
fn state_records_are_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camera.vrs");
    record_camera_file(&path, 1);

    let mut reader = RecordFileReader::open(&path).unwrap();
    let camera_id = reader.stream_ids()[0];
    let check = Arc::new(Mutex::new(CameraCheck::default()));
    reader.set_stream_player(
        camera_id,
        Box::new(StateCounter { check: Arc::clone(&check) }),
    );
    reader.read_all_records().unwrap();
    assert_eq!(check.lock().unwrap().states, 1);
}

// ── Three streams with auto-flush ────────────────────────────────────────────

struct AudioVerifier {
    blocks: Arc<Mutex<Vec<bool>>>,
}

impl RecordFormatPlayer for AudioVerifier {
    fn on_audio_read(
        &mut self,
        _info: &RecordInfo,
        _block_index: usize,
        spec: &AudioContentBlockSpec,
        bytes: &[u8],
    ) -> Result<()> {
        assert_eq!(spec.sample_count, Some(AUDIO_SAMPLES_PER_BLOCK as u32));
        let mut blocks = self.blocks.lock().unwrap();
        let n = blocks.len();
        blocks.push(bytes == audio_block(n, AUDIO_SAMPLES_PER_BLOCK));
        Ok(())
    }
}

#[test]
fn three_streams_with_auto_flush() {
    let n = 40usize;
    let camera = Arc::new(TestCamera::new(64, 48, CompressionPreset::Lz4Fast));
    let microphone = Arc::new(TestMicrophone::new(CompressionPreset::ZstdFast));
    let motion = Arc::new(TestMotionSensor::new(CompressionPreset::None));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mixed.vrs");

    let mut writer = RecordFileWriter::new();
    writer.add_recordable(camera.clone()).unwrap();
    writer.add_recordable(microphone.clone()).unwrap();
    writer.add_recordable(motion.clone()).unwrap();
    writer.create_file_async(&path).unwrap();
    writer
        .auto_write_records_async(Duration::from_millis(20), || f64::MAX)
        .unwrap();

    // The motion stream emits one extra data record up front.
    motion.create_sample(0.0005, 0).unwrap();
    for i in 0..n {
        let t = 0.001 + i as f64 * 0.01;
        camera.create_frame(t, i).unwrap();
        microphone.create_audio_block(t, i).unwrap();
        motion.create_sample(t, i as u64 + 1).unwrap();
        if i % 10 == 0 {
            std::thread::sleep(Duration::from_millis(25));
        }
    }
    writer.close_file_async().unwrap();
    writer.wait_for_file_closed().unwrap();

    let mut reader = RecordFileReader::open(&path).unwrap();
    let ids = reader.stream_ids();
    assert_eq!(ids.len(), 3);

    let camera_id = camera.stream().id();
    let audio_id = microphone.stream().id();
    let motion_id = motion.stream().id();
    assert_eq!(reader.record_count_for(camera_id, Some(RecordType::Data)), n);
    assert_eq!(reader.record_count_for(audio_id, Some(RecordType::Data)), n);
    assert_eq!(
        reader.record_count_for(motion_id, Some(RecordType::Data)),
        n + 1
    );

    // Audio payloads replay bit-exact through the format player.
    let blocks = Arc::new(Mutex::new(Vec::new()));
    let info = reader.stream_info(audio_id).unwrap();
    let player = RecordFormatStreamPlayer::new(info, AudioVerifier { blocks: Arc::clone(&blocks) });
    reader.set_stream_player(audio_id, Box::new(player));
    reader.read_all_records().unwrap();
    let blocks = blocks.lock().unwrap();
    assert_eq!(blocks.len(), n);
    assert!(blocks.iter().all(|ok| *ok));
}

#[test]
fn chunk_rotation_splits_without_losing_records() {
    let frames = 40usize;
    // Uncompressed 320x240 frames: ~77 KB each, so a 1 MiB chunk limit
    // forces several rotations.
    let camera = Arc::new(TestCamera::new(WIDTH, HEIGHT, CompressionPreset::None));
    let mut writer = RecordFileWriter::with_options(RecordFileWriterOptions {
        max_chunk_size_mb: Some(1),
        ..RecordFileWriterOptions::default()
    });
    writer.add_recordable(camera.clone()).unwrap();
    for frame in 0..frames {
        camera.create_frame(frame as f64 * 0.01, frame).unwrap();
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("split.vrs");
    writer.write_to_file(&path).unwrap();

    let chunks = vrs::chunked_file::discover_chunks(&path).unwrap();
    assert!(chunks.len() >= 3, "expected several chunks, got {}", chunks.len());

    // The reader resolves logical offsets across all chunks transparently.
    let mut reader = RecordFileReader::open(&path).unwrap();
    assert!(!reader.index_was_rebuilt());
    let camera_id = camera.stream().id();
    assert_eq!(reader.record_count_for(camera_id, Some(RecordType::Data)), frames);

    let check = Arc::new(Mutex::new(CameraCheck::default()));
    let info = reader.stream_info(camera_id).unwrap();
    let player = RecordFormatStreamPlayer::new(
        info,
        CameraVerifier { check: Arc::clone(&check), next_frame: 0 },
    );
    reader.set_stream_player(camera_id, Box::new(player));
    reader.read_all_records().unwrap();
    let check = check.lock().unwrap();
    assert_eq!(check.images.len(), frames);
    assert!(check.images.iter().all(|(_, ok)| *ok));
}

#[test]
fn batch_mode_writes_the_same_records() {
    let camera = Arc::new(TestCamera::new(32, 32, CompressionPreset::ZstdTight));
    let mut writer = RecordFileWriter::new();
    writer.add_recordable(camera.clone()).unwrap();
    for frame in 0..10 {
        camera.create_frame(frame as f64, frame).unwrap();
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.vrs");
    writer.write_to_file(&path).unwrap();

    let reader = RecordFileReader::open(&path).unwrap();
    let id = camera.stream().id();
    assert_eq!(reader.record_count_for(id, Some(RecordType::Data)), 10);
    assert_eq!(reader.record_count(), 12);
}
