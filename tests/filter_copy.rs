//! Filter + copy pipeline: verbatim copies are byte-identical, filters
//! select the documented subsets, and pre-roll keeps decoders working.

mod common;

use std::sync::Arc;

use common::{TestCamera, TestMotionSensor};
use vrs::compress::CompressionPreset;
use vrs::filter::{copy_records, CopyMode, RecordFilter, TimeSpec};
use vrs::Recordable;
use vrs::reader::RecordFileReader;
use vrs::stream_id::RecordType;
use vrs::writer::{RecordFileWriter, RecordFileWriterOptions};

const FRAMES: usize = 20;

struct Fixture {
    dir: tempfile::TempDir,
    path: std::path::PathBuf,
    camera_id: vrs::StreamId,
    motion_id: vrs::StreamId,
}

fn write_fixture() -> Fixture {
    let camera = Arc::new(TestCamera::new(48, 32, CompressionPreset::ZstdFast));
    let motion = Arc::new(TestMotionSensor::new(CompressionPreset::None));
    let mut writer = RecordFileWriter::new();
    writer.set_file_tag("session_id", "filter-copy");
    writer.add_recordable(camera.clone()).unwrap();
    writer.add_recordable(motion.clone()).unwrap();
    for i in 0..FRAMES {
        let t = i as f64 * 0.1;
        camera.create_frame(t, i).unwrap();
        motion.create_sample(t, i as u64).unwrap();
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("source.vrs");
    writer.write_to_file(&path).unwrap();
    Fixture {
        dir,
        path,
        camera_id: camera.stream().id(),
        motion_id: motion.stream().id(),
    }
}

/// Raw payload bytes of every record, keyed by (timestamp, stream, type).
fn payload_map(
    reader: &mut RecordFileReader,
) -> Vec<((u64, vrs::StreamId, RecordType), Vec<u8>)> {
    let entries: Vec<_> = reader.index().to_vec();
    entries
        .iter()
        .map(|entry| {
            let (prolog, raw) = reader.load_record_verbatim(entry).unwrap();
            (
                (prolog.timestamp.to_bits(), prolog.stream_id, prolog.record_type),
                raw,
            )
        })
        .collect()
}

#[test]
fn verbatim_copy_preserves_payload_bytes() {
    let fixture = write_fixture();
    let target = fixture.dir.path().join("copy.vrs");

    let mut reader = RecordFileReader::open(&fixture.path).unwrap();
    let stats = copy_records(
        &mut reader,
        &target,
        &RecordFilter::default(),
        CopyMode::Verbatim,
        &RecordFileWriterOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.records_copied, 2 * FRAMES + 4);
    assert_eq!(stats.streams_kept, 2);

    let mut original = RecordFileReader::open(&fixture.path).unwrap();
    let mut copied = RecordFileReader::open(&target).unwrap();
    assert_eq!(copied.file_tags(), original.file_tags());
    assert_eq!(payload_map(&mut copied), payload_map(&mut original));
}

#[test]
fn reencode_round_trips_content() {
    let fixture = write_fixture();
    let target = fixture.dir.path().join("reencoded.vrs");

    let mut reader = RecordFileReader::open(&fixture.path).unwrap();
    copy_records(
        &mut reader,
        &target,
        &RecordFilter::default(),
        CopyMode::Reencode { preset: CompressionPreset::Lz4Fast, transform: None },
        &RecordFileWriterOptions::default(),
    )
    .unwrap();

    // Decoded payloads are identical even though the wire bytes changed.
    let mut original = RecordFileReader::open(&fixture.path).unwrap();
    let mut copied = RecordFileReader::open(&target).unwrap();
    let original_entries: Vec<_> = original.index().to_vec();
    let copied_entries: Vec<_> = copied.index().to_vec();
    assert_eq!(original_entries.len(), copied_entries.len());
    for (a, b) in original_entries.iter().zip(&copied_entries) {
        let (_, pa) = original.load_record_payload(a).unwrap();
        let (_, pb) = copied.load_record_payload(b).unwrap();
        assert_eq!(pa, pb);
    }
}

#[test]
fn stream_exclusion_drops_the_stream() {
    let fixture = write_fixture();
    let target = fixture.dir.path().join("no_motion.vrs");

    let mut filter = RecordFilter::default();
    filter
        .add_token(false, &fixture.motion_id.numeric_name())
        .unwrap();

    let mut reader = RecordFileReader::open(&fixture.path).unwrap();
    copy_records(
        &mut reader,
        &target,
        &filter,
        CopyMode::Verbatim,
        &RecordFileWriterOptions::default(),
    )
    .unwrap();

    let copied = RecordFileReader::open(&target).unwrap();
    assert_eq!(copied.stream_ids(), vec![fixture.camera_id]);
    assert_eq!(
        copied.record_count_for(fixture.camera_id, Some(RecordType::Data)),
        FRAMES
    );
}

#[test]
fn time_range_keeps_preroll() {
    let fixture = write_fixture();
    let target = fixture.dir.path().join("window.vrs");

    let mut filter = RecordFilter::default();
    filter.after = Some(TimeSpec::Absolute(0.55));
    filter.before = Some(TimeSpec::Absolute(1.05));

    let mut reader = RecordFileReader::open(&fixture.path).unwrap();
    copy_records(
        &mut reader,
        &target,
        &filter,
        CopyMode::Verbatim,
        &RecordFileWriterOptions::default(),
    )
    .unwrap();

    let copied = RecordFileReader::open(&target).unwrap();
    // Data records at 0.6 .. 1.0 inclusive = 5 per stream.
    assert_eq!(
        copied.record_count_for(fixture.camera_id, Some(RecordType::Data)),
        5
    );
    // Pre-roll: the configuration and state records (written before the
    // window) are still present so the copy decodes on its own.
    assert_eq!(
        copied.record_count_for(fixture.camera_id, Some(RecordType::Configuration)),
        1
    );
    assert_eq!(
        copied.record_count_for(fixture.camera_id, Some(RecordType::State)),
        1
    );
}

#[test]
fn relative_time_bounds() {
    let fixture = write_fixture();
    let mut filter = RecordFilter::default();
    // Records span 0.0 ..= 1.9; keep the middle.
    filter.after = Some(TimeSpec::AfterStart(0.45));
    filter.before = Some(TimeSpec::BeforeEnd(0.45));

    let reader = RecordFileReader::open(&fixture.path).unwrap();
    let (min, max) = filter.resolve_time_range(&reader).unwrap();
    assert!((min - 0.45).abs() < 1e-9);
    assert!((max - 1.45).abs() < 1e-9);

    let selected = filter.select(&reader).unwrap();
    let data: Vec<f64> = selected
        .iter()
        .filter(|e| e.record_type == RecordType::Data)
        .map(|e| e.timestamp)
        .collect();
    assert!(data.iter().all(|&t| (0.45..=1.45).contains(&t)));
    assert_eq!(data.len(), 2 * 10);
}

#[test]
fn decimation_thins_data_records() {
    let fixture = write_fixture();
    let mut filter = RecordFilter::default();
    filter.decimate_interval = Some(0.35);
    filter
        .add_token(true, &fixture.camera_id.numeric_name())
        .unwrap();

    let reader = RecordFileReader::open(&fixture.path).unwrap();
    let selected = filter.select(&reader).unwrap();
    let data: Vec<f64> = selected
        .iter()
        .filter(|e| e.record_type == RecordType::Data)
        .map(|e| e.timestamp)
        .collect();
    // 0.0, 0.4, 0.8, 1.2, 1.6 — every 4th frame at 0.1 s spacing.
    assert_eq!(data.len(), 5);
    assert!(data.windows(2).all(|w| w[1] - w[0] >= 0.35));
}
