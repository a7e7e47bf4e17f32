//! Merged reading over related files: relatedness enforcement, stream-id
//! disambiguation, and global ordering.

mod common;

use std::sync::{Arc, Mutex};

use common::{TestCamera, CAMERA_TYPE_ID};
use vrs::compress::CompressionPreset;
use vrs::error::VrsError;
use vrs::multi_reader::MultiRecordFileReader;
use vrs::stream_id::{RecordType, StreamId};
use vrs::writer::RecordFileWriter;

const FRAMES: usize = 8;

/// These tests rely on every file getting instance id 1 for its camera, so
/// they must not allocate from the process-wide registry concurrently.
static SERIAL: Mutex<()> = Mutex::new(());

fn write_session_file(
    dir: &std::path::Path,
    name: &str,
    session: &str,
    time_offset: f64,
) -> std::path::PathBuf {
    let camera = Arc::new(TestCamera::new(32, 24, CompressionPreset::Lz4Fast));
    let mut writer = RecordFileWriter::new();
    writer.set_file_tag("session_id", session);
    writer.add_recordable(camera.clone()).unwrap();
    for frame in 0..FRAMES {
        camera
            .create_frame(time_offset + frame as f64 * 0.01, frame)
            .unwrap();
    }
    let path = dir.join(name);
    writer.write_to_file(&path).unwrap();
    path
}

#[test]
fn related_files_merge_with_disambiguated_streams() {
    let _serial = SERIAL.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        write_session_file(dir.path(), "a.vrs", "S", 0.000),
        write_session_file(dir.path(), "b.vrs", "S", 0.001),
        write_session_file(dir.path(), "c.vrs", "S", 0.002),
    ];

    let multi = MultiRecordFileReader::open(&paths).unwrap();
    assert_eq!(multi.file_count(), 3);

    // Every file used the same type id; instance ids must be disambiguated
    // stably in input-file order.
    let ids = multi.stream_ids();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| id.type_id == CAMERA_TYPE_ID));
    let instances: Vec<u16> = ids.iter().map(|id| id.instance_id).collect();
    assert_eq!(instances, vec![1, 2, 3]);

    // Original tags stay reachable through the merged ids.
    for id in &ids {
        let tags = multi.get_tags(*id).unwrap();
        assert_eq!(tags.flavor.as_deref(), Some("test/camera"));
    }

    // The merged sequence is globally timestamp-ordered.
    let merged = multi.merged_index();
    assert_eq!(merged.len(), 3 * (FRAMES + 2));
    assert!(merged.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    // Data records of the three files interleave by their time offsets.
    let data: Vec<(f64, StreamId)> = merged
        .iter()
        .filter(|m| m.record_type == RecordType::Data)
        .map(|m| (m.timestamp, m.stream_id))
        .collect();
    assert_eq!(data.len(), 3 * FRAMES);
    assert_eq!(data[0].1.instance_id, 1);
    assert_eq!(data[1].1.instance_id, 2);
    assert_eq!(data[2].1.instance_id, 3);
}

#[test]
fn unrelated_file_is_rejected() {
    let _serial = SERIAL.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut paths = vec![
        write_session_file(dir.path(), "a.vrs", "S", 0.0),
        write_session_file(dir.path(), "b.vrs", "S", 0.1),
        write_session_file(dir.path(), "c.vrs", "S", 0.2),
    ];

    // The three related files open together.
    assert!(MultiRecordFileReader::open(&paths).is_ok());

    // Adding one with a different session id fails the whole open.
    paths.push(write_session_file(dir.path(), "other.vrs", "S-prime", 0.3));
    match MultiRecordFileReader::open(&paths) {
        Err(VrsError::UnsupportedFeature(message)) => {
            assert!(message.contains("session_id"), "{message}");
        }
        other => panic!("expected UnsupportedFeature, got {other:?}"),
    }
}

#[test]
fn files_keep_their_ids_when_free() {
    let _serial = SERIAL.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        write_session_file(dir.path(), "a.vrs", "S", 0.0),
        write_session_file(dir.path(), "b.vrs", "S", 0.1),
    ];
    let multi = MultiRecordFileReader::open(&paths).unwrap();

    // File 0's stream keeps its original id; file 1's collides and moves.
    let original = StreamId::new(CAMERA_TYPE_ID, 1);
    assert_eq!(multi.merged_id(0, original), Some(original));
    let moved = multi.merged_id(1, original).unwrap();
    assert_ne!(moved, original);
    assert_eq!(multi.original_id(moved), Some((1, original)));
}
