use super::mock::MemorySinkFactory;
use super::*;
use crate::detector::DetectorSettings;
use crate::error::LiveDetectError;
use crate::frame::AnnotatedFrame;
use crate::session::{SessionId, SessionStatus};
use chrono::{Duration, TimeZone, Utc};
use image::RgbImage;
use std::sync::Arc;
use tempfile::TempDir;

fn annotated(index: u64, width: u32, height: u32) -> AnnotatedFrame {
    AnnotatedFrame {
        index,
        captured_at: Utc::now(),
        image: Arc::new(RgbImage::new(width, height)),
        detections: Vec::new(),
    }
}

#[test]
fn test_recorder_opens_lazily_once() {
    let dir = TempDir::new().unwrap();
    let factory = MemorySinkFactory::new();
    let probe = factory.probe();
    let path = dir.path().join("videos").join("a.mjpeg");
    let mut recorder = VideoRecorder::new(path.clone(), 20, Arc::new(factory));

    assert_eq!(probe.opens(), 0);
    assert!(recorder.dimensions().is_none());

    for i in 0..3 {
        recorder.write(&annotated(i, 32, 24)).unwrap();
    }
    recorder.close().unwrap();
    recorder.close().unwrap();

    assert_eq!(probe.opens(), 1);
    assert_eq!(probe.frames(), 3);
    assert_eq!(probe.finishes(), 1);
    assert_eq!(probe.opened(), vec![(path, 32, 24, 20)]);
    assert_eq!(recorder.frames_written(), 3);
    assert_eq!(recorder.dimensions(), Some((32, 24)));
}

#[test]
fn test_recorder_dimension_mismatch() {
    let dir = TempDir::new().unwrap();
    let mut recorder = VideoRecorder::new(
        dir.path().join("v.mjpeg"),
        20,
        Arc::new(MemorySinkFactory::new()),
    );

    recorder.write(&annotated(0, 32, 24)).unwrap();
    let err = recorder.write(&annotated(1, 64, 48)).unwrap_err();
    assert!(matches!(
        err,
        LiveDetectError::DimensionMismatch {
            expected: (32, 24),
            actual: (64, 48)
        }
    ));
    assert!(recorder.check_dimensions((32, 24)).is_ok());
    assert!(recorder.check_dimensions((24, 32)).is_err());
    assert_eq!(recorder.frames_written(), 1);
}

#[test]
fn test_recorder_close_without_frames() {
    let dir = TempDir::new().unwrap();
    let factory = MemorySinkFactory::new();
    let probe = factory.probe();
    let path = dir.path().join("never.mjpeg");
    let mut recorder = VideoRecorder::new(path.clone(), 20, Arc::new(factory));

    recorder.close().unwrap();
    assert_eq!(probe.opens(), 0);
    assert_eq!(probe.finishes(), 0);
    assert!(!path.exists());
    assert!(recorder.write(&annotated(0, 8, 8)).is_err());
}

#[test]
fn test_recorder_close_failure_is_final() {
    let dir = TempDir::new().unwrap();
    let factory = MemorySinkFactory::new().failing_finish();
    let probe = factory.probe();
    let mut recorder = VideoRecorder::new(dir.path().join("v.mjpeg"), 20, Arc::new(factory));

    recorder.write(&annotated(0, 8, 8)).unwrap();
    assert!(recorder.close().is_err());
    assert!(recorder.close().is_ok());
    assert_eq!(probe.finishes(), 1);
    assert!(!recorder.is_open());
}

#[test]
fn test_mjpeg_sink_writes_one_jpeg_per_frame() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("clip.mjpeg");
    let mut recorder = VideoRecorder::new(path.clone(), 20, Arc::new(MjpegSinkFactory::new(80)));

    for i in 0..3 {
        recorder.write(&annotated(i, 16, 16)).unwrap();
    }
    recorder.close().unwrap();

    let data = std::fs::read(&path).unwrap();
    let starts = data.windows(3).filter(|w| w == &[0xFF, 0xD8, 0xFF]).count();
    assert_eq!(starts, 3);
}

#[test]
fn test_event_log_format_and_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs").join("s.txt");
    let mut logger = EventLogger::open(&path, chrono_tz::UTC).unwrap();

    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    logger.append(t0, "box", 0.9).unwrap();
    logger.append(t0 + Duration::milliseconds(250), "person", 0.456).unwrap();
    // Clock stepped back: clamped to the previous timestamp
    logger.append(t0, "box", 0.5).unwrap();
    logger.close().unwrap();
    logger.close().unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(
        lines,
        vec![
            "[2024-03-01T12:00:00.000Z] box 0.90",
            "[2024-03-01T12:00:00.250Z] person 0.46",
            "[2024-03-01T12:00:00.250Z] box 0.50",
        ]
    );
    assert_eq!(logger.lines_written(), 3);
    assert!(logger.append(t0, "late", 0.9).is_err());
}

#[test]
fn test_event_log_timezone() {
    let tz = resolve_timezone("Europe/Berlin");
    let t = Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap();
    assert_eq!(
        format_log_line(&t.with_timezone(&tz), "car", 1.0),
        "[2024-01-15T09:30:00.000+01:00] car 1.00"
    );
    assert_eq!(resolve_timezone("Not/AZone"), chrono_tz::UTC);
}

#[test]
fn test_metadata_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metadata").join("detect_20240101_120000_000.json");
    let started = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let metadata = SessionMetadata {
        id: SessionId::parse("detect_20240101_120000_000").unwrap(),
        started_at: started,
        ended_at: started + Duration::seconds(5),
        status: SessionStatus::Failed,
        cancelled: false,
        failure: Some("Frame read failed: unplugged".to_string()),
        frames_recorded: 1,
        detections_logged: 1,
        frame_size: Some((640, 480)),
        detector: DetectorSettings::default(),
        video_format: "mjpeg".to_string(),
    };

    metadata.save(&path).unwrap();
    let loaded = SessionMetadata::load(&path).unwrap();
    assert_eq!(loaded, metadata);
    assert!(loaded.is_failed());
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn test_sink_factory_from_config() {
    let config = crate::config::LiveDetectConfig::default().recording;
    assert_eq!(sink_factory_from_config(&config).unwrap().extension(), "mjpeg");
}
