use super::process::parse_response;
use super::*;
use crate::error::LiveDetectError;
use crate::frame::{BoundingBox, Detection, Frame};
use chrono::Utc;
use image::RgbImage;

#[test]
fn test_settings_range_checks() {
    assert!(DetectorSettings::new(0.25, 0.45).is_ok());
    assert!(DetectorSettings::new(0.0, 1.0).is_ok());
    assert!(matches!(
        DetectorSettings::new(1.01, 0.45),
        Err(LiveDetectError::InvalidConfig { .. })
    ));
    assert!(matches!(
        DetectorSettings::new(0.25, -0.5),
        Err(LiveDetectError::InvalidConfig { .. })
    ));
    assert!(DetectorSettings::new(f32::NAN, 0.5).is_err());
}

#[test]
fn test_settings_admit_confidence_range() {
    let settings = DetectorSettings::new(0.5, 0.45).unwrap();
    let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    assert!(settings.admits(&Detection::new(0, "a", 0.5, bbox)));
    assert!(settings.admits(&Detection::new(0, "a", 1.0, bbox)));
    assert!(!settings.admits(&Detection::new(0, "a", 0.49, bbox)));
    assert!(!settings.admits(&Detection::new(0, "a", 1.2, bbox)));
}

#[test]
fn test_parse_response_with_labels() {
    let labels = vec!["person".to_string(), "bicycle".to_string()];
    let line = r#"{"detections":[{"class_id":1,"confidence":0.8,"bbox":[1,2,3,4]},{"class_id":0,"label":"pedestrian","confidence":0.6,"bbox":[5,6,7,8]},{"class_id":9,"confidence":0.3,"bbox":[0,0,1,1]}]}"#;

    let detections = parse_response(line, &labels).unwrap();
    assert_eq!(detections.len(), 3);
    assert_eq!(detections[0].label, "bicycle");
    assert_eq!(detections[0].bbox, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
    assert_eq!(detections[1].label, "pedestrian");
    assert_eq!(detections[2].label, "class9");
}

#[test]
fn test_parse_response_errors() {
    assert!(matches!(
        parse_response("not json", &[]),
        Err(LiveDetectError::Detector { .. })
    ));
    assert!(matches!(
        parse_response(r#"{"error":"CUDA out of memory"}"#, &[]),
        Err(LiveDetectError::Detector { .. })
    ));
    assert!(parse_response(r#"{"detections":[]}"#, &[]).unwrap().is_empty());
}

#[test]
fn test_null_detector() {
    let mut detector = NullDetector;
    let frame = Frame::new(0, Utc::now(), RgbImage::new(4, 4));
    assert!(detector
        .infer(&frame, &DetectorSettings::default())
        .unwrap()
        .is_empty());
}

#[test]
fn test_spawn_rejects_empty_command() {
    assert!(matches!(
        ProcessDetector::spawn(&[], Vec::new()),
        Err(LiveDetectError::InvalidConfig { .. })
    ));
}

#[cfg(unix)]
#[test]
fn test_process_detector_round_trip() {
    // 4x4 RGB frame = 48 payload bytes after the header line
    let script = r#"while IFS= read -r header; do head -c 48 > /dev/null; echo '{"detections":[{"class_id":0,"confidence":0.9,"bbox":[0,0,2,2]}]}'; done"#;
    let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
    let mut detector = ProcessDetector::spawn(&command, vec!["box".to_string()]).unwrap();

    let settings = DetectorSettings::default();
    for index in 0..2 {
        let frame = Frame::new(index, Utc::now(), RgbImage::new(4, 4));
        let detections = detector.infer(&frame, &settings).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "box");
        assert_eq!(detections[0].caption(), "box 0.90");
    }
}

#[cfg(unix)]
#[test]
fn test_process_detector_server_exit() {
    let command = vec!["sh".to_string(), "-c".to_string(), "exit 0".to_string()];
    let mut detector = ProcessDetector::spawn(&command, Vec::new()).unwrap();
    let frame = Frame::new(0, Utc::now(), RgbImage::new(4, 4));
    assert!(matches!(
        detector.infer(&frame, &DetectorSettings::default()),
        Err(LiveDetectError::Detector { .. })
    ));
}

#[test]
fn test_from_config_none_backend() {
    let config = crate::config::LiveDetectConfig::default().detector;
    let detector = from_config(&config).unwrap();
    assert_eq!(detector.lock().name(), "none");
    assert_eq!(
        settings_from_config(&config).unwrap(),
        DetectorSettings::default()
    );
}
