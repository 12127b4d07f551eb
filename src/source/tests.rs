use super::mock::{ScriptEnd, ScriptStep, ScriptedSourceFactory};
use super::*;
use crate::config::LiveDetectConfig;
use image::{Rgb, RgbImage};

fn expect_frame(read: FrameRead) -> crate::frame::Frame {
    match read {
        FrameRead::Frame(frame) => frame,
        other => panic!("expected a frame, got {:?}", other),
    }
}

#[test]
fn test_synthetic_source_respects_limit() {
    let factory = SyntheticSourceFactory::new((32, 24), 1000, Some(2));
    let mut source = factory.open().unwrap();

    let first = expect_frame(source.next_frame().unwrap());
    assert_eq!(first.index, 0);
    assert_eq!(first.dimensions(), (32, 24));

    let second = expect_frame(source.next_frame().unwrap());
    assert_eq!(second.index, 1);

    assert!(matches!(source.next_frame().unwrap(), FrameRead::EndOfStream));
}

#[test]
fn test_synthetic_source_rejects_zero_size() {
    let factory = SyntheticSourceFactory::new((0, 24), 10, None);
    assert!(matches!(
        factory.open(),
        Err(LiveDetectError::SourceUnavailable { .. })
    ));
}

#[test]
fn test_close_is_idempotent_and_ends_reads() {
    let factory = SyntheticSourceFactory::new((8, 8), 1000, None);
    let mut source = factory.open().unwrap();

    source.close().unwrap();
    source.close().unwrap();
    assert!(matches!(
        source.next_frame(),
        Err(LiveDetectError::ReadError { .. })
    ));
}

#[test]
fn test_directory_source_reads_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(10, 6, Rgb([255, 0, 0]))
        .save(dir.path().join("b.png"))
        .unwrap();
    RgbImage::from_pixel(10, 6, Rgb([0, 255, 0]))
        .save(dir.path().join("a.png"))
        .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

    let factory = DirectorySourceFactory::new(dir.path(), 0);
    let mut source = factory.open().unwrap();

    let first = expect_frame(source.next_frame().unwrap());
    assert_eq!(first.image.get_pixel(0, 0), &Rgb([0, 255, 0]));
    let second = expect_frame(source.next_frame().unwrap());
    assert_eq!(second.image.get_pixel(0, 0), &Rgb([255, 0, 0]));
    assert!(matches!(source.next_frame().unwrap(), FrameRead::EndOfStream));
}

#[test]
fn test_directory_source_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let factory = DirectorySourceFactory::new(dir.path().join("absent"), 10);
    assert!(matches!(
        factory.open(),
        Err(LiveDetectError::SourceUnavailable { .. })
    ));
}

#[test]
fn test_directory_source_corrupt_image_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.jpg"), b"definitely not a jpeg").unwrap();

    let mut source = DirectorySourceFactory::new(dir.path(), 0).open().unwrap();
    assert!(matches!(
        source.next_frame(),
        Err(LiveDetectError::ReadError { .. })
    ));
}

#[test]
fn test_scripted_source_follows_script() {
    let factory = ScriptedSourceFactory::new(
        vec![
            ScriptStep::Frame { width: 4, height: 4 },
            ScriptStep::ReadError("cable pulled".to_string()),
        ],
        ScriptEnd::EndOfStream,
    );
    let probe = factory.probe();
    let mut source = factory.open().unwrap();

    expect_frame(source.next_frame().unwrap());
    assert!(matches!(
        source.next_frame(),
        Err(LiveDetectError::ReadError { .. })
    ));
    assert!(matches!(source.next_frame().unwrap(), FrameRead::EndOfStream));

    source.close().unwrap();
    source.close().unwrap();
    assert_eq!(probe.opens(), 1);
    assert_eq!(probe.closes(), 1);
    assert_eq!(probe.frames(), 1);
}

#[test]
fn test_scripted_source_hold_reports_timeouts() {
    let factory = ScriptedSourceFactory::frames(0, 4, 4, ScriptEnd::Hold);
    let mut source = factory.open().unwrap();
    assert!(matches!(source.next_frame().unwrap(), FrameRead::Timeout));
}

#[test]
fn test_scripted_source_unavailable() {
    let factory = ScriptedSourceFactory::frames(1, 4, 4, ScriptEnd::EndOfStream);
    factory.set_unavailable(Some("device busy"));
    assert!(matches!(
        factory.open(),
        Err(LiveDetectError::SourceUnavailable { .. })
    ));
    factory.set_unavailable(None);
    assert!(factory.open().is_ok());
}

#[test]
fn test_from_config_selects_synthetic() {
    let mut config = LiveDetectConfig::default().source;
    config.kind = crate::config::SourceKind::Synthetic;
    config.resolution = (16, 16);
    config.frame_limit = Some(1);

    let factory = from_config(&config).unwrap();
    let mut source = factory.open().unwrap();
    assert_eq!(expect_frame(source.next_frame().unwrap()).dimensions(), (16, 16));
}

#[test]
fn test_from_config_directory_requires_path() {
    let mut config = LiveDetectConfig::default().source;
    config.kind = crate::config::SourceKind::Directory;
    config.directory = None;
    assert!(matches!(
        from_config(&config),
        Err(LiveDetectError::InvalidConfig { .. })
    ));
}
