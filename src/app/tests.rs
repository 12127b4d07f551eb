use super::*;
use crate::config::{DetectorBackend, LiveDetectConfig, SourceKind};
use crate::control::RecordingLauncher;
use crate::error::LiveDetectError;
use crate::session::{ManagerStatus, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_config(dir: &TempDir) -> LiveDetectConfig {
    let mut config = LiveDetectConfig::default();
    config.source.kind = SourceKind::Synthetic;
    config.source.resolution = (64, 48);
    config.source.fps = 50;
    config.recording.root = dir.path().to_path_buf();
    config.annotation.font_path = dir.path().join("missing.ttf").display().to_string();
    config.control.keyboard = false;
    config.stream.enabled = false;
    config
}

#[tokio::test]
async fn test_orchestrator_creation() {
    let dir = TempDir::new().unwrap();
    let orchestrator = LiveDetectOrchestrator::new(create_test_config(&dir)).unwrap();

    assert_eq!(orchestrator.manager().status(), ManagerStatus::Idle);
    assert!(orchestrator.keyboard_handler.is_none());
    assert!(orchestrator.component_states().is_empty());
    assert!(dir.path().join("videos").is_dir());
    assert!(dir.path().join("logs").is_dir());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.detector.backend = DetectorBackend::Process;
    config.detector.command.clear();

    assert!(matches!(
        LiveDetectOrchestrator::new(config),
        Err(LiveDetectError::InvalidConfig { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_control_commands_after_start() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = LiveDetectOrchestrator::new(create_test_config(&dir)).unwrap();
    orchestrator.start().await.unwrap();
    assert_eq!(
        orchestrator.component_state("control"),
        Some(ComponentState::Running)
    );
    assert!(orchestrator.start().await.is_err());

    let control = orchestrator.control();
    let id = control.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let summary = control.stop().await.unwrap();
    assert_eq!(summary.id, id);
    assert_eq!(summary.status, SessionStatus::Stopped);
    assert!(summary.frames_recorded > 0);

    let entries = control.list().await.unwrap();
    assert_eq!(entries.len(), 1);

    assert_eq!(orchestrator.shutdown().await.unwrap(), 0);
    assert_eq!(
        orchestrator.component_state("control"),
        Some(ComponentState::Stopped)
    );
    assert_eq!(
        orchestrator.component_state("events"),
        Some(ComponentState::Stopped)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_stops_active_session() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = LiveDetectOrchestrator::new(create_test_config(&dir)).unwrap();
    orchestrator.start().await.unwrap();

    let id = orchestrator.control().start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(orchestrator.shutdown().await.unwrap(), 0);
    let manager = orchestrator.manager();
    assert_eq!(manager.status(), ManagerStatus::Idle);

    let entry = manager.entry(&id).unwrap();
    assert_eq!(entry.status(), Some(SessionStatus::Stopped));
    assert!(entry.log_path.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_record_for_duration() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = LiveDetectOrchestrator::new(create_test_config(&dir)).unwrap();
    orchestrator.start().await.unwrap();

    let entry = orchestrator
        .record(Some(Duration::from_millis(150)))
        .await
        .unwrap();

    let metadata = entry.metadata.unwrap();
    assert_eq!(metadata.status, SessionStatus::Stopped);
    assert!(!metadata.cancelled);
    assert!(metadata.frames_recorded > 0);
    assert_eq!(metadata.frame_size, Some((64, 48)));
    assert!(entry.video_path.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_record_until_source_ends() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.source.frame_limit = Some(3);
    let mut orchestrator = LiveDetectOrchestrator::new(config).unwrap();
    orchestrator.start().await.unwrap();

    let entry = tokio::time::timeout(Duration::from_secs(5), orchestrator.record(None))
        .await
        .expect("recording did not finish")
        .unwrap();

    let metadata = entry.metadata.unwrap();
    assert_eq!(metadata.status, SessionStatus::Stopped);
    assert_eq!(metadata.frames_recorded, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_quit_token_ends_run() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let manager = Arc::new(build_manager(&config).unwrap());
    let launcher = Arc::new(RecordingLauncher::new());
    let mut orchestrator = LiveDetectOrchestrator::with_parts(config, manager, launcher);
    orchestrator.start().await.unwrap();

    orchestrator.quit_token().cancel();
    let exit_code = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("run did not return")
        .unwrap();
    assert_eq!(exit_code, 0);
    assert!(orchestrator.run().await.is_err());
}

#[test]
fn test_open_registry_uses_video_extension() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let registry = open_registry(&config.recording).unwrap();
    assert_eq!(registry.video_extension(), "mjpeg");
    assert!(registry.list().unwrap().is_empty());
}
