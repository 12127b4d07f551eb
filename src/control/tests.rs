use super::*;
use crate::detector::{self, mock::ScriptedDetector};
use crate::error::LiveDetectError;
use crate::frame::{BoundingBox, Detection};
use crate::recorder::mock::MemorySinkFactory;
use crate::registry::{RecordingLayout, SessionRegistry};
use crate::session::{ManagerStatus, SessionId, SessionManager, SessionStatus};
use crate::source::mock::{ScriptEnd, ScriptedSourceFactory};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn manager(dir: &TempDir, end: ScriptEnd) -> Arc<SessionManager> {
    let mut config = crate::config::LiveDetectConfig::default().recording;
    config.root = dir.path().to_path_buf();
    let registry =
        Arc::new(SessionRegistry::new(RecordingLayout::from_config(&config), "mjpeg").unwrap());
    let detection = Detection::new(0, "box", 0.9, BoundingBox::new(1.0, 1.0, 8.0, 8.0));

    Arc::new(
        SessionManager::builder()
            .sources(Arc::new(ScriptedSourceFactory::frames(2, 16, 16, end)))
            .registry(registry)
            .detector(detector::shared(ScriptedDetector::new(vec![detection])))
            .sinks(Arc::new(MemorySinkFactory::new()))
            .build()
            .unwrap(),
    )
}

fn spawn_service(
    manager: Arc<SessionManager>,
    launcher: Arc<RecordingLauncher>,
) -> (ControlHandle, CancellationToken, tokio::task::JoinHandle<()>) {
    let (service, handle) = ControlService::new(manager, launcher, 8);
    let token = CancellationToken::new();
    let task = tokio::spawn(service.run(token.clone()));
    (handle, token, task)
}

async fn wait_idle(handle: &ControlHandle) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.status().await.unwrap().0 != ManagerStatus::Idle {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session did not finish");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_stop_list_over_channel() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    let (handle, token, task) = spawn_service(manager(&dir, ScriptEnd::Hold), launcher);

    let id = handle.start().await.unwrap();
    let (status, session) = handle.status().await.unwrap();
    assert_eq!(status, ManagerStatus::Running);
    assert_eq!(session.unwrap().id, id);

    assert!(matches!(
        handle.start().await,
        Err(LiveDetectError::AlreadyRunning { .. })
    ));

    let summary = handle.stop().await.unwrap();
    assert_eq!(summary.id, id);
    assert_eq!(summary.status, SessionStatus::Stopped);

    let entries = handle.list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, id);

    token.cancel();
    task.await.unwrap();
    assert!(matches!(
        handle.list().await,
        Err(LiveDetectError::System { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_play_and_view_log_use_launcher() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(RecordingLauncher::new());
    let (handle, token, _task) =
        spawn_service(manager(&dir, ScriptEnd::EndOfStream), Arc::clone(&launcher));

    let id = handle.start().await.unwrap();
    wait_idle(&handle).await;

    let video = handle.play(id.clone()).await.unwrap();
    let log = handle.view_log(id.clone()).await.unwrap();
    assert_eq!(video.extension().unwrap(), "mjpeg");
    assert_eq!(log.extension().unwrap(), "txt");
    assert_eq!(
        launcher.launches(),
        vec![(LaunchKind::Video, video), (LaunchKind::Log, log)]
    );

    let missing = SessionId::parse("detect_19990101_000000_000").unwrap();
    assert!(matches!(
        handle.play(missing.clone()).await,
        Err(LiveDetectError::NotFound { .. })
    ));
    assert!(matches!(
        handle.view_log(missing).await,
        Err(LiveDetectError::NotFound { .. })
    ));

    token.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_over_channel() {
    let dir = TempDir::new().unwrap();
    let (handle, token, _task) = spawn_service(
        manager(&dir, ScriptEnd::Hold),
        Arc::new(RecordingLauncher::new()),
    );

    let id = handle.start().await.unwrap();
    assert!(matches!(
        handle.delete(id.clone()).await,
        Err(LiveDetectError::InUse { .. })
    ));

    handle.cancel().await.unwrap();
    handle.delete(id.clone()).await.unwrap();
    assert!(handle.list().await.unwrap().is_empty());
    assert!(matches!(
        handle.delete(id).await,
        Err(LiveDetectError::NotFound { .. })
    ));

    token.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_answers_while_stop_is_pending() {
    let dir = TempDir::new().unwrap();
    let (handle, token, _task) = spawn_service(
        manager(&dir, ScriptEnd::Hold),
        Arc::new(RecordingLauncher::new()),
    );

    handle.start().await.unwrap();
    let stopper = handle.clone();
    let stop = tokio::spawn(async move { stopper.stop().await });

    // Queries are served on their own tasks while the stop joins the worker
    handle.status().await.unwrap();
    let summary = stop.await.unwrap().unwrap();
    assert_eq!(summary.status, SessionStatus::Stopped);

    token.cancel();
}

#[test]
fn test_command_wire_format() {
    let id = SessionId::parse("detect_20240101_120000_000").unwrap();
    let json = serde_json::to_string(&ControlCommand::Delete { id: id.clone() }).unwrap();
    assert_eq!(json, r#"{"command":"delete","id":"detect_20240101_120000_000"}"#);

    let parsed: ControlCommand = serde_json::from_str(r#"{"command":"view_log","id":"detect_20240101_120000_000"}"#).unwrap();
    assert_eq!(parsed, ControlCommand::ViewLog { id });
    assert_eq!(parsed.name(), "view-log");

    assert!(serde_json::from_str::<ControlCommand>(r#"{"command":"delete","id":"../../etc"}"#).is_err());
}

#[test]
fn test_system_launcher_without_program() {
    let launcher = SystemLauncher::new(Vec::new(), Vec::new());
    assert!(matches!(
        launcher.launch(LaunchKind::Video, std::path::Path::new("/tmp/x.mjpeg")),
        Err(LiveDetectError::InvalidConfig { .. })
    ));
}

#[cfg(unix)]
#[test]
fn test_system_launcher_runs_configured_program() {
    let launcher = SystemLauncher::new(vec!["true".to_string()], vec!["true".to_string()]);
    launcher
        .launch(LaunchKind::Log, std::path::Path::new("/tmp/x.txt"))
        .unwrap();
}
