use crate::control::{execute, ControlCommand, ControlReply};
use crate::error::LiveDetectError;
use crate::session::SessionId;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::server::ServerState;

impl IntoResponse for LiveDetectError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            LiveDetectError::AlreadyRunning { .. } => (StatusCode::CONFLICT, "ALREADY_RUNNING"),
            LiveDetectError::NotRunning => (StatusCode::CONFLICT, "NOT_RUNNING"),
            LiveDetectError::InUse { .. } => (StatusCode::CONFLICT, "IN_USE"),
            LiveDetectError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            LiveDetectError::InvalidConfig { .. } => (StatusCode::BAD_REQUEST, "INVALID_CONFIG"),
            LiveDetectError::SourceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "SOURCE_UNAVAILABLE")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = serde_json::json!({
            "error": code,
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = std::result::Result<Json<ControlReply>, LiveDetectError>;

/// Commands run on their own task so a client disconnect cannot interrupt them
async fn run(state: &ServerState, command: ControlCommand) -> ApiResult {
    debug!("HTTP command: {}", command.name());
    let manager = Arc::clone(&state.manager);
    let launcher = Arc::clone(&state.launcher);
    tokio::spawn(async move { execute(&manager, launcher.as_ref(), command).await })
        .await
        .map_err(|e| LiveDetectError::system(format!("command task failed: {}", e)))?
        .map(Json)
}

/// Live MJPEG view of the frames the active session publishes
pub async fn mjpeg_stream_handler(State(state): State<ServerState>) -> impl IntoResponse {
    info!("New live view client connected");

    let mut frames = state.manager.subscribe_frames();
    let quality = state.jpeg_quality;

    let stream = async_stream::stream! {
        let mut frame_interval = interval(state.target_frame_interval);
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut current: Option<(u64, Bytes)> = None;
        let mut frames_streamed = 0u64;

        loop {
            frame_interval.tick().await;

            match frames.has_changed() {
                Ok(true) => {
                    let latest = frames.borrow_and_update().clone();
                    current = match latest {
                        Some(frame) => {
                            let index = frame.index;
                            match tokio::task::spawn_blocking(move || frame.to_jpeg(quality)).await {
                                Ok(Ok(jpeg)) => Some((index, Bytes::from(jpeg))),
                                Ok(Err(e)) => {
                                    warn!("Failed to encode frame {} for the live view: {}", index, e);
                                    current.take()
                                }
                                Err(e) => {
                                    warn!("Live view encoder task failed: {}", e);
                                    current.take()
                                }
                            }
                        }
                        None => None,
                    };
                }
                Ok(false) => {}
                Err(_) => {
                    debug!("Frame publisher closed; ending live view");
                    break;
                }
            }

            let Some((index, jpeg)) = current.as_ref() else {
                trace!("No annotated frame to stream");
                continue;
            };

            let boundary = format!(
                "--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Frame-Index: {}\r\n\r\n",
                jpeg.len(),
                index
            );
            yield Ok::<_, axum::Error>(Bytes::from(boundary));
            yield Ok(jpeg.clone());
            yield Ok(Bytes::from_static(b"\r\n"));

            frames_streamed += 1;
            if frames_streamed % 100 == 0 {
                debug!("Live view client has received {} frames", frames_streamed);
            }
        }
    };

    (
        [
            (header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=FRAME"),
            (header::CACHE_CONTROL, "no-cache, private"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(stream),
    )
}

pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let status = state.manager.status();
    let session = state.manager.current_session();
    let frames_available = state.manager.subscribe_frames().borrow().is_some();

    let health_info = serde_json::json!({
        "status": "healthy",
        "manager": status.to_string(),
        "session": session.map(|s| s.id.to_string()),
        "frames_available": frames_available,
        "event_subscribers": state.manager.events().subscriber_count(),
    });

    (StatusCode::OK, Json(health_info))
}

pub async fn status_handler(State(state): State<ServerState>) -> ApiResult {
    run(&state, ControlCommand::Status).await
}

pub async fn list_handler(State(state): State<ServerState>) -> ApiResult {
    run(&state, ControlCommand::List).await
}

pub async fn start_handler(State(state): State<ServerState>) -> ApiResult {
    run(&state, ControlCommand::Start).await
}

pub async fn stop_handler(State(state): State<ServerState>) -> ApiResult {
    run(&state, ControlCommand::Stop).await
}

pub async fn cancel_handler(State(state): State<ServerState>) -> ApiResult {
    run(&state, ControlCommand::Cancel).await
}

pub async fn delete_handler(State(state): State<ServerState>, Path(id): Path<String>) -> ApiResult {
    let id = SessionId::parse(&id)?;
    run(&state, ControlCommand::Delete { id }).await
}

pub async fn play_handler(State(state): State<ServerState>, Path(id): Path<String>) -> ApiResult {
    let id = SessionId::parse(&id)?;
    run(&state, ControlCommand::Play { id }).await
}

pub async fn view_log_handler(State(state): State<ServerState>, Path(id): Path<String>) -> ApiResult {
    let id = SessionId::parse(&id)?;
    run(&state, ControlCommand::ViewLog { id }).await
}

/// Accepts any command in its JSON wire form
pub async fn command_handler(
    State(state): State<ServerState>,
    Json(command): Json<ControlCommand>,
) -> ApiResult {
    run(&state, command).await
}

/// Live view with start/stop buttons
pub async fn stream_page_handler() -> impl IntoResponse {
    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Live Detection</title>
    <style>
        :root { color-scheme: dark; }
        body {
            margin: 0;
            background: #000;
            font-family: sans-serif;
            display: flex;
            flex-direction: column;
            align-items: center;
            justify-content: center;
            min-height: 100vh;
        }
        img.stream {
            display: block;
            max-width: 100vw;
            max-height: 85vh;
            object-fit: contain;
            background: #000;
        }
        nav button { margin: 0.5em; padding: 0.5em 1.5em; }
        #status { color: #ccc; }
    </style>
</head>
<body>
    <img class="stream" src="/stream.mjpg" alt="Live detection view">
    <nav>
        <button onclick="send('start')">Start</button>
        <button onclick="send('stop')">Stop</button>
        <button onclick="send('cancel')">Cancel</button>
    </nav>
    <div id="status"></div>
    <script>
        async function send(action) {
            const res = await fetch('/api/sessions/' + action, { method: 'POST' });
            const body = await res.json();
            document.getElementById('status').textContent =
                res.ok ? action + ': ok' : body.message;
        }
    </script>
</body>
</html>
"#,
    )
}
