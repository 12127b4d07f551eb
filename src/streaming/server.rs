use crate::{
    config::StreamConfig,
    control::Launcher,
    error::{LiveDetectError, Result},
    session::SessionManager,
};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{
    cancel_handler, command_handler, delete_handler, health_handler, list_handler,
    mjpeg_stream_handler, play_handler, start_handler, status_handler, stop_handler,
    stream_page_handler, view_log_handler,
};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) manager: Arc<SessionManager>,
    pub(crate) launcher: Arc<dyn Launcher>,
    pub(crate) target_frame_interval: Duration,
    pub(crate) jpeg_quality: u8,
}

impl ServerState {
    pub fn new(
        manager: Arc<SessionManager>,
        launcher: Arc<dyn Launcher>,
        target_fps: u32,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            manager,
            launcher,
            target_frame_interval: Duration::from_micros(1_000_000u64 / target_fps.max(1) as u64),
            jpeg_quality,
        }
    }
}

/// Routes of the HTTP control surface
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(stream_page_handler))
        .route("/stream.mjpg", get(mjpeg_stream_handler))
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/command", post(command_handler))
        .route("/api/sessions", get(list_handler))
        .route("/api/sessions/start", post(start_handler))
        .route("/api/sessions/stop", post(stop_handler))
        .route("/api/sessions/cancel", post(cancel_handler))
        .route("/api/sessions/:id", delete(delete_handler))
        .route("/api/sessions/:id/play", post(play_handler))
        .route("/api/sessions/:id/log", post(view_log_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the live annotated view and the JSON command API over HTTP
pub struct StreamServer {
    pub(crate) config: StreamConfig,
    pub(crate) state: ServerState,
}

impl StreamServer {
    pub fn new(config: StreamConfig, state: ServerState) -> Self {
        Self { config, state }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    /// Bind and serve until `shutdown` is cancelled
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let app = router(self.state.clone());
        let addr = self.address();

        info!("Starting HTTP control surface on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            LiveDetectError::component("stream_server", format!("Failed to bind {}: {}", addr, e))
        })?;

        info!("Live view available at http://{}/", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| LiveDetectError::component("stream_server", format!("Server error: {}", e)))?;

        info!("HTTP control surface stopped");
        Ok(())
    }
}

/// Stream server builder for configuration
pub struct StreamServerBuilder {
    config: Option<StreamConfig>,
    manager: Option<Arc<SessionManager>>,
    launcher: Option<Arc<dyn Launcher>>,
    jpeg_quality: u8,
}

impl StreamServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            manager: None,
            launcher: None,
            jpeg_quality: 80,
        }
    }

    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn manager(mut self, manager: Arc<SessionManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn build(self) -> Result<StreamServer> {
        let config = self.config.ok_or_else(|| {
            LiveDetectError::component("stream_server", "Stream configuration is required")
        })?;
        let manager = self.manager.ok_or_else(|| {
            LiveDetectError::component("stream_server", "Session manager is required")
        })?;
        let launcher = self.launcher.ok_or_else(|| {
            LiveDetectError::component("stream_server", "Launcher is required")
        })?;
        if config.fps == 0 {
            return Err(LiveDetectError::invalid_config(
                "Stream fps must be greater than 0",
            ));
        }

        let state = ServerState::new(manager, launcher, config.fps, self.jpeg_quality);
        Ok(StreamServer::new(config, state))
    }
}

impl Default for StreamServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
