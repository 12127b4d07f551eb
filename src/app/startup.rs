use super::{ComponentState, LiveDetectOrchestrator};
use crate::error::{LiveDetectError, Result};
use crate::events::SessionEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

impl LiveDetectOrchestrator {
    /// Start the control service and the configured control surfaces
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting live detection service");

        let service = self
            .control_service
            .take()
            .ok_or_else(|| LiveDetectError::system("Control service already started"))?;
        self.set_component_state("control", ComponentState::Starting);
        let token = self.cancellation_token.clone();
        self.tasks
            .push(("control", tokio::spawn(service.run(token))));
        self.set_component_state("control", ComponentState::Running);

        self.spawn_event_logger();

        if self.config.stream.enabled {
            self.start_stream_server()?;
        }

        if let Some(keyboard_handler) = &self.keyboard_handler {
            self.set_component_state("keyboard", ComponentState::Starting);
            match keyboard_handler.start().await {
                Ok(()) => self.set_component_state("keyboard", ComponentState::Running),
                Err(e) => {
                    self.set_component_state("keyboard", ComponentState::Failed);
                    error!("Failed to start keyboard controls: {}", e);
                    return Err(e);
                }
            }
        }

        info!("Live detection service started");
        Ok(())
    }

    /// Mirror session events into the log for operators
    fn spawn_event_logger(&mut self) {
        let mut events = self.manager.subscribe_events();
        let token = self.cancellation_token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event @ SessionEvent::SessionFailed { .. }) => {
                            warn!("{}", event.description())
                        }
                        Ok(event) => info!("{}", event.description()),
                        Err(RecvError::Lagged(missed)) => {
                            debug!("Event logger skipped {} events", missed)
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        });
        self.tasks.push(("events", task));
    }

    #[cfg(feature = "streaming")]
    fn start_stream_server(&mut self) -> Result<()> {
        use crate::streaming::StreamServerBuilder;
        use std::sync::Arc;

        self.set_component_state("streaming", ComponentState::Starting);
        let server = StreamServerBuilder::new()
            .config(self.config.stream.clone())
            .manager(Arc::clone(&self.manager))
            .launcher(Arc::clone(&self.launcher))
            .jpeg_quality(self.config.recording.jpeg_quality)
            .build()?;

        self.set_component_state("streaming", ComponentState::Running);
        let token = self.cancellation_token.clone();
        let states = Arc::clone(&self.component_states);
        let task = tokio::spawn(async move {
            if let Err(e) = server.start(token).await {
                error!("Stream server error: {}", e);
                states
                    .lock()
                    .insert("streaming".to_string(), ComponentState::Failed);
            }
        });
        self.tasks.push(("streaming", task));
        Ok(())
    }

    #[cfg(not(feature = "streaming"))]
    fn start_stream_server(&mut self) -> Result<()> {
        warn!("stream.enabled is set but this build has no streaming support");
        Ok(())
    }
}
