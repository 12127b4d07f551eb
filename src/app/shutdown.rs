use super::{ComponentState, LiveDetectOrchestrator};
use crate::error::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

const SESSION_STOP_TIMEOUT: Duration = Duration::from_secs(30);
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

impl LiveDetectOrchestrator {
    /// Stop the active session, then every background component.
    ///
    /// Returns the process exit code: non-zero when something failed to stop in time.
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");
        let mut exit_code = 0;

        if let Some(keyboard_handler) = &self.keyboard_handler {
            self.set_component_state("keyboard", ComponentState::Stopping);
            match timeout(Duration::from_secs(2), keyboard_handler.stop()).await {
                Ok(Ok(())) => self.set_component_state("keyboard", ComponentState::Stopped),
                Ok(Err(e)) => {
                    error!("Error stopping keyboard controls: {}", e);
                    self.set_component_state("keyboard", ComponentState::Failed);
                    exit_code = 1;
                }
                Err(_) => {
                    error!("Keyboard controls stop timeout");
                    self.set_component_state("keyboard", ComponentState::Failed);
                    exit_code = 1;
                }
            }
        }

        // Control surfaces stay up until the session is registered
        match timeout(SESSION_STOP_TIMEOUT, self.manager.shutdown()).await {
            Ok(Some(summary)) => info!(
                "Session {} ended during shutdown ({:?}, {} frames, {} detections)",
                summary.id, summary.status, summary.frames_recorded, summary.detections_logged
            ),
            Ok(None) => debug!("No session was active at shutdown"),
            Err(_) => {
                error!("Active session did not stop within {:?}", SESSION_STOP_TIMEOUT);
                exit_code = 1;
            }
        }

        self.cancellation_token.cancel();

        for (component, task) in std::mem::take(&mut self.tasks) {
            let already_failed = self.component_state(component) == Some(ComponentState::Failed);
            self.set_component_state(component, ComponentState::Stopping);
            match timeout(TASK_STOP_TIMEOUT, task).await {
                Ok(Ok(())) if already_failed => {
                    self.set_component_state(component, ComponentState::Failed);
                }
                Ok(Ok(())) => {
                    self.set_component_state(component, ComponentState::Stopped);
                    debug!("{} component stopped", component);
                }
                Ok(Err(e)) => {
                    error!("{} component task failed: {}", component, e);
                    self.set_component_state(component, ComponentState::Failed);
                    exit_code = 1;
                }
                Err(_) => {
                    error!("{} component stop timeout", component);
                    self.set_component_state(component, ComponentState::Failed);
                    exit_code = 1;
                }
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}
