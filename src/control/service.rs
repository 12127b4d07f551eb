use super::command::{ControlCommand, ControlHandle, ControlReply, ControlRequest};
use super::launcher::{LaunchKind, Launcher};
use crate::error::{LiveDetectError, Result};
use crate::session::SessionManager;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executes control commands against the session manager.
///
/// Each request runs on its own task so a slow command (a start opening the
/// device, a stop waiting for teardown) never holds up the queue.
pub struct ControlService {
    manager: Arc<SessionManager>,
    launcher: Arc<dyn Launcher>,
    receiver: mpsc::Receiver<ControlRequest>,
}

impl ControlService {
    pub fn new(
        manager: Arc<SessionManager>,
        launcher: Arc<dyn Launcher>,
        queue: usize,
    ) -> (Self, ControlHandle) {
        let (sender, receiver) = mpsc::channel(queue.max(1));
        (
            Self {
                manager,
                launcher,
                receiver,
            },
            ControlHandle::new(sender),
        )
    }

    /// Serve requests until the token is cancelled or every handle is dropped
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Control service started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = self.receiver.recv() => {
                    let Some(request) = request else { break };
                    let manager = Arc::clone(&self.manager);
                    let launcher = Arc::clone(&self.launcher);
                    tokio::spawn(async move {
                        let name = request.command.name();
                        let result = execute(&manager, launcher.as_ref(), request.command).await;
                        if let Err(e) = &result {
                            if e.is_rejection() {
                                debug!("Command {} rejected: {}", name, e);
                            } else {
                                warn!("Command {} failed: {}", name, e);
                            }
                        }
                        if request.reply.send(result).is_err() {
                            debug!("Caller of {} went away before the reply", name);
                        }
                    });
                }
            }
        }
        info!("Control service stopped");
    }
}

/// Run one command to completion
pub async fn execute(
    manager: &SessionManager,
    launcher: &dyn Launcher,
    command: ControlCommand,
) -> Result<ControlReply> {
    match command {
        ControlCommand::Start => Ok(ControlReply::Started {
            id: manager.start().await?,
        }),
        ControlCommand::Stop => Ok(ControlReply::Finished {
            summary: manager.stop().await?,
        }),
        ControlCommand::Cancel => Ok(ControlReply::Finished {
            summary: manager.cancel().await?,
        }),
        ControlCommand::List => Ok(ControlReply::Sessions {
            entries: manager.list()?,
        }),
        ControlCommand::Delete { id } => {
            manager.delete(&id)?;
            Ok(ControlReply::Deleted { id })
        }
        ControlCommand::Play { id } => {
            let path = manager.entry(&id)?.video_path.ok_or_else(|| LiveDetectError::NotFound {
                session_id: id.to_string(),
            })?;
            launcher.launch(LaunchKind::Video, &path)?;
            Ok(ControlReply::Launched { id, path })
        }
        ControlCommand::ViewLog { id } => {
            let path = manager.entry(&id)?.log_path.ok_or_else(|| LiveDetectError::NotFound {
                session_id: id.to_string(),
            })?;
            launcher.launch(LaunchKind::Log, &path)?;
            Ok(ControlReply::Launched { id, path })
        }
        ControlCommand::Status => Ok(ControlReply::Status {
            status: manager.status(),
            session: manager.current_session(),
        }),
    }
}
