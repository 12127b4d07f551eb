use super::{LiveDetectOrchestrator, ShutdownReason};
use crate::error::{LiveDetectError, Result};
use crate::events::SessionEvent;
use crate::registry::RegistryEntry;
use crate::session::SessionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

type ShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl LiveDetectOrchestrator {
    /// Serve control surfaces until a signal or the quit key, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("Live detection service is running");

        let shutdown_receiver = self.take_shutdown_receiver()?;
        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| LiveDetectError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);
        let exit_code = self.shutdown().await?;

        info!("Live detection service shutdown complete");
        Ok(exit_code)
    }

    /// Record one session without an interactive surface.
    ///
    /// The session ends when `duration` elapses, when the source runs out or
    /// fails, or on a signal. Returns the registry entry of the finished session.
    pub async fn record(&mut self, duration: Option<Duration>) -> Result<RegistryEntry> {
        let mut shutdown_receiver = self.take_shutdown_receiver()?;
        let mut events = self.manager.subscribe_events();

        let id = self.control.start().await?;
        info!("Recording session {}", id);

        let finished = tokio::select! {
            reason = &mut shutdown_receiver => {
                info!("Recording interrupted: {:?}", reason.ok());
                false
            }
            _ = sleep_or_wait(duration) => {
                info!("Recording duration reached");
                false
            }
            _ = wait_for_completion(&mut events, &id) => true,
        };

        if !finished {
            match self.control.stop().await {
                Ok(summary) => debug!("Session {} stopped by the recorder", summary.id),
                Err(LiveDetectError::NotRunning) => debug!("Session {} already ending", id),
                Err(e) => return Err(e),
            }
        }

        let exit_code = self.shutdown().await?;
        if exit_code != 0 {
            warn!("Shutdown after recording reported exit code {}", exit_code);
        }
        self.manager.entry(&id)
    }

    fn take_shutdown_receiver(&mut self) -> Result<oneshot::Receiver<ShutdownReason>> {
        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| LiveDetectError::system("Shutdown sender already taken"))?;
        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| LiveDetectError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers(Arc::new(Mutex::new(Some(shutdown_sender))));
        Ok(shutdown_receiver)
    }

    /// Route SIGTERM, Ctrl+C and the quit token into the shutdown channel
    fn setup_signal_handlers(&self, shutdown_sender: ShutdownSender) {
        #[cfg(unix)]
        {
            let sender = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            send_reason(&sender, ShutdownReason::Signal("SIGTERM".to_string()))
                                .await;
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        let sender = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                send_reason(&sender, ShutdownReason::Signal("SIGINT".to_string())).await;
            }
        });

        let quit = self.quit.clone();
        tokio::spawn(async move {
            quit.cancelled().await;
            send_reason(&shutdown_sender, ShutdownReason::UserRequest).await;
        });
    }
}

async fn send_reason(sender: &ShutdownSender, reason: ShutdownReason) {
    if let Some(sender) = sender.lock().await.take() {
        let _ = sender.send(reason);
    }
}

async fn sleep_or_wait(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Resolves once `id` has been published into the registry
async fn wait_for_completion(events: &mut broadcast::Receiver<SessionEvent>, id: &SessionId) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::SessionCompleted { session_id, .. }) if &session_id == id => return,
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => debug!("Missed {} session events", missed),
            Err(RecvError::Closed) => return,
        }
    }
}
