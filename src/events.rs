use crate::session::{SessionId, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events flowing back from the session manager to control surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A start command was accepted and the session paths were reserved
    SessionStarted {
        session_id: SessionId,
        started_at: DateTime<Utc>,
    },
    /// The in-flight session moved to a new lifecycle state
    StatusChanged {
        session_id: SessionId,
        status: SessionStatus,
    },
    /// A session finished and was published into the registry
    SessionCompleted {
        session_id: SessionId,
        status: SessionStatus,
        frames_recorded: u64,
        detections_logged: u64,
    },
    /// A session ended because of an error
    SessionFailed { session_id: SessionId, error: String },
    /// Registry contents changed (completion or deletion)
    RegistryChanged { reason: RegistryChange },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegistryChange {
    Published(SessionId),
    Deleted(SessionId),
}

impl SessionEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SessionEvent::SessionStarted { session_id, .. } => {
                format!("Session {} started", session_id)
            }
            SessionEvent::StatusChanged { session_id, status } => {
                format!("Session {} is {:?}", session_id, status)
            }
            SessionEvent::SessionCompleted {
                session_id,
                status,
                frames_recorded,
                detections_logged,
            } => format!(
                "Session {} completed as {:?} ({} frames, {} detections)",
                session_id, status, frames_recorded, detections_logged
            ),
            SessionEvent::SessionFailed { session_id, error } => {
                format!("Session {} failed: {}", session_id, error)
            }
            SessionEvent::RegistryChanged { reason } => match reason {
                RegistryChange::Published(id) => format!("Registry: published {}", id),
                RegistryChange::Deleted(id) => format!("Registry: deleted {}", id),
            },
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionStarted { .. } => "session_started",
            SessionEvent::StatusChanged { .. } => "status_changed",
            SessionEvent::SessionCompleted { .. } => "session_completed",
            SessionEvent::SessionFailed { .. } => "session_failed",
            SessionEvent::RegistryChanged { .. } => "registry_changed",
        }
    }
}

/// Event bus for session notifications using broadcast channels
///
/// Publishing is synchronous so the blocking session worker can use it directly.
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: SessionEvent) -> usize {
        match &event {
            SessionEvent::SessionStarted { session_id, .. } => {
                info!("Session {} started", session_id);
            }
            SessionEvent::SessionFailed { session_id, error } => {
                error!("Session {} failed: {}", session_id, error);
            }
            SessionEvent::SessionCompleted {
                session_id, status, ..
            } => {
                if *status == SessionStatus::Failed {
                    warn!("Session {} registered as failed", session_id);
                } else {
                    info!("Session {} registered", session_id);
                }
            }
            _ => debug!("Event: {}", event.description()),
        }

        // No subscribers is not an error: nobody is watching right now
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
