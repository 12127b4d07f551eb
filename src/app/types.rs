use std::fmt;

/// Lifecycle of a long-running component (control service, HTTP surface, keyboard)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentState::Stopped => "stopped",
            ComponentState::Starting => "starting",
            ComponentState::Running => "running",
            ComponentState::Stopping => "stopping",
            ComponentState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why the process is shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    /// Quit key on the terminal surface
    UserRequest,
}
