use crate::error::{LiveDetectError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

const SESSION_PREFIX: &str = "detect_";

/// Name shared by a session's video, log and metadata files
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// `detect_<YYYYMMDD_HHMMSS_mmm>` for the given start time
    pub fn from_timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self(format!("{}{}", SESSION_PREFIX, at.format("%Y%m%d_%H%M%S_%3f")))
    }

    /// Disambiguated variant used when the plain id is already taken
    pub fn with_suffix(&self, n: u32) -> Self {
        Self(format!("{}_{}", self.0, n))
    }

    /// Validate an externally supplied id; rejects anything that could escape the recordings root
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = raw.len() > SESSION_PREFIX.len()
            && raw.starts_with(SESSION_PREFIX)
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(LiveDetectError::NotFound {
                session_id: raw.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = LiveDetectError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Lifecycle of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Failed)
    }
}

/// What the manager reports to control surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagerStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    /// Terminal session still being handed back; `Idle` follows shortly
    Stopped,
    Failed,
}

impl From<SessionStatus> for ManagerStatus {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Starting => ManagerStatus::Starting,
            SessionStatus::Running => ManagerStatus::Running,
            SessionStatus::Stopping => ManagerStatus::Stopping,
            SessionStatus::Stopped => ManagerStatus::Stopped,
            SessionStatus::Failed => ManagerStatus::Failed,
        }
    }
}

impl fmt::Display for ManagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerStatus::Idle => "idle",
            ManagerStatus::Starting => "starting",
            ManagerStatus::Running => "running",
            ManagerStatus::Stopping => "stopping",
            ManagerStatus::Stopped => "stopped",
            ManagerStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Files reserved for a session when it is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPaths {
    pub video: PathBuf,
    pub log: PathBuf,
    pub metadata: PathBuf,
}

/// Point-in-time view of the in-flight session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub frames_recorded: u64,
    pub detections_logged: u64,
    pub video_path: PathBuf,
    pub log_path: PathBuf,
}

/// Outcome handed back by `stop` and `cancel`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub status: SessionStatus,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub frames_recorded: u64,
    pub detections_logged: u64,
    pub failure: Option<String>,
}
