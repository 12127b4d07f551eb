use crate::error::{LiveDetectError, Result};
use crate::registry::RegistryEntry;
use crate::session::{ManagerStatus, SessionId, SessionSnapshot, SessionSummary};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

/// Commands a control surface can issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Start,
    Stop,
    Cancel,
    List,
    Delete { id: SessionId },
    Play { id: SessionId },
    ViewLog { id: SessionId },
    Status,
}

impl ControlCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::Start => "start",
            ControlCommand::Stop => "stop",
            ControlCommand::Cancel => "cancel",
            ControlCommand::List => "list",
            ControlCommand::Delete { .. } => "delete",
            ControlCommand::Play { .. } => "play",
            ControlCommand::ViewLog { .. } => "view-log",
            ControlCommand::Status => "status",
        }
    }
}

/// Successful outcome of a command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlReply {
    Started { id: SessionId },
    Finished { summary: SessionSummary },
    Sessions { entries: Vec<RegistryEntry> },
    Deleted { id: SessionId },
    Launched { id: SessionId, path: PathBuf },
    Status {
        status: ManagerStatus,
        session: Option<SessionSnapshot>,
    },
}

/// A command paired with the channel its reply goes back on
#[derive(Debug)]
pub struct ControlRequest {
    pub command: ControlCommand,
    pub reply: oneshot::Sender<Result<ControlReply>>,
}

/// Cloneable sender side of the command channel
#[derive(Debug, Clone)]
pub struct ControlHandle {
    sender: mpsc::Sender<ControlRequest>,
}

impl ControlHandle {
    pub(crate) fn new(sender: mpsc::Sender<ControlRequest>) -> Self {
        Self { sender }
    }

    /// Send a command and wait for its reply
    pub async fn send(&self, command: ControlCommand) -> Result<ControlReply> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(ControlRequest { command, reply })
            .await
            .map_err(|_| LiveDetectError::system("Control service is not running"))?;
        response
            .await
            .map_err(|_| LiveDetectError::system("Control service dropped the request"))?
    }

    pub async fn start(&self) -> Result<SessionId> {
        match self.send(ControlCommand::Start).await? {
            ControlReply::Started { id } => Ok(id),
            other => Err(unexpected("start", &other)),
        }
    }

    pub async fn stop(&self) -> Result<SessionSummary> {
        match self.send(ControlCommand::Stop).await? {
            ControlReply::Finished { summary } => Ok(summary),
            other => Err(unexpected("stop", &other)),
        }
    }

    pub async fn cancel(&self) -> Result<SessionSummary> {
        match self.send(ControlCommand::Cancel).await? {
            ControlReply::Finished { summary } => Ok(summary),
            other => Err(unexpected("cancel", &other)),
        }
    }

    pub async fn list(&self) -> Result<Vec<RegistryEntry>> {
        match self.send(ControlCommand::List).await? {
            ControlReply::Sessions { entries } => Ok(entries),
            other => Err(unexpected("list", &other)),
        }
    }

    pub async fn delete(&self, id: SessionId) -> Result<()> {
        match self.send(ControlCommand::Delete { id }).await? {
            ControlReply::Deleted { .. } => Ok(()),
            other => Err(unexpected("delete", &other)),
        }
    }

    pub async fn play(&self, id: SessionId) -> Result<PathBuf> {
        match self.send(ControlCommand::Play { id }).await? {
            ControlReply::Launched { path, .. } => Ok(path),
            other => Err(unexpected("play", &other)),
        }
    }

    pub async fn view_log(&self, id: SessionId) -> Result<PathBuf> {
        match self.send(ControlCommand::ViewLog { id }).await? {
            ControlReply::Launched { path, .. } => Ok(path),
            other => Err(unexpected("view-log", &other)),
        }
    }

    pub async fn status(&self) -> Result<(ManagerStatus, Option<SessionSnapshot>)> {
        match self.send(ControlCommand::Status).await? {
            ControlReply::Status { status, session } => Ok((status, session)),
            other => Err(unexpected("status", &other)),
        }
    }
}

fn unexpected(command: &str, reply: &ControlReply) -> LiveDetectError {
    LiveDetectError::system(format!("Unexpected reply to {}: {:?}", command, reply))
}
