use crate::detector::DetectorSettings;
use crate::error::Result;
use crate::session::{SessionId, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Sidecar written when a session is published into the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub failure: Option<String>,
    pub frames_recorded: u64,
    pub detections_logged: u64,
    /// Frame size fixed by the first recorded frame
    #[serde(default)]
    pub frame_size: Option<(u32, u32)>,
    pub detector: DetectorSettings,
    pub video_format: String,
}

impl SessionMetadata {
    /// Write through a temporary file so readers never see a partial document
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!("Saved metadata to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn is_failed(&self) -> bool {
        self.status == SessionStatus::Failed
    }
}
