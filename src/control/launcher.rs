use crate::config::ControlConfig;
use crate::error::{LiveDetectError, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
    Video,
    Log,
}

/// Hands a recorded file to an external program
pub trait Launcher: Send + Sync {
    fn launch(&self, kind: LaunchKind, path: &Path) -> Result<()>;
}

/// Runs the configured player or viewer, or the platform's default opener
pub struct SystemLauncher {
    player: Vec<String>,
    log_viewer: Vec<String>,
}

impl SystemLauncher {
    pub fn new(player: Vec<String>, log_viewer: Vec<String>) -> Self {
        Self { player, log_viewer }
    }

    pub fn from_config(config: &ControlConfig) -> Self {
        Self::new(
            config
                .player_command
                .clone()
                .unwrap_or_else(platform_opener),
            config
                .log_viewer_command
                .clone()
                .unwrap_or_else(platform_opener),
        )
    }

    fn argv(&self, kind: LaunchKind) -> &[String] {
        match kind {
            LaunchKind::Video => &self.player,
            LaunchKind::Log => &self.log_viewer,
        }
    }
}

fn platform_opener() -> Vec<String> {
    if cfg!(target_os = "macos") {
        vec!["open".to_string()]
    } else if cfg!(target_os = "windows") {
        vec![
            "cmd".to_string(),
            "/C".to_string(),
            "start".to_string(),
            String::new(),
        ]
    } else {
        vec!["xdg-open".to_string()]
    }
}

impl Launcher for SystemLauncher {
    fn launch(&self, kind: LaunchKind, path: &Path) -> Result<()> {
        let (program, args) = self.argv(kind).split_first().ok_or_else(|| {
            LiveDetectError::invalid_config(format!("No program configured to open {:?} files", kind))
        })?;

        let mut child = Command::new(program)
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                LiveDetectError::component("launcher", format!("Failed to run {}: {}", program, e))
            })?;

        info!("Opened {} with {} (pid {})", path.display(), program, child.id());

        // Reap the child without blocking the caller
        let program = program.clone();
        std::thread::spawn(move || match child.wait() {
            Ok(status) if status.success() => debug!("{} exited", program),
            Ok(status) => warn!("{} exited with {}", program, status),
            Err(e) => warn!("Failed to wait for {}: {}", program, e),
        });

        Ok(())
    }
}

/// Records launches instead of running anything
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<(LaunchKind, PathBuf)>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launches(&self) -> Vec<(LaunchKind, PathBuf)> {
        self.launches.lock().clone()
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&self, kind: LaunchKind, path: &Path) -> Result<()> {
        self.launches.lock().push((kind, path.to_path_buf()));
        Ok(())
    }
}
