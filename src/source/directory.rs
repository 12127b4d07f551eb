use super::interface::{FrameRead, FrameSource, FrameSourceFactory};
use crate::error::{LiveDetectError, Result};
use crate::frame::Frame;
use chrono::Utc;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Replays the images of a directory in file-name order as a frame stream
pub struct DirectorySourceFactory {
    directory: PathBuf,
    fps: u32,
}

impl DirectorySourceFactory {
    pub fn new<P: Into<PathBuf>>(directory: P, fps: u32) -> Self {
        Self {
            directory: directory.into(),
            fps,
        }
    }
}

impl FrameSourceFactory for DirectorySourceFactory {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        let files = list_images(&self.directory).map_err(|e| {
            LiveDetectError::source_unavailable(format!(
                "cannot read image directory {}: {}",
                self.directory.display(),
                e
            ))
        })?;

        info!(
            "Opened directory source {} ({} images)",
            self.directory.display(),
            files.len()
        );

        let frame_interval = if self.fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(1_000_000 / self.fps as u64)
        };

        Ok(Box::new(DirectorySource {
            directory: self.directory.clone(),
            pending: files.into(),
            frame_interval,
            next_due: Instant::now(),
            produced: 0,
            closed: false,
        }))
    }
}

fn list_images(directory: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(directory)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

pub struct DirectorySource {
    directory: PathBuf,
    pending: VecDeque<PathBuf>,
    frame_interval: Duration,
    next_due: Instant,
    produced: u64,
    closed: bool,
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<FrameRead> {
        if self.closed {
            return Err(LiveDetectError::read_error("directory source is closed"));
        }

        let Some(path) = self.pending.pop_front() else {
            return Ok(FrameRead::EndOfStream);
        };

        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
        }
        self.next_due = Instant::now() + self.frame_interval;

        let image = image::open(&path)
            .map_err(|e| {
                LiveDetectError::read_error(format!("failed to decode {}: {}", path.display(), e))
            })?
            .to_rgb8();

        let index = self.produced;
        self.produced += 1;
        debug!("Read frame {} from {}", index, path.display());

        Ok(FrameRead::Frame(Frame::new(index, Utc::now(), image)))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.pending.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("directory {}", self.directory.display())
    }
}
