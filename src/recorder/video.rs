use super::sink::{FrameSink, FrameSinkFactory};
use crate::error::{LiveDetectError, Result};
use crate::frame::AnnotatedFrame;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

enum RecorderState {
    Unopened,
    Open {
        sink: Box<dyn FrameSink>,
        dimensions: (u32, u32),
    },
    Closed {
        dimensions: Option<(u32, u32)>,
    },
}

/// Lazily opened video output for one session.
///
/// The sink is opened by the first `write`, which fixes the frame size for
/// the rest of the session. Closing without any write leaves no file behind.
pub struct VideoRecorder {
    path: PathBuf,
    fps: u32,
    factory: Arc<dyn FrameSinkFactory>,
    state: RecorderState,
    frames_written: u64,
}

impl VideoRecorder {
    pub fn new(path: PathBuf, fps: u32, factory: Arc<dyn FrameSinkFactory>) -> Self {
        Self {
            path,
            fps,
            factory,
            state: RecorderState::Unopened,
            frames_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, RecorderState::Open { .. })
    }

    /// Frame size fixed by the first write, if any
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match &self.state {
            RecorderState::Unopened => None,
            RecorderState::Open { dimensions, .. } => Some(*dimensions),
            RecorderState::Closed { dimensions } => *dimensions,
        }
    }

    /// Fail with `DimensionMismatch` if `actual` differs from the fixed size
    pub fn check_dimensions(&self, actual: (u32, u32)) -> Result<()> {
        match self.dimensions() {
            Some(expected) if expected != actual => {
                Err(LiveDetectError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }

    pub fn write(&mut self, frame: &AnnotatedFrame) -> Result<()> {
        let actual = frame.dimensions();

        if let RecorderState::Unopened = self.state {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let sink = self.factory.open(&self.path, actual.0, actual.1, self.fps)?;
            info!(
                "Opened video {} ({}x{} @ {}fps)",
                self.path.display(),
                actual.0,
                actual.1,
                self.fps
            );
            self.state = RecorderState::Open {
                sink,
                dimensions: actual,
            };
        }

        match &mut self.state {
            RecorderState::Open { sink, dimensions } => {
                if *dimensions != actual {
                    return Err(LiveDetectError::DimensionMismatch {
                        expected: *dimensions,
                        actual,
                    });
                }
                sink.write_frame(&frame.image)?;
                self.frames_written += 1;
                Ok(())
            }
            RecorderState::Closed { .. } => Err(LiveDetectError::recorder(format!(
                "video {} is already closed",
                self.path.display()
            ))),
            RecorderState::Unopened => Err(LiveDetectError::recorder("video sink failed to open")),
        }
    }

    /// Flush and release the sink; later calls are no-ops
    pub fn close(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, RecorderState::Closed { dimensions: None });
        match state {
            RecorderState::Unopened => {
                debug!("Video {} closed without frames", self.path.display());
                Ok(())
            }
            RecorderState::Open {
                mut sink,
                dimensions,
            } => {
                self.state = RecorderState::Closed {
                    dimensions: Some(dimensions),
                };
                sink.finish()?;
                info!(
                    "Closed video {} after {} frames",
                    self.path.display(),
                    self.frames_written
                );
                Ok(())
            }
            closed @ RecorderState::Closed { .. } => {
                self.state = closed;
                Ok(())
            }
        }
    }
}
