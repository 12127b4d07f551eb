use super::sink::{FrameSink, FrameSinkFactory};
use crate::error::{LiveDetectError, Result};
use image::RgbImage;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters shared between a memory sink factory and the test observing it
#[derive(Debug, Default)]
pub struct SinkProbe {
    opens: AtomicUsize,
    frames: AtomicUsize,
    finishes: AtomicUsize,
    opened: Mutex<Vec<(PathBuf, u32, u32, u32)>>,
}

impl SinkProbe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn finishes(&self) -> usize {
        self.finishes.load(Ordering::SeqCst)
    }

    /// `(path, width, height, fps)` of every open
    pub fn opened(&self) -> Vec<(PathBuf, u32, u32, u32)> {
        self.opened.lock().clone()
    }
}

/// Keeps frames in memory; creates an empty placeholder file so the session is listed
#[derive(Default)]
pub struct MemorySinkFactory {
    probe: Arc<SinkProbe>,
    fail_write_at: Option<usize>,
    fail_finish: bool,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the write of the n-th frame (0-based) of each sink
    pub fn failing_write_at(mut self, frame: usize) -> Self {
        self.fail_write_at = Some(frame);
        self
    }

    /// Report an error from `finish`
    pub fn failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    pub fn probe(&self) -> Arc<SinkProbe> {
        Arc::clone(&self.probe)
    }
}

impl FrameSinkFactory for MemorySinkFactory {
    fn open(&self, path: &Path, width: u32, height: u32, fps: u32) -> Result<Box<dyn FrameSink>> {
        std::fs::File::create(path)?;
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        self.probe
            .opened
            .lock()
            .push((path.to_path_buf(), width, height, fps));
        Ok(Box::new(MemorySink {
            frames: Vec::new(),
            fail_write_at: self.fail_write_at,
            fail_finish: self.fail_finish,
            probe: Arc::clone(&self.probe),
        }))
    }

    fn extension(&self) -> &str {
        "mjpeg"
    }
}

struct MemorySink {
    frames: Vec<RgbImage>,
    fail_write_at: Option<usize>,
    fail_finish: bool,
    probe: Arc<SinkProbe>,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, image: &RgbImage) -> Result<()> {
        if self.fail_write_at == Some(self.frames.len()) {
            return Err(LiveDetectError::recorder("memory sink write failure"));
        }
        self.frames.push(image.clone());
        self.probe.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.probe.finishes.fetch_add(1, Ordering::SeqCst);
        if self.fail_finish {
            return Err(LiveDetectError::recorder("memory sink finish failure"));
        }
        Ok(())
    }
}
