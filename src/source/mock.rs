use super::interface::{FrameRead, FrameSource, FrameSourceFactory};
use crate::error::{LiveDetectError, Result};
use crate::frame::Frame;
use chrono::Utc;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted read result
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// A solid-colour frame of the given size
    Frame { width: u32, height: u32 },
    ReadError(String),
    EndOfStream,
}

/// What the source does once the script runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEnd {
    EndOfStream,
    /// Keep reporting read timeouts until the session is cancelled
    Hold,
}

/// Counters shared between a scripted factory and the test observing it
#[derive(Debug, Default)]
pub struct SourceProbe {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub frames: AtomicUsize,
}

impl SourceProbe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

/// Deterministic frame source for exercising the session pipeline
pub struct ScriptedSourceFactory {
    script: Vec<ScriptStep>,
    end: ScriptEnd,
    open_delay: Duration,
    unavailable: Mutex<Option<String>>,
    probe: Arc<SourceProbe>,
}

impl ScriptedSourceFactory {
    pub fn new(script: Vec<ScriptStep>, end: ScriptEnd) -> Self {
        Self {
            script,
            end,
            open_delay: Duration::ZERO,
            unavailable: Mutex::new(None),
            probe: Arc::new(SourceProbe::default()),
        }
    }

    /// `count` frames of one size, then `end`
    pub fn frames(count: usize, width: u32, height: u32, end: ScriptEnd) -> Self {
        Self::new(vec![ScriptStep::Frame { width, height }; count], end)
    }

    /// Block every open for `delay`, like a camera that is slow to come up
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Make the next opens fail with `SourceUnavailable`
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.lock() = reason.map(str::to_string);
    }

    pub fn probe(&self) -> Arc<SourceProbe> {
        Arc::clone(&self.probe)
    }
}

impl FrameSourceFactory for ScriptedSourceFactory {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        if let Some(reason) = self.unavailable.lock().clone() {
            return Err(LiveDetectError::source_unavailable(reason));
        }
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            steps: self.script.clone().into(),
            end: self.end,
            produced: 0,
            closed: false,
            probe: Arc::clone(&self.probe),
        }))
    }
}

pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    end: ScriptEnd,
    produced: u64,
    closed: bool,
    probe: Arc<SourceProbe>,
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<FrameRead> {
        if self.closed {
            return Err(LiveDetectError::read_error("scripted source is closed"));
        }

        match self.steps.pop_front() {
            Some(ScriptStep::Frame { width, height }) => {
                let index = self.produced;
                self.produced += 1;
                self.probe.frames.fetch_add(1, Ordering::SeqCst);
                let shade = (index * 40 % 256) as u8;
                let image = RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]));
                Ok(FrameRead::Frame(Frame::new(index, Utc::now(), image)))
            }
            Some(ScriptStep::ReadError(reason)) => Err(LiveDetectError::read_error(reason)),
            Some(ScriptStep::EndOfStream) => Ok(FrameRead::EndOfStream),
            None => match self.end {
                ScriptEnd::EndOfStream => Ok(FrameRead::EndOfStream),
                ScriptEnd::Hold => {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(FrameRead::Timeout)
                }
            },
        }
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
