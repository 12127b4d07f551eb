use super::interface::{FrameRead, FrameSource, FrameSourceFactory};
use crate::error::{LiveDetectError, Result};
use crate::frame::Frame;
use chrono::Utc;
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Generates a moving test pattern; stands in for a camera on machines without one
pub struct SyntheticSourceFactory {
    resolution: (u32, u32),
    fps: u32,
    frame_limit: Option<u64>,
}

impl SyntheticSourceFactory {
    pub fn new(resolution: (u32, u32), fps: u32, frame_limit: Option<u64>) -> Self {
        Self {
            resolution,
            fps,
            frame_limit,
        }
    }
}

impl FrameSourceFactory for SyntheticSourceFactory {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        let (width, height) = self.resolution;
        if width == 0 || height == 0 || self.fps == 0 {
            return Err(LiveDetectError::source_unavailable(format!(
                "synthetic source needs a non-zero size and fps (got {}x{} @ {}fps)",
                width, height, self.fps
            )));
        }

        info!(
            "Opened synthetic source ({}x{} @ {}fps, limit {:?})",
            width, height, self.fps, self.frame_limit
        );

        Ok(Box::new(SyntheticSource {
            width,
            height,
            frame_interval: Duration::from_micros(1_000_000 / self.fps as u64),
            frame_limit: self.frame_limit,
            produced: 0,
            next_due: Instant::now(),
            closed: false,
        }))
    }
}

pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    frame_limit: Option<u64>,
    produced: u64,
    next_due: Instant,
    closed: bool,
}

impl SyntheticSource {
    fn render(&self, index: u64) -> RgbImage {
        let (w, h) = (self.width, self.height);
        let square = (w.min(h) / 4).max(1);
        let travel = w.saturating_sub(square).max(1);
        let sx = ((index * 8) % travel as u64) as u32;
        let sy = (h - square.min(h)) / 2;

        RgbImage::from_fn(w, h, |x, y| {
            if x >= sx && x < sx + square && y >= sy && y < sy + square {
                Rgb([230, 230, 230])
            } else {
                Rgb([(x * 255 / w) as u8, (y * 255 / h) as u8, 64])
            }
        })
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<FrameRead> {
        if self.closed {
            return Err(LiveDetectError::read_error("synthetic source is closed"));
        }

        if let Some(limit) = self.frame_limit {
            if self.produced >= limit {
                debug!("Synthetic source reached its frame limit ({})", limit);
                return Ok(FrameRead::EndOfStream);
            }
        }

        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
        }
        self.next_due = Instant::now() + self.frame_interval;

        let index = self.produced;
        self.produced += 1;
        trace!("Generated synthetic frame {}", index);

        Ok(FrameRead::Frame(Frame::new(index, Utc::now(), self.render(index))))
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            debug!("Synthetic source closed after {} frames", self.produced);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }
}
