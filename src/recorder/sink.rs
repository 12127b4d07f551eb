use crate::error::Result;
use image::RgbImage;
use std::path::Path;

/// Write side of a video container
pub trait FrameSink: Send {
    fn write_frame(&mut self, image: &RgbImage) -> Result<()>;

    /// Flush and release the output; called once
    fn finish(&mut self) -> Result<()>;
}

/// Opens one sink per session once the frame size is known
pub trait FrameSinkFactory: Send + Sync {
    fn open(&self, path: &Path, width: u32, height: u32, fps: u32) -> Result<Box<dyn FrameSink>>;

    /// File extension of the produced videos, without the dot
    fn extension(&self) -> &str;
}
