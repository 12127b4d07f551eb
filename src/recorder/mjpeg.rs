use super::sink::{FrameSink, FrameSinkFactory};
use crate::error::{LiveDetectError, Result};
use crate::frame::encode_jpeg;
use image::RgbImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Motion-JPEG stream: concatenated baseline JPEGs, one per frame
pub struct MjpegSinkFactory {
    quality: u8,
}

impl MjpegSinkFactory {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl FrameSinkFactory for MjpegSinkFactory {
    fn open(&self, path: &Path, _width: u32, _height: u32, _fps: u32) -> Result<Box<dyn FrameSink>> {
        let file = File::create(path).map_err(|e| {
            LiveDetectError::recorder(format!("cannot create {}: {}", path.display(), e))
        })?;
        Ok(Box::new(MjpegSink {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            quality: self.quality,
        }))
    }

    fn extension(&self) -> &str {
        "mjpeg"
    }
}

struct MjpegSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    quality: u8,
}

impl FrameSink for MjpegSink {
    fn write_frame(&mut self, image: &RgbImage) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| LiveDetectError::recorder("MJPEG sink is finished"))?;
        let jpeg = encode_jpeg(image, self.quality)?;
        writer.write_all(&jpeg)?;
        trace!("Wrote {} byte frame to {}", jpeg.len(), self.path.display());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| {
                LiveDetectError::recorder(format!(
                    "failed to flush {}: {}",
                    self.path.display(),
                    e.error()
                ))
            })?;
            file.sync_all()?;
        }
        Ok(())
    }
}
