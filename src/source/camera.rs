use super::interface::{FrameRead, FrameSource, FrameSourceFactory};
use crate::config::SourceConfig;
use crate::error::{LiveDetectError, Result};
use crate::frame::Frame;
use chrono::Utc;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use image::RgbImage;
use tracing::{debug, info, trace, warn};

/// V4L2 camera opened through a GStreamer pipeline ending in an RGB appsink
pub struct CameraSourceFactory {
    config: SourceConfig,
}

impl CameraSourceFactory {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    /// Build GStreamer pipeline string for raw RGB capture
    fn build_pipeline_string(&self) -> String {
        let (width, height) = self.config.resolution;
        format!(
            "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true ! \
             videoconvert ! \
             video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             queue max-size-buffers=4 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=4 drop=true emit-signals=false",
            self.config.device_index, width, height, self.config.fps
        )
    }
}

impl FrameSourceFactory for CameraSourceFactory {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        gstreamer::init().map_err(|e| {
            LiveDetectError::source_unavailable(format!("Failed to initialize GStreamer: {}", e))
        })?;

        let pipeline_desc = self.build_pipeline_string();
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| {
                LiveDetectError::source_unavailable(format!("Failed to create pipeline: {}", e))
            })?
            .downcast::<Pipeline>()
            .map_err(|_| LiveDetectError::source_unavailable("Failed to downcast to Pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| LiveDetectError::source_unavailable("Failed to get appsink element"))?
            .downcast::<AppSink>()
            .map_err(|_| LiveDetectError::source_unavailable("Failed to downcast to AppSink"))?;

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(LiveDetectError::source_unavailable(format!(
                "Failed to start camera pipeline: {}",
                e
            )));
        }

        let (state_change, _, _) = pipeline.state(gstreamer::ClockTime::from_seconds(5));
        if let Err(e) = state_change {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(LiveDetectError::source_unavailable(format!(
                "Camera /dev/video{} did not start: {}",
                self.config.device_index, e
            )));
        }

        info!("Camera /dev/video{} streaming", self.config.device_index);

        Ok(Box::new(CameraSource {
            device_index: self.config.device_index,
            pipeline: Some(pipeline),
            appsink,
            read_timeout: gstreamer::ClockTime::from_mseconds(self.config.read_timeout_ms),
            produced: 0,
        }))
    }
}

pub struct CameraSource {
    device_index: u32,
    pipeline: Option<Pipeline>,
    appsink: AppSink,
    read_timeout: gstreamer::ClockTime,
    produced: u64,
}

impl CameraSource {
    /// Surface pipeline errors posted since the last read
    fn check_bus(&self, pipeline: &Pipeline) -> Result<()> {
        let Some(bus) = pipeline.bus() else {
            return Ok(());
        };
        if let Some(msg) = bus.pop_filtered(&[gstreamer::MessageType::Error]) {
            if let gstreamer::MessageView::Error(err) = msg.view() {
                return Err(LiveDetectError::read_error(format!(
                    "Camera pipeline error: {} ({})",
                    err.error(),
                    err.debug().unwrap_or_default()
                )));
            }
        }
        Ok(())
    }

    /// Copy a sample into a tightly packed RGB image
    fn sample_to_image(sample: &gstreamer::Sample) -> Result<RgbImage> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| LiveDetectError::read_error("No buffer in sample"))?;
        let caps = sample
            .caps()
            .ok_or_else(|| LiveDetectError::read_error("No caps in sample"))?;
        let info = VideoInfo::from_caps(caps)
            .map_err(|e| LiveDetectError::read_error(format!("Failed to get video info: {}", e)))?;

        let width = info.width();
        let height = info.height();
        let stride = info.stride()[0] as usize;
        let row_bytes = width as usize * 3;

        let map = buffer
            .map_readable()
            .map_err(|e| LiveDetectError::read_error(format!("Failed to map buffer: {}", e)))?;
        let data = map.as_slice();

        if data.len() < stride * (height as usize - 1) + row_bytes {
            return Err(LiveDetectError::read_error(format!(
                "Short RGB buffer: {} bytes for {}x{}",
                data.len(),
                width,
                height
            )));
        }

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(&data[start..start + row_bytes]);
        }

        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| LiveDetectError::read_error("RGB buffer size mismatch"))
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<FrameRead> {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Err(LiveDetectError::read_error("camera source is closed"));
        };

        self.check_bus(pipeline)?;

        match self.appsink.try_pull_sample(self.read_timeout) {
            Some(sample) => {
                let image = Self::sample_to_image(&sample)?;
                let index = self.produced;
                self.produced += 1;
                trace!(
                    "Captured frame {} ({}x{})",
                    index,
                    image.width(),
                    image.height()
                );
                Ok(FrameRead::Frame(Frame::new(index, Utc::now(), image)))
            }
            None if self.appsink.is_eos() => {
                info!("Camera /dev/video{} reached end of stream", self.device_index);
                Ok(FrameRead::EndOfStream)
            }
            None => {
                debug!("No camera frame within {}", self.read_timeout);
                Ok(FrameRead::Timeout)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.set_state(gstreamer::State::Null).map_err(|e| {
                LiveDetectError::component("camera", format!("Failed to stop pipeline: {}", e))
            })?;
            info!(
                "Camera /dev/video{} released after {} frames",
                self.device_index, self.produced
            );
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("camera /dev/video{}", self.device_index)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if self.pipeline.is_some() {
            warn!("Camera source dropped without close; releasing device");
            let _ = self.close();
        }
    }
}
