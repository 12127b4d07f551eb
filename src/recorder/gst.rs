use super::sink::{FrameSink, FrameSinkFactory};
use crate::error::{LiveDetectError, Result};
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSrc;
use image::RgbImage;
use std::path::Path;
use tracing::{debug, info, warn};

/// H.264 in MP4 through GStreamer (`appsrc ! videoconvert ! x264enc ! mp4mux ! filesink`)
pub struct GstMp4SinkFactory;

impl GstMp4SinkFactory {
    pub fn new() -> Result<Self> {
        gstreamer::init().map_err(|e| {
            LiveDetectError::component("video_encoder", format!("Failed to initialize GStreamer: {}", e))
        })?;
        Ok(Self)
    }

    fn pipeline_description(path: &Path, width: u32, height: u32, fps: u32) -> String {
        format!(
            "appsrc name=src format=time is-live=false \
             caps=video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             videoconvert ! video/x-raw,format=I420 ! \
             x264enc speed-preset=veryfast tune=zerolatency key-int-max={} ! \
             video/x-h264,profile=high ! \
             h264parse ! \
             mp4mux faststart=true ! \
             filesink location={}",
            width,
            height,
            fps,
            fps * 2,
            path.to_string_lossy()
        )
    }
}

impl FrameSinkFactory for GstMp4SinkFactory {
    fn open(&self, path: &Path, width: u32, height: u32, fps: u32) -> Result<Box<dyn FrameSink>> {
        {
            // Encoding shares the machine with capture and inference
            use libc::{setpriority, PRIO_PROCESS};
            let _ = unsafe { setpriority(PRIO_PROCESS as u32, 0, 10) };
        }

        let description = Self::pipeline_description(path, width, height, fps);
        debug!("Video pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| {
                LiveDetectError::component("video_encoder", format!("Failed to create pipeline: {}", e))
            })?
            .downcast::<Pipeline>()
            .map_err(|_| LiveDetectError::component("video_encoder", "Failed to downcast to Pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| LiveDetectError::component("video_encoder", "Failed to get appsrc element"))?
            .downcast::<AppSrc>()
            .map_err(|_| LiveDetectError::component("video_encoder", "Failed to downcast to AppSrc"))?;

        pipeline.set_state(gstreamer::State::Playing).map_err(|e| {
            LiveDetectError::component("video_encoder", format!("Failed to start pipeline: {}", e))
        })?;

        info!("Started MP4 encoder for {}", path.display());

        Ok(Box::new(GstMp4Sink {
            pipeline: Some(pipeline),
            appsrc,
            frame_duration_ns: 1_000_000_000 / fps.max(1) as u64,
            frames: 0,
        }))
    }

    fn extension(&self) -> &str {
        "mp4"
    }
}

struct GstMp4Sink {
    pipeline: Option<Pipeline>,
    appsrc: AppSrc,
    frame_duration_ns: u64,
    frames: u64,
}

impl FrameSink for GstMp4Sink {
    fn write_frame(&mut self, image: &RgbImage) -> Result<()> {
        let mut buffer = gstreamer::Buffer::from_slice(image.as_raw().clone());
        {
            let buffer_ref = buffer.get_mut().ok_or_else(|| {
                LiveDetectError::component("video_encoder", "Buffer is not writable")
            })?;
            buffer_ref.set_pts(gstreamer::ClockTime::from_nseconds(
                self.frames * self.frame_duration_ns,
            ));
            buffer_ref.set_duration(gstreamer::ClockTime::from_nseconds(self.frame_duration_ns));
        }

        self.appsrc.push_buffer(buffer).map_err(|e| {
            LiveDetectError::component("video_encoder", format!("Failed to push buffer: {:?}", e))
        })?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(pipeline) = self.pipeline.take() else {
            return Ok(());
        };

        self.appsrc.end_of_stream().map_err(|e| {
            LiveDetectError::component("video_encoder", format!("Failed to signal EOS: {:?}", e))
        })?;

        let mut outcome = Ok(());
        if let Some(bus) = pipeline.bus() {
            for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(30)) {
                match msg.view() {
                    gstreamer::MessageView::Eos(..) => break,
                    gstreamer::MessageView::Error(err) => {
                        outcome = Err(LiveDetectError::component(
                            "video_encoder",
                            format!(
                                "Video encoding error: {} ({})",
                                err.error(),
                                err.debug().unwrap_or_default()
                            ),
                        ));
                        break;
                    }
                    _ => {}
                }
            }
        }

        pipeline.set_state(gstreamer::State::Null).map_err(|e| {
            LiveDetectError::component("video_encoder", format!("Failed to stop pipeline: {}", e))
        })?;

        if outcome.is_ok() {
            info!("MP4 encoding completed: {} frames", self.frames);
        }
        outcome
    }
}

impl Drop for GstMp4Sink {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            warn!("MP4 sink dropped before finish; output may be truncated");
            let _ = pipeline.set_state(gstreamer::State::Null);
        }
    }
}
