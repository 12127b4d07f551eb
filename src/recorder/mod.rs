mod event_log;
#[cfg(all(feature = "video_encoding", target_os = "linux"))]
mod gst;
mod metadata;
mod mjpeg;
pub mod mock;
mod sink;
#[cfg(test)]
mod tests;
mod video;

pub use event_log::{format_log_line, EventLogger};
pub(crate) use event_log::resolve_timezone;
#[cfg(all(feature = "video_encoding", target_os = "linux"))]
pub use gst::GstMp4SinkFactory;
pub use metadata::SessionMetadata;
pub use mjpeg::MjpegSinkFactory;
pub use sink::{FrameSink, FrameSinkFactory};
pub use video::VideoRecorder;

use crate::config::{RecordingConfig, VideoFormat};
use crate::error::Result;
use std::sync::Arc;

/// Video sink selected by `recording.video_format`
pub fn sink_factory_from_config(config: &RecordingConfig) -> Result<Arc<dyn FrameSinkFactory>> {
    match config.video_format {
        VideoFormat::Mjpeg => Ok(Arc::new(MjpegSinkFactory::new(config.jpeg_quality))),
        #[cfg(all(feature = "video_encoding", target_os = "linux"))]
        VideoFormat::Mp4 => Ok(Arc::new(GstMp4SinkFactory::new()?)),
        #[cfg(not(all(feature = "video_encoding", target_os = "linux")))]
        VideoFormat::Mp4 => Err(crate::error::LiveDetectError::invalid_config(
            "recording.video_format = \"mp4\" requires the video_encoding feature on Linux",
        )),
    }
}
