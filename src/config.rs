use crate::error::{LiveDetectError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LiveDetectConfig {
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub recording: RecordingConfig,
    pub annotation: AnnotationConfig,
    pub control: ControlConfig,
    pub stream: StreamConfig,
}

/// Which frame source backs a session
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Camera,
    Directory,
    Synthetic,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_device_index")]
    pub device_index: u32,

    /// Capture resolution (width, height)
    #[serde(default = "default_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second requested from the device
    #[serde(default = "default_source_fps")]
    pub fps: u32,

    /// Image directory replayed when kind = "directory"
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Stop the synthetic source after this many frames
    #[serde(default)]
    pub frame_limit: Option<u64>,

    /// How long a read may wait before the worker re-checks cancellation
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    Process,
    None,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_backend")]
    pub backend: DetectorBackend,

    /// Model server command line, spawned once and kept alive
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Class names indexed by class id, used when the model omits labels
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    Mjpeg,
    Mp4,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Recordings root holding the videos, logs and metadata directories
    #[serde(default = "default_recording_root")]
    pub root: PathBuf,

    #[serde(default = "default_videos_dir")]
    pub videos_dir: String,

    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,

    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: String,

    /// Frame rate written into the video container
    #[serde(default = "default_recording_fps")]
    pub fps: u32,

    #[serde(default = "default_video_format")]
    pub video_format: VideoFormat,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// IANA timezone used for event log timestamps
    #[serde(default = "default_timestamp_timezone")]
    pub timestamp_timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnnotationConfig {
    #[serde(default = "default_line_width")]
    pub line_width: u32,

    /// TrueType font for box labels
    #[serde(default = "default_font_path")]
    pub font_path: String,

    #[serde(default = "default_font_size")]
    pub font_size: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_command_queue")]
    pub command_queue: usize,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Program (plus leading args) that plays a recorded video
    #[serde(default)]
    pub player_command: Option<Vec<String>>,

    /// Program (plus leading args) that opens an event log
    #[serde(default)]
    pub log_viewer_command: Option<Vec<String>>,

    /// Enable the terminal keyboard control surface
    #[serde(default = "default_keyboard")]
    pub keyboard: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_stream_enabled")]
    pub enabled: bool,

    #[serde(default = "default_stream_ip")]
    pub ip: String,

    #[serde(default = "default_stream_port")]
    pub port: u16,

    /// Pace of the live MJPEG view
    #[serde(default = "default_stream_fps")]
    pub fps: u32,
}

impl LiveDetectConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self> {
        Self::load_from_file("livedetect.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("source.kind", "camera")?
            .set_default("source.device_index", default_device_index())?
            .set_default(
                "source.resolution",
                vec![default_resolution().0, default_resolution().1],
            )?
            .set_default("source.fps", default_source_fps())?
            .set_default("source.read_timeout_ms", default_read_timeout_ms())?
            .set_default("detector.backend", "none")?
            .set_default("detector.command", Vec::<String>::new())?
            .set_default(
                "detector.confidence_threshold",
                default_confidence_threshold() as f64,
            )?
            .set_default("detector.iou_threshold", default_iou_threshold() as f64)?
            .set_default("detector.labels", Vec::<String>::new())?
            .set_default(
                "recording.root",
                default_recording_root().to_string_lossy().to_string(),
            )?
            .set_default("recording.videos_dir", default_videos_dir())?
            .set_default("recording.logs_dir", default_logs_dir())?
            .set_default("recording.metadata_dir", default_metadata_dir())?
            .set_default("recording.fps", default_recording_fps())?
            .set_default("recording.video_format", "mjpeg")?
            .set_default("recording.jpeg_quality", default_jpeg_quality() as i64)?
            .set_default("recording.timestamp_timezone", default_timestamp_timezone())?
            .set_default("annotation.line_width", default_line_width())?
            .set_default("annotation.font_path", default_font_path())?
            .set_default("annotation.font_size", default_font_size() as f64)?
            .set_default("control.command_queue", default_command_queue() as i64)?
            .set_default(
                "control.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("control.keyboard", default_keyboard())?
            .set_default("stream.enabled", default_stream_enabled())?
            .set_default("stream.ip", default_stream_ip())?
            .set_default("stream.port", default_stream_port())?
            .set_default("stream.fps", default_stream_fps())?
            .add_source(File::with_name(&path_str).required(false))
            // Nested keys use a double underscore, e.g. LIVEDETECT_STREAM__PORT
            .add_source(
                Environment::with_prefix("LIVEDETECT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: LiveDetectConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.source.resolution.0 == 0 || self.source.resolution.1 == 0 {
            return Err(LiveDetectError::invalid_config(
                "Source resolution must be greater than 0",
            ));
        }

        if self.source.fps == 0 {
            return Err(LiveDetectError::invalid_config(
                "Source fps must be greater than 0",
            ));
        }

        if self.source.kind == SourceKind::Directory && self.source.directory.is_none() {
            return Err(LiveDetectError::invalid_config(
                "source.directory must be set when source.kind = \"directory\"",
            ));
        }

        check_threshold("detector.confidence_threshold", self.detector.confidence_threshold)?;
        check_threshold("detector.iou_threshold", self.detector.iou_threshold)?;

        if self.detector.backend == DetectorBackend::Process && self.detector.command.is_empty() {
            return Err(LiveDetectError::invalid_config(
                "detector.command must be set when detector.backend = \"process\"",
            ));
        }

        if self.recording.fps == 0 {
            return Err(LiveDetectError::invalid_config(
                "Recording fps must be greater than 0",
            ));
        }

        if self.recording.jpeg_quality == 0 || self.recording.jpeg_quality > 100 {
            return Err(LiveDetectError::invalid_config(
                "Recording jpeg_quality must be between 1 and 100",
            ));
        }

        let dirs = [
            &self.recording.videos_dir,
            &self.recording.logs_dir,
            &self.recording.metadata_dir,
        ];
        if dirs.iter().any(|d| d.is_empty()) {
            return Err(LiveDetectError::invalid_config(
                "Recording sub-directory names must not be empty",
            ));
        }
        if dirs[0] == dirs[1] || dirs[0] == dirs[2] || dirs[1] == dirs[2] {
            return Err(LiveDetectError::invalid_config(
                "Recording videos, logs and metadata directories must be distinct",
            ));
        }

        if self.annotation.line_width == 0 {
            return Err(LiveDetectError::invalid_config(
                "Annotation line_width must be greater than 0",
            ));
        }

        if self.control.command_queue == 0 || self.control.event_bus_capacity == 0 {
            return Err(LiveDetectError::invalid_config(
                "Control queue sizes must be greater than 0",
            ));
        }

        if self.stream.enabled && self.stream.fps == 0 {
            return Err(LiveDetectError::invalid_config(
                "Stream fps must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Thresholds are opaque tunables, only range-checked
pub(crate) fn check_threshold(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(LiveDetectError::invalid_config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

impl Default for LiveDetectConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                kind: default_source_kind(),
                device_index: default_device_index(),
                resolution: default_resolution(),
                fps: default_source_fps(),
                directory: None,
                frame_limit: None,
                read_timeout_ms: default_read_timeout_ms(),
            },
            detector: DetectorConfig {
                backend: default_detector_backend(),
                command: Vec::new(),
                confidence_threshold: default_confidence_threshold(),
                iou_threshold: default_iou_threshold(),
                labels: Vec::new(),
            },
            recording: RecordingConfig {
                root: default_recording_root(),
                videos_dir: default_videos_dir(),
                logs_dir: default_logs_dir(),
                metadata_dir: default_metadata_dir(),
                fps: default_recording_fps(),
                video_format: default_video_format(),
                jpeg_quality: default_jpeg_quality(),
                timestamp_timezone: default_timestamp_timezone(),
            },
            annotation: AnnotationConfig {
                line_width: default_line_width(),
                font_path: default_font_path(),
                font_size: default_font_size(),
            },
            control: ControlConfig {
                command_queue: default_command_queue(),
                event_bus_capacity: default_event_bus_capacity(),
                player_command: None,
                log_viewer_command: None,
                keyboard: default_keyboard(),
            },
            stream: StreamConfig {
                enabled: default_stream_enabled(),
                ip: default_stream_ip(),
                port: default_stream_port(),
                fps: default_stream_fps(),
            },
        }
    }
}

// Default value functions
fn default_source_kind() -> SourceKind {
    SourceKind::Camera
}
fn default_device_index() -> u32 {
    0
}
fn default_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_source_fps() -> u32 {
    20
}
fn default_read_timeout_ms() -> u64 {
    200
}

fn default_detector_backend() -> DetectorBackend {
    DetectorBackend::None
}
fn default_confidence_threshold() -> f32 {
    0.25
}
fn default_iou_threshold() -> f32 {
    0.45
}

fn default_recording_root() -> PathBuf {
    PathBuf::from("runs/detect_log")
}
fn default_videos_dir() -> String {
    "videos".to_string()
}
fn default_logs_dir() -> String {
    "logs".to_string()
}
fn default_metadata_dir() -> String {
    "metadata".to_string()
}
fn default_recording_fps() -> u32 {
    20
}
fn default_video_format() -> VideoFormat {
    VideoFormat::Mjpeg
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_timestamp_timezone() -> String {
    "UTC".to_string()
}

fn default_line_width() -> u32 {
    2
}
fn default_font_path() -> String {
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string()
}
fn default_font_size() -> f32 {
    16.0
}

fn default_command_queue() -> usize {
    32
}
fn default_event_bus_capacity() -> usize {
    64
}
fn default_keyboard() -> bool {
    true
}

fn default_stream_enabled() -> bool {
    true
}
fn default_stream_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_stream_port() -> u16 {
    8080
}
fn default_stream_fps() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LiveDetectConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.detector.confidence_threshold, 0.25);
        assert_eq!(config.detector.iou_threshold, 0.45);
        assert_eq!(config.recording.fps, 20);
        assert_eq!(config.recording.root, PathBuf::from("runs/detect_log"));
    }

    #[test]
    fn test_threshold_validation() {
        let mut config = LiveDetectConfig::default();

        config.detector.confidence_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(LiveDetectError::InvalidConfig { .. })
        ));

        config.detector.confidence_threshold = 0.5;
        config.detector.iou_threshold = -0.1;
        assert!(matches!(
            config.validate(),
            Err(LiveDetectError::InvalidConfig { .. })
        ));

        config.detector.iou_threshold = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LiveDetectConfig::default();

        config.source.resolution = (0, 0);
        assert!(config.validate().is_err());
        config.source.resolution = (640, 480);

        config.source.kind = SourceKind::Directory;
        assert!(config.validate().is_err());
        config.source.directory = Some(PathBuf::from("frames"));
        assert!(config.validate().is_ok());

        config.detector.backend = DetectorBackend::Process;
        assert!(config.validate().is_err());
        config.detector.command = vec!["python".to_string(), "serve.py".to_string()];
        assert!(config.validate().is_ok());

        config.recording.logs_dir = "videos".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livedetect.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[source]
kind = "synthetic"
frame_limit = 3

[detector]
confidence_threshold = 0.6

[recording]
root = "/tmp/recordings"
video_format = "mp4"
"#
        )
        .unwrap();

        let config = LiveDetectConfig::load_from_file(&path).unwrap();
        assert_eq!(config.source.kind, SourceKind::Synthetic);
        assert_eq!(config.source.frame_limit, Some(3));
        assert_eq!(config.detector.confidence_threshold, 0.6);
        assert_eq!(config.detector.iou_threshold, 0.45);
        assert_eq!(config.recording.root, PathBuf::from("/tmp/recordings"));
        assert_eq!(config.recording.video_format, VideoFormat::Mp4);
        assert_eq!(config.stream.port, 8080);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LiveDetectConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.source.kind, SourceKind::Camera);
        assert!(config.validate().is_ok());
    }
}
