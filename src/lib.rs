pub mod annotate;
pub mod app;
pub mod config;
pub mod control;
pub mod detector;
pub mod error;
pub mod events;
pub mod frame;
pub mod keyboard_input;
pub mod recorder;
pub mod registry;
pub mod session;
pub mod source;

#[cfg(feature = "streaming")]
pub mod streaming;

pub use annotate::Annotator;
pub use app::{LiveDetectOrchestrator, ShutdownReason};
pub use config::LiveDetectConfig;
pub use control::{ControlCommand, ControlHandle, ControlReply, ControlService};
pub use detector::{Detector, DetectorSettings, SharedDetector};
pub use error::{LiveDetectError, Result};
pub use events::{EventBus, RegistryChange, SessionEvent};
pub use frame::{AnnotatedFrame, BoundingBox, Detection, Frame};
pub use registry::{RegistryEntry, SessionRegistry};
pub use session::{
    ManagerStatus, SessionId, SessionManager, SessionManagerBuilder, SessionSnapshot,
    SessionStatus, SessionSummary,
};
pub use source::{FrameRead, FrameSource, FrameSourceFactory};

#[cfg(feature = "streaming")]
pub use streaming::{StreamServer, StreamServerBuilder};
