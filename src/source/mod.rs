#[cfg(all(feature = "camera", target_os = "linux"))]
mod camera;
mod directory;
mod interface;
pub mod mock;
mod synthetic;
#[cfg(test)]
mod tests;

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use camera::{CameraSource, CameraSourceFactory};
pub use directory::{DirectorySource, DirectorySourceFactory};
pub use interface::{FrameRead, FrameSource, FrameSourceFactory};
pub use synthetic::{SyntheticSource, SyntheticSourceFactory};

use crate::config::{SourceConfig, SourceKind};
use crate::error::{LiveDetectError, Result};
use std::sync::Arc;

/// Build the source factory selected by configuration
pub fn from_config(config: &SourceConfig) -> Result<Arc<dyn FrameSourceFactory>> {
    match config.kind {
        SourceKind::Camera => camera_factory(config),
        SourceKind::Directory => {
            let directory = config.directory.clone().ok_or_else(|| {
                LiveDetectError::invalid_config("source.directory is required for a directory source")
            })?;
            Ok(Arc::new(DirectorySourceFactory::new(directory, config.fps)))
        }
        SourceKind::Synthetic => Ok(Arc::new(SyntheticSourceFactory::new(
            config.resolution,
            config.fps,
            config.frame_limit,
        ))),
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
fn camera_factory(config: &SourceConfig) -> Result<Arc<dyn FrameSourceFactory>> {
    Ok(Arc::new(CameraSourceFactory::new(config.clone())))
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
fn camera_factory(_config: &SourceConfig) -> Result<Arc<dyn FrameSourceFactory>> {
    Err(LiveDetectError::invalid_config(
        "camera sources need the `camera` feature on Linux; use source.kind = \"synthetic\" or \"directory\"",
    ))
}
