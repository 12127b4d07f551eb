use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiveDetectError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("Frame source unavailable: {details}")]
    SourceUnavailable { details: String },

    #[error("Frame read failed: {details}")]
    ReadError { details: String },

    #[error(
        "Frame dimensions changed mid-session: expected {}x{}, got {}x{}",
        .expected.0, .expected.1, .actual.0, .actual.1
    )]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Detector error: {details}")]
    Detector { details: String },

    #[error("Recorder error: {details}")]
    Recorder { details: String },

    #[error("A session is already active: {session_id}")]
    AlreadyRunning { session_id: String },

    #[error("No session is running")]
    NotRunning,

    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Session is currently recording: {session_id}")]
    InUse { session_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl LiveDetectError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn invalid_config<S: Into<String>>(details: S) -> Self {
        Self::InvalidConfig {
            details: details.into(),
        }
    }

    pub fn source_unavailable<S: Into<String>>(details: S) -> Self {
        Self::SourceUnavailable {
            details: details.into(),
        }
    }

    pub fn read_error<S: Into<String>>(details: S) -> Self {
        Self::ReadError {
            details: details.into(),
        }
    }

    pub fn detector<S: Into<String>>(details: S) -> Self {
        Self::Detector {
            details: details.into(),
        }
    }

    pub fn recorder<S: Into<String>>(details: S) -> Self {
        Self::Recorder {
            details: details.into(),
        }
    }

    /// Errors that end the session they occur in
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. }
                | Self::ReadError { .. }
                | Self::DimensionMismatch { .. }
                | Self::Detector { .. }
                | Self::Recorder { .. }
                | Self::Io(_)
        )
    }

    /// Command rejections leave manager and registry state untouched
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning { .. }
                | Self::NotRunning
                | Self::NotFound { .. }
                | Self::InUse { .. }
                | Self::InvalidConfig { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LiveDetectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(LiveDetectError::read_error("device unplugged").is_session_fatal());
        assert!(LiveDetectError::DimensionMismatch {
            expected: (640, 480),
            actual: (320, 240)
        }
        .is_session_fatal());
        assert!(!LiveDetectError::NotRunning.is_session_fatal());

        assert!(LiveDetectError::NotRunning.is_rejection());
        assert!(LiveDetectError::InUse {
            session_id: "detect_20240101_000000_000".to_string()
        }
        .is_rejection());
        assert!(!LiveDetectError::source_unavailable("busy").is_rejection());
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = LiveDetectError::DimensionMismatch {
            expected: (640, 480),
            actual: (1280, 720),
        };
        assert_eq!(
            err.to_string(),
            "Frame dimensions changed mid-session: expected 640x480, got 1280x720"
        );
    }
}
