use thiserror::Error;

/// Pipeline errors using thiserror for structured error handling.
///
/// Detection and poll failures never leave their component; upload failures
/// reach the user as a retry affordance. None of them is fatal.

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("No region met the acceptance filters")]
    NoRegionFound,

    #[error("Perspective correction failed: {0}")]
    CorrectionFailed(String),

    #[error("Rectangle detection request failed")]
    HandlerError(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("A detection pass is already in flight")]
    GateBusy,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload request failed: {0}")]
    NetworkError(String),

    #[error("Upload timed out after {0} ms")]
    Timeout(u64),

    #[error("Failed to decode upload response")]
    DecodeError(#[source] serde_json::Error),

    #[error("Failed to encode region image")]
    EncodeError(#[source] image::ImageError),
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("No game data received: {0}")]
    NoData(String),

    #[error("Failed to decode game response")]
    DecodeError(#[source] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from {path}")]
    LoadFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to save configuration to {path}")]
    SaveFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not determine the user config directory")]
    NoConfigDir,
}
