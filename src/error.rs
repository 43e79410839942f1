use thiserror::Error;

use crate::media::TrackType;

/// Main error type for transcoding operations
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("No output format available for {track} track: {reason}")]
    StrategyUnavailable { track: TrackType, reason: String },

    #[error("Invalid output format: {0}")]
    InvalidOutputFormat(String),

    #[error("Data source error: {0}")]
    Source(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("Unrecoverable teardown failure, native resources may have leaked: {0}")]
    Unrecoverable(String),
}

impl TranscodeError {
    /// Whether this error came out of teardown and left resources in an undefined state.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, TranscodeError::Unrecoverable(_))
    }
}

/// Codec-layer errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Codec not found: {0}")]
    NotFound(String),

    #[error("Failed to configure codec: {0}")]
    Configure(String),

    #[error("Failed to queue input buffer {index}: {reason}")]
    QueueInput { index: usize, reason: String },

    #[error("Failed to decode: {0}")]
    Decode(String),

    #[error("Failed to encode: {0}")]
    Encode(String),

    #[error("Invalid buffer index: {0}")]
    InvalidBuffer(usize),

    #[error("Output format changed twice")]
    FormatChangedTwice,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Release failed: {0}")]
    Release(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TranscodeError>;
