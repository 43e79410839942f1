//! Multi-track audio/video transcoding orchestrator
//!
//! Reads the video and audio tracks of one or more sources, decides per track
//! whether to compress, pass through or remove it, and drives decoder,
//! processing and encoder pipelines into a single container.

pub mod audio;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod config_file;
pub mod engine;
pub mod error;
pub mod media;
pub mod sink;
pub mod source;
pub mod strategy;
pub mod time;
pub mod transcode;
pub mod transcoder;
pub mod validator;
pub mod video;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(test)]
pub(crate) mod tests;

pub use config::TranscoderConfig;
pub use config_file::ConfigFile;
pub use error::{CodecError, Result, TranscodeError};
pub use media::{MediaFormat, TrackStatus, TrackType};
pub use transcoder::{
    TaskOutcome, TranscodeSuccess, TranscodeTask, Transcoder, TranscoderListener,
    TranscoderOptions,
};
