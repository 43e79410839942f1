//! Transcoder configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Result, TranscodeError};
use crate::strategy::{
    DefaultAudioStrategy, DefaultVideoStrategy, PassThroughTrackStrategy, RemoveTrackStrategy,
    TrackStrategy, VideoSize,
};
use crate::time::{DefaultTimeInterpolator, SpeedTimeInterpolator, TimeInterpolator};
use crate::validator::{DefaultValidator, Validator, WriteAlwaysValidator, WriteVideoValidator};

/// Rotations accepted for the output, in degrees
pub const VALID_ROTATIONS: [i32; 4] = [0, 90, 180, 270];

/// What to do with a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackMode {
    /// Re-encode when the input does not already match
    #[default]
    Compress,
    PassThrough,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidatorKind {
    /// Proceed when any track is compressed or removed
    #[default]
    Default,
    WriteAlways,
    WriteVideo,
}

impl std::str::FromStr for ValidatorKind {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(ValidatorKind::Default),
            "write-always" => Ok(ValidatorKind::WriteAlways),
            "write-video" => Ok(ValidatorKind::WriteVideo),
            other => Err(TranscodeError::Config(format!("unknown validator: {}", other))),
        }
    }
}

/// Audio output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioConfig {
    pub mode: TrackMode,

    /// Output channel count (1 or 2); as input when unset
    pub channels: Option<u32>,

    /// Output sample rate; as input when unset
    pub sample_rate: Option<u32>,

    /// AAC bitrate in bps; derived from the input when unset
    pub bit_rate: Option<u64>,
}

/// Video output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub mode: TrackMode,

    /// Exact output width. Needs `height`; without both, the output fits
    /// within 1280x720.
    pub width: Option<u32>,

    pub height: Option<u32>,

    /// H.264 bitrate in bps; estimated from size and frame rate when unset
    pub bit_rate: Option<u64>,

    /// Maximum output frame rate
    pub frame_rate: u32,

    /// Seconds between key frames
    pub key_frame_interval: f32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            mode: TrackMode::Compress,
            width: None,
            height: None,
            bit_rate: None,
            frame_rate: 30,
            key_frame_interval: 3.0,
        }
    }
}

/// Transcoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Output file
    pub output: Option<PathBuf>,

    /// Input files; each track comes from the first input that has it
    pub inputs: Vec<PathBuf>,

    /// Maximum concurrent operations
    pub pool_size: usize,

    /// Extra clockwise rotation of the output
    pub rotation: i32,

    /// Playback speed factor
    pub speed: f64,

    /// Microseconds trimmed from the start of each input
    pub trim_start_us: i64,

    /// Microseconds trimmed from the end of each input
    pub trim_end_us: i64,

    pub validator: ValidatorKind,

    pub audio: AudioConfig,

    pub video: VideoConfig,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit logs as JSON
    pub log_json: bool,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            output: None,
            inputs: Vec::new(),
            pool_size: default_pool_size(),
            rotation: 0,
            speed: 1.0,
            trim_start_us: 0,
            trim_end_us: 0,
            validator: ValidatorKind::Default,
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// One worker per core, plus one
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        + 1
}

impl TranscoderConfig {
    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !VALID_ROTATIONS.contains(&self.rotation) {
            return Err(TranscodeError::Config(format!(
                "rotation must be one of 0, 90, 180, 270, got {}",
                self.rotation
            )));
        }
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(TranscodeError::Config(format!(
                "speed must be positive, got {}",
                self.speed
            )));
        }
        if self.trim_start_us < 0 || self.trim_end_us < 0 {
            return Err(TranscodeError::Config(format!(
                "trims must not be negative, got {} and {}",
                self.trim_start_us, self.trim_end_us
            )));
        }
        if self.pool_size == 0 {
            return Err(TranscodeError::Config("pool size must be at least 1".into()));
        }
        if let Some(channels) = self.audio.channels {
            if !(1..=2).contains(&channels) {
                return Err(TranscodeError::Config(format!(
                    "audio channels must be 1 or 2, got {}",
                    channels
                )));
            }
        }
        if self.video.width.is_some() != self.video.height.is_some() {
            return Err(TranscodeError::Config(
                "video width and height must be set together".into(),
            ));
        }
        Ok(())
    }

    pub fn audio_strategy(&self) -> Arc<dyn TrackStrategy> {
        match self.audio.mode {
            TrackMode::PassThrough => Arc::new(PassThroughTrackStrategy),
            TrackMode::Remove => Arc::new(RemoveTrackStrategy),
            TrackMode::Compress => {
                let mut strategy = DefaultAudioStrategy::new();
                if let Some(channels) = self.audio.channels {
                    strategy = strategy.channels(channels);
                }
                if let Some(rate) = self.audio.sample_rate {
                    strategy = strategy.sample_rate(rate);
                }
                if let Some(bit_rate) = self.audio.bit_rate {
                    strategy = strategy.bit_rate(bit_rate);
                }
                Arc::new(strategy)
            }
        }
    }

    pub fn video_strategy(&self) -> Arc<dyn TrackStrategy> {
        match self.video.mode {
            TrackMode::PassThrough => Arc::new(PassThroughTrackStrategy),
            TrackMode::Remove => Arc::new(RemoveTrackStrategy),
            TrackMode::Compress => {
                let size = match (self.video.width, self.video.height) {
                    (Some(first), Some(second)) => VideoSize::Exact { first, second },
                    _ => VideoSize::AtMost {
                        minor: 720,
                        major: 1280,
                    },
                };
                let mut strategy = DefaultVideoStrategy::new(size)
                    .frame_rate(self.video.frame_rate)
                    .key_frame_interval(self.video.key_frame_interval);
                if let Some(bit_rate) = self.video.bit_rate {
                    strategy = strategy.bit_rate(bit_rate);
                }
                Arc::new(strategy)
            }
        }
    }

    pub fn validator(&self) -> Arc<dyn Validator> {
        match self.validator {
            ValidatorKind::Default => Arc::new(DefaultValidator),
            ValidatorKind::WriteAlways => Arc::new(WriteAlwaysValidator),
            ValidatorKind::WriteVideo => Arc::new(WriteVideoValidator),
        }
    }

    pub fn time_interpolator(&self) -> Result<Box<dyn TimeInterpolator>> {
        if self.speed == 1.0 {
            return Ok(Box::new(DefaultTimeInterpolator));
        }
        Ok(Box::new(SpeedTimeInterpolator::new(self.speed)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaFormat, TrackStatus, MIME_VIDEO_AVC};

    #[test]
    fn test_default_config() {
        let config = TranscoderConfig::default();
        assert_eq!(config.rotation, 0);
        assert_eq!(config.speed, 1.0);
        assert!(config.pool_size >= 2);
        assert_eq!(config.validator, ValidatorKind::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_rotation() {
        let config = TranscoderConfig {
            rotation: 45,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TranscodeError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_values() {
        for config in [
            TranscoderConfig {
                speed: 0.0,
                ..Default::default()
            },
            TranscoderConfig {
                trim_start_us: -1,
                ..Default::default()
            },
            TranscoderConfig {
                pool_size: 0,
                ..Default::default()
            },
        ] {
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_validator_kind_from_str() {
        assert_eq!(
            "write-video".parse::<ValidatorKind>().unwrap(),
            ValidatorKind::WriteVideo
        );
        assert!("sometimes".parse::<ValidatorKind>().is_err());
    }

    #[test]
    fn test_strategies_follow_modes() {
        let mut config = TranscoderConfig::default();
        config.video.mode = TrackMode::Remove;
        let input = MediaFormat::video(MIME_VIDEO_AVC, 640, 480);
        assert_eq!(
            config
                .video_strategy()
                .create_output_format(&[input.clone()])
                .unwrap(),
            None
        );
        config.video.mode = TrackMode::PassThrough;
        assert_eq!(
            config.video_strategy().create_output_format(&[input.clone()]).unwrap(),
            Some(input)
        );
        config.validator = ValidatorKind::WriteAlways;
        assert!(config
            .validator()
            .validate(TrackStatus::PassThrough, TrackStatus::PassThrough));
    }
}
