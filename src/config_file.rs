//! Configuration file support
//!
//! Loads transcoder configuration from TOML files. Every section but
//! `[transcode]` is optional and falls back to the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{
    default_pool_size, AudioConfig, TrackMode, TranscoderConfig, ValidatorKind, VideoConfig,
};
use crate::error::{Result, TranscodeError};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Operation settings
    pub transcode: TranscodeSettings,
    /// Audio output settings
    pub audio: Option<AudioSettings>,
    /// Video output settings
    pub video: Option<VideoSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
    /// Limits settings
    pub limits: Option<LimitsSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscodeSettings {
    /// Output file
    pub output: Option<PathBuf>,
    /// Input files
    pub inputs: Option<Vec<PathBuf>>,
    /// Extra rotation in degrees
    pub rotation: Option<i32>,
    /// Playback speed factor
    pub speed: Option<f64>,
    /// Trim from the start, in microseconds
    pub trim_start_us: Option<i64>,
    /// Trim from the end, in microseconds
    pub trim_end_us: Option<i64>,
    /// default, write-always or write-video
    pub validator: Option<ValidatorKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// compress, pass-through or remove
    pub mode: Option<TrackMode>,
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
    pub bit_rate: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    /// compress, pass-through or remove
    pub mode: Option<TrackMode>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bit_rate: Option<u64>,
    pub frame_rate: Option<u32>,
    pub key_frame_interval: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSettings {
    /// Maximum concurrent operations
    pub pool_size: Option<usize>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TranscodeError::Config(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let video = VideoConfig::default();
        Self {
            transcode: TranscodeSettings {
                output: Some(PathBuf::from("output.mp4")),
                inputs: Some(Vec::new()),
                rotation: Some(0),
                speed: Some(1.0),
                trim_start_us: Some(0),
                trim_end_us: Some(0),
                validator: Some(ValidatorKind::Default),
            },
            audio: Some(AudioSettings {
                mode: Some(TrackMode::Compress),
                channels: None,
                sample_rate: None,
                bit_rate: None,
            }),
            video: Some(VideoSettings {
                mode: Some(TrackMode::Compress),
                width: None,
                height: None,
                bit_rate: None,
                frame_rate: Some(video.frame_rate),
                key_frame_interval: Some(video.key_frame_interval),
            }),
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                format: Some("pretty".to_string()),
            }),
            limits: Some(LimitsSettings {
                pool_size: Some(default_pool_size()),
            }),
        }
    }

    /// Convert to TranscoderConfig
    pub fn into_transcoder_config(self) -> TranscoderConfig {
        let defaults = TranscoderConfig::default();
        let video_defaults = VideoConfig::default();
        let t = self.transcode;
        TranscoderConfig {
            output: t.output,
            inputs: t.inputs.unwrap_or_default(),
            pool_size: self
                .limits
                .and_then(|l| l.pool_size)
                .unwrap_or(defaults.pool_size),
            rotation: t.rotation.unwrap_or(0),
            speed: t.speed.unwrap_or(1.0),
            trim_start_us: t.trim_start_us.unwrap_or(0),
            trim_end_us: t.trim_end_us.unwrap_or(0),
            validator: t.validator.unwrap_or_default(),
            audio: self
                .audio
                .map(|a| AudioConfig {
                    mode: a.mode.unwrap_or_default(),
                    channels: a.channels,
                    sample_rate: a.sample_rate,
                    bit_rate: a.bit_rate,
                })
                .unwrap_or_default(),
            video: self
                .video
                .map(|v| VideoConfig {
                    mode: v.mode.unwrap_or_default(),
                    width: v.width,
                    height: v.height,
                    bit_rate: v.bit_rate,
                    frame_rate: v.frame_rate.unwrap_or(video_defaults.frame_rate),
                    key_frame_interval: v
                        .key_frame_interval
                        .unwrap_or(video_defaults.key_frame_interval),
                })
                .unwrap_or_default(),
            log_level: self
                .logging
                .as_ref()
                .map(|l| l.level.clone())
                .unwrap_or(defaults.log_level),
            log_json: self
                .logging
                .and_then(|l| l.format)
                .is_some_and(|f| f == "json"),
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    ConfigFile::default_config().to_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default_config();
        assert_eq!(config.transcode.rotation, Some(0));
        assert_eq!(config.video.as_ref().unwrap().frame_rate, Some(30));
        assert!(config.into_transcoder_config().validate().is_ok());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let config = ConfigFile::default_config();

        let mut temp_file = NamedTempFile::new().unwrap();
        let content = toml::to_string_pretty(&config).unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let loaded = ConfigFile::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.transcode.speed, config.transcode.speed);
        assert_eq!(loaded.transcode.validator, config.transcode.validator);
    }

    #[test]
    fn test_minimal_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(
            temp_file,
            r#"
[transcode]
inputs = ["a.mp4", "b.m4a"]
output = "out.mp4"
rotation = 90
validator = "write-video"

[audio]
mode = "remove"
"#
        )
        .unwrap();

        let config = ConfigFile::from_file(temp_file.path())
            .unwrap()
            .into_transcoder_config();
        assert_eq!(config.inputs.len(), 2);
        assert_eq!(config.rotation, 90);
        assert_eq!(config.validator, ValidatorKind::WriteVideo);
        assert_eq!(config.audio.mode, TrackMode::Remove);
        assert_eq!(config.video.frame_rate, 30);
        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
    }

    #[test]
    fn test_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "[transcode\nrotation = ").unwrap();
        assert!(matches!(
            ConfigFile::from_file(temp_file.path()),
            Err(TranscodeError::Toml(_))
        ));
    }

    #[test]
    fn test_generate_default_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        generate_default_config(&path).unwrap();

        assert!(path.exists());
        let loaded = ConfigFile::from_file(&path).unwrap();
        assert_eq!(loaded.transcode.speed, Some(1.0));
    }
}
