//! mtranscode command line
//!
//! Transcodes the video and audio tracks of one or more media files into a
//! single MP4, using FFmpeg for demuxing, codecs and muxing.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mtranscode::config::ValidatorKind;
use mtranscode::config_file::generate_default_config;
use mtranscode::ffmpeg::{self, FfmpegCodecFactory, FfmpegContainerWriter, FfmpegDataSource};
use mtranscode::sink::SampleQueueingSink;
use mtranscode::source::TrimDataSource;
use mtranscode::{
    ConfigFile, Result, TaskOutcome, TranscodeError, TranscodeSuccess, Transcoder,
    TranscoderConfig, TranscoderListener, TranscoderOptions,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "mtranscode";

/// Config file read when `--config` is not given and the file exists
const DEFAULT_CONFIG_PATH: &str = "mtranscode.toml";

#[derive(Debug, Parser)]
#[command(name = APP_NAME, version = VERSION, about = "Transcode media files into a single MP4")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Extra clockwise rotation (0, 90, 180 or 270)
    #[arg(long)]
    rotation: Option<i32>,

    /// Playback speed factor
    #[arg(long)]
    speed: Option<f64>,

    /// Microseconds to cut from the start of every input
    #[arg(long)]
    trim_start: Option<i64>,

    /// Microseconds to cut from the end of every input
    #[arg(long)]
    trim_end: Option<i64>,

    /// default, write-always or write-video
    #[arg(long)]
    validator: Option<ValidatorKind>,

    /// Write a default configuration file to this path and exit
    #[arg(long)]
    generate_config: Option<PathBuf>,

    /// Log as JSON
    #[arg(long)]
    json: bool,

    /// Input files
    inputs: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(path) = &cli.generate_config {
        return match generate_default_config(path) {
            Ok(()) => {
                println!("Wrote default configuration to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to write {}: {}", path.display(), e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", APP_NAME, e);
            return ExitCode::from(2);
        }
    };
    init_logging(&config);
    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    match run(config) {
        Ok(TaskOutcome::Completed(TranscodeSuccess::Transcoded)) => ExitCode::SUCCESS,
        Ok(TaskOutcome::Completed(TranscodeSuccess::NotNeeded)) => {
            tracing::info!("input already matches the requested output, nothing written");
            ExitCode::SUCCESS
        }
        Ok(TaskOutcome::Cancelled) => ExitCode::from(130),
        Ok(TaskOutcome::Failed(e)) => {
            tracing::error!(error = %e, unrecoverable = e.is_unrecoverable(), "transcode failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "transcode could not start");
            ExitCode::FAILURE
        }
    }
}

/// Config file first, then command line overrides
fn load_config(cli: &Cli) -> Result<TranscoderConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)?.into_transcoder_config(),
        None if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => {
            ConfigFile::from_file(DEFAULT_CONFIG_PATH)?.into_transcoder_config()
        }
        None => TranscoderConfig::default(),
    };
    if !cli.inputs.is_empty() {
        config.inputs = cli.inputs.clone();
    }
    if let Some(output) = &cli.output {
        config.output = Some(output.clone());
    }
    if let Some(rotation) = cli.rotation {
        config.rotation = rotation;
    }
    if let Some(speed) = cli.speed {
        config.speed = speed;
    }
    if let Some(trim_start) = cli.trim_start {
        config.trim_start_us = trim_start;
    }
    if let Some(trim_end) = cli.trim_end {
        config.trim_end_us = trim_end;
    }
    if let Some(validator) = cli.validator {
        config.validator = validator;
    }
    if cli.json {
        config.log_json = true;
    }
    if config.inputs.is_empty() {
        return Err(TranscodeError::Config("no input files".into()));
    }
    if config.output.is_none() {
        return Err(TranscodeError::Config("no output file".into()));
    }
    config.validate()?;
    Ok(config)
}

fn run(config: TranscoderConfig) -> Result<TaskOutcome> {
    ffmpeg::init()?;
    tracing::info!("FFmpeg version: {}", ffmpeg::version_info());

    let output = config
        .output
        .clone()
        .ok_or_else(|| TranscodeError::Config("no output file".into()))?;

    let mut builder = TranscoderOptions::builder();
    for input in &config.inputs {
        let source = FfmpegDataSource::open(input)?;
        builder = builder.add_source(TrimDataSource::new(
            source,
            config.trim_start_us,
            config.trim_end_us,
        )?);
    }
    let writer = FfmpegContainerWriter::create(&output)?;
    let options = builder
        .sink(SampleQueueingSink::new(writer))
        .codecs(Arc::new(FfmpegCodecFactory::new()))
        .video_strategy(config.video_strategy())
        .audio_strategy(config.audio_strategy())
        .validator(config.validator())
        .time_interpolator(config.time_interpolator()?)
        .rotation(config.rotation)
        .listener(ProgressPrinter)
        .build()?;

    let transcoder = Transcoder::new(config.pool_size)?;
    let task = transcoder.transcode(options);
    tracing::info!(task = task.id(), output = ?output, "transcode started");
    Ok(task.wait())
}

/// Logs progress in whole percent steps
struct ProgressPrinter;

impl TranscoderListener for ProgressPrinter {
    fn on_progress(&self, progress: f64) {
        if progress < 0.0 {
            return;
        }
        let percent = (progress * 100.0).floor();
        tracing::debug!(percent, "progress");
        if percent % 10.0 == 0.0 {
            tracing::info!("progress {}%", percent);
        }
    }

    fn on_completed(&self, outcome: TranscodeSuccess) {
        tracing::info!(?outcome, "transcode completed");
    }

    fn on_canceled(&self) {
        tracing::warn!("transcode cancelled");
    }

    fn on_failed(&self, error: &TranscodeError) {
        tracing::error!(error = %error, "transcode failed");
    }
}

/// Initialize logging with tracing
fn init_logging(config: &TranscoderConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("mtranscode={}", config.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            APP_NAME,
            "--output",
            "out.mp4",
            "--rotation",
            "90",
            "--validator",
            "write-always",
            "in.mkv",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.inputs, vec![PathBuf::from("in.mkv")]);
        assert_eq!(config.rotation, 90);
        assert_eq!(config.validator, ValidatorKind::WriteAlways);
    }

    #[test]
    fn test_cli_rejects_missing_output() {
        let cli = Cli::parse_from([APP_NAME, "in.mkv"]);
        assert!(load_config(&cli).is_err());
    }
}
