//! Per-track output format selection
//!
//! A strategy looks at the input format(s) of a track and answers with the
//! output format to encode, the input format itself (pass-through), or no
//! format (remove the track). It may also decline with
//! `StrategyError::AlreadyCompressed`, which the engine turns into
//! pass-through for that track only.

pub mod audio;
pub mod video;

pub use audio::DefaultAudioStrategy;
pub use video::{DefaultVideoStrategy, VideoSize};

use thiserror::Error;

use crate::media::MediaFormat;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("input already satisfies the output constraints")]
    AlreadyCompressed,

    #[error("{0}")]
    Unavailable(String),
}

pub type StrategyResult = std::result::Result<Option<MediaFormat>, StrategyError>;

pub trait TrackStrategy: Send + Sync {
    /// `inputs` holds the format of every source providing this track.
    fn create_output_format(&self, inputs: &[MediaFormat]) -> StrategyResult;
}

/// Keeps the track as it is. Several inputs are copied one after the other,
/// so they must share a codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughTrackStrategy;

impl TrackStrategy for PassThroughTrackStrategy {
    fn create_output_format(&self, inputs: &[MediaFormat]) -> StrategyResult {
        let first = inputs
            .first()
            .ok_or_else(|| StrategyError::Unavailable("pass-through without input".into()))?;
        if let Some(other) = inputs.iter().find(|f| f.mime != first.mime) {
            return Err(StrategyError::Unavailable(format!(
                "cannot pass through {} after {}",
                other.mime, first.mime
            )));
        }
        Ok(Some(first.clone()))
    }
}

/// Drops the track from the output
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveTrackStrategy;

impl TrackStrategy for RemoveTrackStrategy {
    fn create_output_format(&self, _inputs: &[MediaFormat]) -> StrategyResult {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MIME_VIDEO_AVC;

    #[test]
    fn test_pass_through_returns_input() {
        let input = MediaFormat::video(MIME_VIDEO_AVC, 640, 480);
        let out = PassThroughTrackStrategy
            .create_output_format(std::slice::from_ref(&input))
            .unwrap();
        assert_eq!(out, Some(input));
        assert!(PassThroughTrackStrategy.create_output_format(&[]).is_err());
    }

    #[test]
    fn test_pass_through_needs_one_codec() {
        let avc = MediaFormat::video(MIME_VIDEO_AVC, 640, 480);
        let smaller = MediaFormat::video(MIME_VIDEO_AVC, 320, 240);
        let out = PassThroughTrackStrategy
            .create_output_format(&[avc.clone(), smaller.clone()])
            .unwrap();
        assert_eq!(out, Some(avc));

        let hevc = MediaFormat::video("video/hevc", 640, 480);
        assert!(matches!(
            PassThroughTrackStrategy.create_output_format(&[smaller, hevc]),
            Err(StrategyError::Unavailable(_))
        ));
    }

    #[test]
    fn test_remove() {
        let input = MediaFormat::video(MIME_VIDEO_AVC, 640, 480);
        assert_eq!(RemoveTrackStrategy.create_output_format(&[input]).unwrap(), None);
    }
}
