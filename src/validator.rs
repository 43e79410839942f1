//! Gate deciding whether a transcode is worth running
//!
//! The engine asks the validator after every track status is known. A `false`
//! answer ends the operation with a "not needed" success and no output.

use crate::media::TrackStatus;

pub trait Validator: Send + Sync {
    /// Return true to proceed with the transcode.
    fn validate(&self, video: TrackStatus, audio: TrackStatus) -> bool;
}

/// Proceeds when at least one track is compressed or removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValidator;

impl Validator for DefaultValidator {
    fn validate(&self, video: TrackStatus, audio: TrackStatus) -> bool {
        [video, audio]
            .iter()
            .any(|s| matches!(s, TrackStatus::Compressing | TrackStatus::Removing))
    }
}

/// Always proceeds, producing a remuxed file even when nothing changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteAlwaysValidator;

impl Validator for WriteAlwaysValidator {
    fn validate(&self, _video: TrackStatus, _audio: TrackStatus) -> bool {
        true
    }
}

/// Proceeds only when the video track changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteVideoValidator;

impl Validator for WriteVideoValidator {
    fn validate(&self, video: TrackStatus, _audio: TrackStatus) -> bool {
        match video {
            TrackStatus::Absent | TrackStatus::PassThrough => false,
            TrackStatus::Removing | TrackStatus::Compressing => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TrackStatus::*;

    #[test]
    fn test_default_validator() {
        let v = DefaultValidator;
        assert!(!v.validate(PassThrough, PassThrough));
        assert!(!v.validate(PassThrough, Absent));
        assert!(!v.validate(Absent, Absent));
        assert!(v.validate(Compressing, PassThrough));
        assert!(v.validate(PassThrough, Removing));
    }

    #[test]
    fn test_write_video_validator() {
        let v = WriteVideoValidator;
        assert!(!v.validate(Absent, Compressing));
        assert!(v.validate(Removing, PassThrough));
        assert!(v.validate(Compressing, Absent));
        assert!(!v.validate(PassThrough, Compressing));
    }

    #[test]
    fn test_write_always() {
        assert!(WriteAlwaysValidator.validate(PassThrough, PassThrough));
    }
}
