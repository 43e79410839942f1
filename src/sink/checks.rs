//! Output codec validation for compressed tracks

use crate::error::{Result, TranscodeError};
use crate::media::{MediaFormat, TrackType, MIME_AUDIO_AAC, MIME_VIDEO_AVC};

/// The container takes AVC video and AAC audio only. Pass-through tracks are
/// not checked here.
pub fn check_output_format(track: TrackType, format: &MediaFormat) -> Result<()> {
    let expected = match track {
        TrackType::Video => MIME_VIDEO_AVC,
        TrackType::Audio => MIME_AUDIO_AAC,
    };
    if format.mime != expected {
        return Err(TranscodeError::InvalidOutputFormat(format!(
            "{} output must be {}, got {}",
            track, expected, format.mime
        )));
    }
    Ok(())
}
