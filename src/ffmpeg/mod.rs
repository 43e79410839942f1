//! FFmpeg-backed collaborators
//!
//! This module provides:
//! - `FfmpegDataSource`: a demuxer over any container FFmpeg can open
//! - `FfmpegContainerWriter`: an MP4 muxer
//! - `FfmpegCodecFactory`: decoders, AAC and H.264 encoders and a scaling renderer
//!
//! Timestamps cross this boundary in microseconds; every stream time base
//! is converted here.

pub mod codec;
pub mod helpers;
pub mod source;
pub mod writer;

pub use codec::{FfmpegCodec, FfmpegCodecFactory, ScalingFrameRenderer};
pub use ffmpeg_next as ffmpeg;
pub use source::FfmpegDataSource;
pub use writer::FfmpegContainerWriter;

use ffmpeg::Rescale;

use crate::error::{CodecError, Result};
use crate::media::{MIME_AUDIO_AAC, MIME_VIDEO_AVC};

/// Time base of every timestamp exchanged with the engine
pub const MICROSECONDS: ffmpeg::Rational = ffmpeg::Rational(1, 1_000_000);

/// Initialize the FFmpeg library.
///
/// Must be called once before any source, writer or codec is created.
pub fn init() -> Result<()> {
    ffmpeg::init()
        .map_err(|e| CodecError::Configure(format!("ffmpeg::init() failed: {}", e)))?;
    // SAFETY: global log level, set once at startup before workers run.
    unsafe {
        ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_WARNING as i32);
    }
    tracing::info!("FFmpeg initialized");
    Ok(())
}

/// Get the version information of the linked FFmpeg libraries.
pub fn version_info() -> String {
    let version = ffmpeg::util::version();
    format!(
        "libavutil {}.{}.{}",
        version >> 16,
        (version >> 8) & 0xff,
        version & 0xff
    )
}

/// Mime type for a codec id
pub fn mime_for_codec(id: ffmpeg::codec::Id) -> String {
    use ffmpeg::codec::Id;
    match id {
        Id::H264 => MIME_VIDEO_AVC.to_string(),
        Id::HEVC => "video/hevc".to_string(),
        Id::VP8 => "video/x-vnd.on2.vp8".to_string(),
        Id::VP9 => "video/x-vnd.on2.vp9".to_string(),
        Id::AV1 => "video/av01".to_string(),
        Id::MPEG4 => "video/mp4v-es".to_string(),
        Id::AAC => MIME_AUDIO_AAC.to_string(),
        Id::MP3 => "audio/mpeg".to_string(),
        Id::OPUS => "audio/opus".to_string(),
        Id::VORBIS => "audio/vorbis".to_string(),
        Id::FLAC => "audio/flac".to_string(),
        Id::AC3 => "audio/ac3".to_string(),
        Id::EAC3 => "audio/eac3".to_string(),
        other => {
            let kind = match other.medium() {
                ffmpeg::media::Type::Video => "video",
                ffmpeg::media::Type::Audio => "audio",
                _ => "application",
            };
            format!("{}/x-ffmpeg-{:?}", kind, other).to_lowercase()
        }
    }
}

/// Codec id for a mime type produced by `mime_for_codec`
pub fn codec_for_mime(mime: &str) -> Result<ffmpeg::codec::Id> {
    use ffmpeg::codec::Id;
    let id = match mime {
        MIME_VIDEO_AVC => Id::H264,
        "video/hevc" => Id::HEVC,
        "video/x-vnd.on2.vp8" => Id::VP8,
        "video/x-vnd.on2.vp9" => Id::VP9,
        "video/av01" => Id::AV1,
        "video/mp4v-es" => Id::MPEG4,
        MIME_AUDIO_AAC => Id::AAC,
        "audio/mpeg" => Id::MP3,
        "audio/opus" => Id::OPUS,
        "audio/vorbis" => Id::VORBIS,
        "audio/flac" => Id::FLAC,
        "audio/ac3" => Id::AC3,
        "audio/eac3" => Id::EAC3,
        other => return Err(CodecError::Unsupported(format!("no codec for {}", other)).into()),
    };
    Ok(id)
}

/// Convert a timestamp from `time_base` to microseconds.
pub fn to_micros(ts: i64, time_base: ffmpeg::Rational) -> i64 {
    ts.rescale(time_base, MICROSECONDS)
}

/// Convert a timestamp from microseconds to `time_base`.
pub fn from_micros(ts_us: i64, time_base: ffmpeg::Rational) -> i64 {
    ts_us.rescale(MICROSECONDS, time_base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_roundtrip() {
        for id in [ffmpeg::codec::Id::H264, ffmpeg::codec::Id::AAC, ffmpeg::codec::Id::OPUS] {
            assert_eq!(codec_for_mime(&mime_for_codec(id)).unwrap(), id);
        }
        assert!(codec_for_mime("video/raw").is_err());
    }

    #[test]
    fn test_time_conversion() {
        let tb = ffmpeg::Rational(1, 90_000);
        assert_eq!(to_micros(90_000, tb), 1_000_000);
        assert_eq!(from_micros(500_000, tb), 45_000);
    }
}
