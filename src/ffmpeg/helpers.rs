//! Safe wrappers around FFmpeg FFI calls.
//!
//! Every function in this module is safe to call. All `unsafe` blocks are
//! contained here with explicit safety arguments.

use ffmpeg_next as ffmpeg;
use std::rc::Rc;

use crate::error::{CodecError, Result};
use crate::media::{MediaFormat, TrackType};

// ── Codec-parameter field accessors ─────────────────────────────────────────

/// Read `sample_rate` from an `AVCodecParameters` struct.
pub fn codec_params_sample_rate(params: &ffmpeg::codec::Parameters) -> u32 {
    // SAFETY: `params.as_ptr()` is valid for the lifetime of `params`;
    // `sample_rate` is a plain integer field.
    unsafe { (*params.as_ptr()).sample_rate as u32 }
}

/// Read `ch_layout.nb_channels` from an `AVCodecParameters` struct.
pub fn codec_params_channels(params: &ffmpeg::codec::Parameters) -> u32 {
    // SAFETY: same as `codec_params_sample_rate`.
    unsafe { (*params.as_ptr()).ch_layout.nb_channels as u32 }
}

pub fn codec_params_width(params: &ffmpeg::codec::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).width as u32 }
}

pub fn codec_params_height(params: &ffmpeg::codec::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).height as u32 }
}

pub fn codec_params_bit_rate(params: &ffmpeg::codec::Parameters) -> u64 {
    unsafe { (*params.as_ptr()).bit_rate.max(0) as u64 }
}

/// Copy the codec private data (`extradata`) out of a parameters struct.
pub fn codec_params_extradata(params: &ffmpeg::codec::Parameters) -> Vec<u8> {
    // SAFETY: `extradata` points to `extradata_size` readable bytes when non-null.
    unsafe {
        let raw = params.as_ptr();
        if (*raw).extradata.is_null() || (*raw).extradata_size <= 0 {
            return Vec::new();
        }
        std::slice::from_raw_parts((*raw).extradata, (*raw).extradata_size as usize).to_vec()
    }
}

/// Zero out `codec_tag` on an output stream so the muxer picks the tag of
/// the target container. Call after `set_parameters`, before the header.
pub fn stream_reset_codec_tag(out_stream: &mut ffmpeg::format::stream::StreamMut) {
    // SAFETY: `codecpar` is set by `set_parameters` and is non-null.
    unsafe {
        (*(*out_stream.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

/// Copy an opened encoder context into a fresh `AVCodecParameters`.
pub fn encoder_codec_parameters(ctx: &ffmpeg::codec::Context) -> Result<ffmpeg::codec::Parameters> {
    // SAFETY: the allocation is checked for null; `ctx` is a live, opened
    // context, which is all `avcodec_parameters_from_context` needs.
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        if params.is_null() {
            return Err(CodecError::Configure("cannot allocate codec parameters".into()).into());
        }
        ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
        Ok(ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>))
    }
}

/// Build codec parameters from a `MediaFormat`, for decoders and for
/// pass-through output streams.
pub fn parameters_from_format(
    format: &MediaFormat,
    id: ffmpeg::codec::Id,
) -> Result<ffmpeg::codec::Parameters> {
    let track = format.track_type().ok_or_else(|| {
        CodecError::Unsupported(format!("{} is neither audio nor video", format.mime))
    })?;
    // SAFETY: the parameters are freshly allocated and exclusively owned
    // here. `extradata` is allocated with `av_mallocz` including the
    // required padding, so `avcodec_parameters_free` can release it.
    unsafe {
        let mut raw = ffmpeg::ffi::avcodec_parameters_alloc();
        if raw.is_null() {
            return Err(CodecError::Configure("cannot allocate codec parameters".into()).into());
        }
        (*raw).codec_id = id.into();
        match track {
            TrackType::Video => {
                (*raw).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
                (*raw).width = format.width.unwrap_or(0) as i32;
                (*raw).height = format.height.unwrap_or(0) as i32;
            }
            TrackType::Audio => {
                (*raw).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO;
                (*raw).sample_rate = format.sample_rate.unwrap_or(0) as i32;
                ffmpeg::ffi::av_channel_layout_default(
                    &mut (*raw).ch_layout,
                    format.channel_count.unwrap_or(2) as i32,
                );
            }
        }
        if let Some(bit_rate) = format.bit_rate {
            (*raw).bit_rate = bit_rate as i64;
        }
        if !format.codec_private.is_empty() {
            let size = format.codec_private.len();
            let padding = ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
            let data = ffmpeg::ffi::av_mallocz(size + padding) as *mut u8;
            if data.is_null() {
                ffmpeg::ffi::avcodec_parameters_free(&mut raw);
                return Err(CodecError::Configure("cannot allocate extradata".into()).into());
            }
            std::ptr::copy_nonoverlapping(format.codec_private.as_ptr(), data, size);
            (*raw).extradata = data;
            (*raw).extradata_size = size as i32;
        }
        Ok(ffmpeg::codec::Parameters::wrap(raw, None::<Rc<dyn std::any::Any>>))
    }
}

/// Copy the extradata an opened encoder produced (SPS/PPS or
/// AudioSpecificConfig when global headers were requested).
pub fn context_extradata(ctx: &ffmpeg::codec::Context) -> Vec<u8> {
    // SAFETY: `extradata` points to `extradata_size` readable bytes when non-null.
    unsafe {
        let raw = ctx.as_ptr();
        if (*raw).extradata.is_null() || (*raw).extradata_size <= 0 {
            return Vec::new();
        }
        std::slice::from_raw_parts((*raw).extradata, (*raw).extradata_size as usize).to_vec()
    }
}

/// Rotation stored in a stream's display matrix, in clockwise degrees.
pub fn stream_rotation(stream: &ffmpeg::format::stream::Stream) -> Option<i32> {
    // SAFETY: `coded_side_data` holds `nb_coded_side_data` entries owned by
    // the stream parameters; the display matrix entry is nine i32 values.
    unsafe {
        let params = (*stream.as_ptr()).codecpar;
        if params.is_null() {
            return None;
        }
        let side = ffmpeg::ffi::av_packet_side_data_get(
            (*params).coded_side_data,
            (*params).nb_coded_side_data,
            ffmpeg::ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if side.is_null() || (*side).size < 36 {
            return None;
        }
        let angle = ffmpeg::ffi::av_display_rotation_get((*side).data as *const i32);
        if angle.is_nan() {
            return None;
        }
        Some((-angle.round() as i32).rem_euclid(360))
    }
}

/// Store a clockwise rotation in an output stream's display matrix.
pub fn set_stream_rotation(out_stream: &mut ffmpeg::format::stream::StreamMut, degrees: i32) -> Result<()> {
    // SAFETY: `av_packet_side_data_new` allocates an entry owned by the
    // stream parameters and returns null on failure; the entry is 36 bytes,
    // the size of a display matrix.
    unsafe {
        let params = (*out_stream.as_mut_ptr()).codecpar;
        let side = ffmpeg::ffi::av_packet_side_data_new(
            &mut (*params).coded_side_data,
            &mut (*params).nb_coded_side_data,
            ffmpeg::ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
            36,
            0,
        );
        if side.is_null() {
            return Err(CodecError::Configure("cannot allocate display matrix".into()).into());
        }
        ffmpeg::ffi::av_display_rotation_set((*side).data as *mut i32, -(degrees as f64));
    }
    Ok(())
}

/// Parse an ISO 6709 location such as `+48.8577+002.2950/`.
pub fn parse_iso6709(value: &str) -> Option<(f64, f64)> {
    let value = value.trim_end_matches('/');
    if value.len() < 2 {
        return None;
    }
    let split = value[1..].find(['+', '-'])? + 1;
    let latitude = value[..split].parse().ok()?;
    // An altitude may follow the longitude
    let rest = &value[split..];
    let end = rest[1..].find(['+', '-']).map_or(rest.len(), |i| i + 1);
    let longitude = rest[..end].parse().ok()?;
    Some((latitude, longitude))
}

/// Format a location as ISO 6709.
pub fn format_iso6709(latitude: f64, longitude: f64) -> String {
    format!("{:+08.4}{:+09.4}/", latitude, longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso6709() {
        assert_eq!(parse_iso6709("+48.8577+002.2950/"), Some((48.8577, 2.295)));
        assert_eq!(parse_iso6709("-33.8688+151.2093/"), Some((-33.8688, 151.2093)));
        assert_eq!(parse_iso6709("+40.7-074.0/"), Some((40.7, -74.0)));
        assert_eq!(parse_iso6709("garbage"), None);
        assert_eq!(format_iso6709(48.8577, 2.295), "+48.8577+002.2950/");
    }

    #[test]
    fn test_parameters_from_format() {
        let mut format = MediaFormat::audio(crate::media::MIME_AUDIO_AAC, 44100, 2);
        format.codec_private = vec![0x12, 0x10];
        let params = parameters_from_format(&format, ffmpeg::codec::Id::AAC).unwrap();
        assert_eq!(codec_params_sample_rate(&params), 44100);
        assert_eq!(codec_params_channels(&params), 2);
        assert_eq!(codec_params_extradata(&params), vec![0x12, 0x10]);
    }
}
