//! Demuxing data source

use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use super::helpers::{
    codec_params_bit_rate, codec_params_channels, codec_params_extradata, codec_params_height,
    codec_params_sample_rate, codec_params_width, parse_iso6709, stream_rotation,
};
use super::{mime_for_codec, to_micros, MICROSECONDS};
use crate::buffer::Chunk;
use crate::error::{Result, TranscodeError};
use crate::media::{MediaFormat, TrackMap, TrackType};
use crate::source::DataSource;

/// A stream of the container mapped to a track slot
#[derive(Debug, Clone)]
struct TrackStream {
    index: usize,
    time_base: ffmpeg::Rational,
    format: MediaFormat,
    duration_us: i64,
}

/// A packet read ahead so `can_read` can tell which track comes next
struct Lookahead {
    track: TrackType,
    packet: ffmpeg::Packet,
}

/// Data source over any container FFmpeg can open. The best video stream and
/// the best audio stream become the two tracks.
pub struct FfmpegDataSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    tracks: TrackMap<Option<TrackStream>>,
    selected: TrackMap<bool>,
    orientation: i32,
    location: Option<(f64, f64)>,
    next: Option<Lookahead>,
    eof: bool,
}

impl FfmpegDataSource {
    /// Open a media file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let input = ffmpeg::format::input(&path)
            .map_err(|e| TranscodeError::Source(format!("failed to open {:?}: {}", path, e)))?;

        // Container duration is in AV_TIME_BASE units, which are microseconds
        let container_duration_us = if input.duration() > 0 {
            to_micros(input.duration(), MICROSECONDS)
        } else {
            -1
        };
        let mut tracks = TrackMap::default();
        let mut orientation = 0;
        for (track, medium) in [
            (TrackType::Video, ffmpeg::media::Type::Video),
            (TrackType::Audio, ffmpeg::media::Type::Audio),
        ] {
            let Some(stream) = input.streams().best(medium) else {
                continue;
            };
            if track == TrackType::Video {
                orientation = stream_rotation(&stream)
                    .or_else(|| stream.metadata().get("rotate").and_then(|r| r.parse().ok()))
                    .unwrap_or(0);
            }
            let time_base = stream.time_base();
            let duration_us = if stream.duration() > 0 {
                to_micros(stream.duration(), time_base)
            } else {
                container_duration_us
            };
            let format = stream_format(&stream, track, duration_us);
            tracing::debug!(%track, index = stream.index(), format = %format, "source stream");
            tracks.set(
                track,
                Some(TrackStream {
                    index: stream.index(),
                    time_base,
                    format,
                    duration_us,
                }),
            );
        }
        let location = input.metadata().get("location").and_then(parse_iso6709);

        tracing::info!(path = ?path, video = tracks.video.is_some(), audio = tracks.audio.is_some(), "opened source");
        Ok(Self {
            path: path.to_path_buf(),
            input,
            tracks,
            selected: TrackMap::default(),
            orientation,
            location,
            next: None,
            eof: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn track_of(&self, stream_index: usize) -> Option<TrackType> {
        TrackType::ALL.into_iter().find(|&track| {
            *self.selected.get(track)
                && self
                    .tracks
                    .get(track)
                    .as_ref()
                    .is_some_and(|t| t.index == stream_index)
        })
    }

    /// Read packets until one of a selected track is found.
    fn advance(&mut self) -> Result<()> {
        self.next = None;
        while !self.eof {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if let Some(track) = self.track_of(packet.stream()) {
                        self.next = Some(Lookahead { track, packet });
                        return Ok(());
                    }
                }
                Err(ffmpeg::Error::Eof) => self.eof = true,
                Err(e) => {
                    return Err(TranscodeError::Source(format!(
                        "read error in {:?}: {}",
                        self.path, e
                    )))
                }
            }
        }
        Ok(())
    }

    fn stream(&self, track: TrackType) -> Result<&TrackStream> {
        self.tracks
            .get(track)
            .as_ref()
            .ok_or_else(|| TranscodeError::Source(format!("no {} track in {:?}", track, self.path)))
    }
}

fn stream_format(stream: &ffmpeg::format::stream::Stream, track: TrackType, duration_us: i64) -> MediaFormat {
    let params = stream.parameters();
    let mime = mime_for_codec(params.id());
    let mut format = match track {
        TrackType::Video => {
            let mut format = MediaFormat::video(
                &mime,
                codec_params_width(&params),
                codec_params_height(&params),
            );
            let rate = stream.avg_frame_rate();
            if rate.numerator() > 0 && rate.denominator() > 0 {
                format.frame_rate = Some((f64::from(rate)).round() as u32);
            }
            format
        }
        TrackType::Audio => MediaFormat::audio(
            &mime,
            codec_params_sample_rate(&params),
            codec_params_channels(&params),
        ),
    };
    let bit_rate = codec_params_bit_rate(&params);
    if bit_rate > 0 {
        format.bit_rate = Some(bit_rate);
    }
    if duration_us > 0 {
        format.duration_us = Some(duration_us);
    }
    format.codec_private = codec_params_extradata(&params);
    format
}

impl DataSource for FfmpegDataSource {
    fn orientation(&self) -> i32 {
        self.orientation
    }

    fn location(&self) -> Option<(f64, f64)> {
        self.location
    }

    fn duration_us(&self, track: TrackType) -> i64 {
        self.tracks.get(track).as_ref().map_or(-1, |t| t.duration_us)
    }

    fn track_format(&self, track: TrackType) -> Option<MediaFormat> {
        self.tracks.get(track).as_ref().map(|t| t.format.clone())
    }

    fn select_track(&mut self, track: TrackType) -> Result<()> {
        self.stream(track)?;
        self.selected.set(track, true);
        if self.next.is_none() {
            self.advance()?;
        }
        Ok(())
    }

    fn can_read(&self, track: TrackType) -> bool {
        self.next.as_ref().is_some_and(|n| n.track == track)
    }

    fn read<'b>(&mut self, track: TrackType, buffer: &'b mut [u8]) -> Result<Chunk<'b>> {
        let Some(next) = self.next.take_if(|n| n.track == track) else {
            return Err(TranscodeError::Source(format!(
                "next sample does not belong to the {} track",
                track
            )));
        };
        let size = next.packet.size();
        if size > buffer.len() {
            self.next = Some(next);
            return Err(TranscodeError::Source(format!(
                "sample of {} bytes does not fit a buffer of {} bytes",
                size,
                buffer.len()
            )));
        }
        if let Some(data) = next.packet.data() {
            buffer[..size].copy_from_slice(data);
        }
        let time_base = self.stream(track)?.time_base;
        let pts = next.packet.pts().or(next.packet.dts()).unwrap_or(0);
        let key_frame = next.packet.is_key();
        self.advance()?;
        Ok(Chunk {
            data: &buffer[..size],
            timestamp_us: to_micros(pts, time_base),
            key_frame,
        })
    }

    fn is_drained(&self) -> bool {
        self.next.is_none() && self.eof
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<i64> {
        // Stream -1 seeks in AV_TIME_BASE units, which are microseconds
        self.input
            .seek(timestamp_us, ..timestamp_us)
            .map_err(|e| TranscodeError::Source(format!("seek to {}us failed: {}", timestamp_us, e)))?;
        self.eof = false;
        self.advance()?;
        let reached = match &self.next {
            Some(next) => {
                let time_base = self.stream(next.track)?.time_base;
                next.packet
                    .pts()
                    .map_or(timestamp_us, |pts| to_micros(pts, time_base))
            }
            None => timestamp_us,
        };
        tracing::debug!(requested_us = timestamp_us, reached_us = reached, "source seek");
        Ok(reached)
    }

    fn release_track(&mut self, track: TrackType) {
        self.selected.set(track, false);
        if self.next.as_ref().is_some_and(|n| n.track == track) {
            if let Err(e) = self.advance() {
                tracing::warn!(%track, error = %e, "read error after releasing track");
                self.eof = true;
            }
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.selected = TrackMap::default();
        self.next = None;
        self.input
            .seek(0, ..0)
            .map_err(|e| TranscodeError::Source(format!("rewind failed: {}", e)))?;
        self.eof = false;
        Ok(())
    }
}
