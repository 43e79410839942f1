//! Container writer backed by an FFmpeg muxer
//!
//! The container type follows the output file extension. Track formats
//! become stream parameters as they are, so encoded samples are muxed
//! without any further conversion.

use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use super::helpers::{format_iso6709, parameters_from_format, set_stream_rotation, stream_reset_codec_tag};
use super::{codec_for_mime, MICROSECONDS};
use crate::buffer::BufferFlags;
use crate::error::{Result, TranscodeError};
use crate::media::{MediaFormat, TrackType};
use crate::sink::ContainerWriter;

pub struct FfmpegContainerWriter {
    path: PathBuf,
    output: ffmpeg::format::context::Output,
    orientation: i32,
    location: Option<(f64, f64)>,
    /// Stream time bases chosen by the muxer, known after the header
    time_bases: Vec<ffmpeg::Rational>,
    started: bool,
    stopped: bool,
    samples: u64,
}

impl FfmpegContainerWriter {
    /// Create the output file. The container is guessed from the extension.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let output = ffmpeg::format::output(&path).map_err(|e| {
            TranscodeError::InvalidOutputFormat(format!("cannot create {:?}: {}", path, e))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            output,
            orientation: 0,
            location: None,
            time_bases: Vec::new(),
            started: false,
            stopped: false,
            samples: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn container_error(&self, what: &str, e: ffmpeg::Error) -> TranscodeError {
        TranscodeError::Container(format!("{} failed for {:?}: {}", what, self.path, e))
    }
}

impl ContainerWriter for FfmpegContainerWriter {
    fn set_orientation(&mut self, degrees: i32) -> Result<()> {
        if self.started {
            return Err(TranscodeError::Container("orientation set after start".into()));
        }
        self.orientation = degrees.rem_euclid(360);
        Ok(())
    }

    fn set_location(&mut self, latitude: f64, longitude: f64) -> Result<()> {
        if self.started {
            return Err(TranscodeError::Container("location set after start".into()));
        }
        self.location = Some((latitude, longitude));
        Ok(())
    }

    fn add_track(&mut self, format: &MediaFormat) -> Result<usize> {
        if self.started {
            return Err(TranscodeError::Container(format!(
                "cannot add a {} track after start",
                format.mime
            )));
        }
        let params = parameters_from_format(format, codec_for_mime(&format.mime)?)?;
        let mut stream = self
            .output
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|e| TranscodeError::Container(format!("add_stream failed: {}", e)))?;
        stream.set_parameters(params);
        stream_reset_codec_tag(&mut stream);
        stream.set_time_base(MICROSECONDS);
        if format.track_type() == Some(TrackType::Video) && self.orientation != 0 {
            set_stream_rotation(&mut stream, self.orientation)?;
        }
        let index = stream.index();
        tracing::debug!(index, format = %format, "output stream added");
        Ok(index)
    }

    fn start(&mut self) -> Result<()> {
        if let Some((latitude, longitude)) = self.location {
            let mut metadata = ffmpeg::Dictionary::new();
            metadata.set("location", &format_iso6709(latitude, longitude));
            self.output.set_metadata(metadata);
        }
        self.output
            .write_header()
            .map_err(|e| self.container_error("write_header", e))?;
        self.time_bases = self.output.streams().map(|s| s.time_base()).collect();
        self.started = true;
        tracing::info!(path = ?self.path, streams = self.time_bases.len(), "muxer started");
        Ok(())
    }

    fn write_sample(
        &mut self,
        track_index: usize,
        data: &[u8],
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        if !self.started {
            return Err(TranscodeError::Container("sample written before start".into()));
        }
        // The end marker carries no payload of its own
        if data.is_empty() {
            return Ok(());
        }
        let time_base = *self.time_bases.get(track_index).ok_or_else(|| {
            TranscodeError::Container(format!("unknown track index {}", track_index))
        })?;
        let mut packet = ffmpeg::Packet::copy(data);
        packet.set_pts(Some(timestamp_us));
        packet.set_stream(track_index);
        if flags.is_key_frame() {
            packet.set_flags(ffmpeg::packet::Flags::KEY);
        }
        packet.rescale_ts(MICROSECONDS, time_base);
        packet
            .write_interleaved(&mut self.output)
            .map_err(|e| self.container_error("write_interleaved", e))?;
        self.samples += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.started || self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.output
            .write_trailer()
            .map_err(|e| self.container_error("write_trailer", e))?;
        tracing::info!(path = ?self.path, samples = self.samples, "muxer stopped");
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.started && !self.stopped {
            tracing::warn!(path = ?self.path, "muxer released without trailer");
        }
        Ok(())
    }
}
