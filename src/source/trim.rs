//! Source wrapper dropping media from the start and the end
//!
//! The start trim seeks to the sync sample at or before the requested start,
//! so a pass-through video track still begins with a key frame; timestamps are
//! shifted so that sync sample lands at zero. The end trim only shortens the
//! reported duration. The engine stops each track once it reads past the
//! total duration.

use super::DataSource;
use crate::buffer::Chunk;
use crate::error::{Result, TranscodeError};
use crate::media::{MediaFormat, TrackType};

pub struct TrimDataSource<S> {
    inner: S,
    requested_start_us: i64,
    /// Position reached by the start seek; equals the request until a seek happened
    start_us: i64,
    end_us: i64,
}

impl<S: DataSource> TrimDataSource<S> {
    pub fn new(inner: S, trim_start_us: i64, trim_end_us: i64) -> Result<Self> {
        if trim_start_us < 0 || trim_end_us < 0 {
            return Err(TranscodeError::Config(format!(
                "trim values cannot be negative: start {} end {}",
                trim_start_us, trim_end_us
            )));
        }
        let duration = TrackType::ALL
            .iter()
            .map(|t| inner.duration_us(*t))
            .max()
            .unwrap_or(0);
        if duration > 0 && trim_start_us + trim_end_us > duration {
            return Err(TranscodeError::Config(format!(
                "trim of {}us + {}us exceeds media duration {}us",
                trim_start_us, trim_end_us, duration
            )));
        }
        Ok(Self {
            inner,
            requested_start_us: trim_start_us,
            start_us: trim_start_us,
            end_us: trim_end_us,
        })
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: DataSource> DataSource for TrimDataSource<S> {
    fn orientation(&self) -> i32 {
        self.inner.orientation()
    }

    fn location(&self) -> Option<(f64, f64)> {
        self.inner.location()
    }

    fn duration_us(&self, track: TrackType) -> i64 {
        let duration = self.inner.duration_us(track);
        if duration <= 0 {
            return duration;
        }
        (duration - self.start_us - self.end_us).max(0)
    }

    fn track_format(&self, track: TrackType) -> Option<MediaFormat> {
        let mut format = self.inner.track_format(track)?;
        format.duration_us = Some(self.duration_us(track));
        Some(format)
    }

    fn select_track(&mut self, track: TrackType) -> Result<()> {
        self.inner.select_track(track)?;
        if self.requested_start_us > 0 {
            // Re-seek after every selection so all selected tracks start together
            self.start_us = self.inner.seek(self.requested_start_us)?;
            tracing::debug!(
                %track,
                requested = self.requested_start_us,
                actual = self.start_us,
                "trim seek"
            );
        }
        Ok(())
    }

    fn can_read(&self, track: TrackType) -> bool {
        self.inner.can_read(track)
    }

    fn read<'b>(&mut self, track: TrackType, buffer: &'b mut [u8]) -> Result<Chunk<'b>> {
        let chunk = self.inner.read(track, buffer)?;
        Ok(Chunk {
            timestamp_us: chunk.timestamp_us - self.start_us,
            ..chunk
        })
    }

    fn is_drained(&self) -> bool {
        self.inner.is_drained()
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<i64> {
        Ok(self.inner.seek(timestamp_us + self.start_us)? - self.start_us)
    }

    fn release_track(&mut self, track: TrackType) {
        self.inner.release_track(track)
    }

    fn rewind(&mut self) -> Result<()> {
        self.start_us = self.requested_start_us;
        self.inner.rewind()
    }
}
