//! Input side: the data source capability and source wrappers
//!
//! A source demuxes one container. Tracks must be selected before they can be
//! read; `can_read` tells whether the next pending sample belongs to a track,
//! so interleaved tracks are read in container order.

pub mod set;
pub mod trim;

pub use set::SourceSet;
pub use trim::TrimDataSource;

use crate::buffer::Chunk;
use crate::error::Result;
use crate::media::{MediaFormat, TrackType};

pub trait DataSource: Send {
    /// Rotation in degrees stored in the container
    fn orientation(&self) -> i32;

    /// (latitude, longitude) stored in the container
    fn location(&self) -> Option<(f64, f64)>;

    /// Duration of the given track, or a non-positive value when unknown
    fn duration_us(&self, track: TrackType) -> i64;

    fn track_format(&self, track: TrackType) -> Option<MediaFormat>;

    fn select_track(&mut self, track: TrackType) -> Result<()>;

    /// True when the next sample belongs to `track`
    fn can_read(&self, track: TrackType) -> bool;

    /// Read the next sample of `track` into `buffer`
    fn read<'b>(&mut self, track: TrackType, buffer: &'b mut [u8]) -> Result<Chunk<'b>>;

    /// True when no selected track has samples left
    fn is_drained(&self) -> bool;

    /// Seek all selected tracks to the sync sample at or before
    /// `timestamp_us`, returning the position actually reached.
    fn seek(&mut self, timestamp_us: i64) -> Result<i64>;

    fn release_track(&mut self, track: TrackType);

    /// Go back to the start and deselect every track.
    fn rewind(&mut self) -> Result<()>;
}

impl<S: DataSource + ?Sized> DataSource for Box<S> {
    fn orientation(&self) -> i32 {
        (**self).orientation()
    }

    fn location(&self) -> Option<(f64, f64)> {
        (**self).location()
    }

    fn duration_us(&self, track: TrackType) -> i64 {
        (**self).duration_us(track)
    }

    fn track_format(&self, track: TrackType) -> Option<MediaFormat> {
        (**self).track_format(track)
    }

    fn select_track(&mut self, track: TrackType) -> Result<()> {
        (**self).select_track(track)
    }

    fn can_read(&self, track: TrackType) -> bool {
        (**self).can_read(track)
    }

    fn read<'b>(&mut self, track: TrackType, buffer: &'b mut [u8]) -> Result<Chunk<'b>> {
        (**self).read(track, buffer)
    }

    fn is_drained(&self) -> bool {
        (**self).is_drained()
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<i64> {
        (**self).seek(timestamp_us)
    }

    fn release_track(&mut self, track: TrackType) {
        (**self).release_track(track)
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }
}
