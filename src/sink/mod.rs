//! Output side
//!
//! - `DataSink`: what track transcoders write to
//! - `ContainerWriter`: the muxer capability behind a sink; it can only add
//!   tracks before `start` and only accept samples after it
//! - `SampleQueueingSink`: the default sink, queueing samples until every
//!   active track's format is known
//! - `checks`: output codec validation

pub mod checks;
pub mod queueing;

pub use queueing::{QueuedSample, SampleQueueingSink};

use crate::buffer::BufferFlags;
use crate::error::Result;
use crate::media::{MediaFormat, TrackStatus, TrackType};

pub trait DataSink: Send {
    fn set_orientation(&mut self, degrees: i32) -> Result<()>;

    fn set_location(&mut self, latitude: f64, longitude: f64) -> Result<()>;

    /// Must be called for both tracks before any format is registered.
    fn set_track_status(&mut self, track: TrackType, status: TrackStatus);

    /// Register the determined output format of a track. At most once per track.
    fn set_track_format(&mut self, track: TrackType, format: &MediaFormat) -> Result<()>;

    fn write_track(
        &mut self,
        track: TrackType,
        data: &[u8],
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self) -> Result<()>;
}

/// Container muxer
pub trait ContainerWriter: Send {
    fn set_orientation(&mut self, degrees: i32) -> Result<()>;

    fn set_location(&mut self, latitude: f64, longitude: f64) -> Result<()>;

    /// Add a track and return its index. Only valid before `start`.
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize>;

    fn start(&mut self) -> Result<()>;

    fn write_sample(
        &mut self,
        track_index: usize,
        data: &[u8],
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self) -> Result<()>;
}
