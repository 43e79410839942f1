//! Per-track transcoders
//!
//! - `NoOpTrackTranscoder`: absent or removed tracks, finished from the start
//! - `PassThroughTrackTranscoder`: copies chunks from source to sink
//! - `CodecTrackTranscoder`: decode, process, encode; the processing stage is
//!   `VideoProcessor` (frame dropping and rendering) or `AudioProcessor`
//!   (the PCM processing channel)
//!
//! The engine calls `step` on every active transcoder once per iteration. A
//! step never blocks: codec polls use a zero timeout and a step that finds
//! nothing to do returns `false`.

pub mod audio;
pub mod codec;
pub mod noop;
pub mod pass_through;
pub mod video;

pub use audio::AudioProcessor;
pub use codec::{CodecTrackTranscoder, PipelineState, Processor};
pub use noop::NoOpTrackTranscoder;
pub use pass_through::PassThroughTrackTranscoder;
pub use video::VideoProcessor;

use crate::error::Result;
use crate::media::TrackType;
use crate::sink::DataSink;
use crate::source::DataSource;
use crate::time::TimeInterpolator;

/// Collaborators a transcoder touches during one step
pub struct StepContext<'a> {
    pub source: &'a mut dyn DataSource,
    pub sink: &'a mut dyn DataSink,
    pub interpolator: &'a mut dyn TimeInterpolator,
}

pub trait TrackTranscoder: Send {
    fn track(&self) -> TrackType;

    /// Advance the pipeline. `force_eos` ends the input as if the source
    /// were drained. Returns true when any work was done.
    fn step(&mut self, ctx: &mut StepContext<'_>, force_eos: bool) -> Result<bool>;

    /// True once the terminal sample reached the sink. Never reverts.
    fn is_finished(&self) -> bool;

    /// Timestamp of the last chunk read from the source
    fn position_us(&self) -> i64;

    fn release(&mut self) -> Result<()>;
}
