//! Opaque codec capability
//!
//! A `Codec` models a buffer-queue codec engine: the caller dequeues an empty
//! input buffer by index, fills it and queues it back, then polls for filled
//! output buffers which it releases once consumed. Every call takes a timeout
//! and returns immediately when nothing is ready, so a pipeline step never
//! blocks on the codec.

use crate::buffer::{BufferFlags, BufferInfo};
use crate::error::Result;
use crate::media::MediaFormat;
use crate::video::FrameRenderer;

/// Timeout used for every codec poll made from a pipeline step
pub const POLL_TIMEOUT_US: i64 = 0;

/// Result of polling a codec for output
#[derive(Debug, Clone, PartialEq)]
pub enum CodecOutput {
    /// Nothing available yet
    TryAgainLater,
    /// The codec determined its actual output format
    FormatChanged(MediaFormat),
    /// The output buffer set was replaced; poll again
    BuffersChanged,
    /// A filled output buffer, to be released with `release_output_buffer`
    Buffer { index: usize, info: BufferInfo },
}

pub trait Codec: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    fn dequeue_input_buffer(&mut self, timeout_us: i64) -> Result<Option<usize>>;

    /// Writable view of a dequeued input buffer
    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]>;

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    fn dequeue_output_buffer(&mut self, timeout_us: i64) -> Result<CodecOutput>;

    /// Filled bytes of a dequeued output buffer
    fn output_buffer(&self, index: usize) -> Result<&[u8]>;

    /// Hand an output buffer back. `render` asks a video decoder to present
    /// the frame to its output surface.
    fn release_output_buffer(&mut self, index: usize, render: bool) -> Result<()>;

    /// End of input for codecs fed through a surface instead of input buffers
    fn signal_end_of_input_stream(&mut self) -> Result<()>;

    fn release(&mut self) -> Result<()>;
}

/// Result of one attempt to move processed data into the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderFeed {
    /// Nothing could be moved
    Idle,
    /// Data was queued to the encoder
    Fed,
    /// The end-of-stream marker reached the encoder
    EndOfStream,
}

/// Creates the codecs for a compressing track
pub trait CodecFactory: Send + Sync {
    /// Decoder for a track with the given source format
    fn create_decoder(&self, input: &MediaFormat) -> Result<Box<dyn Codec>>;

    /// Encoder producing the given output format
    fn create_encoder(&self, output: &MediaFormat) -> Result<Box<dyn Codec>>;

    /// Renderer drawing decoded frames of `input` into encoder input of `output`
    fn create_renderer(
        &self,
        input: &MediaFormat,
        output: &MediaFormat,
    ) -> Result<Box<dyn FrameRenderer>>;
}
