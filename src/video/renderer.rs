use crate::codec::{Codec, POLL_TIMEOUT_US};
use crate::error::{Result, TranscodeError};

/// Draws decoded frames into the encoder input.
///
/// Stands in for a GPU surface: implementations scale the frame to the
/// encoder size and stamp it with the output presentation time.
pub trait FrameRenderer: Send {
    /// Render `frame` into a free encoder input buffer. Returns `false` when
    /// the encoder had no free input, in which case the caller retries later.
    fn render(
        &mut self,
        frame: &[u8],
        presentation_time_us: i64,
        encoder: &mut dyn Codec,
    ) -> Result<bool>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Renderer for decoders whose output layout already matches the encoder input
#[derive(Debug, Default)]
pub struct CopyFrameRenderer;

impl FrameRenderer for CopyFrameRenderer {
    fn render(
        &mut self,
        frame: &[u8],
        presentation_time_us: i64,
        encoder: &mut dyn Codec,
    ) -> Result<bool> {
        let Some(index) = encoder.dequeue_input_buffer(POLL_TIMEOUT_US)? else {
            return Ok(false);
        };
        let input = encoder.input_buffer(index)?;
        if input.len() < frame.len() {
            return Err(TranscodeError::Contract(format!(
                "frame of {} bytes does not fit encoder input of {} bytes",
                frame.len(),
                input.len()
            )));
        }
        input[..frame.len()].copy_from_slice(frame);
        encoder.queue_input_buffer(
            index,
            frame.len(),
            presentation_time_us,
            crate::buffer::BufferFlags::NONE,
        )?;
        Ok(true)
    }
}
