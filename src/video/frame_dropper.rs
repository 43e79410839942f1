use crate::error::{Result, TranscodeError};

/// Decides per decoded frame whether it is rendered to the encoder.
///
/// Every frame adds `1 / input_fps` to a running sum. The first frame is
/// always rendered; later frames are rendered when the sum exceeds
/// `1 / output_fps`, which is then subtracted. Because the sum is never reset
/// the rendered rate converges to `output_fps` without drift.
#[derive(Debug, Clone)]
pub struct FrameDropper {
    input_spf: f64,
    output_spf: f64,
    sum: f64,
    frames: u64,
}

impl FrameDropper {
    pub fn new(input_fps: u32, output_fps: u32) -> Result<Self> {
        if input_fps == 0 || output_fps == 0 {
            return Err(TranscodeError::Config(format!(
                "invalid frame rates: input {} output {}",
                input_fps, output_fps
            )));
        }
        tracing::debug!(input_fps, output_fps, "frame dropper");
        Ok(Self {
            input_spf: 1.0 / input_fps as f64,
            output_spf: 1.0 / output_fps as f64,
            sum: 0.0,
            frames: 0,
        })
    }

    pub fn should_render(&mut self, presentation_time_us: i64) -> bool {
        self.sum += self.input_spf;
        let first = self.frames == 0;
        self.frames += 1;
        if first {
            tracing::trace!(presentation_time_us, "render first frame");
            true
        } else if self.sum > self.output_spf {
            self.sum -= self.output_spf;
            true
        } else {
            tracing::trace!(presentation_time_us, "drop frame");
            false
        }
    }
}
