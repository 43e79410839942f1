//! Sample rate conversion by evenly spread frame drops and duplicates
//!
//! The output slice is always filled completely. Its length, not the rates,
//! decides how many frames are dropped or duplicated; the rates only pick the
//! direction and are checked against the slice lengths.

use super::spread_evenly;
use crate::error::{Result, TranscodeError};

/// Converts interleaved 16-bit PCM from one sample rate to another
pub trait AudioResampler: Send + Sync {
    fn resample(
        &self,
        input: &[i16],
        input_rate: u32,
        output: &mut [i16],
        output_rate: u32,
        channels: usize,
    ) -> Result<()>;
}

fn check_frames(input: &[i16], output: &[i16], channels: usize) -> Result<(usize, usize)> {
    if channels == 0 || input.len() % channels != 0 || output.len() % channels != 0 {
        return Err(TranscodeError::Contract(format!(
            "resample: buffers of {} and {} samples are not whole {}-channel frames",
            input.len(),
            output.len(),
            channels
        )));
    }
    Ok((input.len() / channels, output.len() / channels))
}

/// Drops frames to go from a higher to a lower rate
#[derive(Debug, Clone, Copy, Default)]
pub struct DownsampleAudioResampler;

impl AudioResampler for DownsampleAudioResampler {
    fn resample(
        &self,
        input: &[i16],
        input_rate: u32,
        output: &mut [i16],
        output_rate: u32,
        channels: usize,
    ) -> Result<()> {
        if input_rate < output_rate || output.len() > input.len() {
            return Err(TranscodeError::Contract(format!(
                "downsample from {}Hz/{} samples to {}Hz/{} samples",
                input_rate,
                input.len(),
                output_rate,
                output.len()
            )));
        }
        let (in_frames, out_frames) = check_frames(input, output, channels)?;
        let mut frames = input.chunks_exact(channels);
        let mut slots = output.chunks_exact_mut(channels);
        spread_evenly(out_frames, in_frames - out_frames, |drop| {
            if let Some(frame) = frames.next() {
                if !drop {
                    if let Some(slot) = slots.next() {
                        slot.copy_from_slice(frame);
                    }
                }
            }
        });
        Ok(())
    }
}

/// Duplicates frames to go from a lower to a higher rate
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsampleAudioResampler;

impl AudioResampler for UpsampleAudioResampler {
    fn resample(
        &self,
        input: &[i16],
        input_rate: u32,
        output: &mut [i16],
        output_rate: u32,
        channels: usize,
    ) -> Result<()> {
        if input_rate > output_rate || output.len() < input.len() {
            return Err(TranscodeError::Contract(format!(
                "upsample from {}Hz/{} samples to {}Hz/{} samples",
                input_rate,
                input.len(),
                output_rate,
                output.len()
            )));
        }
        let (in_frames, out_frames) = check_frames(input, output, channels)?;
        if in_frames == 0 {
            output.fill(0);
            return Ok(());
        }
        let mut written = 0;
        let mut consumed = 0;
        spread_evenly(in_frames, out_frames - in_frames, |duplicate| {
            let dst = written * channels;
            if duplicate && written > 0 {
                output.copy_within(dst - channels..dst, dst);
            } else {
                let src = consumed * channels;
                output[dst..dst + channels].copy_from_slice(&input[src..src + channels]);
                if !duplicate {
                    consumed += 1;
                }
            }
            written += 1;
        });
        Ok(())
    }
}

/// Copies when both rates match
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughAudioResampler;

impl AudioResampler for PassThroughAudioResampler {
    fn resample(
        &self,
        input: &[i16],
        input_rate: u32,
        output: &mut [i16],
        output_rate: u32,
        _channels: usize,
    ) -> Result<()> {
        if input_rate != output_rate || input.len() != output.len() {
            return Err(TranscodeError::Contract(format!(
                "pass-through resample from {}Hz/{} samples to {}Hz/{} samples",
                input_rate,
                input.len(),
                output_rate,
                output.len()
            )));
        }
        output.copy_from_slice(input);
        Ok(())
    }
}

/// Picks the down, up or pass-through resampler from the two rates
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAudioResampler;

impl AudioResampler for DefaultAudioResampler {
    fn resample(
        &self,
        input: &[i16],
        input_rate: u32,
        output: &mut [i16],
        output_rate: u32,
        channels: usize,
    ) -> Result<()> {
        match input_rate.cmp(&output_rate) {
            std::cmp::Ordering::Greater => {
                DownsampleAudioResampler.resample(input, input_rate, output, output_rate, channels)
            }
            std::cmp::Ordering::Less => {
                UpsampleAudioResampler.resample(input, input_rate, output, output_rate, channels)
            }
            std::cmp::Ordering::Equal => {
                PassThroughAudioResampler.resample(input, input_rate, output, output_rate, channels)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, channels: usize) -> Vec<i16> {
        (0..frames * channels).map(|i| (i / channels) as i16).collect()
    }

    #[test]
    fn test_downsample_fills_exactly() {
        let input = ramp(48, 2);
        let mut output = vec![-1i16; 44 * 2];
        DefaultAudioResampler
            .resample(&input, 48000, &mut output, 44000, 2)
            .unwrap();
        assert!(output.iter().all(|s| *s >= 0));
        // Frames stay in order and channels stay paired
        for pair in output.chunks_exact(2) {
            assert_eq!(pair[0], pair[1]);
        }
        assert!(output.chunks_exact(2).zip(output.chunks_exact(2).skip(1)).all(|(a, b)| a[0] < b[0]));
    }

    #[test]
    fn test_downsample_spreads_drops() {
        let input = ramp(10, 1);
        let mut output = vec![0i16; 5];
        DownsampleAudioResampler
            .resample(&input, 2, &mut output, 1, 1)
            .unwrap();
        assert_eq!(output, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_upsample_fills_exactly() {
        let input = ramp(5, 1);
        let mut output = vec![-1i16; 10];
        UpsampleAudioResampler
            .resample(&input, 1, &mut output, 2, 1)
            .unwrap();
        assert_eq!(output, vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn test_wrong_direction_fails() {
        let input = ramp(4, 1);
        let mut bigger = vec![0i16; 8];
        assert!(DownsampleAudioResampler
            .resample(&input, 48000, &mut bigger, 44100, 1)
            .is_err());
        let mut smaller = vec![0i16; 2];
        assert!(UpsampleAudioResampler
            .resample(&input, 44100, &mut smaller, 48000, 1)
            .is_err());
        assert!(PassThroughAudioResampler
            .resample(&input, 44100, &mut bigger, 48000, 1)
            .is_err());
    }

    #[test]
    fn test_partial_frames_rejected() {
        let input = ramp(3, 2);
        let mut output = vec![0i16; 5];
        assert!(DownsampleAudioResampler
            .resample(&input, 48000, &mut output, 44100, 2)
            .is_err());
    }
}
