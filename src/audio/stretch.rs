//! Duration correction for retimed audio
//!
//! A stretcher turns `input` into exactly `output.len()` samples without
//! changing the sample rate or channel count.

use super::spread_evenly;
use crate::error::{Result, TranscodeError};

/// Peak amplitude of inserted noise. Silence would be audible as a click.
const NOISE_AMPLITUDE: i16 = 1000;

pub trait AudioStretcher: Send + Sync {
    fn stretch(&self, input: &[i16], output: &mut [i16], channels: usize) -> Result<()>;
}

/// Drops trailing samples
#[derive(Debug, Clone, Copy, Default)]
pub struct CutAudioStretcher;

impl AudioStretcher for CutAudioStretcher {
    fn stretch(&self, input: &[i16], output: &mut [i16], _channels: usize) -> Result<()> {
        if input.len() < output.len() {
            return Err(TranscodeError::Contract(format!(
                "cut stretch from {} to {} samples",
                input.len(),
                output.len()
            )));
        }
        output.copy_from_slice(&input[..output.len()]);
        Ok(())
    }
}

/// Inserts low-amplitude noise frames spread across the input
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertAudioStretcher;

impl AudioStretcher for InsertAudioStretcher {
    fn stretch(&self, input: &[i16], output: &mut [i16], channels: usize) -> Result<()> {
        if input.len() >= output.len() {
            return Err(TranscodeError::Contract(format!(
                "insert stretch from {} to {} samples",
                input.len(),
                output.len()
            )));
        }
        if channels != 1 && channels != 2 {
            return Err(TranscodeError::Contract(format!(
                "insert stretch with {} channels",
                channels
            )));
        }
        let input_frames = input.len() / channels;
        let noise_frames = (output.len() - input_frames * channels) / channels;
        let mut src = input.chunks_exact(channels);
        let mut dst = output.chunks_exact_mut(channels);
        spread_evenly(input_frames, noise_frames, |noise| {
            if let Some(slot) = dst.next() {
                match if noise { None } else { src.next() } {
                    Some(frame) => slot.copy_from_slice(frame),
                    None => slot.iter_mut().for_each(|s| *s = noise_sample()),
                }
            }
        });
        // Samples left over from a partial frame
        dst.into_remainder().iter_mut().for_each(|s| *s = noise_sample());
        Ok(())
    }
}

fn noise_sample() -> i16 {
    fastrand::i16(0..NOISE_AMPLITUDE)
}

/// Copies when sizes match, otherwise cuts or inserts
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAudioStretcher;

impl AudioStretcher for DefaultAudioStretcher {
    fn stretch(&self, input: &[i16], output: &mut [i16], channels: usize) -> Result<()> {
        match input.len().cmp(&output.len()) {
            std::cmp::Ordering::Less => InsertAudioStretcher.stretch(input, output, channels),
            std::cmp::Ordering::Greater => CutAudioStretcher.stretch(input, output, channels),
            std::cmp::Ordering::Equal => {
                output.copy_from_slice(input);
                Ok(())
            }
        }
    }
}

/// Copies the input, which must fit the output. Any remaining output is zeroed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughAudioStretcher;

impl AudioStretcher for PassThroughAudioStretcher {
    fn stretch(&self, input: &[i16], output: &mut [i16], _channels: usize) -> Result<()> {
        if input.len() > output.len() {
            return Err(TranscodeError::Contract(format!(
                "pass-through stretch from {} to {} samples",
                input.len(),
                output.len()
            )));
        }
        output[..input.len()].copy_from_slice(input);
        output[input.len()..].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cut_keeps_head() {
        let mut out = [0i16; 3];
        CutAudioStretcher.stretch(&[1, 2, 3, 4, 5], &mut out, 1).unwrap();
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_cut_rejects_growth() {
        let mut out = [0i16; 6];
        assert!(CutAudioStretcher.stretch(&[1, 2, 3], &mut out, 1).is_err());
    }

    #[test]
    fn test_insert_fills_exactly() {
        let input: Vec<i16> = (1..=8i32).map(|v| (v * 10_000 / 8 + 2000) as i16).collect();
        let mut out = vec![i16::MIN; 12];
        InsertAudioStretcher.stretch(&input, &mut out, 2).unwrap();
        assert!(out.iter().all(|s| *s != i16::MIN));
        // Every input sample survives, in order
        let kept: Vec<i16> = out.iter().copied().filter(|s| *s >= 2000).collect();
        assert_eq!(kept, input);
        // Noise is spread out, never the first frame
        assert!(out[0] >= 2000);
    }

    #[test]
    fn test_insert_rejects_bad_input() {
        let mut out = [0i16; 4];
        assert!(InsertAudioStretcher.stretch(&[1, 2, 3, 4], &mut out, 1).is_err());
        let mut wide = [0i16; 12];
        assert!(InsertAudioStretcher.stretch(&[1, 2, 3, 4, 5, 6], &mut wide, 3).is_err());
    }

    #[test]
    fn test_default_dispatch() {
        let mut same = [0i16; 2];
        DefaultAudioStretcher.stretch(&[4, 5], &mut same, 1).unwrap();
        assert_eq!(same, [4, 5]);
        let mut shorter = [0i16; 1];
        DefaultAudioStretcher.stretch(&[4, 5], &mut shorter, 1).unwrap();
        assert_eq!(shorter, [4]);
        let mut longer = [i16::MIN; 4];
        DefaultAudioStretcher.stretch(&[4000, 5000], &mut longer, 1).unwrap();
        assert!(longer.iter().all(|s| *s != i16::MIN));
    }

    #[test]
    fn test_passthrough_pads() {
        let mut out = [9i16; 4];
        PassThroughAudioStretcher.stretch(&[1, 2], &mut out, 1).unwrap();
        assert_eq!(out, [1, 2, 0, 0]);
        let mut small = [0i16; 1];
        assert!(PassThroughAudioStretcher.stretch(&[1, 2], &mut small, 1).is_err());
    }
}
