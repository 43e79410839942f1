//! Channel count conversion between mono and stereo

use crate::error::{Result, TranscodeError};

const SIGNED_SHORT_LIMIT: i64 = 32768;
const UNSIGNED_SHORT_MAX: i64 = 65535;

/// Remixer selected from the decoder and encoder channel counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioRemixer {
    /// Stereo to mono
    Downmix,
    /// Mono to stereo
    Upmix,
    PassThrough,
}

impl AudioRemixer {
    /// Pick the remixer for `input_channels` -> `output_channels`. Only mono and
    /// stereo are supported on either side.
    pub fn for_channels(input_channels: usize, output_channels: usize) -> Result<Self> {
        for (side, channels) in [("input", input_channels), ("output", output_channels)] {
            if channels != 1 && channels != 2 {
                return Err(TranscodeError::Contract(format!(
                    "{} channel count {} not supported",
                    side, channels
                )));
            }
        }
        Ok(match input_channels.cmp(&output_channels) {
            std::cmp::Ordering::Greater => AudioRemixer::Downmix,
            std::cmp::Ordering::Less => AudioRemixer::Upmix,
            std::cmp::Ordering::Equal => AudioRemixer::PassThrough,
        })
    }

    /// Number of samples produced from `input_size` samples.
    pub fn remixed_size(&self, input_size: usize) -> usize {
        match self {
            AudioRemixer::Downmix => input_size / 2,
            AudioRemixer::Upmix => input_size * 2,
            AudioRemixer::PassThrough => input_size,
        }
    }

    /// Remix `input` into the front of `output`, returning the samples written.
    pub fn remix(&self, input: &[i16], output: &mut [i16]) -> usize {
        match self {
            AudioRemixer::Downmix => downmix(input, output),
            AudioRemixer::Upmix => upmix(input, output),
            AudioRemixer::PassThrough => {
                let n = input.len().min(output.len());
                output[..n].copy_from_slice(&input[..n]);
                n
            }
        }
    }
}

/// Loudness-preserving stereo to mono blend (Viktor Toth). Quiet pairs are
/// multiplied, loud pairs use the complementary formula, so the sum never clips.
fn downmix(input: &[i16], output: &mut [i16]) -> usize {
    let n = (input.len() / 2).min(output.len());
    for (dst, pair) in output[..n].iter_mut().zip(input.chunks_exact(2)) {
        let a = pair[0] as i64 + SIGNED_SHORT_LIMIT;
        let b = pair[1] as i64 + SIGNED_SHORT_LIMIT;
        let m = if a < SIGNED_SHORT_LIMIT || b < SIGNED_SHORT_LIMIT {
            a * b / SIGNED_SHORT_LIMIT
        } else {
            2 * (a + b) - (a * b) / SIGNED_SHORT_LIMIT - (UNSIGNED_SHORT_MAX + 1)
        };
        *dst = (m.clamp(0, UNSIGNED_SHORT_MAX) - SIGNED_SHORT_LIMIT) as i16;
    }
    n
}

fn upmix(input: &[i16], output: &mut [i16]) -> usize {
    let n = input.len().min(output.len() / 2);
    for (pair, s) in output.chunks_exact_mut(2).zip(&input[..n]) {
        pair[0] = *s;
        pair[1] = *s;
    }
    n * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_channels() {
        assert_eq!(AudioRemixer::for_channels(2, 1).unwrap(), AudioRemixer::Downmix);
        assert_eq!(AudioRemixer::for_channels(1, 2).unwrap(), AudioRemixer::Upmix);
        assert_eq!(AudioRemixer::for_channels(2, 2).unwrap(), AudioRemixer::PassThrough);
        assert!(AudioRemixer::for_channels(6, 2).is_err());
    }

    #[test]
    fn test_remixed_sizes() {
        let input = [100i16, -100, 2000, 4000, -32768, 32767];
        let mut up = vec![0i16; AudioRemixer::Upmix.remixed_size(input.len())];
        assert_eq!(up.len(), 12);
        assert_eq!(AudioRemixer::Upmix.remix(&input, &mut up), 12);

        let mut down = vec![0i16; AudioRemixer::Downmix.remixed_size(up.len())];
        assert_eq!(down.len(), 6);
        assert_eq!(AudioRemixer::Downmix.remix(&up, &mut down), 6);
    }

    #[test]
    fn test_upmix_duplicates() {
        let mut out = [0i16; 4];
        AudioRemixer::Upmix.remix(&[7, -3], &mut out);
        assert_eq!(out, [7, 7, -3, -3]);
    }

    #[test]
    fn test_downmix_is_lossy_and_bounded() {
        let input = [32767i16, 32767, -32768, -32768, 0, 0, 1000, 1000];
        let mut out = [0i16; 4];
        AudioRemixer::Downmix.remix(&input, &mut out);
        // Full scale stays full scale instead of wrapping
        assert_eq!(out[0], 32767);
        assert_eq!(out[1], -32768);
        assert_eq!(out[2], 0);
        // Two equal loud samples are louder than either one
        assert!(out[3] > 1000);
    }

    #[test]
    fn test_passthrough_copies() {
        let mut out = [0i16; 3];
        assert_eq!(AudioRemixer::PassThrough.remix(&[1, 2, 3], &mut out), 3);
        assert_eq!(out, [1, 2, 3]);
    }
}
