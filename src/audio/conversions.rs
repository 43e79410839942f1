//! Size/time conversions for 16-bit interleaved PCM

pub const BYTES_PER_SAMPLE: usize = 2;

/// Duration in microseconds of `bytes` of PCM.
pub fn bytes_to_us(bytes: usize, sample_rate: u32, channels: usize) -> i64 {
    let per_second = sample_rate as u64 * BYTES_PER_SAMPLE as u64 * channels as u64;
    if per_second == 0 {
        return 0;
    }
    (1_000_000u64 * bytes as u64 / per_second) as i64
}

/// Bytes of PCM needed to cover `us` microseconds, rounded up.
pub fn us_to_bytes(us: i64, sample_rate: u32, channels: usize) -> usize {
    let per_second = sample_rate as f64 * BYTES_PER_SAMPLE as f64 * channels as f64;
    (us as f64 * per_second / 1_000_000.0).ceil().max(0.0) as usize
}

/// Duration in microseconds of `samples` interleaved 16-bit values.
pub fn samples_to_us(samples: usize, sample_rate: u32, channels: usize) -> i64 {
    bytes_to_us(samples * BYTES_PER_SAMPLE, sample_rate, channels)
}

/// Signed number of interleaved 16-bit values covering `us`, aligned to whole frames.
pub fn us_to_samples(us: i64, sample_rate: u32, channels: usize) -> i64 {
    let bytes = us_to_bytes(us.abs(), sample_rate, channels) as i64;
    let frames = bytes / (BYTES_PER_SAMPLE * channels.max(1)) as i64;
    let samples = frames * channels as i64;
    if us < 0 {
        -samples
    } else {
        samples
    }
}

/// Reinterpret native-endian PCM bytes as samples. A trailing odd byte is ignored.
pub fn read_samples(bytes: &[u8], out: &mut Vec<i16>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_ne_bytes([b[0], b[1]])),
    );
}

/// Write samples into `bytes` as native-endian PCM, returning the bytes written.
pub fn write_samples(samples: &[i16], bytes: &mut [u8]) -> usize {
    let count = samples.len().min(bytes.len() / BYTES_PER_SAMPLE);
    for (dst, s) in bytes.chunks_exact_mut(BYTES_PER_SAMPLE).zip(&samples[..count]) {
        dst.copy_from_slice(&s.to_ne_bytes());
    }
    count * BYTES_PER_SAMPLE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_second_of_stereo() {
        assert_eq!(bytes_to_us(44100 * 2 * 2, 44100, 2), 1_000_000);
        assert_eq!(us_to_bytes(1_000_000, 44100, 2), 44100 * 2 * 2);
    }

    #[test]
    fn test_us_to_bytes_rounds_up() {
        // 1us of 44.1kHz mono is 0.0882 bytes
        assert_eq!(us_to_bytes(1, 44100, 1), 1);
        assert_eq!(us_to_bytes(0, 44100, 1), 0);
    }

    #[test]
    fn test_us_to_samples_keeps_frames_whole() {
        assert_eq!(us_to_samples(-10_000, 48000, 2), -960);
        assert_eq!(us_to_samples(10_000, 48000, 2) % 2, 0);
    }

    #[test]
    fn test_sample_bytes() {
        let mut samples = Vec::new();
        let mut bytes = [0u8; 6];
        assert_eq!(write_samples(&[1, -2, 300], &mut bytes), 6);
        read_samples(&bytes, &mut samples);
        assert_eq!(samples, vec![1, -2, 300]);
    }
}
