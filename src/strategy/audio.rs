use super::{StrategyError, StrategyResult, TrackStrategy};
use crate::media::{MediaFormat, AAC_PROFILE_LC, MIME_AUDIO_AAC};

/// Re-encodes audio to AAC-LC. Channel count and sample rate follow the input
/// unless set; the output is always compressed.
#[derive(Debug, Clone, Default)]
pub struct DefaultAudioStrategy {
    channels: Option<u32>,
    sample_rate: Option<u32>,
    bit_rate: Option<u64>,
}

impl DefaultAudioStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(mut self, channels: u32) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }
}

/// Recommended AAC bitrate for a channel count
pub fn recommended_bit_rate(channels: u32) -> u64 {
    match channels {
        1 => 64_000,
        2 => 128_000,
        6 => 384_000,
        8 => 512_000,
        _ => 128_000,
    }
}

impl TrackStrategy for DefaultAudioStrategy {
    fn create_output_format(&self, inputs: &[MediaFormat]) -> StrategyResult {
        // Most channels and lowest rate across inputs, so nothing is upsampled
        let input_channels = inputs.iter().filter_map(|f| f.channel_count).max();
        let input_rate = inputs.iter().filter_map(|f| f.sample_rate).min();

        let channels = self.channels.or(input_channels).ok_or_else(|| {
            StrategyError::Unavailable("audio input has no channel count".into())
        })?;
        let sample_rate = self.sample_rate.or(input_rate).ok_or_else(|| {
            StrategyError::Unavailable("audio input has no sample rate".into())
        })?;

        let unchanged = self.channels.is_none() && self.sample_rate.is_none();
        let bit_rate = match (self.bit_rate, inputs) {
            (Some(bit_rate), _) => bit_rate,
            (None, [single]) if unchanged && single.bit_rate.is_some() => {
                single.bit_rate.unwrap_or_default()
            }
            (None, _) => recommended_bit_rate(channels),
        };

        let mut format = MediaFormat::audio(MIME_AUDIO_AAC, sample_rate, channels);
        format.bit_rate = Some(bit_rate);
        format.aac_profile = Some(AAC_PROFILE_LC);
        tracing::debug!(format = %format, "audio strategy");
        Ok(Some(format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_input() {
        let mut input = MediaFormat::audio("audio/mpeg", 48000, 2);
        input.bit_rate = Some(192_000);
        let out = DefaultAudioStrategy::new()
            .create_output_format(&[input])
            .unwrap()
            .unwrap();
        assert!(out.is_aac());
        assert_eq!(out.sample_rate, Some(48000));
        assert_eq!(out.channel_count, Some(2));
        assert_eq!(out.bit_rate, Some(192_000));
        assert_eq!(out.aac_profile, Some(AAC_PROFILE_LC));
    }

    #[test]
    fn test_fixed_values_estimate_bitrate() {
        let input = MediaFormat::audio("audio/mpeg", 48000, 2);
        let out = DefaultAudioStrategy::new()
            .channels(1)
            .sample_rate(44100)
            .create_output_format(&[input])
            .unwrap()
            .unwrap();
        assert_eq!(out.channel_count, Some(1));
        assert_eq!(out.sample_rate, Some(44100));
        assert_eq!(out.bit_rate, Some(64_000));
    }

    #[test]
    fn test_multiple_inputs() {
        let inputs = [
            MediaFormat::audio("audio/mpeg", 48000, 1),
            MediaFormat::audio("audio/mpeg", 44100, 2),
        ];
        let out = DefaultAudioStrategy::new()
            .create_output_format(&inputs)
            .unwrap()
            .unwrap();
        assert_eq!(out.channel_count, Some(2));
        assert_eq!(out.sample_rate, Some(44100));
    }

    #[test]
    fn test_unavailable_without_rate() {
        let input = MediaFormat {
            mime: "audio/mpeg".into(),
            channel_count: Some(2),
            ..Default::default()
        };
        assert!(matches!(
            DefaultAudioStrategy::new().create_output_format(&[input]),
            Err(StrategyError::Unavailable(_))
        ));
    }
}
