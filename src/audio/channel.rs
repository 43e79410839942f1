//! Decoder-to-encoder PCM adapter
//!
//! Decoder output buffers are queued by index, without copying, in a slab of
//! `AudioBuffer` slots. `feed_encoder` takes the oldest filled slot, runs it
//! through stretch, remix and resample, and writes the result into one encoder
//! input buffer. What does not fit is kept in the overflow buffer and written
//! by the next `feed_encoder` call before any new decoder buffer is touched.

use std::collections::VecDeque;
use std::sync::Arc;

use super::conversions::{read_samples, samples_to_us, us_to_samples, write_samples};
use super::{AudioRemixer, AudioResampler, AudioStretcher};
use crate::buffer::BufferFlags;
use crate::codec::{Codec, EncoderFeed};
use crate::error::{Result, TranscodeError};
use crate::media::{MediaFormat, TrackType};
use crate::time::TimeInterpolator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Empty,
    Filled,
}

/// One decoder output buffer waiting to be processed
#[derive(Debug, Clone, Copy)]
struct AudioBuffer {
    state: SlotState,
    /// Decoder output buffer index; `None` once handed back
    decoder_index: Option<usize>,
    presentation_time_us: i64,
    end_of_stream: bool,
}

/// Processed samples that did not fit the last encoder input buffer
#[derive(Debug)]
struct OverflowBuffer {
    data: Vec<i16>,
    position: usize,
    presentation_time_us: i64,
}

impl OverflowBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            position: 0,
            presentation_time_us: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn clear(&mut self) {
        self.data.clear();
        self.position = 0;
    }
}

#[derive(Debug, Clone, Copy)]
struct InputFormat {
    sample_rate: u32,
    channels: usize,
    remixer: AudioRemixer,
}

pub struct AudioProcessingChannel {
    slots: Vec<AudioBuffer>,
    empty: Vec<usize>,
    filled: VecDeque<usize>,
    overflow: Option<OverflowBuffer>,
    input: Option<InputFormat>,
    output_rate: u32,
    output_channels: usize,
    stretcher: Arc<dyn AudioStretcher>,
    resampler: Option<Arc<dyn AudioResampler>>,
    /// Last (decoder, encoder) timestamps, for the stretch delta
    last_times: Option<(i64, i64)>,
    decoded: Vec<i16>,
    stretched: Vec<i16>,
    remixed: Vec<i16>,
    resampled: Vec<i16>,
}

impl AudioProcessingChannel {
    /// Channel producing PCM for an encoder configured with `output_format`.
    /// Without a resampler, a decoder whose rate differs from the output rate
    /// is rejected when its format arrives.
    pub fn new(
        output_format: &MediaFormat,
        stretcher: Arc<dyn AudioStretcher>,
        resampler: Option<Arc<dyn AudioResampler>>,
    ) -> Result<Self> {
        let (Some(output_rate), Some(output_channels)) =
            (output_format.sample_rate, output_format.channel_count)
        else {
            return Err(TranscodeError::Contract(format!(
                "audio output format without rate or channel count: {}",
                output_format
            )));
        };
        Ok(Self {
            slots: Vec::new(),
            empty: Vec::new(),
            filled: VecDeque::new(),
            overflow: None,
            input: None,
            output_rate,
            output_channels: output_channels as usize,
            stretcher,
            resampler,
            last_times: None,
            decoded: Vec::new(),
            stretched: Vec::new(),
            remixed: Vec::new(),
            resampled: Vec::new(),
        })
    }

    /// Called when the decoder reports its actual output format.
    pub fn set_input_format(&mut self, format: &MediaFormat) -> Result<()> {
        let (Some(sample_rate), Some(channels)) = (format.sample_rate, format.channel_count) else {
            return Err(TranscodeError::Contract(format!(
                "decoder format without rate or channel count: {}",
                format
            )));
        };
        let channels = channels as usize;
        let remixer = AudioRemixer::for_channels(channels, self.output_channels)?;
        if sample_rate != self.output_rate && self.resampler.is_none() {
            return Err(TranscodeError::Contract(format!(
                "sample rate conversion {}Hz -> {}Hz requested without a resampler",
                sample_rate, self.output_rate
            )));
        }
        tracing::debug!(
            sample_rate,
            channels,
            output_rate = self.output_rate,
            output_channels = self.output_channels,
            ?remixer,
            "audio channel configured"
        );
        self.input = Some(InputFormat {
            sample_rate,
            channels,
            remixer,
        });
        Ok(())
    }

    /// Queue a decoder output buffer. The buffer stays owned by the decoder
    /// until it has been processed and released by `feed_encoder`.
    pub fn on_decoder_output(
        &mut self,
        decoder_index: usize,
        presentation_time_us: i64,
        end_of_stream: bool,
    ) -> Result<()> {
        if self.input.is_none() {
            return Err(TranscodeError::Contract(
                "audio buffer received before the decoder format".into(),
            ));
        }
        let buffer = AudioBuffer {
            state: SlotState::Filled,
            decoder_index: Some(decoder_index),
            presentation_time_us: if end_of_stream { 0 } else { presentation_time_us },
            end_of_stream,
        };
        let slot = match self.empty.pop() {
            Some(slot) => {
                self.slots[slot] = buffer;
                slot
            }
            None => {
                self.slots.push(buffer);
                self.slots.len() - 1
            }
        };
        self.filled.push_back(slot);
        Ok(())
    }

    /// True while decoder buffers or overflow samples are waiting.
    pub fn has_pending(&self) -> bool {
        !self.filled.is_empty() || self.overflow.as_ref().is_some_and(|o| o.remaining() > 0)
    }

    /// Slots ever allocated; stays small because processed slots are reused.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Move processed audio into one encoder input buffer.
    pub fn feed_encoder(
        &mut self,
        decoder: &mut dyn Codec,
        encoder: &mut dyn Codec,
        interpolator: &mut dyn TimeInterpolator,
        timeout_us: i64,
    ) -> Result<EncoderFeed> {
        if self.overflow.as_ref().is_some_and(|o| o.remaining() > 0) {
            return self.drain_overflow(encoder, timeout_us);
        }

        let Some(&slot) = self.filled.front() else {
            return Ok(EncoderFeed::Idle);
        };
        let buffer = self.slots[slot];
        if buffer.state != SlotState::Filled {
            return Err(TranscodeError::Contract(format!(
                "audio slot {} queued while empty",
                slot
            )));
        }

        if let (false, Some(decoder_index)) = (buffer.end_of_stream, buffer.decoder_index) {
            if decoder.output_buffer(decoder_index)?.is_empty() {
                decoder.release_output_buffer(decoder_index, false)?;
                self.recycle_front();
                return Ok(EncoderFeed::Fed);
            }
        }

        let Some(encoder_index) = encoder.dequeue_input_buffer(timeout_us)? else {
            return Ok(EncoderFeed::Idle);
        };

        if buffer.end_of_stream {
            encoder.queue_input_buffer(encoder_index, 0, 0, BufferFlags::END_OF_STREAM)?;
            if let Some(decoder_index) = buffer.decoder_index {
                decoder.release_output_buffer(decoder_index, false)?;
            }
            self.recycle_front();
            tracing::debug!("audio end of stream queued to encoder");
            return Ok(EncoderFeed::EndOfStream);
        }
        let Some(decoder_index) = buffer.decoder_index else {
            return Err(TranscodeError::Contract(format!(
                "audio slot {} has no decoder buffer",
                slot
            )));
        };

        read_samples(decoder.output_buffer(decoder_index)?, &mut self.decoded);
        if self.overflow.is_none() {
            self.overflow = Some(OverflowBuffer::with_capacity(self.decoded.len()));
        }
        let encoder_us = self.process(buffer.presentation_time_us, interpolator)?;

        let written_bytes = write_samples(&self.resampled, encoder.input_buffer(encoder_index)?);
        let written = written_bytes / 2;
        if written < self.resampled.len() {
            let overflow = self.overflow.get_or_insert_with(|| OverflowBuffer::with_capacity(0));
            if overflow.remaining() > 0 {
                return Err(TranscodeError::Contract(
                    "audio overflow buffer refilled before it was drained".into(),
                ));
            }
            overflow.clear();
            overflow.data.extend_from_slice(&self.resampled[written..]);
            overflow.presentation_time_us =
                encoder_us + samples_to_us(written, self.output_rate, self.output_channels);
            tracing::trace!(
                overflow = overflow.remaining(),
                pts = overflow.presentation_time_us,
                "audio overflow"
            );
        }
        encoder.queue_input_buffer(encoder_index, written_bytes, encoder_us, BufferFlags::NONE)?;
        decoder.release_output_buffer(decoder_index, false)?;
        self.recycle_front();
        Ok(EncoderFeed::Fed)
    }

    fn drain_overflow(&mut self, encoder: &mut dyn Codec, timeout_us: i64) -> Result<EncoderFeed> {
        let Some(encoder_index) = encoder.dequeue_input_buffer(timeout_us)? else {
            return Ok(EncoderFeed::Idle);
        };
        let Some(overflow) = self.overflow.as_mut() else {
            return Ok(EncoderFeed::Idle);
        };
        let pts = overflow.presentation_time_us
            + samples_to_us(overflow.position, self.output_rate, self.output_channels);
        let written_bytes = write_samples(
            &overflow.data[overflow.position..],
            encoder.input_buffer(encoder_index)?,
        );
        overflow.position += written_bytes / 2;
        if overflow.remaining() == 0 {
            overflow.clear();
        }
        encoder.queue_input_buffer(encoder_index, written_bytes, pts, BufferFlags::NONE)?;
        Ok(EncoderFeed::Fed)
    }

    fn recycle_front(&mut self) {
        if let Some(slot) = self.filled.pop_front() {
            self.slots[slot].state = SlotState::Empty;
            self.slots[slot].decoder_index = None;
            self.empty.push(slot);
        }
    }

    /// Run `self.decoded` through stretch, remix and resample into
    /// `self.resampled`, returning the output timestamp.
    fn process(
        &mut self,
        decoder_us: i64,
        interpolator: &mut dyn TimeInterpolator,
    ) -> Result<i64> {
        let input = self.input.ok_or_else(|| {
            TranscodeError::Contract("audio buffer processed before the decoder format".into())
        })?;

        let encoder_us = interpolator.interpolate(TrackType::Audio, decoder_us);
        let (decoder_delta, encoder_delta) = match self.last_times {
            Some((last_decoder, last_encoder)) => {
                (decoder_us - last_decoder, encoder_us - last_encoder)
            }
            None => (0, 0),
        };
        self.last_times = Some((decoder_us, encoder_us));
        let stretch = us_to_samples(encoder_delta - decoder_delta, input.sample_rate, input.channels);

        let whole = self.decoded.len() - self.decoded.len() % input.channels;
        self.decoded.truncate(whole);
        let stretched_len = (whole as i64 + stretch).max(0) as usize;
        self.stretched.resize(stretched_len, 0);
        self.stretcher
            .stretch(&self.decoded, &mut self.stretched, input.channels)?;

        self.remixed
            .resize(input.remixer.remixed_size(stretched_len), 0);
        input.remixer.remix(&self.stretched, &mut self.remixed);

        let frames = (self.remixed.len() / self.output_channels) as u64;
        let out_frames = frames * self.output_rate as u64 / input.sample_rate as u64;
        self.resampled
            .resize(out_frames as usize * self.output_channels, 0);
        match &self.resampler {
            Some(resampler) => resampler.resample(
                &self.remixed,
                input.sample_rate,
                &mut self.resampled,
                self.output_rate,
                self.output_channels,
            )?,
            None => self.resampled.copy_from_slice(&self.remixed),
        }
        tracing::trace!(
            decoder_us,
            encoder_us,
            stretch,
            decoded = self.decoded.len(),
            resampled = self.resampled.len(),
            "audio processed"
        );
        Ok(encoder_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{DefaultAudioResampler, DefaultAudioStretcher};
    use crate::media::MIME_AUDIO_AAC;
    use crate::tests::fixtures::MockCodec;
    use crate::time::{DefaultTimeInterpolator, SpeedTimeInterpolator};

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn channel(out_rate: u32, out_channels: u32) -> AudioProcessingChannel {
        AudioProcessingChannel::new(
            &MediaFormat::audio(MIME_AUDIO_AAC, out_rate, out_channels),
            Arc::new(DefaultAudioStretcher),
            Some(Arc::new(DefaultAudioResampler)),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_buffer_before_format() {
        let mut ch = channel(44100, 2);
        assert!(ch.on_decoder_output(0, 0, false).is_err());
    }

    #[test]
    fn test_rate_change_needs_resampler() {
        let mut ch = AudioProcessingChannel::new(
            &MediaFormat::audio(MIME_AUDIO_AAC, 44100, 2),
            Arc::new(DefaultAudioStretcher),
            None,
        )
        .unwrap();
        let err = ch
            .set_input_format(&MediaFormat::audio("audio/raw", 48000, 2))
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Contract(_)));
        assert!(ch
            .set_input_format(&MediaFormat::audio("audio/raw", 44100, 1))
            .is_ok());
    }

    #[test]
    fn test_upmix_with_overflow() {
        let mut ch = channel(1000, 2);
        ch.set_input_format(&MediaFormat::audio("audio/raw", 1000, 1))
            .unwrap();
        let mut decoder = MockCodec::new("decoder", 4, 64);
        // 8 mono samples become 16 stereo samples; the encoder takes 12 at a time
        let mut encoder = MockCodec::new("encoder", 4, 24);
        let index = decoder.push_output(&pcm(&[1, 2, 3, 4, 5, 6, 7, 8]), 1_000, BufferFlags::NONE);
        ch.on_decoder_output(index, 1_000, false).unwrap();
        let mut time = DefaultTimeInterpolator;

        let feed = ch
            .feed_encoder(&mut decoder, &mut encoder, &mut time, 0)
            .unwrap();
        assert_eq!(feed, EncoderFeed::Fed);
        assert!(ch.has_pending());
        let first = encoder.queued_inputs();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].data, pcm(&[1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6]));
        assert_eq!(first[0].presentation_time_us, 1_000);
        assert!(decoder.released_outputs().contains(&index));

        let feed = ch
            .feed_encoder(&mut decoder, &mut encoder, &mut time, 0)
            .unwrap();
        assert_eq!(feed, EncoderFeed::Fed);
        let second = encoder.queued_inputs();
        assert_eq!(second[1].data, pcm(&[7, 7, 8, 8]));
        // 6 stereo frames at 1kHz after the first buffer's timestamp
        assert_eq!(second[1].presentation_time_us, 7_000);
        assert!(!ch.has_pending());
    }

    #[test]
    fn test_end_of_stream_marker() {
        let mut ch = channel(1000, 1);
        ch.set_input_format(&MediaFormat::audio("audio/raw", 1000, 1))
            .unwrap();
        let mut decoder = MockCodec::new("decoder", 4, 64);
        let mut encoder = MockCodec::new("encoder", 4, 64);
        let index = decoder.push_output(&[], 99, BufferFlags::END_OF_STREAM);
        ch.on_decoder_output(index, 99, true).unwrap();
        let mut time = DefaultTimeInterpolator;
        let feed = ch
            .feed_encoder(&mut decoder, &mut encoder, &mut time, 0)
            .unwrap();
        assert_eq!(feed, EncoderFeed::EndOfStream);
        let inputs = encoder.queued_inputs();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].data.is_empty());
        assert!(inputs[0].flags.is_end_of_stream());
        assert_eq!(inputs[0].presentation_time_us, 0);
        assert!(decoder.released_outputs().contains(&index));
    }

    #[test]
    fn test_idle_without_encoder_buffer() {
        let mut ch = channel(1000, 1);
        ch.set_input_format(&MediaFormat::audio("audio/raw", 1000, 1))
            .unwrap();
        let mut decoder = MockCodec::new("decoder", 4, 64);
        let mut encoder = MockCodec::new("encoder", 0, 64);
        let index = decoder.push_output(&pcm(&[1, 2]), 0, BufferFlags::NONE);
        ch.on_decoder_output(index, 0, false).unwrap();
        let mut time = DefaultTimeInterpolator;
        let feed = ch
            .feed_encoder(&mut decoder, &mut encoder, &mut time, 0)
            .unwrap();
        assert_eq!(feed, EncoderFeed::Idle);
        assert!(ch.has_pending());
    }

    #[test]
    fn test_speed_up_cuts_samples() {
        let mut ch = channel(1000, 1);
        ch.set_input_format(&MediaFormat::audio("audio/raw", 1000, 1))
            .unwrap();
        let mut decoder = MockCodec::new("decoder", 4, 64);
        let mut encoder = MockCodec::new("encoder", 4, 64);
        let mut time = SpeedTimeInterpolator::new(2.0).unwrap();
        // Two buffers of 10ms each at 1kHz mono
        let samples: Vec<i16> = (0..10).collect();
        for pts in [0, 10_000] {
            let index = decoder.push_output(&pcm(&samples), pts, BufferFlags::NONE);
            ch.on_decoder_output(index, pts, false).unwrap();
            ch.feed_encoder(&mut decoder, &mut encoder, &mut time, 0)
                .unwrap();
        }
        let inputs = encoder.queued_inputs();
        assert_eq!(inputs[0].data.len(), 20);
        // The second buffer is 5ms of output time, so half the samples survive
        assert_eq!(inputs[1].data.len(), 10);
        assert_eq!(inputs[1].presentation_time_us, 5_000);
        // Slots are reused once processed
        assert_eq!(ch.slot_count(), 1);
    }
}
