use std::sync::Arc;

use crate::audio::{AudioProcessingChannel, AudioResampler, AudioStretcher};
use crate::buffer::BufferInfo;
use crate::codec::{Codec, EncoderFeed, POLL_TIMEOUT_US};
use crate::error::Result;
use crate::media::MediaFormat;
use crate::time::TimeInterpolator;

/// Audio stage between decoder and encoder
pub struct AudioProcessor {
    channel: AudioProcessingChannel,
}

impl AudioProcessor {
    pub fn new(
        output: &MediaFormat,
        stretcher: Arc<dyn AudioStretcher>,
        resampler: Option<Arc<dyn AudioResampler>>,
    ) -> Result<Self> {
        Ok(Self {
            channel: AudioProcessingChannel::new(output, stretcher, resampler)?,
        })
    }

    pub(crate) fn on_decoder_format(&mut self, format: &MediaFormat) -> Result<()> {
        self.channel.set_input_format(format)
    }

    pub(crate) fn on_decoder_output(&mut self, index: usize, info: BufferInfo) -> Result<()> {
        self.channel.on_decoder_output(
            index,
            info.presentation_time_us,
            info.flags.is_end_of_stream(),
        )
    }

    pub(crate) fn feed_encoder(
        &mut self,
        decoder: &mut dyn Codec,
        encoder: &mut dyn Codec,
        interpolator: &mut dyn TimeInterpolator,
    ) -> Result<EncoderFeed> {
        self.channel
            .feed_encoder(decoder, encoder, interpolator, POLL_TIMEOUT_US)
    }
}
