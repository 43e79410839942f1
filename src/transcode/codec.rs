//! Decode, process, encode pipeline shared by video and audio
//!
//! End of stream moves forward one stage at a time:
//! - the source drains (or is forced to end): an end marker is queued to the decoder
//! - the decoder emits its last buffer: the processor forwards the end to the encoder
//! - the encoder emits its last buffer: it is written as the terminal sample

use std::fmt;
use std::sync::Arc;

use super::{AudioProcessor, StepContext, TrackTranscoder, VideoProcessor};
use crate::audio::{AudioResampler, AudioStretcher};
use crate::buffer::{BufferFlags, BufferInfo};
use crate::codec::{Codec, CodecFactory, CodecOutput, EncoderFeed, POLL_TIMEOUT_US};
use crate::error::{CodecError, Result, TranscodeError};
use crate::media::{MediaFormat, TrackType};
use crate::sink::DataSink;
use crate::source::DataSource;
use crate::time::TimeInterpolator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    Running,
    /// End marker queued to the decoder
    DrainingExtractorEos,
    /// Decoder emitted its last buffer
    DrainingDecoderEos,
    /// End marker reached the encoder
    DrainingEncoderEos,
    Finished,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::NotStarted => "not-started",
            PipelineState::Running => "running",
            PipelineState::DrainingExtractorEos => "draining-extractor-eos",
            PipelineState::DrainingDecoderEos => "draining-decoder-eos",
            PipelineState::DrainingEncoderEos => "draining-encoder-eos",
            PipelineState::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Outcome of one drain attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    None,
    /// A format or buffer-set change; poll again right away
    Retry,
    Consumed,
}

/// Track-specific processing between decoder and encoder
pub enum Processor {
    Video(VideoProcessor),
    Audio(AudioProcessor),
}

impl Processor {
    fn accepts_decoder_output(&self) -> bool {
        match self {
            Processor::Video(video) => video.accepts_decoder_output(),
            Processor::Audio(_) => true,
        }
    }

    fn on_decoder_format(&mut self, format: &MediaFormat) -> Result<()> {
        match self {
            Processor::Video(video) => video.on_decoder_format(format),
            Processor::Audio(audio) => audio.on_decoder_format(format),
        }
    }

    fn on_decoder_output(
        &mut self,
        decoder: &mut dyn Codec,
        index: usize,
        info: BufferInfo,
        interpolator: &mut dyn TimeInterpolator,
    ) -> Result<()> {
        match self {
            Processor::Video(video) => video.on_decoder_output(decoder, index, info, interpolator),
            Processor::Audio(audio) => audio.on_decoder_output(index, info),
        }
    }

    fn feed_encoder(
        &mut self,
        decoder: &mut dyn Codec,
        encoder: &mut dyn Codec,
        interpolator: &mut dyn TimeInterpolator,
    ) -> Result<EncoderFeed> {
        match self {
            Processor::Video(video) => video.feed_encoder(decoder, encoder),
            Processor::Audio(audio) => audio.feed_encoder(decoder, encoder, interpolator),
        }
    }

    fn release(&mut self) -> Result<()> {
        match self {
            Processor::Video(video) => video.release(),
            Processor::Audio(_) => Ok(()),
        }
    }
}

/// Release the codecs built before a pipeline failed to come together and
/// return the construction error. A release failure only gets logged.
fn release_after_failure(
    error: TranscodeError,
    codecs: impl IntoIterator<Item = Box<dyn Codec>>,
) -> TranscodeError {
    for mut codec in codecs {
        if let Err(e) = codec.release() {
            tracing::error!(codec = codec.name(), error = %e, "failed to release codec");
        }
    }
    error
}

/// Transcoder for a compressing track
pub struct CodecTrackTranscoder {
    track: TrackType,
    decoder: Box<dyn Codec>,
    encoder: Box<dyn Codec>,
    processor: Processor,
    state: PipelineState,
    output_format: Option<MediaFormat>,
    position_us: i64,
    released: bool,
}

impl CodecTrackTranscoder {
    pub fn new(
        track: TrackType,
        decoder: Box<dyn Codec>,
        encoder: Box<dyn Codec>,
        processor: Processor,
    ) -> Self {
        Self {
            track,
            decoder,
            encoder,
            processor,
            state: PipelineState::NotStarted,
            output_format: None,
            position_us: 0,
            released: false,
        }
    }

    pub fn video(
        input: &MediaFormat,
        output: &MediaFormat,
        factory: &dyn CodecFactory,
    ) -> Result<Self> {
        let decoder = factory.create_decoder(input)?;
        let encoder = match factory.create_encoder(output) {
            Ok(encoder) => encoder,
            Err(e) => return Err(release_after_failure(e, [decoder])),
        };
        let processor = factory
            .create_renderer(input, output)
            .and_then(|renderer| VideoProcessor::new(input, output, renderer));
        let processor = match processor {
            Ok(processor) => processor,
            Err(e) => return Err(release_after_failure(e, [decoder, encoder])),
        };
        tracing::info!(input = %input, output = %output, "video pipeline created");
        Ok(Self::new(
            TrackType::Video,
            decoder,
            encoder,
            Processor::Video(processor),
        ))
    }

    pub fn audio(
        input: &MediaFormat,
        output: &MediaFormat,
        factory: &dyn CodecFactory,
        stretcher: Arc<dyn AudioStretcher>,
        resampler: Option<Arc<dyn AudioResampler>>,
    ) -> Result<Self> {
        let processor = AudioProcessor::new(output, stretcher, resampler)?;
        let decoder = factory.create_decoder(input)?;
        let encoder = match factory.create_encoder(output) {
            Ok(encoder) => encoder,
            Err(e) => return Err(release_after_failure(e, [decoder])),
        };
        tracing::info!(input = %input, output = %output, "audio pipeline created");
        Ok(Self::new(
            TrackType::Audio,
            decoder,
            encoder,
            Processor::Audio(processor),
        ))
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn set_state(&mut self, state: PipelineState) {
        tracing::debug!(track = %self.track, from = %self.state, to = %state, "pipeline state");
        self.state = state;
    }

    fn drain_encoder(&mut self, sink: &mut dyn DataSink) -> Result<Drain> {
        if self.state == PipelineState::Finished {
            return Ok(Drain::None);
        }
        let (index, info) = match self.encoder.dequeue_output_buffer(POLL_TIMEOUT_US)? {
            CodecOutput::TryAgainLater => return Ok(Drain::None),
            CodecOutput::BuffersChanged => return Ok(Drain::Retry),
            CodecOutput::FormatChanged(format) => {
                if self.output_format.is_some() {
                    return Err(CodecError::FormatChangedTwice.into());
                }
                sink.set_track_format(self.track, &format)?;
                self.output_format = Some(format);
                return Ok(Drain::Retry);
            }
            CodecOutput::Buffer { index, info } => (index, info),
        };
        if self.output_format.is_none() {
            return Err(TranscodeError::Contract(format!(
                "{} encoder produced data but could not determine actual output format",
                self.track
            )));
        }

        if info.flags.is_end_of_stream() {
            let data = self.encoder.output_buffer(index)?;
            sink.write_track(self.track, data, info.presentation_time_us, info.flags)?;
            self.encoder.release_output_buffer(index, false)?;
            self.set_state(PipelineState::Finished);
            tracing::info!(track = %self.track, position_us = self.position_us, "track finished");
            return Ok(Drain::None);
        }
        if info.flags.is_codec_config() {
            // Already carried by the output format
            self.encoder.release_output_buffer(index, false)?;
            return Ok(Drain::Retry);
        }

        let data = self.encoder.output_buffer(index)?;
        sink.write_track(self.track, data, info.presentation_time_us, info.flags)?;
        self.encoder.release_output_buffer(index, false)?;
        Ok(Drain::Consumed)
    }

    fn drain_decoder(&mut self, interpolator: &mut dyn TimeInterpolator) -> Result<Drain> {
        if !matches!(
            self.state,
            PipelineState::Running | PipelineState::DrainingExtractorEos
        ) || !self.processor.accepts_decoder_output()
        {
            return Ok(Drain::None);
        }
        match self.decoder.dequeue_output_buffer(POLL_TIMEOUT_US)? {
            CodecOutput::TryAgainLater => Ok(Drain::None),
            CodecOutput::BuffersChanged => Ok(Drain::Retry),
            CodecOutput::FormatChanged(format) => {
                self.processor.on_decoder_format(&format)?;
                Ok(Drain::Retry)
            }
            CodecOutput::Buffer { index, info } => {
                if info.flags.is_end_of_stream() {
                    self.set_state(PipelineState::DrainingDecoderEos);
                }
                self.processor
                    .on_decoder_output(self.decoder.as_mut(), index, info, interpolator)?;
                Ok(Drain::Consumed)
            }
        }
    }

    fn feed_encoder(&mut self, interpolator: &mut dyn TimeInterpolator) -> Result<bool> {
        if matches!(
            self.state,
            PipelineState::DrainingEncoderEos | PipelineState::Finished
        ) {
            return Ok(false);
        }
        let feed = self.processor.feed_encoder(
            self.decoder.as_mut(),
            self.encoder.as_mut(),
            interpolator,
        )?;
        match feed {
            EncoderFeed::Idle => Ok(false),
            EncoderFeed::Fed => Ok(true),
            EncoderFeed::EndOfStream => {
                self.set_state(PipelineState::DrainingEncoderEos);
                Ok(true)
            }
        }
    }

    fn feed_decoder(&mut self, source: &mut dyn DataSource, force_eos: bool) -> Result<bool> {
        if self.state != PipelineState::Running {
            return Ok(false);
        }
        let end_of_input = force_eos || source.is_drained();
        if !end_of_input && !source.can_read(self.track) {
            return Ok(false);
        }
        let Some(index) = self.decoder.dequeue_input_buffer(POLL_TIMEOUT_US)? else {
            return Ok(false);
        };
        if end_of_input {
            self.decoder
                .queue_input_buffer(index, 0, 0, BufferFlags::END_OF_STREAM)?;
            tracing::debug!(track = %self.track, forced = force_eos, "end of input queued to decoder");
            self.set_state(PipelineState::DrainingExtractorEos);
            return Ok(true);
        }

        let chunk = source.read(self.track, self.decoder.input_buffer(index)?)?;
        let (size, timestamp_us, flags) = (chunk.bytes(), chunk.timestamp_us, chunk.flags());
        self.position_us = timestamp_us;
        self.decoder
            .queue_input_buffer(index, size, timestamp_us, flags)?;
        Ok(true)
    }
}

impl TrackTranscoder for CodecTrackTranscoder {
    fn track(&self) -> TrackType {
        self.track
    }

    fn step(&mut self, ctx: &mut StepContext<'_>, force_eos: bool) -> Result<bool> {
        match self.state {
            PipelineState::Finished => return Ok(false),
            PipelineState::NotStarted => self.set_state(PipelineState::Running),
            _ => {}
        }

        let mut busy = false;
        while self.drain_encoder(ctx.sink)? != Drain::None {
            busy = true;
        }
        loop {
            match self.drain_decoder(ctx.interpolator)? {
                Drain::None => break,
                Drain::Retry => busy = true,
                Drain::Consumed => {
                    busy = true;
                    break;
                }
            }
        }
        while self.feed_encoder(ctx.interpolator)? {
            busy = true;
        }
        while self.feed_decoder(ctx.source, force_eos)? {
            busy = true;
        }
        Ok(busy)
    }

    fn is_finished(&self) -> bool {
        self.state == PipelineState::Finished
    }

    fn position_us(&self) -> i64 {
        self.position_us
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        // Release every stage even when one fails, report the first failure
        let results = [
            self.processor.release(),
            self.decoder.release(),
            self.encoder.release(),
        ];
        tracing::debug!(track = %self.track, state = %self.state, "pipeline released");
        results.into_iter().collect()
    }
}
