use crate::buffer::BufferInfo;
use crate::codec::{Codec, EncoderFeed};
use crate::error::Result;
use crate::media::{MediaFormat, TrackType};
use crate::time::TimeInterpolator;
use crate::video::{FrameDropper, FrameRenderer};

/// Frame rate assumed for inputs that do not report one
const FALLBACK_FRAME_RATE: u32 = 30;

/// A decoded frame kept by the decoder until the encoder takes it
#[derive(Debug, Clone, Copy)]
struct PendingFrame {
    index: usize,
    presentation_time_us: i64,
}

/// Video stage between decoder and encoder: drops frames down to the output
/// frame rate and renders the kept ones into the encoder.
pub struct VideoProcessor {
    dropper: FrameDropper,
    renderer: Box<dyn FrameRenderer>,
    pending: Option<PendingFrame>,
    /// Decoder buffer carrying the end-of-stream flag
    end_of_stream: Option<usize>,
    rendered: u64,
    dropped: u64,
}

impl VideoProcessor {
    pub fn new(
        input: &MediaFormat,
        output: &MediaFormat,
        renderer: Box<dyn FrameRenderer>,
    ) -> Result<Self> {
        let output_fps = output.frame_rate.unwrap_or(FALLBACK_FRAME_RATE);
        let input_fps = input.frame_rate.unwrap_or(output_fps);
        Ok(Self {
            dropper: FrameDropper::new(input_fps, output_fps)?,
            renderer,
            pending: None,
            end_of_stream: None,
            rendered: 0,
            dropped: 0,
        })
    }

    pub(crate) fn accepts_decoder_output(&self) -> bool {
        self.pending.is_none() && self.end_of_stream.is_none()
    }

    pub(crate) fn on_decoder_format(&mut self, format: &MediaFormat) -> Result<()> {
        tracing::debug!(format = %format, "video decoder format");
        Ok(())
    }

    pub(crate) fn on_decoder_output(
        &mut self,
        decoder: &mut dyn Codec,
        index: usize,
        info: BufferInfo,
        interpolator: &mut dyn TimeInterpolator,
    ) -> Result<()> {
        if info.flags.is_end_of_stream() {
            self.end_of_stream = Some(index);
            return Ok(());
        }
        // Dropped frames are interpolated too
        let presentation_time_us =
            interpolator.interpolate(TrackType::Video, info.presentation_time_us);
        let render = info.size > 0 && self.dropper.should_render(presentation_time_us);
        if !render {
            self.dropped += 1;
            decoder.release_output_buffer(index, false)?;
            return Ok(());
        }
        self.pending = Some(PendingFrame {
            index,
            presentation_time_us,
        });
        Ok(())
    }

    pub(crate) fn feed_encoder(
        &mut self,
        decoder: &mut dyn Codec,
        encoder: &mut dyn Codec,
    ) -> Result<EncoderFeed> {
        if let Some(frame) = self.pending {
            let data = decoder.output_buffer(frame.index)?;
            if !self
                .renderer
                .render(data, frame.presentation_time_us, encoder)?
            {
                return Ok(EncoderFeed::Idle);
            }
            decoder.release_output_buffer(frame.index, true)?;
            self.pending = None;
            self.rendered += 1;
            return Ok(EncoderFeed::Fed);
        }
        if let Some(index) = self.end_of_stream.take() {
            encoder.signal_end_of_input_stream()?;
            decoder.release_output_buffer(index, false)?;
            tracing::debug!(
                rendered = self.rendered,
                dropped = self.dropped,
                "video end of input signaled"
            );
            return Ok(EncoderFeed::EndOfStream);
        }
        Ok(EncoderFeed::Idle)
    }

    pub(crate) fn release(&mut self) -> Result<()> {
        self.renderer.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferFlags;
    use crate::media::{MIME_VIDEO_AVC, MIME_VIDEO_RAW};
    use crate::tests::fixtures::MockCodec;
    use crate::video::CopyFrameRenderer;

    /// Identity mapping recording every timestamp it was asked for
    #[derive(Default)]
    struct RecordingInterpolator {
        seen: Vec<i64>,
    }

    impl TimeInterpolator for RecordingInterpolator {
        fn interpolate(&mut self, _track: TrackType, time_us: i64) -> i64 {
            self.seen.push(time_us);
            time_us
        }
    }

    #[test]
    fn test_dropped_frames_are_interpolated() {
        let mut input = MediaFormat::video(MIME_VIDEO_RAW, 16, 16);
        input.frame_rate = Some(30);
        let mut output = MediaFormat::video(MIME_VIDEO_AVC, 16, 16);
        output.frame_rate = Some(10);
        let mut processor =
            VideoProcessor::new(&input, &output, Box::new(CopyFrameRenderer)).unwrap();
        let mut decoder = MockCodec::new("video-decoder", 1, 16);
        let mut encoder = MockCodec::new("video-encoder", 2, 64);
        let mut interpolator = RecordingInterpolator::default();

        let stamps: Vec<i64> = (0..6).map(|i| i * 33_333).collect();
        for (i, &timestamp_us) in stamps.iter().enumerate() {
            let index = decoder.push_output(&[i as u8; 8], timestamp_us, BufferFlags::NONE);
            let info = BufferInfo::new(8, timestamp_us, BufferFlags::NONE);
            processor
                .on_decoder_output(&mut decoder, index, info, &mut interpolator)
                .unwrap();
            processor.feed_encoder(&mut decoder, &mut encoder).unwrap();
        }

        assert_eq!(interpolator.seen, stamps);
        let rendered = encoder.queued_inputs();
        assert!((2..=3).contains(&rendered.len()), "rendered {}", rendered.len());
        assert_eq!(rendered[0].presentation_time_us, 0);
        // Every decoder buffer went back, rendered or dropped
        assert_eq!(decoder.released_outputs().len(), 6);
    }
}
