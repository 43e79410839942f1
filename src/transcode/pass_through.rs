use super::{StepContext, TrackTranscoder};
use crate::buffer::BufferFlags;
use crate::error::Result;
use crate::media::{MediaFormat, TrackType};

/// Read buffer size when the source does not report a maximum chunk size
const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Copies encoded chunks from the source to the sink. Only timestamps change,
/// through the time interpolator.
pub struct PassThroughTrackTranscoder {
    track: TrackType,
    format: MediaFormat,
    format_registered: bool,
    buffer: Vec<u8>,
    position_us: i64,
    last_timestamp_us: i64,
    finished: bool,
}

impl PassThroughTrackTranscoder {
    pub fn new(track: TrackType, format: MediaFormat) -> Self {
        let size = format
            .max_input_size
            .filter(|&s| s > 0)
            .unwrap_or(DEFAULT_BUFFER_SIZE);
        Self {
            track,
            format,
            format_registered: false,
            buffer: vec![0; size],
            position_us: 0,
            last_timestamp_us: 0,
            finished: false,
        }
    }
}

impl TrackTranscoder for PassThroughTrackTranscoder {
    fn track(&self) -> TrackType {
        self.track
    }

    fn step(&mut self, ctx: &mut StepContext<'_>, force_eos: bool) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        if !self.format_registered {
            ctx.sink.set_track_format(self.track, &self.format)?;
            self.format_registered = true;
        }

        if force_eos || ctx.source.is_drained() {
            ctx.sink.write_track(
                self.track,
                &[],
                self.last_timestamp_us,
                BufferFlags::END_OF_STREAM,
            )?;
            self.finished = true;
            tracing::debug!(track = %self.track, forced = force_eos, "pass-through finished");
            return Ok(true);
        }
        if !ctx.source.can_read(self.track) {
            return Ok(false);
        }

        let chunk = ctx.source.read(self.track, &mut self.buffer)?;
        let timestamp_us = ctx.interpolator.interpolate(self.track, chunk.timestamp_us);
        self.position_us = chunk.timestamp_us;
        self.last_timestamp_us = timestamp_us;
        ctx.sink
            .write_track(self.track, chunk.data, timestamp_us, chunk.flags())?;
        Ok(true)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn position_us(&self) -> i64 {
        self.position_us
    }

    fn release(&mut self) -> Result<()> {
        self.buffer = Vec::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{TrackStatus, MIME_VIDEO_AVC};
    use crate::sink::{DataSink, SampleQueueingSink};
    use crate::source::DataSource;
    use crate::tests::fixtures::{MockSource, MockWriter, WriterEvent};
    use crate::time::{DefaultTimeInterpolator, SpeedTimeInterpolator, TimeInterpolator};

    fn run(
        source: &mut MockSource,
        sink: &mut SampleQueueingSink<MockWriter>,
        interpolator: &mut dyn TimeInterpolator,
        transcoder: &mut PassThroughTrackTranscoder,
    ) {
        let mut guard = 0;
        while !transcoder.is_finished() {
            let mut ctx = StepContext {
                source: &mut *source,
                sink: &mut *sink,
                interpolator: &mut *interpolator,
            };
            transcoder.step(&mut ctx, false).unwrap();
            guard += 1;
            assert!(guard < 1000, "pass-through never finished");
        }
    }

    #[test]
    fn test_copies_chunks_and_ends() {
        let mut source = MockSource::video_only(3, 10_000);
        source.select_track(TrackType::Video).unwrap();
        let mut sink = SampleQueueingSink::new(MockWriter::new());
        sink.set_track_status(TrackType::Video, TrackStatus::PassThrough);
        let format = source.track_format(TrackType::Video).unwrap();
        let mut transcoder = PassThroughTrackTranscoder::new(TrackType::Video, format);
        run(&mut source, &mut sink, &mut DefaultTimeInterpolator, &mut transcoder);

        let writes: Vec<_> = sink
            .writer()
            .events()
            .into_iter()
            .filter_map(|e| match e {
                WriterEvent::Write {
                    timestamp_us,
                    flags,
                    ..
                } => Some((timestamp_us, flags)),
                _ => None,
            })
            .collect();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[0], (0, BufferFlags::KEY_FRAME));
        assert_eq!(writes[2].0, 20_000);
        assert!(writes[3].1.is_end_of_stream());
        assert_eq!(transcoder.position_us(), 20_000);
    }

    #[test]
    fn test_timestamps_interpolated() {
        let mut source = MockSource::video_only(3, 10_000);
        source.select_track(TrackType::Video).unwrap();
        let mut sink = SampleQueueingSink::new(MockWriter::new());
        sink.set_track_status(TrackType::Video, TrackStatus::PassThrough);
        let mut transcoder = PassThroughTrackTranscoder::new(
            TrackType::Video,
            MediaFormat::video(MIME_VIDEO_AVC, 16, 16),
        );
        let mut speed = SpeedTimeInterpolator::new(2.0).unwrap();
        run(&mut source, &mut sink, &mut speed, &mut transcoder);

        let stamps: Vec<_> = sink
            .writer()
            .events()
            .into_iter()
            .filter_map(|e| match e {
                WriterEvent::Write {
                    timestamp_us,
                    flags,
                    ..
                } if !flags.is_end_of_stream() => Some(timestamp_us),
                _ => None,
            })
            .collect();
        assert_eq!(stamps, vec![0, 5_000, 10_000]);
    }
}
