//! Sink buffering samples until the container can start
//!
//! A container writer needs every track before it starts, but each encoder
//! reports its output format on its own schedule. Until all active tracks have
//! a format, written samples are copied into an append-only arena; once the
//! last format arrives the writer is started and the queue is replayed in
//! arrival order. From then on samples go straight to the writer.

use bytes::BytesMut;

use super::checks::check_output_format;
use super::{ContainerWriter, DataSink};
use crate::buffer::{BufferFlags, EncodedSample};
use crate::error::{Result, TranscodeError};
use crate::media::{MediaFormat, TrackMap, TrackStatus, TrackType};

/// Initial arena capacity
const QUEUE_BUFFER_SIZE: usize = 64 * 1024;

/// A sample waiting in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedSample {
    pub sample: EncodedSample,
    /// Offset of the payload in the arena
    pub offset: usize,
}

pub struct SampleQueueingSink<W> {
    writer: W,
    statuses: TrackMap<TrackStatus>,
    formats: TrackMap<Option<MediaFormat>>,
    track_indices: TrackMap<Option<usize>>,
    started: bool,
    arena: BytesMut,
    queue: Vec<QueuedSample>,
}

impl<W: ContainerWriter> SampleQueueingSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            statuses: TrackMap::default(),
            formats: TrackMap::default(),
            track_indices: TrackMap::default(),
            started: false,
            arena: BytesMut::new(),
            queue: Vec::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Samples waiting for the writer to start
    pub fn queued(&self) -> &[QueuedSample] {
        &self.queue
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn is_ready(&self) -> bool {
        self.statuses
            .iter()
            .all(|(track, status)| !status.is_transcoding() || self.formats.get(track).is_some())
    }

    fn start_if_ready(&mut self) -> Result<()> {
        if self.started || !self.is_ready() {
            return Ok(());
        }
        for track in TrackType::ALL {
            if !self.statuses.get(track).is_transcoding() {
                continue;
            }
            if let Some(format) = self.formats.get(track) {
                let index = self.writer.add_track(format)?;
                tracing::info!(%track, index, format = %format, "added output track");
                self.track_indices.set(track, Some(index));
            }
        }
        self.writer.start()?;
        self.started = true;
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let arena = std::mem::take(&mut self.arena).freeze();
        let queue = std::mem::take(&mut self.queue);
        tracing::debug!(
            samples = queue.len(),
            bytes = arena.len(),
            "flushing queued samples"
        );
        for queued in &queue {
            let sample = queued.sample;
            let index = self.track_index(sample.track)?;
            let data = &arena[queued.offset..queued.offset + sample.size];
            self.writer
                .write_sample(index, data, sample.presentation_time_us, sample.flags)?;
        }
        Ok(())
    }

    fn track_index(&self, track: TrackType) -> Result<usize> {
        self.track_indices.get(track).ok_or_else(|| {
            TranscodeError::Contract(format!("sample written to inactive {} track", track))
        })
    }
}

impl<W: ContainerWriter> DataSink for SampleQueueingSink<W> {
    fn set_orientation(&mut self, degrees: i32) -> Result<()> {
        self.writer.set_orientation(degrees)
    }

    fn set_location(&mut self, latitude: f64, longitude: f64) -> Result<()> {
        self.writer.set_location(latitude, longitude)
    }

    fn set_track_status(&mut self, track: TrackType, status: TrackStatus) {
        self.statuses.set(track, status);
    }

    fn set_track_format(&mut self, track: TrackType, format: &MediaFormat) -> Result<()> {
        if self.formats.get(track).is_some() {
            return Err(TranscodeError::Contract(format!(
                "{} output format registered twice",
                track
            )));
        }
        if *self.statuses.get(track) == TrackStatus::Compressing {
            check_output_format(track, format)?;
        }
        tracing::debug!(%track, format = %format, "output format determined");
        self.formats.set(track, Some(format.clone()));
        self.start_if_ready()
    }

    fn write_track(
        &mut self,
        track: TrackType,
        data: &[u8],
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        if self.started {
            let index = self.track_index(track)?;
            return self.writer.write_sample(index, data, timestamp_us, flags);
        }
        if self.arena.capacity() == 0 {
            self.arena.reserve(QUEUE_BUFFER_SIZE);
        }
        let offset = self.arena.len();
        self.arena.extend_from_slice(data);
        self.queue.push(QueuedSample {
            sample: EncodedSample {
                track,
                size: data.len(),
                presentation_time_us: timestamp_us,
                flags,
            },
            offset,
        });
        tracing::trace!(%track, timestamp_us, size = data.len(), "queued sample");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.started {
            tracing::warn!(queued = self.queue.len(), "stopping a writer that never started");
            return Ok(());
        }
        self.writer.stop()
    }

    fn release(&mut self) -> Result<()> {
        self.queue.clear();
        self.arena = BytesMut::new();
        self.writer.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MIME_AUDIO_AAC, MIME_VIDEO_AVC};
    use crate::tests::fixtures::{MockWriter, WriterEvent};

    fn sink() -> SampleQueueingSink<MockWriter> {
        let mut sink = SampleQueueingSink::new(MockWriter::new());
        sink.set_track_status(TrackType::Video, TrackStatus::Compressing);
        sink.set_track_status(TrackType::Audio, TrackStatus::Compressing);
        sink
    }

    fn avc() -> MediaFormat {
        MediaFormat::video(MIME_VIDEO_AVC, 320, 240)
    }

    fn aac() -> MediaFormat {
        MediaFormat::audio(MIME_AUDIO_AAC, 44100, 2)
    }

    #[test]
    fn test_queues_until_all_formats() {
        let mut sink = sink();
        sink.set_track_format(TrackType::Video, &avc()).unwrap();
        sink.write_track(TrackType::Video, b"v0", 0, BufferFlags::KEY_FRAME)
            .unwrap();
        sink.write_track(TrackType::Video, b"v1", 33, BufferFlags::NONE)
            .unwrap();
        assert!(!sink.is_started());
        assert_eq!(sink.queued().len(), 2);
        assert_eq!(sink.queued()[1].offset, 2);
        assert!(sink.writer().events().is_empty());

        sink.set_track_format(TrackType::Audio, &aac()).unwrap();
        assert!(sink.is_started());
        assert!(sink.queued().is_empty());
        sink.write_track(TrackType::Audio, b"a0", 10, BufferFlags::NONE)
            .unwrap();

        let events = sink.writer().events();
        assert_eq!(
            events,
            vec![
                WriterEvent::AddTrack(MIME_VIDEO_AVC.to_string()),
                WriterEvent::AddTrack(MIME_AUDIO_AAC.to_string()),
                WriterEvent::Start,
                WriterEvent::Write {
                    track: 0,
                    data: b"v0".to_vec(),
                    timestamp_us: 0,
                    flags: BufferFlags::KEY_FRAME
                },
                WriterEvent::Write {
                    track: 0,
                    data: b"v1".to_vec(),
                    timestamp_us: 33,
                    flags: BufferFlags::NONE
                },
                WriterEvent::Write {
                    track: 1,
                    data: b"a0".to_vec(),
                    timestamp_us: 10,
                    flags: BufferFlags::NONE
                },
            ]
        );
    }

    #[test]
    fn test_single_active_track_starts_immediately() {
        let mut sink = SampleQueueingSink::new(MockWriter::new());
        sink.set_track_status(TrackType::Video, TrackStatus::Compressing);
        sink.set_track_status(TrackType::Audio, TrackStatus::Absent);
        sink.set_track_format(TrackType::Video, &avc()).unwrap();
        assert!(sink.is_started());
        assert_eq!(sink.writer().added_tracks(), 1);
    }

    #[test]
    fn test_format_registered_twice() {
        let mut sink = sink();
        sink.set_track_format(TrackType::Video, &avc()).unwrap();
        let err = sink.set_track_format(TrackType::Video, &avc()).unwrap_err();
        assert!(matches!(err, TranscodeError::Contract(_)));
    }

    #[test]
    fn test_rejects_unsupported_compressed_format() {
        let mut sink = sink();
        let err = sink
            .set_track_format(TrackType::Audio, &MediaFormat::audio("audio/opus", 48000, 2))
            .unwrap_err();
        assert!(matches!(err, TranscodeError::InvalidOutputFormat(_)));
        assert!(!sink.is_started());
    }

    #[test]
    fn test_pass_through_format_not_checked() {
        let mut sink = SampleQueueingSink::new(MockWriter::new());
        sink.set_track_status(TrackType::Video, TrackStatus::PassThrough);
        sink.set_track_status(TrackType::Audio, TrackStatus::Removing);
        sink.set_track_format(TrackType::Video, &MediaFormat::video("video/hevc", 8, 8))
            .unwrap();
        assert!(sink.is_started());
    }

    #[test]
    fn test_write_to_inactive_track_after_start() {
        let mut sink = SampleQueueingSink::new(MockWriter::new());
        sink.set_track_status(TrackType::Video, TrackStatus::Compressing);
        sink.set_track_format(TrackType::Video, &avc()).unwrap();
        assert!(sink
            .write_track(TrackType::Audio, b"x", 0, BufferFlags::NONE)
            .is_err());
    }

    #[test]
    fn test_stop_before_start_is_harmless() {
        let mut sink = sink();
        sink.stop().unwrap();
        sink.release().unwrap();
        assert_eq!(sink.writer().events(), vec![WriterEvent::Release]);
    }
}
