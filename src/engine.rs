//! Transcoding engine
//!
//! Runs one operation synchronously on the calling thread:
//! - asks the strategies for output formats and derives the track statuses
//! - runs the validator, unless a rotation was requested
//! - steps every active transcoder until all are finished or the operation
//!   is cancelled
//! - releases transcoders, then the sink, then the source tracks, whatever
//!   the outcome
//!
//! A track reads its sources one after the other. Every source gets its own
//! transcoder (a "step"); timestamps of later sources continue where the
//! previous one ended, and only the last step ends the output track.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::audio::{AudioResampler, AudioStretcher};
use crate::buffer::BufferFlags;
use crate::codec::CodecFactory;
use crate::error::{Result, TranscodeError};
use crate::media::{MediaFormat, TrackMap, TrackStatus, TrackType};
use crate::sink::DataSink;
use crate::source::SourceSet;
use crate::strategy::{StrategyError, TrackStrategy};
use crate::time::TimeInterpolator;
use crate::transcode::{
    CodecTrackTranscoder, NoOpTrackTranscoder, PassThroughTrackTranscoder, StepContext,
    TrackTranscoder,
};
use crate::validator::Validator;

/// Sleep when a whole iteration did no work
const SLEEP_WHEN_IDLE: Duration = Duration::from_millis(10);
/// Iterations between progress updates
const PROGRESS_INTERVAL_STEPS: u64 = 10;
/// Read position past the total duration that forces a track to end
const FORCE_EOS_TOLERANCE_US: i64 = 100;
/// Minimum distance between the last sample of a source and the first
/// sample of the next one
const STEP_GAP_US: i64 = 10;

/// Progress shared between the engine thread and observers.
///
/// Holds a value in `[0, 1]`, or `UNKNOWN` when the duration is not known.
#[derive(Debug)]
pub struct Progress(AtomicU64);

impl Progress {
    pub const UNKNOWN: f64 = -1.0;

    pub fn new() -> Self {
        Self(AtomicU64::new(0f64.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// How an operation ended, short of failing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    Transcoded,
    /// The validator found nothing to change; nothing was written
    NotNeeded,
    Cancelled,
}

/// Everything one operation needs
pub struct TranscodeJob {
    pub sources: SourceSet,
    pub sink: Box<dyn DataSink>,
    pub strategies: TrackMap<Arc<dyn TrackStrategy>>,
    pub validator: Arc<dyn Validator>,
    pub interpolator: Box<dyn TimeInterpolator>,
    pub stretcher: Arc<dyn AudioStretcher>,
    pub resampler: Option<Arc<dyn AudioResampler>>,
    pub codecs: Arc<dyn CodecFactory>,
    /// Extra clockwise rotation, one of 0, 90, 180, 270
    pub rotation: i32,
}

/// Places the timestamps of consecutive sources of one track on a single
/// output timeline. The first source keeps its own timestamps.
#[derive(Debug, Clone, Copy)]
struct Timeline {
    /// Output time where the current source starts
    base_us: i64,
    /// First timestamp seen from the current source
    first_input_us: Option<i64>,
    /// Last timestamp handed out, before the user interpolator
    last_us: i64,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            base_us: 0,
            first_input_us: Some(0),
            last_us: 0,
        }
    }
}

impl Timeline {
    fn rebase(&mut self, time_us: i64) -> i64 {
        let first = *self.first_input_us.get_or_insert(time_us);
        self.last_us = self.base_us + (time_us - first);
        self.last_us
    }

    /// Start the next source after the one just finished, whose duration is
    /// `duration_us` when known.
    fn next_source(&mut self, duration_us: i64) {
        let end = if duration_us > 0 {
            self.base_us + duration_us
        } else {
            0
        };
        self.base_us = end.max(self.last_us + STEP_GAP_US);
        self.first_input_us = None;
    }
}

/// Interpolator seen by the transcoder of one step: rebases onto the track
/// timeline, then applies the job's interpolator.
struct StepInterpolator<'a> {
    timeline: &'a mut Timeline,
    inner: &'a mut dyn TimeInterpolator,
}

impl TimeInterpolator for StepInterpolator<'_> {
    fn interpolate(&mut self, track: TrackType, time_us: i64) -> i64 {
        let time_us = self.timeline.rebase(time_us);
        self.inner.interpolate(track, time_us)
    }
}

/// Sink seen by the transcoder of one step. Only the first registered
/// format reaches the sink, and only the last step may end the track.
struct StepSink<'a> {
    inner: &'a mut dyn DataSink,
    format_registered: &'a mut bool,
    last_step: bool,
}

impl DataSink for StepSink<'_> {
    fn set_orientation(&mut self, degrees: i32) -> Result<()> {
        self.inner.set_orientation(degrees)
    }

    fn set_location(&mut self, latitude: f64, longitude: f64) -> Result<()> {
        self.inner.set_location(latitude, longitude)
    }

    fn set_track_status(&mut self, track: TrackType, status: TrackStatus) {
        self.inner.set_track_status(track, status)
    }

    fn set_track_format(&mut self, track: TrackType, format: &MediaFormat) -> Result<()> {
        if *self.format_registered {
            tracing::debug!(%track, format = %format, "format of a later source not registered");
            return Ok(());
        }
        self.inner.set_track_format(track, format)?;
        *self.format_registered = true;
        Ok(())
    }

    fn write_track(
        &mut self,
        track: TrackType,
        data: &[u8],
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        if self.last_step || !flags.is_end_of_stream() {
            return self.inner.write_track(track, data, timestamp_us, flags);
        }
        if data.is_empty() {
            return Ok(());
        }
        let flags = flags.without(BufferFlags::END_OF_STREAM);
        self.inner.write_track(track, data, timestamp_us, flags)
    }

    fn stop(&mut self) -> Result<()> {
        self.inner.stop()
    }

    fn release(&mut self) -> Result<()> {
        self.inner.release()
    }
}

type ProgressCallback = Box<dyn FnMut(f64) + Send>;

pub struct Engine {
    job: TranscodeJob,
    cancel: CancellationToken,
    progress: Arc<Progress>,
    on_progress: Option<ProgressCallback>,
    statuses: TrackMap<TrackStatus>,
    /// Output format of the pass-through and compressing tracks
    outputs: TrackMap<Option<MediaFormat>>,
    /// Position in each track's source list
    steps: TrackMap<usize>,
    /// Transcoder of the current step, stored as soon as it is built
    transcoders: TrackMap<Option<Box<dyn TrackTranscoder>>>,
    /// Source track of the current step selected and not released yet
    selected: TrackMap<bool>,
    timelines: TrackMap<Timeline>,
    /// Read position covered by the finished steps
    completed_us: TrackMap<i64>,
    format_registered: TrackMap<bool>,
}

impl Engine {
    pub fn new(job: TranscodeJob, cancel: CancellationToken, progress: Arc<Progress>) -> Self {
        Self {
            job,
            cancel,
            progress,
            on_progress: None,
            statuses: TrackMap::default(),
            outputs: TrackMap::default(),
            steps: TrackMap::default(),
            transcoders: TrackMap::default(),
            selected: TrackMap::default(),
            timelines: TrackMap::default(),
            completed_us: TrackMap::default(),
            format_registered: TrackMap::default(),
        }
    }

    /// Called on the engine thread every time progress is recomputed.
    pub fn on_progress(mut self, callback: impl FnMut(f64) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Track statuses decided at startup
    pub fn statuses(&self) -> &TrackMap<TrackStatus> {
        &self.statuses
    }

    /// Run the operation to completion, then tear everything down.
    ///
    /// A teardown failure takes precedence over the transcode result and is
    /// reported as `TranscodeError::Unrecoverable`.
    pub fn run(&mut self) -> Result<EngineOutcome> {
        let result = self.transcode();
        if let Err(e) = &result {
            tracing::error!(error = %e, "transcode failed");
        }
        self.teardown()?;
        result
    }

    fn transcode(&mut self) -> Result<EngineOutcome> {
        if self.job.sources.is_empty() {
            return Err(TranscodeError::Source("no data source".into()));
        }
        self.bind_metadata()?;
        self.compute_statuses()?;

        let (video, audio) = (self.statuses.video, self.statuses.audio);
        let total_us = self.total_duration_us();
        tracing::info!(
            %video,
            %audio,
            duration_us = total_us,
            video_sources = self.job.sources.steps(TrackType::Video),
            audio_sources = self.job.sources.steps(TrackType::Audio),
            "starting transcode"
        );

        if self.job.rotation != 0 {
            tracing::debug!(rotation = self.job.rotation, "rotation requested, validator bypassed");
        } else if !self.job.validator.validate(video, audio) {
            tracing::info!(%video, %audio, "validator declined, transcode not needed");
            return Ok(EngineOutcome::NotNeeded);
        }

        for track in TrackType::ALL {
            self.open_step(track)?;
        }
        self.step_loop(total_us)
    }

    fn bind_metadata(&mut self) -> Result<()> {
        let sources = &self.job.sources;
        let orientation = sources
            .for_track(TrackType::Video)
            .chain(sources.for_track(TrackType::Audio))
            .next()
            .map_or(0, |source| source.orientation());
        let location = sources
            .for_track(TrackType::Video)
            .chain(sources.for_track(TrackType::Audio))
            .find_map(|source| source.location());

        let degrees = (orientation + self.job.rotation).rem_euclid(360);
        self.job.sink.set_orientation(degrees)?;
        if let Some((latitude, longitude)) = location {
            self.job.sink.set_location(latitude, longitude)?;
        }
        Ok(())
    }

    /// Shortest duration among the written tracks, summed over their
    /// sources. Removed tracks and tracks of unknown duration do not bound
    /// it; non-positive when no written track knows its duration.
    fn total_duration_us(&self) -> i64 {
        TrackType::ALL
            .iter()
            .filter(|&&track| self.statuses.get(track).is_transcoding())
            .map(|&track| self.job.sources.duration_us(track))
            .filter(|&duration| duration > 0)
            .min()
            .unwrap_or(-1)
    }

    /// Decide each track's status and keep the output formats of the
    /// compressing and pass-through tracks.
    fn compute_statuses(&mut self) -> Result<()> {
        for track in TrackType::ALL {
            let mut inputs = Vec::with_capacity(self.job.sources.steps(track));
            for source in self.job.sources.for_track(track) {
                let format = source.track_format(track).ok_or_else(|| {
                    TranscodeError::Source(format!("a source listed for {} has no such track", track))
                })?;
                inputs.push(format);
            }

            let (status, output) = match inputs.first() {
                None => (TrackStatus::Absent, None),
                Some(first) => {
                    let strategy = self.job.strategies.get(track);
                    match strategy.create_output_format(&inputs) {
                        Ok(None) => (TrackStatus::Removing, None),
                        Ok(Some(output))
                            if output == *first && inputs.iter().all(|i| i.mime == output.mime) =>
                        {
                            (TrackStatus::PassThrough, Some(output))
                        }
                        Ok(Some(output)) => (TrackStatus::Compressing, Some(output)),
                        Err(StrategyError::AlreadyCompressed) => {
                            // The container is not asked whether it can hold
                            // this input format as is.
                            tracing::warn!(
                                %track,
                                input = %first,
                                "input already compressed, passing through unchecked"
                            );
                            (TrackStatus::PassThrough, Some(first.clone()))
                        }
                        Err(StrategyError::Unavailable(reason)) => {
                            return Err(TranscodeError::StrategyUnavailable { track, reason })
                        }
                    }
                }
            };
            self.statuses.set(track, status);
            self.job.sink.set_track_status(track, status);
            self.outputs.set(track, output);
        }
        Ok(())
    }

    fn is_last_step(&self, track: TrackType) -> bool {
        *self.steps.get(track) + 1 >= self.job.sources.steps(track)
    }

    /// True once the track has nothing left to write
    fn is_completed(&self, track: TrackType) -> bool {
        if !self.statuses.get(track).is_transcoding() {
            return true;
        }
        self.is_last_step(track)
            && self
                .transcoders
                .get(track)
                .as_ref()
                .is_some_and(|t| t.is_finished())
    }

    /// Source position of the track across all its sources
    fn read_us(&self, track: TrackType) -> i64 {
        let current = self
            .transcoders
            .get(track)
            .as_ref()
            .map_or(0, |t| t.position_us());
        *self.completed_us.get(track) + current
    }

    /// Build the transcoder of the current step and select its source track.
    fn open_step(&mut self, track: TrackType) -> Result<()> {
        let step = *self.steps.get(track);
        let status = *self.statuses.get(track);
        let index = self.job.sources.index(track, step);
        let input = index.and_then(|index| self.job.sources.get(index).track_format(track));

        let transcoder: Box<dyn TrackTranscoder> = match (status, self.outputs.get(track), input) {
            // Every source is copied with its own format
            (TrackStatus::PassThrough, Some(_), Some(input)) => {
                Box::new(PassThroughTrackTranscoder::new(track, input))
            }
            (TrackStatus::Compressing, Some(output), Some(input)) => match track {
                TrackType::Video => Box::new(CodecTrackTranscoder::video(
                    &input,
                    output,
                    self.job.codecs.as_ref(),
                )?),
                TrackType::Audio => Box::new(CodecTrackTranscoder::audio(
                    &input,
                    output,
                    self.job.codecs.as_ref(),
                    self.job.stretcher.clone(),
                    self.job.resampler.clone(),
                )?),
            },
            _ => Box::new(NoOpTrackTranscoder::new(track)),
        };
        self.transcoders.set(track, Some(transcoder));
        tracing::debug!(%track, step, source = ?index, %status, "step opened");

        if status.is_transcoding() {
            if let Some(index) = index {
                self.job.sources.get_mut(index).select_track(track)?;
                self.selected.set(track, true);
            }
        }
        Ok(())
    }

    /// Release the finished transcoder of `track` and open the next source.
    fn next_step(&mut self, track: TrackType) -> Result<()> {
        let step = *self.steps.get(track);
        let duration = self
            .job
            .sources
            .index(track, step)
            .map_or(-1, |index| self.job.sources.get(index).duration_us(track));
        if let Some(mut transcoder) = self.transcoders.get_mut(track).take() {
            let read = if duration > 0 {
                duration
            } else {
                transcoder.position_us()
            };
            *self.completed_us.get_mut(track) += read;
            transcoder
                .release()
                .map_err(|e| TranscodeError::Unrecoverable(e.to_string()))?;
        }
        self.release_source_track(track);
        self.timelines.get_mut(track).next_source(duration);
        self.steps.set(track, step + 1);
        tracing::info!(
            %track,
            step = step + 1,
            base_us = self.timelines.get(track).base_us,
            "next source"
        );
        self.open_step(track)
    }

    fn release_source_track(&mut self, track: TrackType) {
        if !*self.selected.get(track) {
            return;
        }
        if let Some(index) = self.job.sources.index(track, *self.steps.get(track)) {
            self.job.sources.get_mut(index).release_track(track);
        }
        self.selected.set(track, false);
    }

    /// Step the current transcoder of `track`, moving to the next source
    /// when it finished.
    fn step_track(&mut self, track: TrackType, total_us: i64) -> Result<bool> {
        let Some(index) = self.job.sources.index(track, *self.steps.get(track)) else {
            return Ok(false);
        };
        let last_step = self.is_last_step(track);
        let force_eos =
            total_us > 0 && self.read_us(track) > total_us + FORCE_EOS_TOLERANCE_US;

        let Some(transcoder) = self.transcoders.get_mut(track).as_mut() else {
            return Err(TranscodeError::Contract(format!("no transcoder for {}", track)));
        };
        let mut sink = StepSink {
            inner: self.job.sink.as_mut(),
            format_registered: self.format_registered.get_mut(track),
            last_step,
        };
        let mut interpolator = StepInterpolator {
            timeline: self.timelines.get_mut(track),
            inner: self.job.interpolator.as_mut(),
        };
        let mut ctx = StepContext {
            source: self.job.sources.get_mut(index),
            sink: &mut sink,
            interpolator: &mut interpolator,
        };
        let stepped = transcoder.step(&mut ctx, force_eos)?;
        if !transcoder.is_finished() {
            return Ok(stepped);
        }

        // Let the source skip the remaining samples of this track
        self.release_source_track(track);
        if !last_step {
            self.next_step(track)?;
            return Ok(true);
        }
        Ok(stepped)
    }

    /// Average over written tracks of their read position against the total
    fn compute_progress(&self, total_us: i64) -> f64 {
        if total_us <= 0 {
            return Progress::UNKNOWN;
        }
        let active = self.statuses.active_count().max(1) as f64;
        let sum: f64 = TrackType::ALL
            .iter()
            .filter(|&&track| self.statuses.get(track).is_transcoding())
            .map(|&track| {
                if self.is_completed(track) {
                    1.0
                } else {
                    (self.read_us(track) as f64 / total_us as f64).clamp(0.0, 1.0)
                }
            })
            .sum();
        sum / active
    }

    fn report_progress(&mut self, progress: f64) {
        self.progress.set(progress);
        if let Some(callback) = self.on_progress.as_mut() {
            callback(progress);
        }
    }

    fn step_loop(&mut self, total_us: i64) -> Result<EngineOutcome> {
        let mut iteration: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(iteration, "transcode cancelled");
                return Ok(EngineOutcome::Cancelled);
            }
            if TrackType::ALL.iter().all(|&track| self.is_completed(track)) {
                break;
            }

            let mut stepped = false;
            for track in TrackType::ALL {
                if !self.is_completed(track) {
                    stepped |= self.step_track(track, total_us)?;
                }
            }

            iteration += 1;
            if iteration % PROGRESS_INTERVAL_STEPS == 0 {
                let progress = self.compute_progress(total_us);
                tracing::trace!(iteration, progress, "progress");
                self.report_progress(progress);
            }
            if !stepped {
                std::thread::sleep(SLEEP_WHEN_IDLE);
            }
        }

        self.job.sink.stop()?;
        self.report_progress(1.0);
        tracing::info!(iteration, "transcode completed");
        Ok(EngineOutcome::Transcoded)
    }

    fn teardown(&mut self) -> Result<()> {
        let mut failure = None;
        for track in TrackType::ALL {
            if let Some(transcoder) = self.transcoders.get_mut(track) {
                if let Err(e) = transcoder.release() {
                    tracing::error!(%track, error = %e, "failed to release transcoder");
                    failure.get_or_insert(e);
                }
            }
        }
        if let Err(e) = self.job.sink.release() {
            tracing::error!(error = %e, "failed to release sink");
            failure.get_or_insert(e);
        }
        for track in TrackType::ALL {
            self.release_source_track(track);
        }
        match failure {
            Some(e) => Err(TranscodeError::Unrecoverable(e.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_first_source_unchanged() {
        let mut timeline = Timeline::default();
        assert_eq!(timeline.rebase(0), 0);
        assert_eq!(timeline.rebase(40_000), 40_000);
    }

    #[test]
    fn test_timeline_next_source_starts_after_duration() {
        let mut timeline = Timeline::default();
        timeline.rebase(200_000);
        timeline.next_source(300_000);
        // The second source starts at its own first timestamp
        assert_eq!(timeline.rebase(5_000), 300_000);
        assert_eq!(timeline.rebase(105_000), 400_000);
    }

    #[test]
    fn test_timeline_unknown_duration_leaves_gap() {
        let mut timeline = Timeline::default();
        timeline.rebase(200_000);
        timeline.next_source(-1);
        assert_eq!(timeline.rebase(0), 200_000 + STEP_GAP_US);
    }

    #[test]
    fn test_progress_cell() {
        let progress = Progress::new();
        assert_eq!(progress.get(), 0.0);
        progress.set(Progress::UNKNOWN);
        assert_eq!(progress.get(), -1.0);
    }
}
