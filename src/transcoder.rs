//! Transcoder handle and per-operation options
//!
//! A `Transcoder` owns a tokio runtime whose blocking pool runs the engines,
//! at most `pool_size` at a time; further operations wait in FIFO order.
//! Listener callbacks are sent through a channel to a task on the callback
//! runtime, so a slow listener never stalls an engine thread.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioResampler, AudioStretcher, DefaultAudioResampler, DefaultAudioStretcher};
use crate::codec::CodecFactory;
use crate::config::{default_pool_size, VALID_ROTATIONS};
use crate::engine::{Engine, EngineOutcome, Progress, TranscodeJob};
use crate::error::{Result, TranscodeError};
use crate::media::{TrackMap, TrackType};
use crate::sink::DataSink;
use crate::source::{DataSource, SourceSet};
use crate::strategy::{DefaultAudioStrategy, DefaultVideoStrategy, TrackStrategy};
use crate::time::{DefaultTimeInterpolator, TimeInterpolator};
use crate::validator::{DefaultValidator, Validator};

/// Successful end of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeSuccess {
    /// The output was written
    Transcoded,
    /// The validator found nothing to do; no output was written
    NotNeeded,
}

/// Terminal outcome of an operation
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed(TranscodeSuccess),
    Cancelled,
    Failed(Arc<TranscodeError>),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }
}

/// Receives the events of one operation, in order. Exactly one of
/// `on_completed`, `on_canceled` and `on_failed` is called, last.
pub trait TranscoderListener: Send + Sync + 'static {
    /// Non-decreasing progress in `[0, 1]`, or a negative value when unknown
    fn on_progress(&self, _progress: f64) {}

    fn on_completed(&self, outcome: TranscodeSuccess);

    fn on_canceled(&self) {}

    fn on_failed(&self, error: &TranscodeError);
}

#[derive(Debug)]
enum ListenerEvent {
    Progress(f64),
    Finished(TaskOutcome),
}

/// Collaborators and settings of one operation
pub struct TranscoderOptions {
    job: TranscodeJob,
    listener: Option<Arc<dyn TranscoderListener>>,
    callback_handle: Option<Handle>,
}

impl TranscoderOptions {
    pub fn builder() -> TranscoderOptionsBuilder {
        TranscoderOptionsBuilder::default()
    }

    pub fn rotation(&self) -> i32 {
        self.job.rotation
    }
}

#[derive(Default)]
pub struct TranscoderOptionsBuilder {
    sources: SourceSet,
    sink: Option<Box<dyn DataSink>>,
    codecs: Option<Arc<dyn CodecFactory>>,
    video_strategy: Option<Arc<dyn TrackStrategy>>,
    audio_strategy: Option<Arc<dyn TrackStrategy>>,
    validator: Option<Arc<dyn Validator>>,
    interpolator: Option<Box<dyn TimeInterpolator>>,
    stretcher: Option<Arc<dyn AudioStretcher>>,
    resampler: Option<Option<Arc<dyn AudioResampler>>>,
    rotation: i32,
    listener: Option<Arc<dyn TranscoderListener>>,
    callback_handle: Option<Handle>,
}

impl TranscoderOptionsBuilder {
    /// Add an input for every track it carries. Inputs of a track are
    /// concatenated in the order they were added.
    pub fn add_source(mut self, source: impl DataSource + 'static) -> Self {
        self.sources.add(Box::new(source));
        self
    }

    pub fn add_boxed_source(mut self, source: Box<dyn DataSource>) -> Self {
        self.sources.add(source);
        self
    }

    /// Add an input read for its video track only.
    pub fn add_video_source(mut self, source: impl DataSource + 'static) -> Self {
        self.sources.add_for(TrackType::Video, Box::new(source));
        self
    }

    /// Add an input read for its audio track only.
    pub fn add_audio_source(mut self, source: impl DataSource + 'static) -> Self {
        self.sources.add_for(TrackType::Audio, Box::new(source));
        self
    }

    pub fn sink(mut self, sink: impl DataSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn codecs(mut self, codecs: Arc<dyn CodecFactory>) -> Self {
        self.codecs = Some(codecs);
        self
    }

    pub fn video_strategy(mut self, strategy: Arc<dyn TrackStrategy>) -> Self {
        self.video_strategy = Some(strategy);
        self
    }

    pub fn audio_strategy(mut self, strategy: Arc<dyn TrackStrategy>) -> Self {
        self.audio_strategy = Some(strategy);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn time_interpolator(mut self, interpolator: Box<dyn TimeInterpolator>) -> Self {
        self.interpolator = Some(interpolator);
        self
    }

    pub fn audio_stretcher(mut self, stretcher: Arc<dyn AudioStretcher>) -> Self {
        self.stretcher = Some(stretcher);
        self
    }

    /// `None` rejects inputs whose sample rate differs from the output.
    pub fn audio_resampler(mut self, resampler: Option<Arc<dyn AudioResampler>>) -> Self {
        self.resampler = Some(resampler);
        self
    }

    /// Extra clockwise rotation: 0, 90, 180 or 270.
    pub fn rotation(mut self, degrees: i32) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn listener(mut self, listener: impl TranscoderListener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Runtime the listener is called on. Defaults to the transcoder's own.
    pub fn callback_handle(mut self, handle: Handle) -> Self {
        self.callback_handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<TranscoderOptions> {
        if !VALID_ROTATIONS.contains(&self.rotation) {
            return Err(TranscodeError::Config(format!(
                "rotation must be one of 0, 90, 180, 270, got {}",
                self.rotation
            )));
        }
        if self.sources.is_empty() {
            return Err(TranscodeError::Config("no data source".into()));
        }
        let sink = self
            .sink
            .ok_or_else(|| TranscodeError::Config("no data sink".into()))?;
        let codecs = self
            .codecs
            .ok_or_else(|| TranscodeError::Config("no codec factory".into()))?;

        let video: Arc<dyn TrackStrategy> = self
            .video_strategy
            .unwrap_or_else(|| Arc::new(DefaultVideoStrategy::for_720x1280()));
        let audio: Arc<dyn TrackStrategy> = self
            .audio_strategy
            .unwrap_or_else(|| Arc::new(DefaultAudioStrategy::new()));

        Ok(TranscoderOptions {
            job: TranscodeJob {
                sources: self.sources,
                sink,
                strategies: TrackMap::new(video, audio),
                validator: self.validator.unwrap_or_else(|| Arc::new(DefaultValidator)),
                interpolator: self
                    .interpolator
                    .unwrap_or_else(|| Box::new(DefaultTimeInterpolator)),
                stretcher: self
                    .stretcher
                    .unwrap_or_else(|| Arc::new(DefaultAudioStretcher)),
                resampler: self
                    .resampler
                    .unwrap_or_else(|| Some(Arc::new(DefaultAudioResampler))),
                codecs,
                rotation: self.rotation,
            },
            listener: self.listener,
            callback_handle: self.callback_handle,
        })
    }
}

/// Handle to a running operation
pub struct TranscodeTask {
    id: u64,
    cancel: CancellationToken,
    progress: Arc<Progress>,
    handle: Handle,
    engine: JoinHandle<TaskOutcome>,
    dispatcher: Option<JoinHandle<()>>,
}

impl TranscodeTask {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ask the engine to stop. Observed once per loop iteration.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> f64 {
        self.progress.get()
    }

    pub fn is_done(&self) -> bool {
        self.engine.is_finished()
    }

    /// Wait for the outcome, after every listener event was delivered.
    pub async fn join(self) -> TaskOutcome {
        let outcome = match self.engine.await {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome::Failed(Arc::new(TranscodeError::Unrecoverable(format!(
                "engine task aborted: {}",
                e
            )))),
        };
        if let Some(dispatcher) = self.dispatcher {
            if let Err(e) = dispatcher.await {
                tracing::warn!(error = %e, "listener task aborted");
            }
        }
        outcome
    }

    /// Blocking `join`, for callers outside any async context.
    pub fn wait(self) -> TaskOutcome {
        let handle = self.handle.clone();
        handle.block_on(self.join())
    }
}

/// Owns the worker pool and tracks the running operations
pub struct Transcoder {
    runtime: Runtime,
    active: Arc<DashMap<u64, CancellationToken>>,
    next_id: AtomicU64,
    pool_size: usize,
}

impl Transcoder {
    /// Transcoder running at most `pool_size` operations at once.
    pub fn new(pool_size: usize) -> Result<Self> {
        if pool_size == 0 {
            return Err(TranscodeError::Config("pool size must be at least 1".into()));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(pool_size)
            .thread_name("mtranscode-worker")
            .enable_time()
            .build()?;
        tracing::debug!(pool_size, "transcoder created");
        Ok(Self {
            runtime,
            active: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            pool_size,
        })
    }

    pub fn with_default_pool() -> Result<Self> {
        Self::new(default_pool_size())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Operations queued or running
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().cancel();
        }
    }

    /// Start an operation. It is queued when every worker is busy.
    pub fn transcode(&self, options: TranscoderOptions) -> TranscodeTask {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let progress = Arc::new(Progress::new());
        self.active.insert(id, cancel.clone());

        let TranscoderOptions {
            job,
            listener,
            callback_handle,
        } = options;

        let (events, dispatcher) = match listener {
            Some(listener) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let handle = callback_handle.unwrap_or_else(|| self.runtime.handle().clone());
                (Some(tx), Some(handle.spawn(dispatch(listener, rx))))
            }
            None => (None, None),
        };

        let active = self.active.clone();
        let engine_cancel = cancel.clone();
        let engine_progress = progress.clone();
        let engine = self.runtime.spawn_blocking(move || {
            let span = tracing::info_span!("transcode", id);
            let _enter = span.enter();

            let progress_events = events.clone();
            let mut engine = Engine::new(job, engine_cancel, engine_progress).on_progress(
                move |value| {
                    if let Some(tx) = &progress_events {
                        let _ = tx.send(ListenerEvent::Progress(value));
                    }
                },
            );
            let outcome = match engine.run() {
                Ok(EngineOutcome::Transcoded) => TaskOutcome::Completed(TranscodeSuccess::Transcoded),
                Ok(EngineOutcome::NotNeeded) => TaskOutcome::Completed(TranscodeSuccess::NotNeeded),
                Ok(EngineOutcome::Cancelled) => TaskOutcome::Cancelled,
                Err(e) => {
                    if e.is_unrecoverable() {
                        tracing::error!(error = %e, "resources may have leaked");
                    }
                    TaskOutcome::Failed(Arc::new(e))
                }
            };
            active.remove(&id);
            if let Some(tx) = &events {
                let _ = tx.send(ListenerEvent::Finished(outcome.clone()));
            }
            outcome
        });

        TranscodeTask {
            id,
            cancel,
            progress,
            handle: self.runtime.handle().clone(),
            engine,
            dispatcher,
        }
    }
}

async fn dispatch(
    listener: Arc<dyn TranscoderListener>,
    mut events: mpsc::UnboundedReceiver<ListenerEvent>,
) {
    let mut last = f64::NEG_INFINITY;
    while let Some(event) = events.recv().await {
        match event {
            ListenerEvent::Progress(progress) => {
                if progress > last {
                    last = progress;
                    listener.on_progress(progress);
                }
            }
            ListenerEvent::Finished(TaskOutcome::Completed(success)) => {
                listener.on_completed(success);
            }
            ListenerEvent::Finished(TaskOutcome::Cancelled) => listener.on_canceled(),
            ListenerEvent::Finished(TaskOutcome::Failed(error)) => listener.on_failed(&error),
        }
    }
}
