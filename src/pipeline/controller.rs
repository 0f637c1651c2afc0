//! Pipeline lifecycle

use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::capture::{FrameSink, FrameSource, FrameSourceError};
use crate::pipeline::{LatestFrameSlot, PipelineStats, RecognitionWorker, StatsSnapshot};
use crate::recognition::Recognizer;
use crate::sink::ResultSink;

/// Queued acquisition faults kept for the lifecycle owner.
const FAULT_BACKLOG: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Running,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to start {source_name} source: {error}")]
    SourceStart {
        source_name: String,
        #[source]
        error: FrameSourceError,
    },

    #[error("pipeline must be started from within a tokio runtime")]
    NoRuntime,
}

/// Owns the camera, the frame slot and the recognition worker.
///
/// Created stopped. `start`/`stop` take `&mut self`, so a half-started or
/// half-stopped pipeline is never observable. Dropping a running
/// controller tears everything down and releases any held frame.
pub struct PipelineController<S: FrameSource, R: Recognizer> {
    source: S,
    recognizer: Arc<R>,
    sink: Arc<dyn ResultSink>,
    recognition_timeout: Duration,
    stats: Arc<PipelineStats>,
    faults_tx: Sender<FrameSourceError>,
    faults_rx: Receiver<FrameSourceError>,
    running: Option<RunningPipeline>,
}

struct RunningPipeline {
    slot: Arc<LatestFrameSlot>,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl<S: FrameSource, R: Recognizer> PipelineController<S, R> {
    pub fn new(
        source: S,
        recognizer: R,
        sink: Arc<dyn ResultSink>,
        recognition_timeout: Duration,
    ) -> Self {
        let (faults_tx, faults_rx) = flume::bounded(FAULT_BACKLOG);
        Self {
            source,
            recognizer: Arc::new(recognizer),
            sink,
            recognition_timeout,
            stats: Arc::new(PipelineStats::default()),
            faults_tx,
            faults_rx,
            running: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        if self.running.is_some() {
            PipelineState::Running
        } else {
            PipelineState::Stopped
        }
    }

    /// Counters accumulated over every run of this controller.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Non-fatal frame acquisition errors reported while running.
    pub fn faults(&self) -> Receiver<FrameSourceError> {
        self.faults_rx.clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Bind the source to a fresh slot and spawn the worker.
    ///
    /// No-op when already running. Must be called from within a tokio
    /// runtime. If the source cannot start the pipeline stays stopped.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.running.is_some() {
            return Ok(());
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;

        let slot = Arc::new(LatestFrameSlot::with_stats(Arc::clone(&self.stats)));
        let sink = FrameSink::new(
            Arc::clone(&slot),
            self.faults_tx.clone(),
            Arc::clone(&self.stats),
        );
        self.source
            .start(sink)
            .map_err(|error| PipelineError::SourceStart {
                source_name: self.source.name().to_string(),
                error,
            })?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = RecognitionWorker::new(
            Arc::clone(&slot),
            Arc::clone(&self.recognizer),
            Arc::clone(&self.sink),
            self.recognition_timeout,
            shutdown_rx,
        );
        let worker = runtime.spawn(worker.run());

        self.running = Some(RunningPipeline {
            slot,
            shutdown,
            worker,
        });
        info!("Pipeline running");
        Ok(())
    }

    /// Unbind the source and wind down the worker.
    ///
    /// No-op when stopped. An in-flight recognition is allowed to finish
    /// (bounded by the recognition timeout) but its result is discarded.
    /// Once this returns the sink receives nothing more from this run.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        self.source.stop();
        // Receiver only disappears once the worker has already exited
        let _ = running.shutdown.send(true);
        if let Err(e) = running.worker.await {
            error!("Recognition worker ended abnormally: {}", e);
        }
        running.slot.clear();

        info!("Pipeline stopped");
    }

    /// Flip between running and stopped, as the UI button does.
    pub async fn toggle(&mut self) -> Result<PipelineState, PipelineError> {
        match self.state() {
            PipelineState::Running => self.stop().await,
            PipelineState::Stopped => self.start()?,
        }
        Ok(self.state())
    }
}

impl<S: FrameSource, R: Recognizer> Drop for PipelineController<S, R> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            self.source.stop();
            let _ = running.shutdown.send(true);
            // Dropping the worker future releases the frame it holds
            running.worker.abort();
            running.slot.clear();
        }
    }
}
