//! Recognition worker loop

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, instrument, warn};

use crate::capture::{Frame, FrameView};
use crate::pipeline::{LatestFrameSlot, PipelineStats};
use crate::recognition::{RecognitionError, RecognitionResult, Recognizer};
use crate::sink::ResultSink;

/// Pulls the newest frame from the slot and recognizes it, one at a time.
///
/// For every frame it takes the worker publishes exactly one result and
/// then releases the frame, on every path: text, empty, error, timeout or a
/// panicking recognizer. Frames that arrive meanwhile overwrite each other
/// in the slot.
pub struct RecognitionWorker<R> {
    slot: Arc<LatestFrameSlot>,
    recognizer: Arc<R>,
    sink: Arc<dyn ResultSink>,
    stats: Arc<PipelineStats>,
    timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<R: Recognizer> RecognitionWorker<R> {
    pub fn new(
        slot: Arc<LatestFrameSlot>,
        recognizer: Arc<R>,
        sink: Arc<dyn ResultSink>,
        timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let stats = Arc::clone(slot.stats());
        Self {
            slot,
            recognizer,
            sink,
            stats,
            timeout,
            shutdown,
        }
    }

    /// Run on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    #[instrument(name = "recognition_worker", skip_all)]
    pub async fn run(mut self) {
        info!(timeout_ms = self.timeout.as_millis() as u64, "Recognition worker started");

        loop {
            if self.is_shutdown() {
                break;
            }

            let Some(frame) = self.slot.take() else {
                tokio::select! {
                    biased;
                    changed = self.shutdown.changed() => {
                        // Sender gone counts as shutdown
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = self.slot.wait() => {}
                }
                continue;
            };

            self.process(frame).await;
        }

        info!("Recognition worker stopped");
    }

    async fn process(&self, frame: Frame) {
        let sequence = frame.sequence();
        let queued_ms = frame.age().as_millis() as u64;
        let started = Instant::now();

        let result = self.recognize(frame.view()).await;
        debug!(
            sequence,
            queued_ms,
            elapsed_ms = started.elapsed().as_millis() as u64,
            outcome = result.label(),
            "Frame recognized"
        );

        if self.is_shutdown() {
            debug!(sequence, "pipeline stopped, discarding result");
            self.stats.record_discarded();
        } else {
            self.stats.record_result(&result);
            self.sink.publish(result);
        }
        frame.release();
    }

    /// Run the recognizer on its own task so a panic or a hang is contained.
    ///
    /// The call task never outlives this future: if the worker itself is
    /// aborted mid-call, the guard cancels the recognizer too.
    async fn recognize(&self, view: FrameView) -> RecognitionResult {
        let recognizer = Arc::clone(&self.recognizer);
        let mut call = tokio::spawn(async move { recognizer.recognize(view).await });
        let _guard = AbortOnDrop(call.abort_handle());

        let outcome = match tokio::time::timeout(self.timeout, &mut call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.is_panic() => Err(RecognitionError::Panicked),
            Ok(Err(e)) => Err(RecognitionError::Backend(e.to_string())),
            Err(_) => Err(RecognitionError::Timeout(self.timeout)),
        };

        if let Err(error) = &outcome {
            warn!(%error, "Recognition failed");
        }
        outcome.into()
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Aborts the spawned recognizer call when dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
