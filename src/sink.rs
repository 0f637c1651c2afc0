//! Where recognition results go.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, trace};

use crate::recognition::RecognitionResult;

/// Consumer of recognition results, typically a display surface.
///
/// Called from the worker task; must not block. Results for dropped frames
/// never arrive, so only the latest result is meaningful.
pub trait ResultSink: Send + Sync + 'static {
    fn publish(&self, result: RecognitionResult);
}

/// Forwards results over a bounded channel. When the receiver falls
/// behind the oldest queued result is evicted, so the newest always lands.
pub struct ChannelSink {
    tx: Sender<RecognitionResult>,
    evict: Receiver<RecognitionResult>,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<RecognitionResult>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        let evict = rx.clone();
        (Self { tx, evict }, rx)
    }
}

impl ResultSink for ChannelSink {
    fn publish(&self, mut result: RecognitionResult) {
        // Only our own eviction handle left: nobody is listening
        if self.tx.receiver_count() <= 1 {
            trace!("result receiver gone");
            return;
        }
        loop {
            match self.tx.try_send(result) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if let Ok(stale) = self.evict.try_recv() {
                        debug!(outcome = stale.label(), "result channel full, evicting oldest");
                    }
                    result = back;
                }
                Err(TrySendError::Disconnected(_)) => {
                    trace!("result receiver gone");
                    return;
                }
            }
        }
    }
}

/// The single display surface: always holds the newest result, readable
/// from any thread without locking.
#[derive(Default)]
pub struct LatestResult {
    current: ArcSwapOption<RecognitionResult>,
    updates: AtomicU64,
}

impl LatestResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<RecognitionResult>> {
        self.current.load_full()
    }

    /// Number of results published so far.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Acquire)
    }
}

impl ResultSink for LatestResult {
    fn publish(&self, result: RecognitionResult) {
        self.current.store(Some(Arc::new(result)));
        self.updates.fetch_add(1, Ordering::AcqRel);
    }
}

/// Adapter so a plain closure can act as a [`ResultSink`].
pub struct FnSink<F>(F);

pub fn sink_fn<F>(f: F) -> FnSink<F>
where
    F: Fn(RecognitionResult) + Send + Sync + 'static,
{
    FnSink(f)
}

impl<F> ResultSink for FnSink<F>
where
    F: Fn(RecognitionResult) + Send + Sync + 'static,
{
    fn publish(&self, result: RecognitionResult) {
        (self.0)(result)
    }
}
