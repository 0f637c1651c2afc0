//! Single-slot keep-latest frame buffer

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::trace;

use crate::capture::Frame;
use crate::pipeline::PipelineStats;

/// Holds at most one frame: the newest one nobody has taken yet.
///
/// `put` overwrites and releases whatever is stored, so the producer never
/// waits on the consumer. The lock is held only for the swap; release hooks
/// of displaced frames run after it is dropped.
pub struct LatestFrameSlot {
    cell: Mutex<Option<Frame>>,
    ready: Notify,
    stats: Arc<PipelineStats>,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::with_stats(Arc::default())
    }

    pub fn with_stats(stats: Arc<PipelineStats>) -> Self {
        Self {
            cell: Mutex::new(None),
            ready: Notify::new(),
            stats,
        }
    }

    /// Producer: store `frame`, releasing any frame it displaces.
    ///
    /// Returns true if an unconsumed frame was dropped.
    pub fn put(&self, frame: Frame) -> bool {
        self.stats.record_captured();
        let displaced = self.lock().replace(frame);

        let dropped = match displaced {
            Some(stale) => {
                trace!(sequence = stale.sequence(), "overwriting unconsumed frame");
                self.stats.record_dropped();
                stale.release();
                true
            }
            None => false,
        };

        self.ready.notify_one();
        dropped
    }

    /// Consumer: remove the stored frame, if any.
    pub fn take(&self) -> Option<Frame> {
        let frame = self.lock().take();
        if frame.is_some() {
            self.stats.record_consumed();
        }
        frame
    }

    /// Release the stored frame without handing it to anyone.
    pub fn clear(&self) -> bool {
        let stale = self.lock().take();
        match stale {
            Some(frame) => {
                trace!(sequence = frame.sequence(), "clearing unconsumed frame");
                frame.release();
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Wait for the next `put`. A put made while nobody waits is remembered,
    /// so this may return with the slot already drained again.
    pub async fn wait(&self) {
        self.ready.notified().await;
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        // A panicking release hook never runs under the lock, so the
        // contents are always consistent.
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LatestFrameSlot {
    fn default() -> Self {
        Self::new()
    }
}
