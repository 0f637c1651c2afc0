//! Camera abstraction the pipeline drives.

use std::sync::Arc;

use flume::{Sender, TrySendError};
use thiserror::Error;
use tracing::warn;

use crate::capture::Frame;
use crate::pipeline::{LatestFrameSlot, PipelineStats};

/// Frame acquisition failures.
///
/// Returned from [`FrameSource::start`] these abort the transition to
/// running; reported through [`FrameSink::fault`] while running they are
/// informational only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameSourceError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("capture device error: {0}")]
    Device(String),

    #[error("all {0} capture buffers are still held downstream")]
    BuffersExhausted(u32),

    #[error("unsupported rotation {0} degrees")]
    InvalidRotation(u16),

    #[error("source already started")]
    AlreadyStarted,
}

/// A camera that pushes frames at its own cadence.
///
/// Implementations must serialize deliveries (no concurrent
/// [`FrameSink::push`] calls) and must not deliver anything once
/// [`FrameSource::stop`] has returned.
pub trait FrameSource: Send + 'static {
    /// Begin emitting frames into `sink`.
    fn start(&mut self, sink: FrameSink) -> Result<(), FrameSourceError>;

    /// Stop emitting and drop the sink. Blocks until the emitter has quit.
    fn stop(&mut self);

    fn name(&self) -> &str {
        "camera"
    }
}

/// Delivery side of the pipeline as seen by a [`FrameSource`].
#[derive(Clone)]
pub struct FrameSink {
    slot: Arc<LatestFrameSlot>,
    faults: Sender<FrameSourceError>,
    stats: Arc<PipelineStats>,
}

impl FrameSink {
    pub fn new(
        slot: Arc<LatestFrameSlot>,
        faults: Sender<FrameSourceError>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            slot,
            faults,
            stats,
        }
    }

    /// Hand over a frame. Never blocks on the recognizer.
    pub fn push(&self, frame: Frame) {
        self.slot.put(frame);
    }

    /// Report a non-fatal acquisition error to the lifecycle owner.
    pub fn fault(&self, error: FrameSourceError) {
        warn!(%error, "frame acquisition failed");
        self.stats.record_fault();
        if let Err(TrySendError::Full(error)) = self.faults.try_send(error) {
            warn!(%error, "fault channel full, dropping report");
        }
    }
}
