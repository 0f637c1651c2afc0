//! Frame slot, recognition worker and the controller tying them together.

pub mod controller;
pub mod slot;
pub mod stats;
pub mod worker;

pub use controller::{PipelineController, PipelineError, PipelineState};
pub use slot::LatestFrameSlot;
pub use stats::{PipelineStats, StatsSnapshot};
pub use worker::RecognitionWorker;
