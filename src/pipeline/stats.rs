//! Pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use crate::recognition::RecognitionResult;

/// Counters shared by the source, slot and worker.
///
/// Every increment is mirrored to the `metrics` facade, which is a no-op
/// until a recorder is installed.
#[derive(Default)]
pub struct PipelineStats {
    counters: CachePadded<Counters>,
}

#[derive(Default)]
struct Counters {
    captured: AtomicU64,
    dropped: AtomicU64,
    consumed: AtomicU64,
    recognized: AtomicU64,
    empty: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    faults: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames delivered by the source.
    pub captured: u64,
    /// Frames overwritten in the slot before the worker got to them.
    pub dropped: u64,
    /// Frames taken by the worker.
    pub consumed: u64,
    pub recognized: u64,
    pub empty: u64,
    pub failed: u64,
    /// Results thrown away because the pipeline stopped mid-recognition.
    pub discarded: u64,
    pub faults: u64,
}

impl PipelineStats {
    pub fn record_captured(&self) {
        self.counters.captured.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("textcam_frames_captured_total").increment(1);
    }

    pub fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("textcam_frames_dropped_total").increment(1);
    }

    pub fn record_consumed(&self) {
        self.counters.consumed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("textcam_frames_consumed_total").increment(1);
    }

    pub fn record_result(&self, result: &RecognitionResult) {
        let counter = match result {
            RecognitionResult::Text(_) => &self.counters.recognized,
            RecognitionResult::Empty => &self.counters.empty,
            RecognitionResult::Failure(_) => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("textcam_recognition_results_total", "outcome" => result.label())
            .increment(1);
    }

    pub fn record_discarded(&self) {
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("textcam_results_discarded_total").increment(1);
    }

    pub fn record_fault(&self) {
        self.counters.faults.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("textcam_capture_faults_total").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            captured: c.captured.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            consumed: c.consumed.load(Ordering::Relaxed),
            recognized: c.recognized.load(Ordering::Relaxed),
            empty: c.empty.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            faults: c.faults.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Share of captured frames that never reached the recognizer.
    pub fn drop_ratio(&self) -> f64 {
        if self.captured == 0 {
            0.0
        } else {
            self.dropped as f64 / self.captured as f64
        }
    }
}
