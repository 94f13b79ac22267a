//! Step-based deployment progress
//!
//! Every run walks the same fixed list of [`PipelineStep`]s. Each step owns a share of a
//! 0–100 scale; the tracker only moves forward and never passes 100. Transfers can report
//! byte-level progress inside their share without completing the step.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// One discrete, ordered unit of the deployment sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PipelineStep {
    ProbeExists,
    Backup,
    Wipe,
    Recreate,
    SyncCode,
    TransferImage,
    LoadImage,
    StartService,
    HealthCheck,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 9] = [
        PipelineStep::ProbeExists,
        PipelineStep::Backup,
        PipelineStep::Wipe,
        PipelineStep::Recreate,
        PipelineStep::SyncCode,
        PipelineStep::TransferImage,
        PipelineStep::LoadImage,
        PipelineStep::StartService,
        PipelineStep::HealthCheck,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::ProbeExists => "probe-exists",
            PipelineStep::Backup => "backup",
            PipelineStep::Wipe => "wipe",
            PipelineStep::Recreate => "recreate",
            PipelineStep::SyncCode => "sync-code",
            PipelineStep::TransferImage => "transfer-image",
            PipelineStep::LoadImage => "load-image",
            PipelineStep::StartService => "start-service",
            PipelineStep::HealthCheck => "health-check",
        }
    }

    /// Zero-based position in the sequence
    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    /// Share of the 100% scale owned by this step
    pub fn percent_weight(&self) -> u8 {
        match self {
            PipelineStep::ProbeExists => 5,
            PipelineStep::Backup => 10,
            PipelineStep::Wipe => 5,
            PipelineStep::Recreate => 5,
            PipelineStep::SyncCode => 20,
            PipelineStep::TransferImage => 25,
            PipelineStep::LoadImage => 15,
            PipelineStep::StartService => 10,
            PipelineStep::HealthCheck => 5,
        }
    }

    /// Percentage reached once this step has completed
    pub fn cumulative_percent(&self) -> u8 {
        let total: u32 = Self::ALL[..=self.ordinal()]
            .iter()
            .map(|s| s.percent_weight() as u32)
            .sum();
        total.min(100) as u8
    }

    /// Percentage reached just before this step starts
    pub fn base_percent(&self) -> u8 {
        self.cumulative_percent() - self.percent_weight()
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Receives progress updates, e.g. to drive a terminal progress bar
pub trait ProgressSink: Send + Sync {
    /// A step has completed and the overall percentage moved to `percent`
    fn advanced(&self, step: PipelineStep, percent: u8);

    /// Byte-level progress inside `step`, as an overall percentage for display only
    fn sub_progress(&self, _step: PipelineStep, _percent: f64) {}

    /// The run ended
    fn finished(&self, _success: bool) {}
}

/// Monotonic, bounded progress over the fixed step list
pub struct ProgressTracker {
    percent: AtomicU8,
    /// Last whole display percentage reported for sub-step progress
    last_sub: AtomicU8,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("percent", &self.percent())
            .field("sink", &self.sink.as_ref().map(|_| "<ProgressSink>"))
            .finish()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            percent: AtomicU8::new(0),
            last_sub: AtomicU8::new(0),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Current overall percentage (0–100)
    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }

    /// Mark `step` complete. Never moves backwards.
    pub fn advance(&self, step: PipelineStep) -> u8 {
        let target = step.cumulative_percent();
        let previous = self.percent.fetch_max(target, Ordering::SeqCst);
        let percent = previous.max(target);
        self.last_sub.store(percent, Ordering::SeqCst);
        info!("[{}%] {}", percent, step);
        if let Some(sink) = &self.sink {
            sink.advanced(step, percent);
        }
        percent
    }

    /// Report `done` of `total` bytes moved inside `step` without completing it
    pub fn sub_progress(&self, step: PipelineStep, done: u64, total: u64) {
        let fraction = if total == 0 {
            1.0
        } else {
            (done as f64 / total as f64).clamp(0.0, 1.0)
        };
        let shown = (step.base_percent() as f64 + step.percent_weight() as f64 * fraction)
            .max(self.percent() as f64)
            .min(100.0);

        let whole = shown.floor() as u8;
        if self.last_sub.swap(whole, Ordering::SeqCst) != whole {
            debug!(
                "[{:.1}%] {} ({} / {} bytes)",
                shown, step, done, total
            );
        }
        if let Some(sink) = &self.sink {
            sink.sub_progress(step, shown);
        }
    }

    /// Close out the run. A successful run always ends at exactly 100%.
    pub fn finish(&self, success: bool) {
        if success {
            self.percent.store(100, Ordering::SeqCst);
        }
        if let Some(sink) = &self.sink {
            sink.finished(success);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        advanced: Mutex<Vec<(PipelineStep, u8)>>,
        sub: Mutex<Vec<f64>>,
    }

    impl ProgressSink for RecordingSink {
        fn advanced(&self, step: PipelineStep, percent: u8) {
            self.advanced.lock().unwrap().push((step, percent));
        }

        fn sub_progress(&self, _step: PipelineStep, percent: f64) {
            self.sub.lock().unwrap().push(percent);
        }
    }

    #[test]
    fn test_weights_cover_the_whole_scale() {
        let total: u32 = PipelineStep::ALL
            .iter()
            .map(|s| s.percent_weight() as u32)
            .sum();
        assert_eq!(total, 100);
        assert_eq!(PipelineStep::HealthCheck.cumulative_percent(), 100);
        assert_eq!(PipelineStep::ProbeExists.base_percent(), 0);
    }

    #[test]
    fn test_steps_are_ordered() {
        for (i, step) in PipelineStep::ALL.iter().enumerate() {
            assert_eq!(step.ordinal(), i);
        }
        assert_eq!(PipelineStep::SyncCode.to_string(), "sync-code");
    }

    #[test]
    fn test_advance_is_monotonic() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.advance(PipelineStep::Wipe), 20);
        // Going back to an earlier step does not lower the percentage
        assert_eq!(tracker.advance(PipelineStep::ProbeExists), 20);
        assert_eq!(tracker.percent(), 20);
    }

    #[test]
    fn test_full_run_reaches_exactly_100() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = ProgressTracker::new().with_sink(sink.clone());
        for step in PipelineStep::ALL {
            tracker.advance(step);
        }
        tracker.finish(true);
        assert_eq!(tracker.percent(), 100);

        let advanced = sink.advanced.lock().unwrap();
        assert_eq!(advanced.len(), 9);
        assert!(advanced.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(advanced.last(), Some(&(PipelineStep::HealthCheck, 100)));
    }

    #[test]
    fn test_sub_progress_does_not_advance() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = ProgressTracker::new().with_sink(sink.clone());
        tracker.advance(PipelineStep::SyncCode);

        tracker.sub_progress(PipelineStep::TransferImage, 50, 100);
        assert_eq!(tracker.percent(), 45);
        let sub = sink.sub.lock().unwrap();
        assert!((sub[0] - 57.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_run_keeps_partial_percent() {
        let tracker = ProgressTracker::new();
        tracker.advance(PipelineStep::Backup);
        tracker.finish(false);
        assert_eq!(tracker.percent(), 15);
    }
}
