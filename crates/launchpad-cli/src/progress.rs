//! Terminal progress bar for deployment runs

use indicatif::{ProgressBar, ProgressStyle};
use launchpad_core::{PipelineStep, ProgressSink};
use std::time::Duration;

/// Renders [`ProgressSink`] updates as a single 0–100 bar on stderr
pub struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// A bar that never draws
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl ProgressSink for TerminalProgress {
    fn advanced(&self, step: PipelineStep, percent: u8) {
        self.bar.set_position(percent as u64);
        self.bar.set_message(format!("{} done", step));
    }

    fn sub_progress(&self, step: PipelineStep, percent: f64) {
        self.bar.set_position(percent.floor() as u64);
        self.bar.set_message(step.to_string());
    }

    fn finished(&self, success: bool) {
        if success {
            self.bar.finish_with_message("deployed");
        } else {
            self.bar.abandon_with_message("failed");
        }
    }
}
