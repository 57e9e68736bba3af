//! Ingestion progress sinks.

use indicatif::{ProgressBar, ProgressStyle};

/// Receives `(processed, total)` after each batch resolves.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, processed: usize, total: usize);

    /// Called once after every batch resolved.
    fn finish(&self, _complete: bool) {}
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_progress(&self, _processed: usize, _total: usize) {}
}

/// Terminal progress bar.
pub struct BarReporter {
    pb: ProgressBar,
}

impl BarReporter {
    pub fn new(total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
        pb.set_style(style);
        Self { pb }
    }
}

impl ProgressReporter for BarReporter {
    fn on_progress(&self, processed: usize, total: usize) {
        self.pb.set_length(total as u64);
        // Completions can be reported out of order; never move backwards.
        let pos = self.pb.position().max(processed as u64);
        self.pb.set_position(pos);
    }

    fn finish(&self, complete: bool) {
        if complete {
            self.pb.finish_with_message("Ingestion complete");
        } else {
            self.pb.abandon_with_message("Ingestion incomplete");
        }
    }
}
