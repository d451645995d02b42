//! Console progress display for batch execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use super::runner::RunError;
use super::Task;

const BAR_TEMPLATE: &str =
    "[{bar:20}] {pos}/{len} ({percent}%) {msg}  Elapsed: {elapsed}  ETA: {eta}";

/// Live progress bar over a batch, counting completions and failures.
///
/// When disabled every method is a no-op on a hidden bar, so callers
/// never branch on progress mode.
pub struct ProgressTracker {
    bar: ProgressBar,
    failed: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(total: usize, enabled: bool) -> Self {
        let bar = if enabled {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(BAR_TEMPLATE)
                    .unwrap()
                    .progress_chars("█░"),
            );
            bar.enable_steady_tick(Duration::from_millis(500));
            bar
        } else {
            ProgressBar::hidden()
        };

        ProgressTracker {
            bar,
            failed: AtomicUsize::new(0),
        }
    }

    /// Records one finished task. Failures are printed immediately above
    /// the bar, not deferred to the summary.
    pub fn task_completed(&self, task: &Task, error: Option<&RunError>) {
        if let Some(err) = error {
            let failed = self.failed.fetch_add(1, Ordering::SeqCst) + 1;
            self.bar.println(format!("✗ {} failed: {}", task.run_id, err));
            self.bar.set_message(format!("(failed: {failed})"));
        }
        self.bar.inc(1);
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Clears the bar from the terminal.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
