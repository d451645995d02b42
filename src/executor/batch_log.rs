//! Shared execution log for batch and repeat runs.
//!
//! One file per batch records every task's completion and the final
//! summary, so long unattended runs leave a durable record even when
//! console output scrolled away or the progress bar swallowed it.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Local;

use super::runner::RunError;
use super::{human_duration, summarize, Task, TrialResult};

/// Default file name for the shared batch execution log.
pub const BATCH_LOG_FILE: &str = "faultlab.log";

/// Formats one timestamped log line. The per-trial control log uses the
/// same shape so both files read alike.
pub(crate) fn format_line(level: &str, message: &str) -> String {
    format!(
        "{} [{}] {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        level,
        message
    )
}

/// Append-only, thread-safe log over one batch execution.
///
/// Write failures are swallowed: a full disk must not take the batch
/// down with it.
pub struct BatchLogger {
    file: Mutex<File>,
    path: PathBuf,
    started: Instant,
}

impl BatchLogger {
    /// Creates the batch log file, truncating any previous run's log.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(BatchLogger {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            started: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn log(&self, level: &str, message: &str) {
        let line = format_line(level, message);
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _ = file.write_all(line.as_bytes());
    }

    fn info(&self, message: &str) {
        self.log("INFO", message);
    }

    fn error(&self, message: &str) {
        self.log("ERROR", message);
    }

    /// Records the batch header: invoking command, plan file if any, and
    /// the planned workload.
    pub fn log_start(
        &self,
        command: &str,
        scenarios: usize,
        total_runs: usize,
        parallel: usize,
        plan_file: Option<&Path>,
    ) {
        self.info("=== Batch Execution Started ===");
        self.info(&format!("Command: {command}"));
        if let Some(plan) = plan_file {
            self.info(&format!("Plan file: {}", plan.display()));
        }
        self.info(&format!(
            "Scenarios: {scenarios}, Total runs: {total_runs}, Parallel: {parallel}"
        ));
        self.info("");
    }

    /// Records one task's completion, with its log directory when the
    /// task failed.
    pub fn task_completed(
        &self,
        task: &Task,
        duration: Duration,
        error: Option<&RunError>,
        log_dir: Option<&Path>,
    ) {
        match error {
            Some(err) => {
                self.error(&format!(
                    "[{}] Failed: {} ({:.1}s)",
                    task.run_id,
                    err,
                    duration.as_secs_f64()
                ));
                if let Some(dir) = log_dir {
                    self.error(&format!("[{}] Log directory: {}", task.run_id, dir.display()));
                }
            }
            None => self.info(&format!(
                "[{}] Completed successfully ({:.1}s)",
                task.run_id,
                duration.as_secs_f64()
            )),
        }
    }

    /// Records the final summary with per-failure pointers to each
    /// trial's control.log.
    pub fn log_summary(&self, results: &[TrialResult]) {
        let summary = summarize(results);
        let elapsed = self.started.elapsed();

        self.info("");
        self.info("=== Execution Summary ===");
        self.info(&format!(
            "Total: {}, Succeeded: {}, Failed: {}",
            summary.total, summary.succeeded, summary.failed
        ));
        self.info(&format!(
            "Total task duration: {}",
            human_duration(summary.total_duration)
        ));
        self.info(&format!("Wall clock time: {}", human_duration(elapsed)));

        if summary.failed > 0 {
            self.info("");
            self.info("Failed tasks:");
            for result in results {
                if let Some(err) = &result.error {
                    self.error(&format!("  - {}: {}", result.run_id, err));
                    if let Some(dir) = &result.log_dir {
                        self.error(&format!("    Log: {}/control.log", dir.display()));
                    }
                }
            }
        }

        self.info("=== Execution Completed ===");
    }
}
