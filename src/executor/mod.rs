//! Parallel execution control for scenario trials.
//!
//! A batch is a list of [`Task`]s, each naming one scenario file and a
//! run ID that is unique within the batch. The run ID doubles as the
//! trial's containerlab lab name, which is what keeps concurrently
//! deployed trials apart: lab name determines subnet and log directory,
//! so no two tasks ever share network state.
//!
//! [`ParallelExecutor`] feeds tasks to a bounded worker pool and returns
//! one [`TrialResult`] per task, index-aligned with the input. A failing
//! task never stops the batch; failures surface in the summary and the
//! batch log.

pub mod batch_log;
pub mod cleaner;
pub mod plan;
pub mod pool;
pub mod progress;
pub mod runner;

pub use batch_log::{BatchLogger, BATCH_LOG_FILE};
pub use cleaner::{
    clean_containers, clean_networks, lab_names_from_plan, lab_names_from_scenario, CleanError,
};
pub use plan::{
    detect_file_kind, generate_tasks_from_plan, load_plan, FileKind, Plan, PlanError,
    ScenarioEntry,
};
pub use pool::{ParallelExecutor, PoolError};
pub use progress::ProgressTracker;
pub use runner::{RunError, TrialRunner};

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};

/// One scheduled trial of one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub scenario_path: PathBuf,
    /// Unique within the batch, e.g. `baseline_003`. Doubles as the
    /// trial's lab name.
    pub run_id: String,
    /// Parse the scenario as YAML instead of JSON.
    pub yaml: bool,
}

/// What a runner hands back for one task.
///
/// The log directory is reported even when the trial failed, so the
/// summary can point at its control.log for post-mortem inspection.
#[derive(Debug, Default)]
pub struct TrialOutcome {
    pub log_dir: Option<PathBuf>,
    pub error: Option<RunError>,
}

/// Runs one task to completion.
///
/// Implementations are shared across worker threads; all per-trial state
/// must live inside the call.
pub trait TaskRunner: Sync {
    fn run(&self, task: &Task, started: DateTime<Local>) -> TrialOutcome;
}

/// Outcome of one finished task. The executor returns these index-aligned
/// with the submitted task list, regardless of completion order.
#[derive(Debug)]
pub struct TrialResult {
    pub run_id: String,
    pub started: DateTime<Local>,
    pub duration: Duration,
    pub log_dir: Option<PathBuf>,
    pub error: Option<RunError>,
}

impl TrialResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate counts over a batch's results.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Sum of per-task durations, not wall-clock time.
    pub total_duration: Duration,
}

/// Tasks for `count` repetitions of one scenario, named `{stem}_001`
/// onward.
pub fn generate_tasks(scenario_path: &Path, count: usize, yaml: bool) -> Vec<Task> {
    let stem = scenario_stem(scenario_path);
    (1..=count)
        .map(|seq| Task {
            scenario_path: scenario_path.to_path_buf(),
            run_id: format!("{stem}_{seq:03}"),
            yaml,
        })
        .collect()
}

/// Base name used for run IDs, e.g. `scenarios/A1_delay.json` turns
/// into `A1_delay`.
pub fn scenario_stem(path: &Path) -> String {
    match path.file_stem() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => path.to_string_lossy().into_owned(),
    }
}

pub fn summarize(results: &[TrialResult]) -> BatchSummary {
    let mut summary = BatchSummary {
        total: results.len(),
        ..BatchSummary::default()
    };
    for result in results {
        if result.is_success() {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
        summary.total_duration += result.duration;
    }
    summary
}

/// Prints the end-of-batch summary to stdout, enumerating every failed
/// task with its control.log location.
pub fn print_summary(results: &[TrialResult]) {
    let summary = summarize(results);

    println!();
    println!("========== Execution Summary ==========");
    println!(
        "Total: {}, Succeeded: {}, Failed: {}",
        summary.total, summary.succeeded, summary.failed
    );
    println!("Total Duration: {}", human_duration(summary.total_duration));

    if summary.failed > 0 {
        println!();
        println!("Failed tasks:");
        for result in results {
            if let Some(err) = &result.error {
                println!("  - {}: {}", result.run_id, err);
                if let Some(dir) = &result.log_dir {
                    println!("    Log: {}/control.log", dir.display());
                }
            }
        }
    }
    println!("========================================");
}

/// Renders a duration rounded down to whole seconds, e.g. `2m 3s`.
pub(crate) fn human_duration(duration: Duration) -> String {
    humantime_serde::re::humantime::format_duration(Duration::from_secs(duration.as_secs()))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(run_id: &str, secs: u64, error: Option<RunError>) -> TrialResult {
        TrialResult {
            run_id: run_id.to_string(),
            started: Local::now(),
            duration: Duration::from_secs(secs),
            log_dir: None,
            error,
        }
    }

    #[test]
    fn test_generate_tasks_numbers_from_one() {
        let tasks = generate_tasks(Path::new("scenarios/A1_delay_pause.json"), 3, false);

        let ids: Vec<&str> = tasks.iter().map(|t| t.run_id.as_str()).collect();
        assert_eq!(ids, vec!["A1_delay_pause_001", "A1_delay_pause_002", "A1_delay_pause_003"]);
        assert!(tasks
            .iter()
            .all(|t| t.scenario_path == Path::new("scenarios/A1_delay_pause.json")));
        assert!(tasks.iter().all(|t| !t.yaml));
    }

    #[test]
    fn test_scenario_stem_strips_directory_and_extension() {
        assert_eq!(scenario_stem(Path::new("/path/to/baseline.json")), "baseline");
        assert_eq!(scenario_stem(Path::new("baseline.yaml")), "baseline");
        assert_eq!(scenario_stem(Path::new("noext")), "noext");
    }

    #[test]
    fn test_summarize_counts_failures_and_durations() {
        let results = vec![
            result("a_001", 2, None),
            result("a_002", 3, Some(RunError::Validation(
                crate::device::DeviceError::HostNotFound("r9".to_string()),
            ))),
            result("a_003", 5, None),
        ];

        let summary = summarize(&results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_duration, Duration::from_secs(10));
    }

    #[test]
    fn test_human_duration_rounds_to_seconds() {
        assert_eq!(human_duration(Duration::from_millis(123_456)), "2m 3s");
        assert_eq!(human_duration(Duration::from_secs(0)), "0s");
    }
}
