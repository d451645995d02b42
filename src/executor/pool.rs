//! Bounded worker pool running many trials concurrently.

use chrono::Local;
use log::{info, warn, LevelFilter};
use rayon::prelude::*;
use std::time::Instant;

use super::batch_log::BatchLogger;
use super::progress::ProgressTracker;
use super::{Task, TaskRunner, TrialResult};

#[derive(Debug, thiserror::Error)]
#[error("failed to build worker pool: {0}")]
pub struct PoolError(#[from] rayon::ThreadPoolBuildError);

/// Runs tasks on a dedicated pool of `parallel` workers.
///
/// Each worker takes one task at a time to completion; a failing task
/// never stops the batch. Results come back index-aligned with the
/// submitted tasks regardless of completion order.
pub struct ParallelExecutor<'a> {
    pool: rayon::ThreadPool,
    runner: &'a dyn TaskRunner,
    batch_logger: Option<&'a BatchLogger>,
}

impl<'a> ParallelExecutor<'a> {
    /// Builds an executor with `parallel` workers, minimum 1.
    pub fn new(parallel: usize, runner: &'a dyn TaskRunner) -> Result<Self, PoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallel.max(1))
            .build()?;
        Ok(ParallelExecutor {
            pool,
            runner,
            batch_logger: None,
        })
    }

    /// Mirrors every task completion into the batch log.
    pub fn with_batch_logger(mut self, logger: &'a BatchLogger) -> Self {
        self.batch_logger = Some(logger);
        self
    }

    pub fn execute(&self, tasks: &[Task]) -> Vec<TrialResult> {
        self.execute_with_progress(tasks, false)
    }

    /// Runs all tasks, optionally rendering a progress bar. In progress
    /// mode console logging is capped at warnings so the bar stays
    /// readable; the batch log still receives everything.
    pub fn execute_with_progress(&self, tasks: &[Task], show_progress: bool) -> Vec<TrialResult> {
        let saved_level = log::max_level();
        if show_progress {
            log::set_max_level(LevelFilter::Warn);
        }

        let progress = ProgressTracker::new(tasks.len(), show_progress);

        let results: Vec<TrialResult> = self.pool.install(|| {
            tasks
                .par_iter()
                .map(|task| self.run_one(task, show_progress, &progress))
                .collect()
        });

        progress.finish();
        if show_progress {
            log::set_max_level(saved_level);
        }
        results
    }

    fn run_one(&self, task: &Task, show_progress: bool, progress: &ProgressTracker) -> TrialResult {
        let worker = rayon::current_thread_index().unwrap_or(0);
        if !show_progress {
            info!("[Worker {}] Starting task {}", worker, task.run_id);
        }

        let started = Local::now();
        let clock = Instant::now();
        let outcome = self.runner.run(task, started);
        let duration = clock.elapsed();

        progress.task_completed(task, outcome.error.as_ref());
        if let Some(logger) = self.batch_logger {
            logger.task_completed(task, duration, outcome.error.as_ref(), outcome.log_dir.as_deref());
        }

        if !show_progress {
            match &outcome.error {
                Some(err) => warn!(
                    "[Worker {}] Task {} failed: {} ({:.1}s)",
                    worker,
                    task.run_id,
                    err,
                    duration.as_secs_f64()
                ),
                None => info!(
                    "[Worker {}] Task {} completed ({:.1}s)",
                    worker,
                    task.run_id,
                    duration.as_secs_f64()
                ),
            }
        }

        TrialResult {
            run_id: task.run_id.clone(),
            started,
            duration,
            log_dir: outcome.log_dir,
            error: outcome.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::executor::{generate_tasks, RunError, TrialOutcome};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sleeps for a fixed time per task and fails tasks whose run ID
    /// contains the configured needle.
    struct SleepRunner {
        delay: Duration,
        fail_matching: Option<&'static str>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl SleepRunner {
        fn new(delay: Duration) -> Self {
            SleepRunner {
                delay,
                fail_matching: None,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        fn failing_on(delay: Duration, needle: &'static str) -> Self {
            SleepRunner {
                fail_matching: Some(needle),
                ..Self::new(delay)
            }
        }
    }

    impl TaskRunner for SleepRunner {
        fn run(&self, task: &Task, _started: chrono::DateTime<Local>) -> TrialOutcome {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);

            let error = match self.fail_matching {
                Some(needle) if task.run_id.contains(needle) => Some(RunError::Validation(
                    DeviceError::HostNotFound("r9".to_string()),
                )),
                _ => None,
            };
            TrialOutcome {
                log_dir: None,
                error,
            }
        }
    }

    #[test]
    fn test_results_are_index_aligned() {
        let tasks = generate_tasks(Path::new("demo.json"), 10, false);
        let runner = SleepRunner::new(Duration::from_millis(5));
        let executor = ParallelExecutor::new(4, &runner).unwrap();

        let results = executor.execute(&tasks);

        assert_eq!(results.len(), tasks.len());
        for (task, result) in tasks.iter().zip(&results) {
            assert_eq!(result.run_id, task.run_id);
        }
    }

    #[test]
    fn test_pool_bounds_concurrency() {
        let tasks = generate_tasks(Path::new("demo.json"), 10, false);
        let runner = SleepRunner::new(Duration::from_millis(50));
        let executor = ParallelExecutor::new(4, &runner).unwrap();

        let clock = Instant::now();
        executor.execute(&tasks);
        let elapsed = clock.elapsed();

        let max = runner.max_active.load(Ordering::SeqCst);
        assert!(max <= 4, "observed {max} concurrent tasks");
        assert!(max >= 2, "tasks never overlapped");
        // 10 tasks of 50ms across 4 workers is 3 rounds, far below the
        // 500ms a serial run would take.
        assert!(elapsed < Duration::from_millis(450), "took {elapsed:?}");
        assert!(elapsed >= Duration::from_millis(50));
    }

    #[test]
    fn test_single_worker_serializes() {
        let tasks = generate_tasks(Path::new("demo.json"), 4, false);
        let runner = SleepRunner::new(Duration::from_millis(10));
        // A parallelism of zero still gets one worker.
        let executor = ParallelExecutor::new(0, &runner).unwrap();

        executor.execute(&tasks);

        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_task_does_not_stop_batch() {
        let tasks = generate_tasks(Path::new("demo.json"), 3, false);
        let runner = SleepRunner::failing_on(Duration::from_millis(1), "_002");
        let executor = ParallelExecutor::new(2, &runner).unwrap();

        let results = executor.execute(&tasks);

        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert!(results[2].is_success());
    }
}
