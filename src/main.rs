use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, Result, WrapErr};
use env_logger::Env;
use log::{info, warn};

use faultlab::executor::{
    clean_containers, clean_networks, detect_file_kind, generate_tasks, generate_tasks_from_plan,
    lab_names_from_plan, lab_names_from_scenario, load_plan, print_summary, summarize, BatchLogger,
    FileKind, ParallelExecutor, Task, TrialRunner, BATCH_LOG_FILE,
};
use faultlab::runtime::ExecRunner;
use faultlab::scenario::is_yaml_path;

/// Synthetic network trouble data generator
#[derive(Parser)]
#[command(name = "faultlab")]
#[command(about = "Generates network trouble data by replaying fault scenarios in emulated labs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single scenario
    Run {
        /// Path to the scenario file
        scenario: PathBuf,

        /// Parse the scenario as YAML regardless of extension
        #[arg(long)]
        yaml: bool,
    },

    /// Run a scenario multiple times with optional parallelism
    Repeat {
        /// Path to the scenario file
        scenario: PathBuf,

        /// Number of repetitions
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Maximum parallel executions
        #[arg(short = 'p', long, default_value = "1")]
        parallel: usize,

        /// Parse the scenario as YAML regardless of extension
        #[arg(long)]
        yaml: bool,

        /// Show a progress bar instead of detailed logs
        #[arg(long)]
        progress: bool,
    },

    /// Run multiple scenarios from a plan file
    Batch {
        /// Path to the plan file
        plan: PathBuf,

        /// Override the parallel setting in the plan file
        #[arg(short = 'p', long, default_value = "0")]
        parallel: usize,

        /// Show a progress bar instead of detailed logs
        #[arg(long)]
        progress: bool,
    },

    /// Clean up containers from a plan or scenario file (auto-detects file type)
    Clean {
        /// Path to the plan or scenario file
        file: PathBuf,

        /// Show what would be removed without actually removing
        #[arg(long)]
        dry_run: bool,

        /// Number of repetitions (for scenario file only)
        #[arg(short = 'n', long, default_value = "0")]
        count: usize,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match cli.command {
        Commands::Run { scenario, yaml } => run_scenario(&scenario, yaml),
        Commands::Repeat {
            scenario,
            count,
            parallel,
            yaml,
            progress,
        } => repeat_scenario(&scenario, count, parallel, yaml, progress),
        Commands::Batch {
            plan,
            parallel,
            progress,
        } => batch_scenarios(&plan, parallel, progress),
        Commands::Clean {
            file,
            dry_run,
            count,
        } => clean(&file, dry_run, count),
    }
}

/// Deploy, fault injection, and cleanup all shell out through sudo, so
/// refuse to start without root instead of stalling on a password prompt
/// mid-batch.
fn sudo_check() -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    // /proc/self is owned by the effective UID of this process.
    let euid = std::fs::metadata("/proc/self")
        .map(|meta| meta.uid())
        .unwrap_or(0);
    if euid != 0 {
        bail!("faultlab needs sudo privileges to run");
    }
    Ok(())
}

fn run_scenario(scenario: &Path, yaml: bool) -> Result<()> {
    sudo_check()?;

    let yaml = yaml || is_yaml_path(&scenario.to_string_lossy());
    let tasks = generate_tasks(scenario, 1, yaml);

    let runner = TrialRunner::new(Arc::new(ExecRunner::new()));
    let executor = ParallelExecutor::new(1, &runner)?;
    let mut results = executor.execute(&tasks);

    match results.pop().and_then(|result| result.error) {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

fn repeat_scenario(
    scenario: &Path,
    count: usize,
    parallel: usize,
    yaml: bool,
    show_progress: bool,
) -> Result<()> {
    if count < 1 {
        bail!("count must be at least 1");
    }
    let parallel = parallel.max(1);

    sudo_check()?;

    let batch_logger = open_batch_logger();
    if let Some(logger) = &batch_logger {
        logger.log_start("repeat", 1, count, parallel, None);
        info!("Batch log: {}", logger.path().display());
    }

    info!(
        "Starting repeat execution: {} x {} (parallel: {})",
        scenario.display(),
        count,
        parallel
    );

    let yaml = yaml || is_yaml_path(&scenario.to_string_lossy());
    let tasks = generate_tasks(scenario, count, yaml);

    execute_tasks(&tasks, parallel, show_progress, batch_logger.as_ref())
}

fn batch_scenarios(plan_path: &Path, parallel_override: usize, show_progress: bool) -> Result<()> {
    sudo_check()?;

    let plan = load_plan(plan_path).wrap_err("failed to load plan")?;
    let parallel = if parallel_override > 0 {
        parallel_override
    } else {
        plan.parallel
    };

    let base_dir = base_dir_of(plan_path);
    let tasks = generate_tasks_from_plan(&plan, &base_dir).wrap_err("failed to generate tasks")?;
    let (scenarios, total_runs) = plan.summary();

    let batch_logger = open_batch_logger();
    if let Some(logger) = &batch_logger {
        logger.log_start("batch", scenarios, total_runs, parallel, Some(plan_path));
        info!("Batch log: {}", logger.path().display());
    }

    info!(
        "Starting batch execution: {} scenarios, {} total runs (parallel: {})",
        scenarios, total_runs, parallel
    );

    execute_tasks(&tasks, parallel, show_progress, batch_logger.as_ref())
}

fn clean(file: &Path, dry_run: bool, count: usize) -> Result<()> {
    sudo_check()?;

    let kind = detect_file_kind(file).wrap_err("failed to detect file type")?;
    let lab_names = match kind {
        FileKind::Plan => {
            let plan = load_plan(file).wrap_err("failed to load plan")?;
            let names = lab_names_from_plan(&plan, &base_dir_of(file))
                .wrap_err("failed to generate lab names")?;

            let (scenarios, total_runs) = plan.summary();
            info!(
                "Cleaning containers for plan: {} scenarios, {} total runs",
                scenarios, total_runs
            );
            names
        }
        FileKind::Scenario => {
            if count > 0 {
                info!(
                    "Cleaning containers for scenario {} x {}",
                    file.display(),
                    count
                );
            } else {
                info!("Cleaning containers for scenario {}", file.display());
            }
            lab_names_from_scenario(file, count)
        }
        FileKind::Unknown => bail!(
            "unable to determine file type: {} (file should contain 'scenarios' key \
             for plan or 'event'/'scenarioName' key for scenario)",
            file.display()
        ),
    };

    let runner = ExecRunner::new();

    let removed =
        clean_containers(&runner, &lab_names, dry_run).wrap_err("failed to clean containers")?;
    if dry_run {
        info!("Dry run: would remove {} containers", removed);
    } else {
        info!("Removed {} containers", removed);
    }

    let networks_removed =
        clean_networks(&runner, &lab_names, dry_run).wrap_err("failed to clean Docker networks")?;
    if dry_run {
        info!("Dry run: would remove {} Docker networks", networks_removed);
    } else if networks_removed > 0 {
        info!("Removed {} Docker networks", networks_removed);
    }

    Ok(())
}

/// Runs the tasks on a bounded pool, then reports to the batch log and
/// the console. Any task failure turns into a nonzero exit.
fn execute_tasks(
    tasks: &[Task],
    parallel: usize,
    show_progress: bool,
    batch_logger: Option<&BatchLogger>,
) -> Result<()> {
    // Trial lifecycle lines stay out of the console while the progress
    // bar owns it.
    let runner = TrialRunner::new(Arc::new(ExecRunner::new())).quiet(show_progress);
    let mut executor = ParallelExecutor::new(parallel, &runner)?;
    if let Some(logger) = batch_logger {
        executor = executor.with_batch_logger(logger);
    }

    let results = executor.execute_with_progress(tasks, show_progress);

    if let Some(logger) = batch_logger {
        logger.log_summary(&results);
    }
    print_summary(&results);

    let summary = summarize(&results);
    if summary.failed > 0 {
        bail!("{}/{} tasks failed", summary.failed, results.len());
    }
    Ok(())
}

/// Batch logging is best effort: when the log file cannot be created the
/// batch still runs, just without it.
fn open_batch_logger() -> Option<BatchLogger> {
    match BatchLogger::create(Path::new(BATCH_LOG_FILE)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            warn!("Failed to create batch log file: {}", err);
            None
        }
    }
}

/// Directory of an existing plan file, used to resolve the relative
/// scenario patterns inside it.
fn base_dir_of(path: &Path) -> PathBuf {
    path.canonicalize()
        .ok()
        .and_then(|abs| abs.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
