//! Execution of one trial from scenario load to teardown.
//!
//! A trial owns everything it touches: the scenario and device data are
//! loaded fresh into owned values, the lab name comes from the task's
//! run ID, and the log directory is derived from both. Nothing is
//! shared between trials, so any number of them can run concurrently.
//!
//! Once the network deploys, teardown is armed as a scope guard: log
//! collection (while the containers still exist) followed by destroy
//! runs on every exit path, including event failures. Teardown problems
//! are logged, never raised, because cleanup is best effort.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};

use super::batch_log::format_line;
use super::{Task, TaskRunner, TrialOutcome};
use crate::device::{load_device_data, DeviceData, DeviceError};
use crate::events::{EventError, EventExecutor, PumbaExecutor};
use crate::network::{logs, NetworkController, NetworkError};
use crate::runtime::SharedRunner;
use crate::scenario::{load_scenario, Scenario, ScenarioError};

/// Fatal error of one trial. Event-level failures surface here only as
/// the aggregate [`RunError::Events`] after every event has finished.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to load scenario: {0}")]
    Load(#[from] ScenarioError),
    #[error("failed to load scenario: {0}")]
    LoadDevices(#[source] DeviceError),
    #[error("failed to create log directory: {source}")]
    CreateLogDir {
        #[source]
        source: io::Error,
    },
    #[error("failed to create control.log: {source}")]
    ControlLog {
        #[source]
        source: io::Error,
    },
    #[error("host validation failed: {0}")]
    Validation(#[source] DeviceError),
    #[error("failed to get initial file sizes: {source}")]
    Snapshot {
        #[source]
        source: io::Error,
    },
    #[error("failed to deploy network: {0}")]
    Deploy(#[source] NetworkError),
    #[error("failed to setup tcpdump on {host}: {source}")]
    CaptureSetup {
        host: String,
        #[source]
        source: NetworkError,
    },
    #[error("event execution failed: {0}")]
    Events(#[source] EventError),
}

/// Runs one scenario trial per task.
pub struct TrialRunner {
    runner: SharedRunner,
    quiet: bool,
}

impl TrialRunner {
    pub fn new(runner: SharedRunner) -> Self {
        TrialRunner {
            runner,
            quiet: false,
        }
    }

    /// In quiet mode trial lifecycle lines go only to control.log, not
    /// the console. Used under the progress bar.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    fn load(&self, task: &Task) -> Result<(Scenario, DeviceData), RunError> {
        let scenario = load_scenario(&task.scenario_path, task.yaml)?;
        let devices = if scenario.data.is_empty() {
            DeviceData::default()
        } else {
            load_device_data(Path::new(&scenario.data)).map_err(RunError::LoadDevices)?
        };
        Ok((scenario, devices))
    }

    fn run_trial(
        &self,
        task: &Task,
        scenario: &Scenario,
        devices: &DeviceData,
        log_dir: &Path,
    ) -> Result<(), RunError> {
        fs::create_dir_all(log_dir).map_err(|source| RunError::CreateLogDir { source })?;
        let control = ControlLog::create(&log_dir.join("control.log"), self.quiet)
            .map_err(|source| RunError::ControlLog { source })?;

        let result = self.run_phases(task, scenario, devices, log_dir, &control);
        match &result {
            Ok(()) => control.info(&format!("Completed scenario {}", scenario.scenario_name)),
            Err(err) => control.error(&err.to_string()),
        }
        result
    }

    fn run_phases(
        &self,
        task: &Task,
        scenario: &Scenario,
        devices: &DeviceData,
        log_dir: &Path,
        control: &ControlLog,
    ) -> Result<(), RunError> {
        control.info(&format!("Starting scenario {}", scenario.scenario_name));

        let runner = self.runner.as_ref();
        let chaos = PumbaExecutor::new(runner);
        let executor = EventExecutor::new(scenario, devices, &task.run_id, runner, &chaos, log_dir);

        if scenario.no_deploy() {
            control.info("No topology specified, running in noDeploy mode (events only)");
            return executor.run_events().map_err(RunError::Events);
        }

        devices
            .validate_hosts(&scenario.hosts)
            .map_err(RunError::Validation)?;

        // Log sizes are snapshotted before deploy so collection catches
        // everything the trial wrote, including deploy-time output.
        let topo_dir = scenario.topo_dir();
        let initial_sizes =
            logs::record_log_sizes(&topo_dir).map_err(|source| RunError::Snapshot { source })?;

        let controller = NetworkController::new(scenario, devices, &task.run_id, runner);
        controller.deploy().map_err(RunError::Deploy)?;

        let mut teardown = Teardown {
            controller: &controller,
            control,
            topo_dir,
            trial_log_dir: log_dir,
            initial_sizes,
            collect: false,
        };

        for host in &scenario.hosts {
            controller
                .setup_capture(host)
                .map_err(|source| RunError::CaptureSetup {
                    host: host.clone(),
                    source,
                })?;
        }
        teardown.collect = true;

        executor.run_events().map_err(RunError::Events)
    }
}

impl TaskRunner for TrialRunner {
    fn run(&self, task: &Task, started: DateTime<Local>) -> TrialOutcome {
        // Load failures happen before a log directory exists.
        let (scenario, devices) = match self.load(task) {
            Ok(pair) => pair,
            Err(error) => {
                return TrialOutcome {
                    log_dir: None,
                    error: Some(error),
                }
            }
        };

        let log_dir = scenario.trial_log_dir(started, &task.run_id);
        let error = self.run_trial(task, &scenario, &devices, &log_dir).err();
        TrialOutcome {
            log_dir: Some(log_dir),
            error,
        }
    }
}

/// Scope guard for a deployed network: collects logs while the
/// containers still exist, then destroys the lab. Collection only runs
/// once telemetry setup succeeded; destroy runs unconditionally.
struct Teardown<'a> {
    controller: &'a NetworkController<'a>,
    control: &'a ControlLog,
    topo_dir: PathBuf,
    trial_log_dir: &'a Path,
    initial_sizes: HashMap<PathBuf, u64>,
    collect: bool,
}

impl Teardown<'_> {
    fn collect_logs(&self) -> Result<(), NetworkError> {
        let changed = logs::find_changed(&self.initial_sizes, &self.topo_dir).map_err(|source| {
            NetworkError::Collect {
                path: self.topo_dir.clone(),
                source,
            }
        })?;
        debug!("Log files: {:?}", changed);

        self.controller.collect_capture()?;
        self.controller.collect_logs(&changed, self.trial_log_dir)?;

        // Truncate so the next trial against this topology starts from
        // clean logs.
        logs::truncate_all(&changed).map_err(|source| NetworkError::Collect {
            path: self.topo_dir.clone(),
            source,
        })?;
        Ok(())
    }
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if self.collect {
            if let Err(err) = self.collect_logs() {
                self.control.warn(&format!("Log collection failed: {}", err));
            }
        }
        if let Err(err) = self.controller.destroy() {
            self.control.error(&format!("Failed to destroy network: {}", err));
        }
    }
}

/// Per-trial log sink: timestamped lines into the trial's control.log,
/// mirrored to the console unless quiet.
struct ControlLog {
    file: Mutex<File>,
    quiet: bool,
}

impl ControlLog {
    fn create(path: &Path, quiet: bool) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(ControlLog {
            file: Mutex::new(file),
            quiet,
        })
    }

    fn info(&self, message: &str) {
        if !self.quiet {
            info!("{}", message);
        }
        self.write("INFO", message);
    }

    fn warn(&self, message: &str) {
        if !self.quiet {
            warn!("{}", message);
        }
        self.write("WARN", message);
    }

    fn error(&self, message: &str) {
        if !self.quiet {
            error!("{}", message);
        }
        self.write("ERROR", message);
    }

    fn write(&self, level: &str, message: &str) {
        let line = format_line(level, message);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = file.write_all(line.as_bytes());
    }
}
