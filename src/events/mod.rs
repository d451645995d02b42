//! Timed event execution inside a running trial.
//!
//! Each event of a scenario runs on its own thread after sleeping out its
//! begin offset; sibling events never wait for each other. A failing event
//! is logged and remembered but does not cancel its siblings, which is the
//! behavior long chaos experiments want: one missed probe should not kill
//! an hour of fault injection. The scheduler joins every event and returns
//! the last error it saw.

pub mod config;
pub mod fault;
pub mod shell;
pub mod transfer;

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use log::{debug, warn};

use crate::device::{DeviceData, DeviceError};
use crate::network::container_name;
use crate::runtime::{CommandError, CommandRunner};
use crate::scenario::{Event, EventKind, Scenario};

pub use fault::{ChaosExecutor, PumbaExecutor};

/// Event execution errors.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("no hosts specified for fault-injection command")]
    NoHosts,
    #[error("unknown fault command {0}")]
    UnknownFault(String),
    #[error("fault-injection command {0} requires a duration")]
    MissingDuration(String),
    #[error("rate command requires a rate limit")]
    MissingRate,
    #[error(transparent)]
    UnknownHost(#[from] DeviceError),
    #[error("chaos command failed: {0}")]
    Chaos(#[from] CommandError),
    #[error("docker cp from {src} to {dst} failed: {source}")]
    CopyFailed {
        src: String,
        dst: String,
        #[source]
        source: CommandError,
    },
    #[error("chown failed for {target}: {source}")]
    Chown {
        target: String,
        #[source]
        source: CommandError,
    },
    #[error("chmod failed for {target}: {source}")]
    Chmod {
        target: String,
        #[source]
        source: CommandError,
    },
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to run vtysh command on {container}: {source}")]
    Vtysh {
        container: String,
        #[source]
        source: CommandError,
    },
    #[error("error opening config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("error writing changes to config file {}: {source}", path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {} has no line {line}", path.display())]
    ConfigLine { path: PathBuf, line: usize },
}

/// Executes scenario events with injected dependencies, so tests run
/// without docker or a deployed lab.
pub struct EventExecutor<'a> {
    pub(crate) scenario: &'a Scenario,
    pub(crate) devices: &'a DeviceData,
    pub(crate) lab_name: &'a str,
    pub(crate) runner: &'a dyn CommandRunner,
    pub(crate) chaos: &'a dyn ChaosExecutor,
    /// Private log directory of the current trial, target of collect
    /// events.
    pub(crate) trial_log_dir: &'a Path,
}

impl<'a> EventExecutor<'a> {
    pub fn new(
        scenario: &'a Scenario,
        devices: &'a DeviceData,
        lab_name: &'a str,
        runner: &'a dyn CommandRunner,
        chaos: &'a dyn ChaosExecutor,
        trial_log_dir: &'a Path,
    ) -> Self {
        EventExecutor {
            scenario,
            devices,
            lab_name,
            runner,
            chaos,
            trial_log_dir,
        }
    }

    /// Dispatches one event to its handler.
    pub fn execute(&self, index: usize, event: &Event) -> Result<(), EventError> {
        match &event.kind {
            EventKind::Dummy => self.exec_dummy(),
            EventKind::FaultInjection { fault_command } => {
                self.exec_fault(index, event, fault_command)
            }
            EventKind::Shell {
                shell_path,
                shell_commands,
            } => self.exec_shell(index, event, shell_path.as_deref(), shell_commands),
            EventKind::Config {
                vtysh_changes,
                config_file_changes,
            } => self.exec_config(index, event, vtysh_changes, config_file_changes),
            EventKind::Copy {
                to_container,
                from_container,
            } => self.exec_copy(index, event, to_container, from_container),
            EventKind::Collect { files } => self.exec_collect(event, files),
        }
    }

    /// Runs every scenario event at its begin offset, plus the implicit
    /// duration guard, and waits for all of them.
    ///
    /// Failing events are logged as they land; the last error observed is
    /// returned once every event has finished.
    pub fn run_events(&self) -> Result<(), EventError> {
        let mut events = self.scenario.events.clone();
        events.push(Event::duration_guard());

        let mut last_error = None;
        thread::scope(|scope| {
            let handles: Vec<_> = events
                .iter()
                .enumerate()
                .map(|(index, event)| {
                    scope.spawn(move || {
                        thread::sleep(event.begin_time);
                        debug!("Executing event {} ({})", index, event.kind.name());
                        self.execute(index, event)
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!("Event execution error: {}", err);
                        last_error = Some(err);
                    }
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
        });

        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Holds the trial open for the scenario's nominal duration.
    fn exec_dummy(&self) -> Result<(), EventError> {
        if !self.scenario.duration.is_zero() {
            thread::sleep(self.scenario.duration);
        }
        Ok(())
    }

    /// Copies a fixed file list out of each target host's container into
    /// the trial's log directory. Per-file failures are logged and skipped.
    fn exec_collect(&self, event: &Event, files: &[String]) -> Result<(), EventError> {
        for host in event.target_hosts() {
            let container = container_name(self.lab_name, host);
            let host_log_dir = self.trial_log_dir.join(host);
            fs::create_dir_all(&host_log_dir).map_err(|source| EventError::CreateDir {
                path: host_log_dir.clone(),
                source,
            })?;

            for file in files {
                if let Err(err) = self.collect_file(&container, file, &host_log_dir) {
                    warn!("Error collecting file {} from {}: {}", file, container, err);
                }
            }
        }
        Ok(())
    }

    fn collect_file(
        &self,
        container: &str,
        src_path: &str,
        host_log_dir: &Path,
    ) -> Result<(), EventError> {
        let src = format!("{}:{}", container, src_path);
        let base = Path::new(src_path)
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new(src_path));
        let dst = host_log_dir.join(base).display().to_string();

        debug!("Collect docker cp {} {}", src, dst);
        self.runner
            .run("docker", &["cp", src.as_str(), dst.as_str()])
            .map_err(|source| EventError::CopyFailed {
                src: src.clone(),
                dst,
                source,
            })?;
        Ok(())
    }
}
