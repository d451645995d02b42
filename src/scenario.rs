//! Scenario and event data model with pure file loading.
//!
//! A scenario declares the topology, the measured hosts, and a list of
//! timed events. Loading returns an owned value, so concurrently running
//! trials can each hold their own copy without coordination.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer};

/// Scenario file errors.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON scenario {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid YAML scenario {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// One fault-injection trial: topology references, measured hosts, and the
/// timed event list.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(rename = "scenarioName", default)]
    pub scenario_name: String,
    /// Topology file for containerlab. Empty means noDeploy mode: events
    /// run without deploying or destroying anything.
    #[serde(default)]
    pub topo: String,
    /// Device data file describing nodes and interfaces. Empty skips
    /// host validation and telemetry setup.
    #[serde(default)]
    pub data: String,
    #[serde(rename = "logPath", default)]
    pub log_path: String,
    /// Nominal trial length; the implicit duration-guard event sleeps this
    /// long, so a trial never ends earlier.
    #[serde(default, deserialize_with = "lenient_duration")]
    pub duration: Duration,
    /// Hostnames (containerlab node names) measured in this scenario.
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(rename = "event", default)]
    pub events: Vec<Event>,
}

impl Scenario {
    /// Whether this scenario runs without a network deployment.
    pub fn no_deploy(&self) -> bool {
        self.topo.is_empty()
    }

    /// Directory containing the topology file.
    pub fn topo_dir(&self) -> PathBuf {
        match Path::new(&self.topo).parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Private log directory for one trial:
    /// `{logPath}/{scenarioName}/{timestamp}_{lab}`.
    pub fn trial_log_dir(&self, started: DateTime<Local>, lab_name: &str) -> PathBuf {
        Path::new(&self.log_path).join(&self.scenario_name).join(format!(
            "{}_{}",
            started.format("%Y-%m-%dT%H:%M:%S"),
            lab_name
        ))
    }
}

/// One timed action inside a trial.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    /// Offset from trial start at which the event fires.
    #[serde(rename = "beginTime", default, deserialize_with = "lenient_duration")]
    pub begin_time: Duration,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// The implicit event pinning the trial to its nominal duration.
    pub fn duration_guard() -> Self {
        Event {
            begin_time: Duration::ZERO,
            host: None,
            hosts: Vec::new(),
            kind: EventKind::Dummy,
        }
    }

    /// Every host this event targets: `host` first, then `hosts`.
    pub fn target_hosts(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        if let Some(host) = self.host.as_deref() {
            if !host.is_empty() {
                targets.push(host);
            }
        }
        targets.extend(self.hosts.iter().map(String::as_str));
        targets
    }
}

/// Closed set of event kinds, dispatched on the `type` tag.
///
/// An unrecognized tag fails scenario parsing, which makes a bad kind a
/// per-trial configuration error rather than a silently skipped event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventKind {
    /// Sleeps the scenario duration; carries no payload.
    Dummy,
    #[serde(rename_all = "camelCase")]
    FaultInjection { fault_command: FaultCommand },
    #[serde(rename_all = "camelCase")]
    Shell {
        #[serde(default)]
        shell_path: Option<String>,
        #[serde(default)]
        shell_commands: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Config {
        #[serde(default)]
        vtysh_changes: Vec<String>,
        #[serde(default)]
        config_file_changes: Vec<ConfigFileChange>,
    },
    #[serde(rename_all = "camelCase")]
    Copy {
        #[serde(default)]
        to_container: Vec<FileCopy>,
        #[serde(default)]
        from_container: Vec<FileCopy>,
    },
    Collect {
        #[serde(default)]
        files: Vec<String>,
    },
}

impl EventKind {
    /// The wire name of this kind, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Dummy => "dummy",
            EventKind::FaultInjection { .. } => "fault-injection",
            EventKind::Shell { .. } => "shell",
            EventKind::Config { .. } => "config",
            EventKind::Copy { .. } => "copy",
            EventKind::Collect { .. } => "collect",
        }
    }
}

/// A named chaos command with its parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FaultCommand {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub options: FaultOptions,
}

/// Parameters for fault-injection commands. Which fields apply depends on
/// the command name; unused ones stay at their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultOptions {
    /// How long the fault stays active. Required by every command.
    #[serde(default, with = "humantime_serde")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub interface: Option<String>,
    /// Delay in milliseconds (delay command).
    #[serde(default)]
    pub time: u32,
    #[serde(default)]
    pub jitter: u32,
    #[serde(default)]
    pub correlation: f64,
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub distribution: Option<String>,
    #[serde(default)]
    pub limit: u32,
    /// Bandwidth limit, e.g. "100kbit" (rate command).
    #[serde(default)]
    pub rate: Option<String>,
    #[serde(default)]
    pub packet_overhead: i32,
    #[serde(default)]
    pub cell_size: u32,
    #[serde(default)]
    pub cell_overhead: u32,
    #[serde(default)]
    pub stress_image: Option<String>,
    #[serde(default)]
    pub pull_image: bool,
    #[serde(default)]
    pub stressors: Option<String>,
}

/// One line-level edit to a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigFileChange {
    pub file: String,
    /// 1-based line number to replace.
    pub line: usize,
    pub command: String,
}

/// One file transfer between host and container.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileCopy {
    pub src: String,
    pub dst: String,
    /// Applied with chown after the copy, e.g. "frr:frr".
    #[serde(default)]
    pub owner: String,
    /// Applied with chmod after the copy, e.g. "644".
    #[serde(default)]
    pub mode: String,
}

/// Parses a duration field, treating a missing, null, or empty value as
/// zero.
fn lenient_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    if text.is_empty() {
        return Ok(Duration::ZERO);
    }
    humantime_serde::re::humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

/// Whether a scenario path looks like YAML by extension.
pub fn is_yaml_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

/// Loads a scenario file into an owned value.
///
/// Events come back sorted by begin offset (stable, so equal offsets keep
/// file order). The caller owns the result outright; nothing is shared.
pub fn load_scenario(path: &Path, yaml: bool) -> Result<Scenario, ScenarioError> {
    let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut scenario: Scenario = if yaml {
        serde_yaml::from_str(&text).map_err(|source| ScenarioError::Yaml {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        serde_json::from_str(&text).map_err(|source| ScenarioError::Json {
            path: path.to_path_buf(),
            source,
        })?
    };

    scenario.events.sort_by_key(|event| event.begin_time);
    Ok(scenario)
}
