//! Fault-injection events, delegated to pumba.
//!
//! The core never implements fault mechanics itself. It depends on
//! [`ChaosExecutor`], a narrow capability: apply a named fault with its
//! parameters against a set of containers, blocking until the fault's
//! duration has elapsed. The production implementation maps each fault
//! command to a pumba invocation.

use std::time::Duration;

use log::debug;

use super::{EventError, EventExecutor};
use crate::network::container_name;
use crate::runtime::CommandRunner;
use crate::scenario::{Event, FaultCommand, FaultOptions};

/// Applies faults against running containers.
pub trait ChaosExecutor: Send + Sync {
    /// Applies `fault` to `containers` and blocks for its duration.
    fn inject(&self, fault: &FaultCommand, containers: &[String]) -> Result<(), EventError>;
}

/// [`ChaosExecutor`] backed by the pumba binary.
pub struct PumbaExecutor<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> PumbaExecutor<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        PumbaExecutor { runner }
    }
}

impl ChaosExecutor for PumbaExecutor<'_> {
    fn inject(&self, fault: &FaultCommand, containers: &[String]) -> Result<(), EventError> {
        let args = build_pumba_args(fault, containers)?;

        let mut argv: Vec<&str> = Vec::with_capacity(args.len() + 1);
        argv.push("pumba");
        argv.extend(args.iter().map(String::as_str));

        debug!("Execute sudo {}", argv.join(" "));
        self.runner.run("sudo", &argv)?;
        Ok(())
    }
}

/// Builds the pumba argument vector for one fault command.
///
/// Every command needs a duration. Network emulation commands (delay,
/// corrupt, duplicate, loss, rate) go through `pumba netem`; pause, stop,
/// and stress are container-level commands. A stopped container is
/// restarted once the duration elapses.
fn build_pumba_args(fault: &FaultCommand, containers: &[String]) -> Result<Vec<String>, EventError> {
    let options = &fault.options;
    let duration = options
        .duration
        .map(format_pumba_duration)
        .ok_or_else(|| EventError::MissingDuration(fault.name.clone()))?;

    let mut args: Vec<String> = Vec::new();
    match fault.name.as_str() {
        "delay" => {
            args.extend(netem_prefix(&duration, options));
            args.extend([
                "delay".to_string(),
                "--time".to_string(),
                options.time.to_string(),
                "--jitter".to_string(),
                options.jitter.to_string(),
                "--correlation".to_string(),
                options.correlation.to_string(),
            ]);
            if let Some(distribution) = options.distribution.as_deref().filter(|d| !d.is_empty()) {
                args.extend(["--distribution".to_string(), distribution.to_string()]);
            }
        }
        "corrupt" | "duplicate" | "loss" => {
            args.extend(netem_prefix(&duration, options));
            args.extend([
                fault.name.clone(),
                "--percent".to_string(),
                options.percent.to_string(),
                "--correlation".to_string(),
                options.correlation.to_string(),
            ]);
        }
        "rate" => {
            let rate = options
                .rate
                .as_deref()
                .filter(|rate| !rate.is_empty())
                .ok_or(EventError::MissingRate)?;
            args.extend(netem_prefix(&duration, options));
            args.extend([
                "rate".to_string(),
                "--rate".to_string(),
                rate.to_string(),
                "--packetoverhead".to_string(),
                options.packet_overhead.to_string(),
                "--cellsize".to_string(),
                options.cell_size.to_string(),
                "--celloverhead".to_string(),
                options.cell_overhead.to_string(),
            ]);
        }
        "pause" => {
            args.extend(["pause".to_string(), "--duration".to_string(), duration]);
        }
        "stop" => {
            args.extend([
                "stop".to_string(),
                "--duration".to_string(),
                duration,
                "--restart".to_string(),
            ]);
        }
        "stress" => {
            args.extend(["stress".to_string(), "--duration".to_string(), duration]);
            if let Some(image) = options.stress_image.as_deref().filter(|i| !i.is_empty()) {
                args.extend(["--stress-image".to_string(), image.to_string()]);
            }
            if options.pull_image {
                args.push("--pull-image".to_string());
            }
            if let Some(stressors) = options.stressors.as_deref().filter(|s| !s.is_empty()) {
                args.extend(["--stressors".to_string(), stressors.to_string()]);
            }
        }
        other => return Err(EventError::UnknownFault(other.to_string())),
    }

    args.extend(containers.iter().cloned());
    Ok(args)
}

fn netem_prefix(duration: &str, options: &FaultOptions) -> Vec<String> {
    let mut args = vec![
        "netem".to_string(),
        "--duration".to_string(),
        duration.to_string(),
    ];
    if let Some(interface) = options.interface.as_deref().filter(|i| !i.is_empty()) {
        args.extend(["--interface".to_string(), interface.to_string()]);
    }
    args
}

/// Formats a duration the way pumba parses it.
fn format_pumba_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

impl EventExecutor<'_> {
    /// Validates the target hosts and hands the fault to the chaos
    /// executor, one invocation covering all targets.
    pub(crate) fn exec_fault(
        &self,
        index: usize,
        event: &Event,
        fault: &FaultCommand,
    ) -> Result<(), EventError> {
        let hosts = event.target_hosts();
        if hosts.is_empty() {
            return Err(EventError::NoHosts);
        }

        let host_names: Vec<String> = hosts.iter().map(|host| host.to_string()).collect();
        self.devices.validate_hosts(&host_names)?;

        let containers: Vec<String> = hosts
            .iter()
            .map(|host| container_name(self.lab_name, host))
            .collect();
        debug!("Event {}: Apply fault {} to {:?}", index, fault.name, containers);
        self.chaos.inject(fault, &containers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceData;
    use crate::runtime::testing::RecordingRunner;
    use crate::scenario::Scenario;
    use std::path::Path;

    fn fault(value: serde_json::Value) -> FaultCommand {
        serde_json::from_value(value).unwrap()
    }

    fn containers() -> Vec<String> {
        vec!["clab-lab_001-r1".to_string()]
    }

    #[test]
    fn test_delay_builds_netem_args() {
        let fault = fault(serde_json::json!({
            "name": "delay",
            "options": {
                "duration": "1m",
                "interface": "eth1",
                "time": 100,
                "jitter": 10,
                "correlation": 20,
                "distribution": "normal",
            },
        }));
        let args = build_pumba_args(&fault, &containers()).unwrap();

        assert_eq!(
            args,
            vec![
                "netem", "--duration", "60s", "--interface", "eth1", "delay", "--time", "100",
                "--jitter", "10", "--correlation", "20", "--distribution", "normal",
                "clab-lab_001-r1",
            ]
        );
    }

    #[test]
    fn test_loss_builds_percent_args() {
        let fault = fault(serde_json::json!({
            "name": "loss",
            "options": {"duration": "30s", "percent": 12.5, "correlation": 5},
        }));
        let args = build_pumba_args(&fault, &containers()).unwrap();

        assert_eq!(
            args,
            vec![
                "netem", "--duration", "30s", "loss", "--percent", "12.5", "--correlation", "5",
                "clab-lab_001-r1",
            ]
        );
    }

    #[test]
    fn test_rate_builds_overhead_args() {
        let fault = fault(serde_json::json!({
            "name": "rate",
            "options": {
                "duration": "45s",
                "rate": "100kbit",
                "packetOverhead": 10,
                "cellSize": 20,
                "cellOverhead": 5,
            },
        }));
        let args = build_pumba_args(&fault, &containers()).unwrap();

        assert_eq!(
            args,
            vec![
                "netem", "--duration", "45s", "rate", "--rate", "100kbit", "--packetoverhead",
                "10", "--cellsize", "20", "--celloverhead", "5", "clab-lab_001-r1",
            ]
        );
    }

    #[test]
    fn test_pause_and_stop_are_container_commands() {
        let pause = fault(serde_json::json!({
            "name": "pause",
            "options": {"duration": "30s"},
        }));
        assert_eq!(
            build_pumba_args(&pause, &containers()).unwrap(),
            vec!["pause", "--duration", "30s", "clab-lab_001-r1"]
        );

        // Stopped containers come back once the duration elapses.
        let stop = fault(serde_json::json!({
            "name": "stop",
            "options": {"duration": "30s"},
        }));
        assert_eq!(
            build_pumba_args(&stop, &containers()).unwrap(),
            vec!["stop", "--duration", "30s", "--restart", "clab-lab_001-r1"]
        );
    }

    #[test]
    fn test_stress_includes_image_and_stressors() {
        let fault = fault(serde_json::json!({
            "name": "stress",
            "options": {
                "duration": "2m",
                "stressImage": "alexeiled/stress-ng:latest-ubuntu",
                "pullImage": true,
                "stressors": "--cpu 4 --timeout 60s",
            },
        }));
        let args = build_pumba_args(&fault, &containers()).unwrap();

        assert_eq!(
            args,
            vec![
                "stress",
                "--duration",
                "120s",
                "--stress-image",
                "alexeiled/stress-ng:latest-ubuntu",
                "--pull-image",
                "--stressors",
                "--cpu 4 --timeout 60s",
                "clab-lab_001-r1",
            ]
        );
    }

    #[test]
    fn test_missing_duration_and_unknown_command_fail() {
        let no_duration = fault(serde_json::json!({
            "name": "delay",
            "options": {"time": 100},
        }));
        let err = build_pumba_args(&no_duration, &containers()).unwrap_err();
        assert!(matches!(err, EventError::MissingDuration(name) if name == "delay"));

        let unknown = fault(serde_json::json!({
            "name": "teleport",
            "options": {"duration": "10s"},
        }));
        let err = build_pumba_args(&unknown, &containers()).unwrap_err();
        assert!(matches!(err, EventError::UnknownFault(name) if name == "teleport"));

        let no_rate = fault(serde_json::json!({
            "name": "rate",
            "options": {"duration": "10s"},
        }));
        let err = build_pumba_args(&no_rate, &containers()).unwrap_err();
        assert!(matches!(err, EventError::MissingRate));
    }

    #[test]
    fn test_exec_fault_validates_hosts_first() {
        let scenario: Scenario =
            serde_json::from_str(r#"{"scenarioName": "fault", "duration": "0s"}"#).unwrap();
        let devices: DeviceData = serde_json::from_value(serde_json::json!({
            "name": "lab",
            "nodes": [{"name": "r1", "interfaces": []}],
            "connections": [],
        }))
        .unwrap();
        let runner = RecordingRunner::new();
        let chaos = PumbaExecutor::new(&runner);
        let executor = EventExecutor::new(
            &scenario,
            &devices,
            "lab_001",
            &runner,
            &chaos,
            Path::new("logs"),
        );

        let missing_host: Event = serde_json::from_value(serde_json::json!({
            "type": "fault-injection",
            "host": "r9",
            "faultCommand": {"name": "pause", "options": {"duration": "10s"}},
        }))
        .unwrap();
        let err = executor.execute(0, &missing_host).unwrap_err();
        assert!(matches!(err, EventError::UnknownHost(_)));
        assert!(runner.calls().is_empty());

        let no_hosts: Event = serde_json::from_value(serde_json::json!({
            "type": "fault-injection",
            "faultCommand": {"name": "pause", "options": {"duration": "10s"}},
        }))
        .unwrap();
        let err = executor.execute(0, &no_hosts).unwrap_err();
        assert!(matches!(err, EventError::NoHosts));
    }

    #[test]
    fn test_pumba_executor_runs_via_sudo() {
        let scenario: Scenario =
            serde_json::from_str(r#"{"scenarioName": "fault", "duration": "0s"}"#).unwrap();
        let devices: DeviceData = serde_json::from_value(serde_json::json!({
            "name": "lab",
            "nodes": [
                {"name": "r1", "interfaces": []},
                {"name": "r2", "interfaces": []},
            ],
            "connections": [],
        }))
        .unwrap();
        let runner = RecordingRunner::new();
        let chaos = PumbaExecutor::new(&runner);
        let executor = EventExecutor::new(
            &scenario,
            &devices,
            "lab_001",
            &runner,
            &chaos,
            Path::new("logs"),
        );

        let event: Event = serde_json::from_value(serde_json::json!({
            "type": "fault-injection",
            "hosts": ["r1", "r2"],
            "faultCommand": {
                "name": "loss",
                "options": {"duration": "30s", "percent": 50, "correlation": 0},
            },
        }))
        .unwrap();
        executor.execute(0, &event).unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                "sudo pumba netem --duration 30s loss --percent 50 --correlation 0 \
                 clab-lab_001-r1 clab-lab_001-r2"
            ]
        );
    }
}
