//! Config events: routing-daemon sessions over vtysh and line-level edits
//! to configuration files mounted from the topology directory.

use std::fs;

use log::{debug, info};

use super::{EventError, EventExecutor};
use crate::network::container_name;
use crate::scenario::{ConfigFileChange, Event};

impl EventExecutor<'_> {
    /// Applies the vtysh session first, then the file edits. Unlike most
    /// event kinds these failures propagate: a half-applied configuration
    /// change invalidates the trial.
    pub(crate) fn exec_config(
        &self,
        index: usize,
        event: &Event,
        vtysh_changes: &[String],
        config_file_changes: &[ConfigFileChange],
    ) -> Result<(), EventError> {
        if !vtysh_changes.is_empty() {
            self.exec_vtysh(index, event, vtysh_changes)?;
        }
        if !config_file_changes.is_empty() {
            self.exec_file_changes(event, config_file_changes)?;
        }
        Ok(())
    }

    /// Runs one vtysh session with every change as its own `-c` statement.
    fn exec_vtysh(
        &self,
        index: usize,
        event: &Event,
        changes: &[String],
    ) -> Result<(), EventError> {
        let host = event.host.as_deref().unwrap_or_default();
        let container = container_name(self.lab_name, host);

        let mut args: Vec<&str> = vec!["docker", "exec", container.as_str(), "vtysh"];
        for change in changes {
            debug!("Adding vtysh command {} for {}", change, host);
            args.push("-c");
            args.push(change.as_str());
        }

        debug!("Event {}: Execute sudo {}", index, args.join(" "));
        self.runner
            .run("sudo", &args)
            .map_err(|source| EventError::Vtysh {
                container: container.clone(),
                source,
            })?;

        info!("configuration changes applied");
        Ok(())
    }

    /// Replaces single lines in files under `{topoDir}/{host}/`.
    fn exec_file_changes(
        &self,
        event: &Event,
        changes: &[ConfigFileChange],
    ) -> Result<(), EventError> {
        let host = event.host.as_deref().unwrap_or_default();
        let topo_dir = self.scenario.topo_dir();

        for change in changes {
            let path = topo_dir.join(host).join(&change.file);
            let contents = fs::read_to_string(&path).map_err(|source| EventError::ConfigRead {
                path: path.clone(),
                source,
            })?;

            let mut lines: Vec<&str> = contents.split('\n').collect();
            let line_index = change
                .line
                .checked_sub(1)
                .filter(|index| *index < lines.len())
                .ok_or_else(|| EventError::ConfigLine {
                    path: path.clone(),
                    line: change.line,
                })?;
            lines[line_index] = change.command.as_str();

            fs::write(&path, lines.join("\n")).map_err(|source| EventError::ConfigWrite {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceData;
    use crate::events::fault::PumbaExecutor;
    use crate::runtime::testing::RecordingRunner;
    use crate::scenario::Scenario;
    use std::path::Path;

    fn scenario_with_topo(topo: &str) -> Scenario {
        serde_json::from_value(serde_json::json!({
            "scenarioName": "config",
            "topo": topo,
            "duration": "0s",
        }))
        .unwrap()
    }

    #[test]
    fn test_vtysh_session_builds_one_invocation() {
        let scenario = scenario_with_topo("topo/frr.yaml");
        let devices = DeviceData::default();
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
            "type": "config",
            "host": "r1",
            "vtyshChanges": ["conf t", "router bgp 65001", "no neighbor 10.0.0.2"],
        }))
        .unwrap();
        executor.execute(0, &event).unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                "sudo docker exec clab-lab_001-r1 vtysh \
                 -c conf t -c router bgp 65001 -c no neighbor 10.0.0.2"
            ]
        );
    }

    #[test]
    fn test_vtysh_failure_propagates_with_container() {
        let scenario = scenario_with_topo("topo/frr.yaml");
        let devices = DeviceData::default();
        let runner = RecordingRunner::failing_on("vtysh");
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
            "type": "config",
            "host": "r2",
            "vtyshChanges": ["conf t"],
        }))
        .unwrap();

        let err = executor.execute(0, &event).unwrap_err();
        match err {
            EventError::Vtysh { container, .. } => assert_eq!(container, "clab-lab_001-r2"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_file_change_replaces_single_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("r1")).unwrap();
        std::fs::write(
            dir.path().join("r1/bgpd.conf"),
            "router bgp 65001\n neighbor 10.0.0.2 remote-as 65002\n!\n",
        )
        .unwrap();

        let topo = dir.path().join("frr.yaml").display().to_string();
        let scenario = scenario_with_topo(&topo);
        let devices = DeviceData::default();
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
            "type": "config",
            "host": "r1",
            "configFileChanges": [
                {"file": "bgpd.conf", "line": 2, "command": " neighbor 10.0.0.2 shutdown"},
            ],
        }))
        .unwrap();
        executor.execute(0, &event).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("r1/bgpd.conf")).unwrap(),
            "router bgp 65001\n neighbor 10.0.0.2 shutdown\n!\n"
        );
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_file_change_rejects_out_of_range_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("r1")).unwrap();
        std::fs::write(dir.path().join("r1/bgpd.conf"), "one line\n").unwrap();

        let topo = dir.path().join("frr.yaml").display().to_string();
        let scenario = scenario_with_topo(&topo);
        let devices = DeviceData::default();
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
            "type": "config",
            "host": "r1",
            "configFileChanges": [
                {"file": "bgpd.conf", "line": 9, "command": "nope"},
            ],
        }))
        .unwrap();

        let err = executor.execute(0, &event).unwrap_err();
        assert!(matches!(err, EventError::ConfigLine { line: 9, .. }));
    }

    #[test]
    fn test_file_change_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let topo = dir.path().join("frr.yaml").display().to_string();
        let scenario = scenario_with_topo(&topo);
        let devices = DeviceData::default();
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
            "type": "config",
            "host": "r1",
            "configFileChanges": [
                {"file": "zebra.conf", "line": 1, "command": "log syslog"},
            ],
        }))
        .unwrap();

        let err = executor.execute(0, &event).unwrap_err();
        assert!(matches!(err, EventError::ConfigRead { .. }));
    }
}
