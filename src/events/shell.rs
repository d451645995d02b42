//! Shell events: arbitrary command strings inside target containers.

use log::{debug, warn};

use super::{EventError, EventExecutor};
use crate::network::container_name;
use crate::scenario::Event;

/// Quotes a command for single-quoted interpolation: each embedded `'`
/// closes the quote, emits a double-quoted `'`, and reopens it.
fn escape_single_quotes(command: &str) -> String {
    command.replace('\'', r#"'"'"'"#)
}

impl EventExecutor<'_> {
    /// Runs each command string through the configured shell inside every
    /// target container. Individual command failures are logged and the
    /// remaining commands still run.
    pub(crate) fn exec_shell(
        &self,
        index: usize,
        event: &Event,
        shell_path: Option<&str>,
        shell_commands: &[String],
    ) -> Result<(), EventError> {
        let shell = match shell_path {
            Some(path) if !path.is_empty() => path,
            _ => "/bin/sh",
        };

        for host in event.target_hosts() {
            let container = container_name(self.lab_name, host);
            for command in shell_commands {
                let escaped = escape_single_quotes(command);
                let input = format!("docker exec {} {} -c '{}'", container, shell, escaped);

                debug!("Event {}: Execute command: sh -c {}", index, input);
                if let Err(err) = self.runner.run("sh", &["-c", input.as_str()]) {
                    warn!("Error while running {}: {}", command, err);
                }
            }
        }
        Ok(())
    }
}
