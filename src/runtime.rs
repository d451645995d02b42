//! External command execution behind a testable trait.
//!
//! Everything that shells out (containerlab, docker, pumba) goes through
//! [`CommandRunner`], so tests can substitute a recording implementation and
//! assert on the exact invocations without touching the system.

use std::process::Command;
use std::sync::Arc;

/// Error from running an external command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with status {code}: {output}")]
    Exit {
        program: String,
        code: i32,
        output: String,
    },
}

/// Runs external commands to completion.
///
/// Implementations must be shareable across worker threads; one runner
/// instance serves every concurrently executing trial.
pub trait CommandRunner: Send + Sync {
    /// Runs a command, waits for it, and returns its combined output.
    ///
    /// A non-zero exit status is an error carrying the combined output, so
    /// callers can surface the tool's own diagnostics verbatim.
    fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError>;
}

/// Shared handle to a command runner.
pub type SharedRunner = Arc<dyn CommandRunner>;

/// Production runner backed by `std::process::Command`.
#[derive(Debug, Default)]
pub struct ExecRunner;

impl ExecRunner {
    pub fn new() -> Self {
        ExecRunner
    }
}

impl CommandRunner for ExecRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| CommandError::Io {
                program: program.to_string(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }

        if output.status.success() {
            Ok(text)
        } else {
            Err(CommandError::Exit {
                program: program.to_string(),
                code: output.status.code().unwrap_or(-1),
                output: text.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording runner shared by the unit tests of every module that
    //! shells out.

    use super::{CommandError, CommandRunner};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// One recorded external invocation, with its execution interval.
    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub argv: Vec<String>,
        pub started: Instant,
        pub finished: Instant,
    }

    impl RecordedCall {
        /// Whether two calls' execution intervals overlap in time.
        pub fn overlaps(&self, other: &RecordedCall) -> bool {
            self.started < other.finished && other.started < self.finished
        }
    }

    /// A runner that records every call instead of executing it.
    ///
    /// Tracks the maximum number of calls in flight simultaneously so tests
    /// can assert serialization, and can fail calls whose argv contains a
    /// configured substring.
    #[derive(Default)]
    pub struct RecordingRunner {
        calls: Mutex<Vec<RecordedCall>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        delay: Option<Duration>,
        fail_matching: Option<String>,
        responses: Vec<(String, String)>,
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every call sleeps for `delay`, making interval overlap visible.
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        /// Calls whose argv contains `needle` return an error.
        pub fn failing_on(needle: &str) -> Self {
            Self {
                fail_matching: Some(needle.to_string()),
                ..Self::default()
            }
        }

        /// Calls whose argv contains `needle` return `output`. First
        /// configured match wins; everything else returns an empty string.
        pub fn respond_with(mut self, needle: &str, output: &str) -> Self {
            self.responses.push((needle.to_string(), output.to_string()));
            self
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        /// All recorded argvs joined with spaces, one string per call.
        pub fn command_lines(&self) -> Vec<String> {
            self.calls().iter().map(|c| c.argv.join(" ")).collect()
        }

        pub fn max_concurrent(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);

            let started = Instant::now();
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            let finished = Instant::now();

            let mut argv = vec![program.to_string()];
            argv.extend(args.iter().map(|a| a.to_string()));
            let line = argv.join(" ");
            self.calls.lock().unwrap().push(RecordedCall {
                argv,
                started,
                finished,
            });

            self.active.fetch_sub(1, Ordering::SeqCst);

            match &self.fail_matching {
                Some(needle) if line.contains(needle.as_str()) => {
                    return Err(CommandError::Exit {
                        program: program.to_string(),
                        code: 1,
                        output: format!("injected failure for {needle}"),
                    });
                }
                _ => {}
            }

            let output = self
                .responses
                .iter()
                .find(|(needle, _)| line.contains(needle.as_str()))
                .map(|(_, output)| output.clone())
                .unwrap_or_default();
            Ok(output)
        }
    }
}
