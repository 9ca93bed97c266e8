//! External command execution contract.
//!
//! The caches never build tool-specific command lines themselves; they go
//! through [`CommandRunner`], which the server wires to a real process
//! executor. Every refresh is bounded by a caller-supplied timeout; on
//! timeout the child is killed and the error surfaces to the caller with
//! the cache entry left untouched. There is no cancellation propagation:
//! a started fetch runs to completion or timeout.

mod decode;

pub use decode::{decode_flexible, parse_pipe_table, parse_records, FlexibleBatch, ParsedRecords};

use std::collections::VecDeque;
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Exec result type
pub type ExecResult<T> = Result<T, ExecError>;

/// Errors from external command execution.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Captured output of a completed external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Process execution boundary consumed by the caches.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, enforcing a hard wall-clock timeout.
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> ExecResult<CommandOutput>;
}

/// Default poll interval while waiting for a child to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// [`CommandRunner`] backed by `std::process::Command`.
///
/// Stdout and stderr are drained on dedicated threads so a chatty child
/// cannot deadlock on a full pipe while we poll for exit.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> ExecResult<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_reader = thread::spawn(move || drain_pipe(stdout_pipe));
        let stderr_reader = thread::spawn(move || drain_pipe(stderr_pipe));

        let start = Instant::now();
        loop {
            match child.try_wait()? {
                Some(status) => {
                    let stdout = stdout_reader.join().unwrap_or_default();
                    let stderr = stderr_reader.join().unwrap_or_default();
                    return Ok(CommandOutput {
                        exit_code: status.code().unwrap_or(-1),
                        stdout,
                        stderr,
                    });
                }
                None => {
                    if start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ExecError::Timeout {
                            program: program.to_string(),
                            timeout,
                        });
                    }
                    thread::sleep(EXIT_POLL_INTERVAL);
                }
            }
        }
    }
}

fn drain_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut buffer = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buffer);
    }
    buffer
}

/// Scripted [`CommandRunner`] for tests: pops canned results in FIFO order
/// and records every invocation.
#[derive(Debug, Default)]
pub struct MockRunner {
    responses: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<String>>,
}

#[derive(Debug)]
enum MockResponse {
    Output(CommandOutput),
    Timeout,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful invocation producing `stdout`.
    pub fn push_success(&self, stdout: &str) {
        self.push_output(CommandOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        });
    }

    /// Queue a failing invocation with the given exit code and stderr.
    pub fn push_failure(&self, exit_code: i32, stderr: &str) {
        self.push_output(CommandOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        });
    }

    /// Queue an exact output.
    pub fn push_output(&self, output: CommandOutput) {
        self.responses
            .lock()
            .expect("mock runner lock")
            .push_back(MockResponse::Output(output));
    }

    /// Queue a timeout.
    pub fn push_timeout(&self) {
        self.responses
            .lock()
            .expect("mock runner lock")
            .push_back(MockResponse::Timeout);
    }

    /// Full command lines observed so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock runner lock").clone()
    }

    /// Number of invocations observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock runner lock").len()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> ExecResult<CommandOutput> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().expect("mock runner lock").push(line);

        let next = self
            .responses
            .lock()
            .expect("mock runner lock")
            .pop_front();

        match next {
            Some(MockResponse::Output(output)) => Ok(output),
            Some(MockResponse::Timeout) | None => Err(ExecError::Timeout {
                program: program.to_string(),
                timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(ok.success());

        let failed = CommandOutput {
            exit_code: 65,
            stdout: String::new(),
            stderr: "error".to_string(),
        };
        assert!(!failed.success());
    }

    #[test]
    fn test_mock_runner_pops_in_order() {
        let runner = MockRunner::new();
        runner.push_success("first");
        runner.push_failure(1, "second failed");

        let first = runner
            .run("xcrun", &["simctl", "list"], Duration::from_secs(5))
            .unwrap();
        assert_eq!(first.stdout, "first");

        let second = runner
            .run("xcrun", &["simctl", "boot"], Duration::from_secs(5))
            .unwrap();
        assert_eq!(second.exit_code, 1);
        assert_eq!(second.stderr, "second failed");

        assert_eq!(runner.calls(), vec!["xcrun simctl list", "xcrun simctl boot"]);
    }

    #[test]
    fn test_mock_runner_exhausted_queue_times_out() {
        let runner = MockRunner::new();
        let err = runner
            .run("xcrun", &["simctl", "list"], Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn test_process_runner_captures_output() {
        let runner = ProcessRunner;
        let output = runner
            .run("sh", &["-c", "echo out; echo err >&2"], Duration::from_secs(10))
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    #[cfg(unix)]
    fn test_process_runner_reports_exit_code() {
        let runner = ProcessRunner;
        let output = runner
            .run("sh", &["-c", "exit 3"], Duration::from_secs(10))
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[test]
    #[cfg(unix)]
    fn test_process_runner_enforces_timeout() {
        let runner = ProcessRunner;
        let err = runner
            .run("sleep", &["5"], Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[test]
    fn test_process_runner_spawn_failure() {
        let runner = ProcessRunner;
        let err = runner
            .run("definitely-not-a-real-binary", &[], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
