//! Command Runner - single execution layer for external programs
//!
//! Takes an argv, executes it on the real system and returns a structured
//! outcome WITHOUT interpreting what the program did:
//! - captured mode: stdout and stderr come back as text
//! - streamed mode: the child inherits our stdout/stderr, nothing is captured
//!
//! There is no shell in between unless a caller builds the spec with
//! [`CommandSpec::shell`].

use crate::errors::UpkitError;
use std::fmt;
use std::io::{self, Read};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Poll interval while waiting on a child that has a deadline
const WAIT_POLL_MS: u64 = 25;

/// Immutable program + arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    argv: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    /// Run a script through `sh -c`
    pub fn shell(script: &str) -> Self {
        Self::new(["sh", "-c", script])
    }

    /// Build a command that needs root, prefixed with `sudo` when `elevate` is set
    pub fn privileged<I, S>(elevate: bool, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = Self::new(argv);
        if elevate {
            spec.argv.insert(0, "sudo".to_string());
        }
        spec
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Space-joined command line, for logs and error messages
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Exit code plus whatever output was captured
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn with_stdout(exit_code: i32, stdout: &str) -> Self {
        Self {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }
}

/// Why a command did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Backing tool is absent (availability probe failed)
    NotInstalled,
    /// Ran, but returned a non-zero exit code
    NonZeroExit,
    /// Binary missing or not executable
    LaunchError,
    /// Did not finish before its deadline
    Timeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not installed",
            Self::NonZeroExit => "non-zero exit",
            Self::LaunchError => "launch error",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Success(CommandResult),
    Failure {
        kind: FailureKind,
        result: Option<CommandResult>,
    },
}

impl CommandOutcome {
    pub fn failure(kind: FailureKind, result: Option<CommandResult>) -> Self {
        Self::Failure { kind, result }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn result(&self) -> Option<&CommandResult> {
        match self {
            Self::Success(result) => Some(result),
            Self::Failure { result, .. } => result.as_ref(),
        }
    }

    /// Raw exit code, if the process ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        self.result().map(|r| r.exit_code)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Convert into the error taxonomy, naming `spec` in the message
    pub fn into_result(self, spec: &CommandSpec) -> Result<CommandResult, UpkitError> {
        match self {
            Self::Success(result) => Ok(result),
            Self::Failure {
                kind: FailureKind::NonZeroExit,
                result,
            } => {
                let result = result.unwrap_or_else(|| CommandResult::with_exit_code(-1));
                Err(UpkitError::ToolExecutionFailed {
                    command: spec.command_line(),
                    code: result.exit_code,
                    stderr: result.stderr,
                })
            }
            Self::Failure {
                kind: FailureKind::NotInstalled,
                ..
            } => Err(UpkitError::ToolNotInstalled {
                tool: spec.program().to_string(),
            }),
            Self::Failure {
                kind: FailureKind::LaunchError,
                ..
            } => Err(UpkitError::LaunchFailed {
                command: spec.command_line(),
            }),
            Self::Failure {
                kind: FailureKind::Timeout,
                ..
            } => Err(UpkitError::CommandTimedOut {
                command: spec.command_line(),
                secs: spec.timeout().map(|t| t.as_secs()).unwrap_or(0),
            }),
        }
    }
}

/// How to run one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Child inherits our output streams; nothing is captured
    pub stream_output: bool,
    /// Non-zero exit becomes `Failure(NonZeroExit)`. When false, every
    /// completed run is `Success` and the caller branches on the exit code.
    pub fail_on_non_zero: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            stream_output: false,
            fail_on_non_zero: true,
        }
    }
}

impl RunOptions {
    pub fn captured() -> Self {
        Self::default()
    }

    /// Streamed when `verbose`, captured otherwise
    pub fn streaming(verbose: bool) -> Self {
        Self {
            stream_output: verbose,
            ..Self::default()
        }
    }

    pub fn allow_non_zero(mut self) -> Self {
        self.fail_on_non_zero = false;
        self
    }
}

/// Seam between the orchestration core and the operating system
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec, options: RunOptions) -> CommandOutcome;

    /// Availability probe: `<tool> --version` exits 0
    fn is_installed(&self, tool: &str) -> bool {
        let spec = CommandSpec::new([tool, "--version"]);
        self.run(&spec, RunOptions::captured().allow_non_zero())
            .exit_code()
            == Some(0)
    }
}

/// Runs commands on the real system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, options: RunOptions) -> CommandOutcome {
        debug!(command = %spec, stream = options.stream_output, "Executing");

        let mut command = Command::new(spec.program());
        command.args(spec.args());
        if options.stream_output {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!(command = %spec, error = %e, "Launch failed");
                return CommandOutcome::failure(FailureKind::LaunchError, None);
            }
        };

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let status = match wait_with_deadline(&mut child, spec.timeout()) {
            Ok(Some(status)) => status,
            Ok(None) => {
                debug!(command = %spec, "Timed out, killing");
                reap(&mut child, stdout, stderr);
                return CommandOutcome::failure(FailureKind::Timeout, None);
            }
            Err(e) => {
                debug!(command = %spec, error = %e, "Wait failed");
                reap(&mut child, stdout, stderr);
                return CommandOutcome::failure(FailureKind::LaunchError, None);
            }
        };

        let result = CommandResult {
            exit_code: exit_code_of(status),
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
        };
        classify(spec, result, options)
    }
}

pub(crate) fn classify(spec: &CommandSpec, result: CommandResult, options: RunOptions) -> CommandOutcome {
    if result.exit_code == 0 || !options.fail_on_non_zero {
        return CommandOutcome::Success(result);
    }

    debug!(command = %spec, code = result.exit_code, "Command failed");
    let stderr = result.stderr.trim();
    if !stderr.is_empty() {
        debug!(command = %spec, "{}", stderr);
    }
    CommandOutcome::failure(FailureKind::NonZeroExit, Some(result))
}

fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(WAIT_POLL_MS));
    }
}

/// Killed-by-signal maps to the shell convention 128 + signo
fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signo| 128 + signo))
        .unwrap_or(-1)
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = stream.read_to_end(&mut buffer);
        buffer
    })
}

/// Kill, wait and drain an abandoned child so no zombie or reader thread
/// outlives the call. The wait happens even if the kill was refused.
fn reap(child: &mut Child, stdout: Option<JoinHandle<Vec<u8>>>, stderr: Option<JoinHandle<Vec<u8>>>) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "Kill refused");
    }
    let _ = child.wait();
    join_reader(stdout);
    join_reader(stderr);
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
