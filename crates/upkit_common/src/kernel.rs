//! Kernel Update Gate
//!
//! Runs in front of the OS package update on Fedora:
//! 1. `dnf5 check-upgrade -q kernel*` - exit 0 means nothing pending,
//!    exit 100 means an update is pending, anything else is fatal
//! 2. read the pending version from the kernel metapackage
//! 3. ask the operator; only `y`/`Y` lets the run continue
//!
//! The gate never upgrades anything itself.

use crate::config::KernelConfig;
use crate::errors::{Result, UpkitError};
use crate::runner::{CommandOutcome, CommandResult, CommandRunner, CommandSpec, FailureKind, RunOptions};
use crate::signals::InterruptContext;
use std::io::{self, Write};
use tracing::{debug, info};

/// `check-upgrade` exit code when updates are pending
pub const EXIT_UPDATES_AVAILABLE: i32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelUpdateState {
    NoUpdateAvailable,
    UpdateAvailable(String),
    Confirmed(String),
    Declined,
}

impl KernelUpdateState {
    pub fn confirmed_version(&self) -> Option<&str> {
        match self {
            Self::Confirmed(version) => Some(version),
            _ => None,
        }
    }
}

/// Map the probe exit code: `Ok(true)` when an update is pending
pub fn classify_probe_exit(code: i32) -> Result<bool> {
    match code {
        0 => Ok(false),
        EXIT_UPDATES_AVAILABLE => Ok(true),
        code => Err(UpkitError::ProbeAmbiguous { code }),
    }
}

/// Version field of the first line for `package`, without the release suffix.
///
/// `kernel-helper   6.12.5-300.fc41   updates` gives `6.12.5`. An arch
/// suffix on the name (`kernel-helper.x86_64`) still matches.
pub fn extract_version(stdout: &str, package: &str) -> Option<String> {
    let arch_prefix = format!("{}.", package);
    stdout.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let name = fields.next()?;
        if name != package && !name.starts_with(&arch_prefix) {
            return None;
        }
        let full_version = fields.next()?;
        full_version
            .split('-')
            .next()
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

/// Only a case-insensitive `y` confirms
pub fn is_confirmation(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case("y")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResponse {
    Answer(String),
    /// EOF or interrupt while waiting
    Interrupted,
}

/// Synchronous operator prompt
pub trait ConfirmPrompt {
    fn ask(&self, question: &str) -> PromptResponse;
}

/// Reads the answer from stdin
pub struct StdinPrompt {
    interrupts: InterruptContext,
}

impl StdinPrompt {
    pub fn new(interrupts: InterruptContext) -> Self {
        Self { interrupts }
    }
}

impl ConfirmPrompt for StdinPrompt {
    fn ask(&self, question: &str) -> PromptResponse {
        let _waiting = self.interrupts.enter_prompt();

        print!("{}", question);
        let _ = io::stdout().flush();

        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) | Err(_) => PromptResponse::Interrupted,
            Ok(_) => PromptResponse::Answer(input),
        }
    }
}

pub struct KernelGate<'a> {
    config: &'a KernelConfig,
}

impl<'a> KernelGate<'a> {
    pub fn new(config: &'a KernelConfig) -> Self {
        Self { config }
    }

    pub fn probe_spec(&self) -> CommandSpec {
        CommandSpec::new([
            self.config.package_manager.as_str(),
            "check-upgrade",
            "-q",
            self.config.probe_pattern.as_str(),
        ])
    }

    pub fn version_spec(&self) -> CommandSpec {
        CommandSpec::new([
            self.config.package_manager.as_str(),
            "check-update",
            self.config.version_package.as_str(),
        ])
    }

    /// Fresh probe of the package subsystem; never cached
    pub fn probe(&self, runner: &dyn CommandRunner) -> Result<KernelUpdateState> {
        let spec = self.probe_spec();
        let result = completed(&spec, runner.run(&spec, RunOptions::captured().allow_non_zero()))?;
        debug!(code = result.exit_code, "Kernel update check finished");

        if classify_probe_exit(result.exit_code)? {
            let version = self.pending_version(runner)?;
            Ok(KernelUpdateState::UpdateAvailable(version))
        } else {
            Ok(KernelUpdateState::NoUpdateAvailable)
        }
    }

    /// Pending version of the kernel metapackage
    pub fn pending_version(&self, runner: &dyn CommandRunner) -> Result<String> {
        let spec = self.version_spec();
        let result = completed(&spec, runner.run(&spec, RunOptions::captured().allow_non_zero()))?;

        if result.exit_code != 0 && result.exit_code != EXIT_UPDATES_AVAILABLE {
            return Err(UpkitError::ToolExecutionFailed {
                command: spec.command_line(),
                code: result.exit_code,
                stderr: result.stderr,
            });
        }

        extract_version(&result.stdout, &self.config.version_package).ok_or_else(|| {
            UpkitError::KernelVersionNotFound {
                package: self.config.version_package.clone(),
            }
        })
    }

    /// Ask the operator about `version`
    pub fn confirm(&self, version: &str, prompt: &dyn ConfirmPrompt) -> Result<KernelUpdateState> {
        let question = format!("Kernel update available: {}. Proceed? [y/N]: ", version);
        match prompt.ask(&question) {
            PromptResponse::Answer(answer) if is_confirmation(&answer) => {
                Ok(KernelUpdateState::Confirmed(version.to_string()))
            }
            PromptResponse::Answer(_) => Ok(KernelUpdateState::Declined),
            PromptResponse::Interrupted => Err(UpkitError::UserInterrupted),
        }
    }

    /// Whole protocol. Returns `NoUpdateAvailable` or `Confirmed`; a
    /// decline or interrupt comes back as an error that ends the run.
    pub fn run(&self, runner: &dyn CommandRunner, prompt: &dyn ConfirmPrompt) -> Result<KernelUpdateState> {
        match self.probe(runner)? {
            KernelUpdateState::UpdateAvailable(version) => match self.confirm(&version, prompt)? {
                KernelUpdateState::Confirmed(version) => {
                    info!(%version, "Kernel update confirmed");
                    Ok(KernelUpdateState::Confirmed(version))
                }
                _ => Err(UpkitError::UserDeclined { version }),
            },
            state => Ok(state),
        }
    }
}

/// A run that did not complete means the package manager is missing
fn completed(spec: &CommandSpec, outcome: CommandOutcome) -> Result<CommandResult> {
    match outcome {
        CommandOutcome::Failure {
            kind: FailureKind::LaunchError,
            ..
        } => Err(UpkitError::ToolNotInstalled {
            tool: spec.program().to_string(),
        }),
        outcome => outcome.into_result(spec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedPrompt, ScriptedRunner};

    const HELPER_LINE: &str = "kernel-helper   6.12.5-300.fc41   updates\n";

    fn config() -> KernelConfig {
        KernelConfig::default()
    }

    #[test]
    fn test_probe_exit_codes() {
        assert!(!classify_probe_exit(0).unwrap());
        assert!(classify_probe_exit(100).unwrap());
        for code in [1, 2, 99, 101, -1] {
            assert!(matches!(
                classify_probe_exit(code),
                Err(UpkitError::ProbeAmbiguous { code: c }) if c == code
            ));
        }
    }

    #[test]
    fn test_extract_version() {
        assert_eq!(
            extract_version(HELPER_LINE, "kernel-helper"),
            Some("6.12.5".to_string())
        );
        assert_eq!(
            extract_version(
                "Last metadata expiration check: 0:12:01 ago\nkernel-helper.x86_64  6.13.1-100.fc42  updates\n",
                "kernel-helper"
            ),
            Some("6.13.1".to_string())
        );
    }

    #[test]
    fn test_extract_version_takes_first_match() {
        let stdout = "kernel-helper 6.11.0-200.fc40 updates\nkernel-helper 6.12.0-100.fc41 updates-testing\n";
        assert_eq!(extract_version(stdout, "kernel-helper"), Some("6.11.0".to_string()));
    }

    #[test]
    fn test_extract_version_missing() {
        assert_eq!(extract_version("", "kernel-helper"), None);
        assert_eq!(extract_version("kernel-helper\n", "kernel-helper"), None);
        assert_eq!(
            extract_version("kernel-helper-extra 6.12.5-300.fc41 updates\n", "kernel-helper"),
            None
        );
    }

    #[test]
    fn test_confirmation_input() {
        assert!(is_confirmation("y"));
        assert!(is_confirmation("Y\n"));
        assert!(is_confirmation("  y  "));
        assert!(!is_confirmation("n"));
        assert!(!is_confirmation(""));
        assert!(!is_confirmation("yes"));
    }

    #[test]
    fn test_probe_no_update() {
        let config = config();
        let runner = ScriptedRunner::new().exits("dnf5 check-upgrade", 0);

        let state = KernelGate::new(&config).probe(&runner).unwrap();
        assert_eq!(state, KernelUpdateState::NoUpdateAvailable);
        assert!(!runner.called("dnf5 check-update"));
    }

    #[test]
    fn test_probe_update_available() {
        let config = config();
        let runner = ScriptedRunner::new()
            .exits("dnf5 check-upgrade", 100)
            .prints("dnf5 check-update kernel-helper", 100, HELPER_LINE);

        let state = KernelGate::new(&config).probe(&runner).unwrap();
        assert_eq!(state, KernelUpdateState::UpdateAvailable("6.12.5".to_string()));
        assert_eq!(
            runner.calls(),
            vec![
                "dnf5 check-upgrade -q kernel*".to_string(),
                "dnf5 check-update kernel-helper".to_string(),
            ]
        );
    }

    #[test]
    fn test_probe_unexpected_exit_is_fatal() {
        let config = config();
        let runner = ScriptedRunner::new().exits("dnf5 check-upgrade", 1);

        let err = KernelGate::new(&config).probe(&runner).unwrap_err();
        assert!(matches!(err, UpkitError::ProbeAmbiguous { code: 1 }));
    }

    #[test]
    fn test_probe_missing_package_manager() {
        let config = config();
        let runner = ScriptedRunner::new().missing("dnf5");

        let err = KernelGate::new(&config).probe(&runner).unwrap_err();
        assert!(matches!(err, UpkitError::ToolNotInstalled { ref tool } if tool == "dnf5"));
    }

    #[test]
    fn test_version_not_found_is_fatal() {
        let config = config();
        let runner = ScriptedRunner::new()
            .exits("dnf5 check-upgrade", 100)
            .prints("dnf5 check-update kernel-helper", 0, "");

        let err = KernelGate::new(&config).probe(&runner).unwrap_err();
        assert!(matches!(err, UpkitError::KernelVersionNotFound { .. }));
    }

    #[test]
    fn test_version_query_failure_is_fatal() {
        let config = config();
        let runner = ScriptedRunner::new()
            .exits("dnf5 check-upgrade", 100)
            .exits("dnf5 check-update kernel-helper", 1);

        let err = KernelGate::new(&config).probe(&runner).unwrap_err();
        assert!(matches!(err, UpkitError::ToolExecutionFailed { code: 1, .. }));
    }

    #[test]
    fn test_configured_version_package() {
        let config = KernelConfig {
            version_package: "kernel-core".to_string(),
            ..KernelConfig::default()
        };
        let runner = ScriptedRunner::new()
            .exits("dnf5 check-upgrade", 100)
            .prints("dnf5 check-update kernel-core", 100, "kernel-core 6.14.2-300.fc42 updates\n");

        let state = KernelGate::new(&config).probe(&runner).unwrap();
        assert_eq!(state, KernelUpdateState::UpdateAvailable("6.14.2".to_string()));
    }

    #[test]
    fn test_run_confirmed() {
        let config = config();
        let runner = ScriptedRunner::new()
            .exits("dnf5 check-upgrade", 100)
            .prints("dnf5 check-update kernel-helper", 100, HELPER_LINE);
        let prompt = ScriptedPrompt::answering("Y");

        let state = KernelGate::new(&config).run(&runner, &prompt).unwrap();
        assert_eq!(state.confirmed_version(), Some("6.12.5"));
        assert_eq!(
            prompt.asked(),
            vec!["Kernel update available: 6.12.5. Proceed? [y/N]: ".to_string()]
        );
    }

    #[test]
    fn test_run_declined() {
        let config = config();
        for answer in ["n", "", "yes"] {
            let runner = ScriptedRunner::new()
                .exits("dnf5 check-upgrade", 100)
                .prints("dnf5 check-update kernel-helper", 100, HELPER_LINE);
            let prompt = ScriptedPrompt::answering(answer);

            let err = KernelGate::new(&config).run(&runner, &prompt).unwrap_err();
            assert!(
                matches!(err, UpkitError::UserDeclined { ref version } if version == "6.12.5"),
                "answer {:?}",
                answer
            );
        }
    }

    #[test]
    fn test_run_interrupted() {
        let config = config();
        let runner = ScriptedRunner::new()
            .exits("dnf5 check-upgrade", 100)
            .prints("dnf5 check-update kernel-helper", 100, HELPER_LINE);
        let prompt = ScriptedPrompt::interrupted();

        let err = KernelGate::new(&config).run(&runner, &prompt).unwrap_err();
        assert!(matches!(err, UpkitError::UserInterrupted));
    }

    #[test]
    fn test_run_without_update_never_prompts() {
        let config = config();
        let runner = ScriptedRunner::new().exits("dnf5 check-upgrade", 0);
        let prompt = ScriptedPrompt::answering("y");

        let state = KernelGate::new(&config).run(&runner, &prompt).unwrap();
        assert_eq!(state, KernelUpdateState::NoUpdateAvailable);
        assert!(prompt.asked().is_empty());
    }
}
