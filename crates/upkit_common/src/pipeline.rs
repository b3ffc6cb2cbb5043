//! Distribution Update Pipeline
//!
//! A pipeline is an ordered list of steps: a family-specific prefix
//! followed by the shared suffix (snap, flatpak, optional brew). Steps run
//! strictly one after another. A required step failure aborts the run;
//! an optional step failure is downgraded to a message.

use crate::config::UpkitConfig;
use crate::distro::DistroFamily;
use crate::errors::{Result, UpkitError};
use crate::kernel::ConfirmPrompt;
use crate::progress::ProgressReporter;
use crate::runner::CommandRunner;
use crate::steps;
use std::io::Write;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// What one step reports when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    /// Done, with something worth telling the operator
    Message(String),
    /// Backing tool is absent; nothing ran
    Skipped(String),
    /// Optional step failed; the run went on
    Downgraded(String),
}

impl StepStatus {
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Completed => None,
            Self::Message(msg) | Self::Skipped(msg) | Self::Downgraded(msg) => Some(msg),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_) | Self::Downgraded(_))
    }
}

/// Everything a step action may touch
pub struct StepContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub prompt: &'a dyn ConfirmPrompt,
    pub config: &'a UpkitConfig,
    /// Prefix privileged commands with sudo
    pub elevate: bool,
    /// Kernel version confirmed earlier in this run
    pub confirmed_kernel: Option<String>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        prompt: &'a dyn ConfirmPrompt,
        config: &'a UpkitConfig,
        elevate: bool,
    ) -> Self {
        Self {
            runner,
            prompt,
            config,
            elevate,
            confirmed_kernel: None,
        }
    }
}

pub type StepAction = Box<dyn Fn(&mut StepContext<'_>, bool) -> Result<StepStatus>>;

pub struct Step {
    pub name: &'static str,
    /// Verbose-mode header
    pub title: &'static str,
    /// Quiet-mode spinner label
    pub label: &'static str,
    pub required: bool,
    /// Talks to the operator, so it must not run under the spinner
    pub interactive: bool,
    action: StepAction,
}

impl Step {
    pub fn new<F>(name: &'static str, title: &'static str, label: &'static str, required: bool, action: F) -> Self
    where
        F: Fn(&mut StepContext<'_>, bool) -> Result<StepStatus> + 'static,
    {
        Self {
            name,
            title,
            label,
            required,
            interactive: false,
            action: Box::new(action),
        }
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Run the action. A missing tool on an optional step is a skip.
    pub fn execute(&self, ctx: &mut StepContext<'_>, verbose: bool) -> Result<StepStatus> {
        match (self.action)(ctx, verbose) {
            Err(err) if !self.required && err.is_not_installed() => Ok(StepStatus::Skipped(err.to_string())),
            outcome => outcome,
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("interactive", &self.interactive)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: &'static str,
    pub status: StepStatus,
    pub duration: Duration,
}

/// Ordered record of what ran; used for reporting only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineResult {
    pub records: Vec<StepRecord>,
}

impl PipelineResult {
    pub fn names(&self) -> Vec<&'static str> {
        self.records.iter().map(|r| r.name).collect()
    }

    /// Skipped or downgraded steps with their messages
    pub fn skipped(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.records
            .iter()
            .filter(|r| r.status.is_skipped())
            .filter_map(|r| r.status.message().map(|msg| (r.name, msg)))
    }

    pub fn total_duration(&self) -> Duration {
        self.records.iter().map(|r| r.duration).sum()
    }
}

/// A required step failed; nothing after it ran
#[derive(Debug, Error)]
#[error("{step}: {source}")]
pub struct StepFailure {
    pub step: &'static str,
    pub source: UpkitError,
    /// Steps that finished before the failure
    pub completed: PipelineResult,
}

impl StepFailure {
    pub fn exit_code(&self) -> i32 {
        self.source.exit_code()
    }
}

#[derive(Debug, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }

    pub fn run<W: Write + Send>(
        &self,
        ctx: &mut StepContext<'_>,
        reporter: &ProgressReporter<W>,
        verbose: bool,
    ) -> std::result::Result<PipelineResult, StepFailure> {
        let mut result = PipelineResult::default();

        for step in &self.steps {
            if verbose {
                reporter.header(step.title);
            }
            info!(step = step.name, required = step.required, "Running step");

            let started = Instant::now();
            let outcome = if step.interactive {
                let outcome = step.execute(ctx, verbose);
                if !verbose {
                    reporter.finish(step.label, outcome.is_ok());
                }
                outcome
            } else {
                reporter.report(step.label, verbose, |verbose| step.execute(ctx, verbose))
            };
            let duration = started.elapsed();

            let status = match outcome {
                Ok(status) => status,
                Err(err) if !step.required && !err.is_operator_abort() => {
                    warn!(step = step.name, error = %err, "Optional step failed, continuing");
                    StepStatus::Downgraded(err.to_string())
                }
                Err(source) => {
                    return Err(StepFailure {
                        step: step.name,
                        source,
                        completed: result,
                    })
                }
            };

            if verbose {
                if let Some(msg) = status.message() {
                    reporter.note(msg);
                }
            }
            info!(step = step.name, ?duration, "Step finished");
            result.records.push(StepRecord {
                name: step.name,
                status,
                duration,
            });
        }

        Ok(result)
    }
}

/// Steps that run before the shared suffix for `family`
pub fn family_prefix(family: DistroFamily) -> Vec<Step> {
    match family {
        DistroFamily::Fedora => vec![
            Step::new(
                "kernel-check",
                "Check Kernel Update",
                "Checking for Kernel Update",
                true,
                steps::kernel_gate,
            )
            .interactive(),
            dnf_update(),
            dnf_clean(),
            Step::new(
                "initramfs",
                "Rebuild initramfs",
                "Rebuilding initramfs",
                true,
                steps::rebuild_initramfs,
            ),
            Step::new(
                "nvidia-modules",
                "Rebuild Nvidia Drivers",
                "Rebuilding NVIDIA drivers",
                false,
                steps::rebuild_nvidia_modules,
            ),
        ],
        DistroFamily::Rhel => vec![dnf_update(), dnf_clean()],
        DistroFamily::Debian => vec![Step::new(
            "apt-update",
            "Update APT Packages",
            "Updating APT packages",
            true,
            steps::apt_update,
        )],
        DistroFamily::Generic => Vec::new(),
    }
}

/// Userspace package managers, same for every family
pub fn generic_suffix(include_brew: bool) -> Vec<Step> {
    let mut suffix = vec![
        Step::new(
            "snap",
            "Update Snap Packages",
            "Updating Snap packages",
            false,
            steps::snap_refresh,
        ),
        Step::new(
            "flatpak",
            "Update Flatpak Packages",
            "Updating Flatpak packages",
            false,
            steps::flatpak_update,
        ),
    ];
    if include_brew {
        suffix.push(Step::new(
            "brew",
            "Update Homebrew Packages",
            "Updating Homebrew packages",
            false,
            steps::brew_update,
        ));
    }
    suffix
}

pub fn build_pipeline(family: DistroFamily, include_brew: bool) -> Pipeline {
    let mut steps = family_prefix(family);
    steps.extend(generic_suffix(include_brew));
    Pipeline::new(steps)
}

fn dnf_update() -> Step {
    Step::new(
        "dnf-update",
        "Update DNF Packages",
        "Updating DNF packages",
        true,
        steps::dnf_update,
    )
}

fn dnf_clean() -> Step {
    Step::new(
        "dnf-clean",
        "Clean DNF Cache",
        "Cleaning DNF Cache",
        true,
        steps::dnf_clean_cache,
    )
}
