//! Test doubles for the system seams: command runner, operator prompt and
//! privilege backend. Used by unit tests here and by the integration tests
//! of the pipeline.

use crate::kernel::{ConfirmPrompt, PromptResponse};
use crate::keepalive::PrivilegeBackend;
use crate::runner::{classify, CommandOutcome, CommandResult, CommandRunner, CommandSpec, FailureKind, RunOptions};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

enum Scripted {
    Completed(CommandResult),
    Missing,
}

struct Rule {
    prefix: String,
    reply: Scripted,
}

impl Rule {
    /// Whole-word prefix: `dnf` matches `dnf update` but not `dnf5 update`
    fn matches(&self, command_line: &str) -> bool {
        command_line == self.prefix
            || command_line
                .strip_prefix(self.prefix.as_str())
                .map_or(false, |rest| rest.starts_with(' '))
    }
}

/// Canned replies keyed by command-line prefix. Unmatched commands exit 0
/// with no output. Every invocation is recorded.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands starting with `prefix` exit with `code`
    pub fn exits(self, prefix: &str, code: i32) -> Self {
        self.reply(prefix, Scripted::Completed(CommandResult::with_exit_code(code)))
    }

    /// Commands starting with `prefix` exit with `code` and print `stdout`
    pub fn prints(self, prefix: &str, code: i32, stdout: &str) -> Self {
        self.reply(prefix, Scripted::Completed(CommandResult::with_stdout(code, stdout)))
    }

    /// Commands starting with `prefix` cannot be launched
    pub fn missing(self, prefix: &str) -> Self {
        self.reply(prefix, Scripted::Missing)
    }

    /// Availability probe for `tool` fails
    pub fn without_tool(self, tool: &str) -> Self {
        self.missing(&format!("{} --version", tool))
    }

    fn reply(mut self, prefix: &str, reply: Scripted) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            reply,
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        let probe = Rule {
            prefix: prefix.to_string(),
            reply: Scripted::Missing,
        };
        self.calls().iter().any(|call| probe.matches(call))
    }

    /// Recorded invocations, availability probes left out
    pub fn actions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !call.ends_with(" --version"))
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec, options: RunOptions) -> CommandOutcome {
        let command_line = spec.command_line();
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command_line.clone());

        match self.rules.iter().find(|rule| rule.matches(&command_line)) {
            Some(Rule {
                reply: Scripted::Completed(result),
                ..
            }) => classify(spec, result.clone(), options),
            Some(Rule {
                reply: Scripted::Missing,
                ..
            }) => CommandOutcome::failure(FailureKind::LaunchError, None),
            None => CommandOutcome::Success(CommandResult::default()),
        }
    }
}

/// Queued operator answers. An empty queue reads as an interrupt.
#[derive(Default)]
pub struct ScriptedPrompt {
    responses: Mutex<VecDeque<PromptResponse>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn answering(answer: &str) -> Self {
        let prompt = Self::default();
        prompt
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(PromptResponse::Answer(format!("{}\n", answer)));
        prompt
    }

    pub fn interrupted() -> Self {
        Self::default()
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ConfirmPrompt for ScriptedPrompt {
    fn ask(&self, question: &str) -> PromptResponse {
        self.asked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(question.to_string());
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(PromptResponse::Interrupted)
    }
}

/// Privilege backend with counters instead of sudo
pub struct FakePrivilege {
    elevated: bool,
    grant: bool,
    refresh_ok: bool,
    validations: AtomicUsize,
    refreshes: AtomicUsize,
}

impl FakePrivilege {
    pub fn granting() -> Self {
        Self {
            elevated: false,
            grant: true,
            refresh_ok: true,
            validations: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn denying() -> Self {
        Self {
            grant: false,
            ..Self::granting()
        }
    }

    pub fn elevated() -> Self {
        Self {
            elevated: true,
            ..Self::granting()
        }
    }

    pub fn with_failing_refresh(mut self) -> Self {
        self.refresh_ok = false;
        self
    }

    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl PrivilegeBackend for FakePrivilege {
    fn is_elevated(&self) -> bool {
        self.elevated
    }

    fn validate(&self, _timeout: Duration) -> bool {
        self.validations.fetch_add(1, Ordering::SeqCst);
        self.grant
    }

    fn refresh(&self, _timeout: Duration) -> bool {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.refresh_ok
    }
}
