//! Interrupt handling
//!
//! SIGINT and SIGTERM are blocked in the main thread before anything else
//! is spawned, so every later thread inherits the mask and only the watcher
//! thread receives them (via `sigwait`). Child processes get a clean mask
//! from `std::process::Command`, so Ctrl-C still reaches a running dnf.
//!
//! On delivery the watcher runs the cleanup hook (keepalive stop), then:
//! - SIGINT while the confirmation prompt waits: exit with the decline code
//! - otherwise: restore the default disposition and re-raise

use crate::errors::{Result, EXIT_KERNEL_DECLINED};
use nix::sys::signal::{raise, SigSet, Signal};
use std::io::{self, Write};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;

/// Shared between the prompt and the watcher thread
#[derive(Debug, Clone, Default)]
pub struct InterruptContext {
    prompt_active: Arc<AtomicBool>,
}

impl InterruptContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the confirmation prompt as waiting until the scope drops
    pub fn enter_prompt(&self) -> PromptScope {
        self.prompt_active.store(true, Ordering::SeqCst);
        PromptScope {
            flag: Arc::clone(&self.prompt_active),
        }
    }

    pub fn prompt_active(&self) -> bool {
        self.prompt_active.load(Ordering::SeqCst)
    }
}

pub struct PromptScope {
    flag: Arc<AtomicBool>,
}

impl Drop for PromptScope {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// Treat as a declined kernel update
    DeclineKernel,
    /// Terminate with the default disposition of the signal
    Terminate(Signal),
}

/// Only Ctrl-C at the prompt counts as an answer. SIGTERM always terminates.
pub fn action_for(signal: Signal, prompt_active: bool) -> InterruptAction {
    if prompt_active && signal == Signal::SIGINT {
        InterruptAction::DeclineKernel
    } else {
        InterruptAction::Terminate(signal)
    }
}

fn termination_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set
}

/// Block the termination signals in the calling thread and start the
/// watcher. Call from `main` before any other thread exists.
pub fn install<F>(context: InterruptContext, on_interrupt: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let set = termination_set();
    set.thread_block().map_err(io::Error::from)?;

    let handle = thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            let signal = match set.wait() {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("sigwait failed: {}", e);
                    return;
                }
            };
            warn!(signal = %signal, "Interrupted, cleaning up");
            on_interrupt();

            match action_for(signal, context.prompt_active()) {
                InterruptAction::DeclineKernel => {
                    let mut stdout = io::stdout();
                    let _ = writeln!(stdout, "\nAborted: Kernel update detected and not confirmed.");
                    let _ = stdout.flush();
                    process::exit(EXIT_KERNEL_DECLINED);
                }
                InterruptAction::Terminate(signal) => terminate_with(signal),
            }
        })?;

    Ok(handle)
}

/// Nothing installs a handler, so unblocking here and raising hits the
/// default action for this thread and ends the process.
fn terminate_with(signal: Signal) -> ! {
    let mut set = SigSet::empty();
    set.add(signal);
    let _ = set.thread_unblock();
    let _ = raise(signal);
    process::exit(128 + signal as i32)
}
