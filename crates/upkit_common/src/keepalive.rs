//! Privileged Session Keepalive
//!
//! Keeps the sudo timestamp fresh for the whole run so no step blocks on a
//! password prompt halfway through a long update.
//!
//! Lifecycle: `Idle -> Validating -> Active -> Stopping -> Idle`.
//! A denied or timed-out validation drops straight back to `Idle` and the
//! caller must treat it as fatal. A refresh thread that gives up on a
//! failed refresh moves the session from `Active` back to `Idle` itself.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let session = keepalive::global(&config.keepalive);
//! let _guard = session.acquire()?;   // prompts once
//! // ... privileged steps ...
//! // guard drop stops the refresh thread on every exit path
//! ```

use crate::config::KeepaliveConfig;
use crate::errors::{Result, UpkitError};
use crate::runner::{CommandOutcome, CommandRunner, CommandSpec, RunOptions, SystemRunner};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Obtains and refreshes the elevated-privilege grant
pub trait PrivilegeBackend: Send + Sync {
    /// Process already runs with the target privilege level
    fn is_elevated(&self) -> bool;

    /// Interactive validation; may prompt for a password
    fn validate(&self, timeout: Duration) -> bool;

    /// Silent, non-interactive refresh
    fn refresh(&self, timeout: Duration) -> bool;
}

/// Effective uid is 0; privileged commands then skip the sudo prefix
pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// `sudo -v` to validate, `sudo -n true` to refresh
pub struct SudoBackend {
    runner: Arc<dyn CommandRunner>,
}

impl SudoBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Default for SudoBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner))
    }
}

impl PrivilegeBackend for SudoBackend {
    fn is_elevated(&self) -> bool {
        running_as_root()
    }

    fn validate(&self, timeout: Duration) -> bool {
        // Streamed so the password prompt reaches the terminal
        let spec = CommandSpec::new(["sudo", "-v"]).with_timeout(timeout);
        let outcome = self.runner.run(&spec, RunOptions::streaming(true));
        if let Some(kind) = outcome.failure_kind() {
            warn!("Sudo validation failed: {}", kind.as_str());
        }
        matches!(outcome, CommandOutcome::Success(_))
    }

    fn refresh(&self, timeout: Duration) -> bool {
        let spec = CommandSpec::new(["sudo", "-n", "true"]).with_timeout(timeout);
        self.runner
            .run(&spec, RunOptions::captured())
            .is_success()
    }
}

/// Timing knobs, resolved from [`KeepaliveConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveTiming {
    pub refresh_interval: Duration,
    pub validate_timeout: Duration,
    pub refresh_timeout: Duration,
    /// Upper bound on waiting for the refresh thread in `stop()`
    pub stop_timeout: Duration,
}

impl Default for KeepaliveTiming {
    fn default() -> Self {
        Self::from(&KeepaliveConfig::default())
    }
}

impl From<&KeepaliveConfig> for KeepaliveTiming {
    fn from(config: &KeepaliveConfig) -> Self {
        Self {
            refresh_interval: Duration::from_secs(config.refresh_interval_secs),
            validate_timeout: Duration::from_secs(config.validate_timeout_secs),
            refresh_timeout: Duration::from_secs(config.refresh_timeout_secs),
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveState {
    Idle,
    Validating,
    Active,
    Stopping,
}

struct Worker {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    state: KeepaliveState,
    worker: Option<Worker>,
}

pub struct KeepaliveSession {
    backend: Arc<dyn PrivilegeBackend>,
    timing: KeepaliveTiming,
    inner: Arc<Mutex<Inner>>,
}

impl KeepaliveSession {
    pub fn new(backend: Arc<dyn PrivilegeBackend>, timing: KeepaliveTiming) -> Self {
        Self {
            backend,
            timing,
            inner: Arc::new(Mutex::new(Inner {
                state: KeepaliveState::Idle,
                worker: None,
            })),
        }
    }

    pub fn timing(&self) -> KeepaliveTiming {
        self.timing
    }

    pub fn state(&self) -> KeepaliveState {
        self.lock().state
    }

    /// Active and the refresh thread is still alive
    pub fn is_running(&self) -> bool {
        let inner = self.lock();
        inner.state == KeepaliveState::Active
            && inner
                .worker
                .as_ref()
                .map_or(false, |w| !w.handle.is_finished())
    }

    /// Validate once and start refreshing in the background.
    ///
    /// No-op when already root or already Active.
    pub fn start(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state != KeepaliveState::Idle {
                debug!(state = ?inner.state, "Sudo keepalive is already running");
                return Ok(());
            }
            if self.backend.is_elevated() {
                debug!("Already running as root, sudo keepalive not needed");
                return Ok(());
            }
            inner.state = KeepaliveState::Validating;
        }

        // Lock is released while the operator types a password
        let granted = self.backend.validate(self.timing.validate_timeout);

        let mut inner = self.lock();
        if !granted {
            inner.state = KeepaliveState::Idle;
            return Err(UpkitError::KeepaliveGrantDenied);
        }

        match self.spawn_worker() {
            Ok(worker) => {
                inner.worker = Some(worker);
                inner.state = KeepaliveState::Active;
                debug!(
                    "Sudo keepalive started (refresh every {}s)",
                    self.timing.refresh_interval.as_secs()
                );
                Ok(())
            }
            Err(e) => {
                inner.state = KeepaliveState::Idle;
                Err(UpkitError::Io(e))
            }
        }
    }

    /// Start and hand back a guard that stops the session when dropped
    pub fn acquire(self: &Arc<Self>) -> Result<KeepaliveGuard> {
        self.start()?;
        Ok(KeepaliveGuard {
            session: Arc::clone(self),
        })
    }

    /// Signal the refresh thread and wait (bounded) for it. Idempotent.
    pub fn stop(&self) {
        let worker = {
            let mut inner = self.lock();
            if inner.state != KeepaliveState::Active {
                return;
            }
            inner.state = KeepaliveState::Stopping;
            inner.worker.take()
        };

        if let Some(worker) = worker {
            debug!("Stopping sudo keepalive");
            let _ = worker.stop_tx.send(());
            match worker.done_rx.recv_timeout(self.timing.stop_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    let _ = worker.handle.join();
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Keepalive thread did not exit within {:?}",
                        self.timing.stop_timeout
                    );
                }
            }
        }

        self.lock().state = KeepaliveState::Idle;
    }

    fn spawn_worker(&self) -> std::io::Result<Worker> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let backend = Arc::clone(&self.backend);
        let timing = self.timing;
        let shared = Arc::clone(&self.inner);

        let handle = thread::Builder::new()
            .name("sudo-keepalive".to_string())
            .spawn(move || {
                if refresh_loop(backend.as_ref(), timing, &stop_rx) == LoopExit::RefreshFailed {
                    retire_worker(&shared);
                }
                let _ = done_tx.send(());
            })?;

        Ok(Worker {
            stop_tx,
            done_rx,
            handle,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Called from the refresh thread after it gave up on its own. A concurrent
/// `stop()` already owns the teardown, so only our own slot is cleared.
fn retire_worker(shared: &Mutex<Inner>) {
    let mut inner = lock_inner(shared);
    let ours = inner
        .worker
        .as_ref()
        .map_or(false, |w| w.handle.thread().id() == thread::current().id());
    if inner.state == KeepaliveState::Active && ours {
        // Dropping our own handle detaches the thread
        inner.worker = None;
        inner.state = KeepaliveState::Idle;
    }
}

impl Drop for KeepaliveSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Stopped,
    RefreshFailed,
}

fn refresh_loop(
    backend: &dyn PrivilegeBackend,
    timing: KeepaliveTiming,
    stop_rx: &Receiver<()>,
) -> LoopExit {
    loop {
        match stop_rx.recv_timeout(timing.refresh_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return LoopExit::Stopped,
        }

        if backend.refresh(timing.refresh_timeout) {
            debug!("Sudo timestamp refreshed");
        } else {
            // Later privileged steps fail on their own
            warn!("Failed to refresh sudo timestamp, keepalive stopping");
            return LoopExit::RefreshFailed;
        }
    }
}

/// Stops the session on drop: normal return, `?`, or unwinding panic
pub struct KeepaliveGuard {
    session: Arc<KeepaliveSession>,
}

impl KeepaliveGuard {
    pub fn session(&self) -> &Arc<KeepaliveSession> {
        &self.session
    }
}

impl Drop for KeepaliveGuard {
    fn drop(&mut self) {
        self.session.stop();
    }
}

static GLOBAL: OnceLock<Arc<KeepaliveSession>> = OnceLock::new();

/// Process-wide session backed by sudo. The first caller's config wins.
pub fn global(config: &KeepaliveConfig) -> Arc<KeepaliveSession> {
    let session = GLOBAL.get_or_init(|| {
        Arc::new(KeepaliveSession::new(
            Arc::new(SudoBackend::default()),
            KeepaliveTiming::from(config),
        ))
    });
    Arc::clone(session)
}
