//! Error types and exit codes for upkit
//!
//! Every failure the orchestration core can surface maps onto one variant
//! here, and every variant maps onto one process exit code.

use thiserror::Error;

/// Exit code for success
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for general errors
pub const EXIT_GENERAL_ERROR: i32 = 1;

/// Exit code when the operator declines (or abandons) a kernel update
pub const EXIT_KERNEL_DECLINED: i32 = 3;

/// Exit code when the operator interrupts the run
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Error, Debug)]
pub enum UpkitError {
    #[error("{tool} is not installed on this system")]
    ToolNotInstalled { tool: String },

    #[error("`{command}` failed with exit code {code}")]
    ToolExecutionFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("`{command}` did not finish within {secs}s")]
    CommandTimedOut { command: String, secs: u64 },

    #[error("failed to launch `{command}`")]
    LaunchFailed { command: String },

    #[error("kernel update check returned unexpected exit code {code}")]
    ProbeAmbiguous { code: i32 },

    #[error("could not find a pending version for {package}")]
    KernelVersionNotFound { package: String },

    #[error("Aborted: Kernel update detected and not confirmed.")]
    UserDeclined { version: String },

    #[error("Aborted: Kernel update detected and not confirmed.")]
    UserInterrupted,

    #[error("sudo privileges are required to continue")]
    KeepaliveGrantDenied,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpkitError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            UpkitError::UserDeclined { .. } | UpkitError::UserInterrupted => EXIT_KERNEL_DECLINED,
            _ => EXIT_GENERAL_ERROR,
        }
    }

    /// True when the backing tool is simply missing
    pub fn is_not_installed(&self) -> bool {
        matches!(self, UpkitError::ToolNotInstalled { .. })
    }

    /// True for deliberate operator aborts
    pub fn is_operator_abort(&self) -> bool {
        matches!(
            self,
            UpkitError::UserDeclined { .. } | UpkitError::UserInterrupted
        )
    }
}

pub type Result<T> = std::result::Result<T, UpkitError>;
