//! upkit common - update orchestration core
//!
//! Runs one host maintenance pass as a strictly sequential pipeline of
//! steps, keeping the sudo grant alive for the whole run and gating kernel
//! upgrades behind an explicit operator confirmation.

pub mod config;
pub mod distro;
pub mod errors;
pub mod keepalive;
pub mod kernel;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod signals;
pub mod steps;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::UpkitConfig;
pub use distro::{DistroFamily, DistroInfo};
pub use errors::{Result, UpkitError};
pub use pipeline::{build_pipeline, Pipeline, PipelineResult, StepContext, StepFailure, StepStatus};
pub use progress::ProgressReporter;
pub use runner::{CommandRunner, CommandSpec, SystemRunner};
