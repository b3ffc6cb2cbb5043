//! Operator-facing text: banners, run summary, abort line

use owo_colors::OwoColorize;
use upkit_common::distro::{DistroFamily, DistroInfo};
use upkit_common::pipeline::{PipelineResult, StepFailure};

pub const START_BANNER: &str = "\n--- Update Kit ---\n";

pub const FINISH_BANNER: &str = "--- System Upgrade finished ---";

pub fn distro_line(info: &DistroInfo, family: DistroFamily) -> String {
    format!("Detected distribution: {} ({})", info.display_name(), family)
}

/// One line per skipped or downgraded optional step
pub fn summary_lines(result: &PipelineResult, color: bool) -> Vec<String> {
    result
        .skipped()
        .map(|(step, message)| {
            let tag = if color {
                "Skipped".yellow().to_string()
            } else {
                "Skipped".to_string()
            };
            format!("{} {}: {}", tag, step, message)
        })
        .collect()
}

/// Operator aborts print their own message; everything else names the step
pub fn failure_line(failure: &StepFailure, color: bool) -> String {
    if failure.source.is_operator_abort() {
        return failure.source.to_string();
    }

    let line = format!("Error in step {}: {}", failure.step, failure.source);
    if color {
        line.red().to_string()
    } else {
        line
    }
}
