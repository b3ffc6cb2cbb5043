//! One maintenance run, start to finish
//!
//! Order matters. Signals are blocked before any thread exists. Log lines
//! share the reporter's terminal lock. The sudo grant is acquired before the
//! first step, and the keepalive guard outlives the pipeline so it is
//! released on every return path.

use crate::cli::Cli;
use crate::cli_output::{self, FINISH_BANNER, START_BANNER};
use std::io::Write;
use std::sync::Arc;
use tracing::{error, warn};
use upkit_common::errors::{EXIT_GENERAL_ERROR, EXIT_SUCCESS};
use upkit_common::kernel::StdinPrompt;
use upkit_common::signals::{self, InterruptContext};
use upkit_common::{build_pipeline, keepalive, logging};
use upkit_common::{DistroInfo, Pipeline, ProgressReporter, StepContext, SystemRunner, UpkitConfig};

pub fn run(cli: &Cli) -> i32 {
    let config = match UpkitConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_GENERAL_ERROR;
        }
    };
    let reporter = ProgressReporter::stdout(config.progress.tick());
    logging::init_with_console(cli.verbose, reporter.console());

    let interrupts = InterruptContext::new();
    let session = keepalive::global(&config.keepalive);
    let watcher_session = Arc::clone(&session);
    if let Err(e) = signals::install(interrupts.clone(), move || watcher_session.stop()) {
        warn!("Interrupt watcher not installed: {}", e);
    }

    let distro = DistroInfo::load().unwrap_or_else(|e| {
        warn!("{:#}, using the generic pipeline", e);
        DistroInfo::default()
    });
    let family = distro.family();

    reporter.note(START_BANNER);
    if cli.verbose {
        reporter.note(&cli_output::distro_line(&distro, family));
    }

    let _guard = match session.acquire() {
        Ok(guard) => guard,
        Err(e) => {
            error!("{}", e);
            reporter.note(&format!("Error: {}", e));
            return e.exit_code();
        }
    };

    let runner = SystemRunner;
    let prompt = StdinPrompt::new(interrupts);
    let mut ctx = StepContext::new(&runner, &prompt, &config, !keepalive::running_as_root());
    let pipeline = build_pipeline(family, cli.brew);

    run_pipeline(&pipeline, &mut ctx, &reporter, cli.verbose)
}

/// Run `pipeline` and turn its outcome into a process exit code
pub fn run_pipeline<W: Write + Send>(
    pipeline: &Pipeline,
    ctx: &mut StepContext<'_>,
    reporter: &ProgressReporter<W>,
    verbose: bool,
) -> i32 {
    match pipeline.run(ctx, reporter, verbose) {
        Ok(result) => {
            for line in cli_output::summary_lines(&result, reporter.is_colored()) {
                reporter.note(&line);
            }
            reporter.note(FINISH_BANNER);
            EXIT_SUCCESS
        }
        Err(failure) => {
            error!(step = failure.step, error = %failure.source, "Run aborted");
            reporter.note(&cli_output::failure_line(&failure, reporter.is_colored()));
            failure.exit_code()
        }
    }
}
