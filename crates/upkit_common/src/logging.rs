//! Diagnostic logging to stderr
//!
//! `UPKIT_LOG` (then `RUST_LOG`) picks the filter. Without either, verbose
//! runs log at `info` and quiet runs at `warn` so the spinner line stays
//! clean.
//!
//! While a spinner owns the terminal, log lines go through
//! [`ConsoleLogWriter`] so they never land in the middle of a frame.

use crate::progress::ConsoleHandle;
use std::io::{self, IsTerminal, Write};
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive
pub const LOG_ENV: &str = "UPKIT_LOG";

/// Filter directive for this run
pub fn filter_directive(verbose: bool) -> String {
    std::env::var(LOG_ENV)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .ok()
        .filter(|directive| !directive.trim().is_empty())
        .unwrap_or_else(|| default_level(verbose).to_string())
}

fn default_level(verbose: bool) -> &'static str {
    if verbose {
        "info"
    } else {
        "warn"
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_new(filter_directive(verbose))
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)))
}

/// Install the global subscriber on plain stderr. Repeated calls are ignored.
pub fn init(verbose: bool) {
    init_with_writer(verbose, io::stderr, io::stderr().is_terminal());
}

/// Install the global subscriber on stderr, coordinated with the progress
/// reporter that owns `console`
pub fn init_with_console<W: Write + Send + 'static>(verbose: bool, console: ConsoleHandle<W>) {
    init_with_writer(
        verbose,
        ConsoleLogWriter::new(console, io::stderr()),
        io::stderr().is_terminal(),
    );
}

/// Install the global subscriber on any writer. Repeated calls are ignored.
pub fn init_with_writer<M>(verbose: bool, writer: M, ansi: bool)
where
    M: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(false)
        .try_init();
}

/// Log sink that erases the reporter's spinner line before each event.
///
/// The fmt layer hands over one formatted event per write, so each event
/// is written whole while the terminal is held.
pub struct ConsoleLogWriter<W, E> {
    console: ConsoleHandle<W>,
    sink: Mutex<E>,
}

impl<W: Write, E: Write> ConsoleLogWriter<W, E> {
    pub fn new(console: ConsoleHandle<W>, sink: E) -> Self {
        Self {
            console,
            sink: Mutex::new(sink),
        }
    }

    fn sink(&self) -> MutexGuard<'_, E> {
        self.sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<'a, W, E> MakeWriter<'a> for ConsoleLogWriter<W, E>
where
    W: Write + 'a,
    E: Write + 'a,
{
    type Writer = LogLine<'a, W, E>;

    fn make_writer(&'a self) -> Self::Writer {
        LogLine { writer: self }
    }
}

pub struct LogLine<'a, W, E> {
    writer: &'a ConsoleLogWriter<W, E>,
}

impl<W: Write, E: Write> Write for LogLine<'_, W, E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.console.interrupt_line(|| {
            let mut sink = self.writer.sink();
            sink.write_all(buf)?;
            sink.flush()
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.sink().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressReporter, CLEAR_LINE};
    use std::time::Duration;

    #[test]
    fn test_default_levels() {
        assert_eq!(default_level(true), "info");
        assert_eq!(default_level(false), "warn");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }

    #[test]
    fn test_log_line_clears_drawn_spinner_first() {
        let reporter = ProgressReporter::new(Vec::new(), Duration::from_secs(60));
        let writer = ConsoleLogWriter::new(reporter.console(), Vec::new());

        let _: Result<(), ()> = reporter.report("Updating DNF packages", false, |_| {
            // First frame is drawn before the spinner waits on its tick
            std::thread::sleep(Duration::from_millis(50));
            writer
                .make_writer()
                .write_all(b"WARN Failed to refresh sudo timestamp\n")
                .map_err(|_| ())
        });

        let logged = String::from_utf8(writer.sink().clone()).unwrap();
        assert_eq!(logged, "WARN Failed to refresh sudo timestamp\n");

        let out = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(
            out,
            format!(
                "{clear}- Updating DNF packages...{clear}{clear}✓ Updating DNF packages\n",
                clear = CLEAR_LINE
            )
        );
    }

    #[test]
    fn test_log_line_without_spinner_writes_through() {
        let reporter = ProgressReporter::new(Vec::new(), Duration::from_millis(5));
        let writer = ConsoleLogWriter::new(reporter.console(), Vec::new());
        writer.make_writer().write_all(b"INFO hello\n").unwrap();

        assert_eq!(writer.sink().as_slice(), b"INFO hello\n");
        assert!(reporter.into_inner().is_empty());
    }
}
