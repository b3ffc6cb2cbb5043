//! Progress Reporter - decorates one blocking step
//!
//! Verbose mode: the step runs directly with its own output visible.
//! Quiet mode: a single terminal line with a rotating indicator, repainted
//! by a background thread until the step resolves, then rewritten once
//! with a success or failure marker.
//!
//! The indicator thread is joined before the final line is written, so no
//! frame can land after it. One `report` call never overlaps another.
//!
//! Other writers to the same terminal (the log subscriber) go through a
//! [`ConsoleHandle`]: it takes the same lock, erases a half-drawn spinner
//! line first and lets the next tick repaint it below.

use owo_colors::OwoColorize;
use std::io::{self, IsTerminal, Stdout, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Frames for the rotating indicator
const SPINNER_FRAMES: &[&str] = &["-", "\\", "|", "/"];

/// Erase the current terminal line and return to column 0
pub const CLEAR_LINE: &str = "\r\x1b[2K";

/// Width of the padding on each side of a header title
const HEADER_PADDING: usize = 5;

struct Console<W> {
    out: W,
    /// A spinner frame is on screen without a trailing newline
    line_drawn: bool,
}

fn lock_console<W>(console: &Mutex<Console<W>>) -> MutexGuard<'_, Console<W>> {
    console
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared access to the reporter's terminal for out-of-band writers
pub struct ConsoleHandle<W> {
    console: Arc<Mutex<Console<W>>>,
}

impl<W> Clone for ConsoleHandle<W> {
    fn clone(&self) -> Self {
        Self {
            console: Arc::clone(&self.console),
        }
    }
}

impl<W: Write> ConsoleHandle<W> {
    /// Run `write` with the spinner line erased and the terminal held.
    /// The spinner repaints on its next tick.
    pub fn interrupt_line<T>(&self, write: impl FnOnce() -> T) -> T {
        let mut console = lock_console(&self.console);
        if console.line_drawn {
            let _ = write!(console.out, "{}", CLEAR_LINE);
            let _ = console.out.flush();
            console.line_drawn = false;
        }
        write()
    }
}

pub struct ProgressReporter<W: Write + Send = Stdout> {
    console: Arc<Mutex<Console<W>>>,
    tick: Duration,
    animate: bool,
    color: bool,
}

impl ProgressReporter<Stdout> {
    /// Reporter on stdout; animation and color only on a TTY
    pub fn stdout(tick: Duration) -> Self {
        let is_tty = io::stdout().is_terminal();
        let no_color = std::env::var_os("NO_COLOR").is_some();
        Self::new(io::stdout(), tick)
            .animated(is_tty)
            .colored(is_tty && !no_color)
    }
}

impl<W: Write + Send> ProgressReporter<W> {
    pub fn new(out: W, tick: Duration) -> Self {
        Self {
            console: Arc::new(Mutex::new(Console {
                out,
                line_drawn: false,
            })),
            tick,
            animate: true,
            color: false,
        }
    }

    pub fn animated(mut self, animate: bool) -> Self {
        self.animate = animate;
        self
    }

    pub fn colored(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn is_colored(&self) -> bool {
        self.color
    }

    pub fn console(&self) -> ConsoleHandle<W> {
        ConsoleHandle {
            console: Arc::clone(&self.console),
        }
    }

    /// Everything written so far
    pub fn into_inner(self) -> W
    where
        W: Default,
    {
        match Arc::try_unwrap(self.console) {
            Ok(console) => {
                console
                    .into_inner()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .out
            }
            Err(shared) => std::mem::take(&mut lock_console(&shared).out),
        }
    }

    /// Run `action` decorated for the chosen mode.
    ///
    /// Errors and panics from `action` reach the caller unchanged, after
    /// the failure marker has been written.
    pub fn report<T, E, F>(&self, label: &str, verbose: bool, action: F) -> Result<T, E>
    where
        F: FnOnce(bool) -> Result<T, E>,
    {
        if verbose {
            return action(true);
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let outcome = thread::scope(|scope| {
            let spinner = self
                .animate
                .then(|| scope.spawn(|| self.spin(label, stop_rx)));

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| action(false)));

            let _ = stop_tx.send(());
            if let Some(spinner) = spinner {
                let _ = spinner.join();
            }
            outcome
        });

        self.finish(label, matches!(outcome, Ok(Ok(_))));

        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Final line for a step that ran outside `report` (interactive steps)
    pub fn finish(&self, label: &str, ok: bool) {
        let line = if ok {
            let marker = if self.color {
                "✓".bright_green().to_string()
            } else {
                "✓".to_string()
            };
            format!("{} {}", marker, label)
        } else {
            let marker = if self.color {
                "✗".bright_red().to_string()
            } else {
                "✗".to_string()
            };
            format!("{} {} (failed)", marker, label)
        };

        let prefix = if self.animate { CLEAR_LINE } else { "" };
        let mut console = self.lock();
        let _ = writeln!(console.out, "{}{}", prefix, line);
        let _ = console.out.flush();
        console.line_drawn = false;
    }

    /// Plain informational line
    pub fn note(&self, message: &str) {
        let mut console = self.lock();
        let _ = writeln!(console.out, "{}", message);
        let _ = console.out.flush();
    }

    /// Boxed header shown before each step in verbose mode
    ///
    /// ```text
    /// #################
    /// #     Title     #
    /// #################
    /// ```
    pub fn header(&self, title: &str) {
        let border = "#".repeat(title.chars().count() + 2 * HEADER_PADDING + 2);
        let pad = " ".repeat(HEADER_PADDING);
        let mut console = self.lock();
        let out = &mut console.out;
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", border);
        let _ = writeln!(out, "#{}{}{}#", pad, title, pad);
        let _ = writeln!(out, "{}", border);
        let _ = writeln!(out);
        let _ = out.flush();
    }

    fn spin(&self, label: &str, stop_rx: Receiver<()>) {
        let mut frame = 0;
        loop {
            {
                let mut console = self.lock();
                let _ = write!(console.out, "{}{} {}...", CLEAR_LINE, SPINNER_FRAMES[frame], label);
                let _ = console.out.flush();
                console.line_drawn = true;
            }
            frame = (frame + 1) % SPINNER_FRAMES.len();

            match stop_rx.recv_timeout(self.tick) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Console<W>> {
        lock_console(&self.console)
    }
}
