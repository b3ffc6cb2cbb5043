//! Log events raised while a quiet-mode spinner is on screen must not land
//! inside the spinner line. Runs in its own process because it installs the
//! global subscriber.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use upkit_common::keepalive::{KeepaliveSession, KeepaliveTiming};
use upkit_common::logging::{self, ConsoleLogWriter};
use upkit_common::progress::CLEAR_LINE;
use upkit_common::testing::FakePrivilege;
use upkit_common::ProgressReporter;

/// stdout and stderr of one terminal, interleaved in arrival order
#[derive(Clone, Default)]
struct Terminal(Arc<Mutex<Vec<u8>>>);

impl Terminal {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Terminal {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What the operator sees: each line as left after its last erase
fn visible_lines(raw: &str) -> Vec<String> {
    raw.split_terminator('\n')
        .map(|line| match line.rsplit_once(CLEAR_LINE) {
            Some((_, shown)) => shown.to_string(),
            None => line.to_string(),
        })
        .filter(|line| !line.is_empty())
        .collect()
}

#[test]
fn test_keepalive_warning_does_not_corrupt_spinner_line() {
    std::env::remove_var(logging::LOG_ENV);
    std::env::remove_var("RUST_LOG");

    let terminal = Terminal::default();
    let reporter = ProgressReporter::new(terminal.clone(), Duration::from_millis(5));
    logging::init_with_writer(
        false,
        ConsoleLogWriter::new(reporter.console(), terminal.clone()),
        false,
    );

    let session = KeepaliveSession::new(
        Arc::new(FakePrivilege::granting().with_failing_refresh()),
        KeepaliveTiming {
            refresh_interval: Duration::from_millis(20),
            validate_timeout: Duration::from_secs(1),
            refresh_timeout: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(2),
        },
    );
    session.start().unwrap();

    let result: Result<(), ()> = reporter.report("Updating DNF packages", false, |_| {
        thread::sleep(Duration::from_millis(200));
        Ok(())
    });
    session.stop();
    assert!(result.is_ok());

    let raw = terminal.contents();
    let lines = visible_lines(&raw);
    assert_eq!(lines.len(), 2, "{:?}", raw);
    assert!(lines[0].contains("Failed to refresh sudo timestamp"), "{:?}", lines);
    assert!(!lines[0].contains("Updating DNF packages"), "{:?}", lines);

    let labelled: Vec<&String> = lines
        .iter()
        .filter(|line| line.contains("Updating DNF packages"))
        .collect();
    assert_eq!(labelled, vec!["✓ Updating DNF packages"]);
}
