//! CLI integration tests for upkit
//!
//! Runs the compiled binary only on paths that never reach sudo or a
//! package manager: --help, --version, bad flags, bad config.

use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn upkit() -> Command {
    Command::new(env!("CARGO_BIN_EXE_upkit"))
}

#[test]
fn test_help_lists_flags() {
    let output = upkit().arg("--help").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--verbose"));
    assert!(stdout.contains("--brew"));
}

#[test]
fn test_version_matches_package() {
    let output = upkit().arg("--version").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("upkit {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_unknown_flag_fails() {
    let output = upkit().arg("--definitely-not-a-flag").output().unwrap();
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_missing_config_exits_with_general_error() {
    let output = upkit()
        .env("UPKIT_CONFIG", "/nonexistent/upkit/config.toml")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/nonexistent/upkit/config.toml"));
}

#[test]
fn test_invalid_config_exits_with_general_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[progress]\ntick_ms = \"fast\"").unwrap();

    let output = upkit().env("UPKIT_CONFIG", file.path()).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse"));
}
