//! upkit - one-shot maintenance pass for a Linux host
//!
//! Updates the OS packages for the detected distribution (with a kernel
//! confirmation gate on Fedora), then snap, flatpak and optionally brew.

use clap::Parser;
use upkit::app;
use upkit::cli::Cli;

fn main() {
    let cli = Cli::parse();
    std::process::exit(app::run(&cli));
}
