//! Command-line flags

use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "upkit")]
#[command(about = "Update Kit - one-shot maintenance pass for a Linux host", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Show every command's output instead of a spinner line
    #[arg(short = 'l', long, visible_alias = "log")]
    pub verbose: bool,

    /// Also update Homebrew packages
    #[arg(short = 'b', long)]
    pub brew: bool,
}
