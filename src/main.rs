//! # tabwatch command-line entry point
//!
//! ```bash
//! tabwatch analyze data.csv --contamination 0.1
//! tabwatch sweep --max-age-hours 6
//! tabwatch config
//! ```
//!
//! Command output (JSON responses, sweep reports) goes to stdout; logs go to
//! stderr and to rolling files in the platform data directory.

#![warn(clippy::all, rust_2018_idioms)]
#![expect(clippy::print_stdout, clippy::print_stderr)] // Command output is printed

mod cli;

use anyhow::Result;
use clap::Parser as _;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    if let Err(e) = tabwatch::logging::init(cli.quiet) {
        eprintln!("Logging unavailable: {e:#}");
    }

    cli::run_command(cli.command)
}
