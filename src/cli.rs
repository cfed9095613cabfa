// src/cli.rs

//! CLI argument parsing using `clap`.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `proctor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "proctor",
    version,
    about = "Procfile-driven process supervisor with hot reload.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the Procfile.
    #[arg(value_name = "PROCFILE", default_value = "Procfile")]
    pub procfile: PathBuf,

    /// Validate the Procfile and exit.
    #[arg(long)]
    pub check: bool,

    /// Print the resolved process graph without running anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Prefix every log line with elapsed time.
    #[arg(long)]
    pub timestamps: bool,

    /// Shortcut for `--log-level debug`.
    #[arg(short, long)]
    pub verbose: bool,

    /// Engine log level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PROCTOR_LOG` or the default (`warn`) applies; the
    /// default stays quiet so child output owns the terminal.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Parse argv with `PROCTOR_FLAGS` pre-pended after the program name.
pub fn parse() -> CliArgs {
    let mut argv: Vec<OsString> = std::env::args_os().collect();
    if let Ok(extra) = std::env::var("PROCTOR_FLAGS") {
        let injected: Vec<OsString> = extra.split_whitespace().map(OsString::from).collect();
        argv.splice(1..1, injected);
    }
    CliArgs::parse_from(argv)
}
