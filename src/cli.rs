// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `dagrelay`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dagrelay",
    version,
    about = "Run a task graph across remote compute nodes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the coordinator config file (TOML).
    ///
    /// Default: `Dagrelay.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Dagrelay.toml")]
    pub config: String,

    /// Path to the task graph to execute (JSON).
    #[arg(long, value_name = "PATH")]
    pub graph: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DAGRELAY_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate config and graph, print the execution levels, run nothing.
    #[arg(long)]
    pub dry_run: bool,
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

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
