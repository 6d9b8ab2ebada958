// src/logging.rs

//! Logging setup for `dagrelay` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `DAGRELAY_LOG` environment variable (a level or a full filter
//!    directive such as `dagrelay::channel=debug,info`)
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout only carries the status report.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "DAGRELAY_LOG";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level.as_filter());
    }

    env_value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flag_beats_environment() {
        let filter = build_filter(Some(LogLevel::Debug), Some("error"));
        assert!(filter.to_string().contains("debug"));
    }

    #[test]
    fn environment_used_when_no_flag() {
        let filter = build_filter(None, Some(" warn "));
        assert!(filter.to_string().contains("warn"));
    }

    #[test]
    fn falls_back_to_info() {
        assert!(build_filter(None, None).to_string().contains("info"));
        assert!(build_filter(None, Some("")).to_string().contains("info"));
    }
}
