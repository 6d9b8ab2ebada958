// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{DagRelayError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DagRelayError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.coordinator, raw.channel, raw.node))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_nodes(cfg)?;
    validate_channel(cfg)?;
    validate_nodes(cfg)?;
    Ok(())
}

fn ensure_has_nodes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.node.is_empty() {
        return Err(DagRelayError::ConfigError(
            "config must contain at least one [node.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_channel(cfg: &RawConfigFile) -> Result<()> {
    let ch = &cfg.channel;

    if ch.backoff_base_ms == 0 {
        return Err(DagRelayError::ConfigError(
            "[channel].backoff_base_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if ch.backoff_cap_ms < ch.backoff_base_ms {
        return Err(DagRelayError::ConfigError(format!(
            "[channel].backoff_cap_ms ({}) must be >= backoff_base_ms ({})",
            ch.backoff_cap_ms, ch.backoff_base_ms
        )));
    }
    if ch.health_interval_ms == 0 {
        return Err(DagRelayError::ConfigError(
            "[channel].health_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

fn validate_nodes(cfg: &RawConfigFile) -> Result<()> {
    for (id, node) in cfg.node.iter() {
        if node.target.trim().is_empty() {
            return Err(DagRelayError::ConfigError(format!(
                "node '{id}' has an empty `target`"
            )));
        }
        if node.capacity == 0 {
            return Err(DagRelayError::ConfigError(format!(
                "node '{id}' must have capacity >= 1 (got 0)"
            )));
        }
        if node.capabilities.is_empty() {
            return Err(DagRelayError::ConfigError(format!(
                "node '{id}' must declare at least one capability"
            )));
        }
    }
    Ok(())
}
