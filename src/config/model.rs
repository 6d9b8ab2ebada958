// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{NodeId, TaskKind};

/// Configuration exactly as deserialized from TOML.
///
/// ```toml
/// [coordinator]
/// critical_kinds = ["intent", "genart"]
///
/// [channel]
/// backoff_base_ms = 1000
/// backoff_cap_ms = 60000
///
/// [node.node-1]
/// target = "127.0.0.1:8001"
/// capabilities = ["image", "video"]
/// capacity = 2
/// ```
///
/// All sections except `[node.<id>]` are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub coordinator: CoordinatorSection,

    #[serde(default)]
    pub channel: ChannelSection,

    /// Remote nodes keyed by node id.
    #[serde(default)]
    pub node: BTreeMap<NodeId, NodeConfig>,
}

/// Validated configuration. Only constructible through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub coordinator: CoordinatorSection,
    pub channel: ChannelSection,
    pub node: BTreeMap<NodeId, NodeConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        coordinator: CoordinatorSection,
        channel: ChannelSection,
        node: BTreeMap<NodeId, NodeConfig>,
    ) -> Self {
        Self {
            coordinator,
            channel,
            node,
        }
    }
}

/// `[coordinator]` section: plan-level execution policy.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSection {
    /// Task kinds whose terminal failure aborts the whole plan.
    #[serde(default)]
    pub critical_kinds: Vec<TaskKind>,

    /// How many times a retryable failure may be retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound on waiting for a reservation before the attempt fails
    /// with `ResourceUnavailable`.
    #[serde(default = "default_reserve_wait_ms")]
    pub reserve_wait_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_reserve_wait_ms() -> u64 {
    2_000
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            critical_kinds: Vec::new(),
            max_retries: default_max_retries(),
            reserve_wait_ms: default_reserve_wait_ms(),
        }
    }
}

impl CoordinatorSection {
    pub fn reserve_wait(&self) -> Duration {
        Duration::from_millis(self.reserve_wait_ms)
    }
}

/// `[channel]` section: tunnel supervision timings.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSection {
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Bound on a single request/response exchange with a node.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

fn default_health_interval_ms() -> u64 {
    10_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    300_000
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            health_interval_ms: default_health_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

/// `[node.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Address of the node's service endpoint, e.g. `"10.0.0.4:8188"`.
    pub target: String,

    /// Task kinds this node can serve.
    #[serde(default)]
    pub capabilities: Vec<TaskKind>,

    /// Maximum number of concurrent reservations.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    1
}
