// src/channel/tunnel.rs

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{NodeId, TunnelStatus};

/// State of the tunnel to one node. Only the channel manager mutates it.
#[derive(Debug, Clone)]
pub struct TunnelRecord {
    pub node_id: NodeId,
    pub target: String,
    pub local_endpoint: Option<String>,
    pub status: TunnelStatus,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub connected_since: Option<DateTime<Utc>>,
}

impl TunnelRecord {
    pub(crate) fn new(node_id: NodeId, target: String) -> Self {
        Self {
            node_id,
            target,
            local_endpoint: None,
            status: TunnelStatus::Connecting,
            reconnect_attempts: 0,
            last_error: None,
            connected_since: None,
        }
    }

    pub fn report(&self) -> TunnelStatusReport {
        let uptime_ms = match (self.status, self.connected_since) {
            (TunnelStatus::Connected, Some(since)) => {
                (Utc::now() - since).num_milliseconds().max(0) as u64
            }
            _ => 0,
        };

        TunnelStatusReport {
            node_id: self.node_id.clone(),
            target: self.target.clone(),
            local_endpoint: self.local_endpoint.clone(),
            status: self.status,
            reconnect_attempts: self.reconnect_attempts,
            last_error: self.last_error.clone(),
            uptime_ms,
        }
    }
}

/// Externally visible tunnel status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatusReport {
    pub node_id: NodeId,
    pub target: String,
    pub local_endpoint: Option<String>,
    pub status: TunnelStatus,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub uptime_ms: u64,
}
