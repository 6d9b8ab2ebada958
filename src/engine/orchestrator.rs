// src/engine/orchestrator.rs

//! Plan lifecycle.
//!
//! The orchestrator owns every submitted plan, drives its levels strictly in
//! order through the dispatcher and applies the abort policy between levels.
//! It also fronts node registration and the status/health surfaces.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alloc::{Allocator, NodeDescriptor};
use crate::channel::{
    ChannelManager, ChannelOptions, Connector, NodeEndpoint, Reachability, RemoteChannel,
    TunnelStatusReport,
};
use crate::config::{ConfigFile, CoordinatorSection, NodeConfig};
use crate::dag::{SharedPlan, build_plan, lock_plan};
use crate::engine::policy::AbortPolicy;
use crate::engine::report::{NodeHealthReport, PlanStatusReport};
use crate::errors::{DagRelayError, PlanError};
use crate::exec::{DispatchOptions, Dispatcher, HandlerRegistry};
use crate::graph::TaskGraph;
use crate::types::{NodeId, PlanId, PlanStatus, TaskKind};

/// Administrative request to add a compute node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegistration {
    pub node_id: NodeId,
    pub target: String,
    pub capabilities: Vec<TaskKind>,
    pub capacity: usize,
}

impl NodeRegistration {
    pub fn from_config(node_id: impl Into<NodeId>, node: &NodeConfig) -> Self {
        Self {
            node_id: node_id.into(),
            target: node.target.clone(),
            capabilities: node.capabilities.clone(),
            capacity: node.capacity,
        }
    }
}

struct PlanEntry {
    plan: SharedPlan,
    cancel: CancellationToken,
}

pub struct Orchestrator {
    channel: Arc<ChannelManager>,
    allocator: Arc<Allocator>,
    dispatcher: Arc<Dispatcher>,
    policy: AbortPolicy,
    plans: Mutex<HashMap<PlanId, PlanEntry>>,
}

impl Orchestrator {
    pub fn new(
        connector: Arc<dyn Connector>,
        channel_options: ChannelOptions,
        coordinator: &CoordinatorSection,
        handlers: HandlerRegistry,
    ) -> Self {
        let channel = Arc::new(ChannelManager::new(connector, channel_options));
        let reachability: Arc<dyn Reachability> = channel.clone();
        let remote: Arc<dyn RemoteChannel> = channel.clone();
        let allocator = Arc::new(Allocator::new(reachability));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&allocator),
            remote,
            handlers,
            DispatchOptions::from(coordinator),
        ));

        Self {
            channel,
            allocator,
            dispatcher,
            policy: AbortPolicy::from(coordinator),
            plans: Mutex::new(HashMap::new()),
        }
    }

    /// Build from a validated config and register every configured node.
    pub async fn from_config(
        cfg: &ConfigFile,
        connector: Arc<dyn Connector>,
        handlers: HandlerRegistry,
    ) -> Result<Self, DagRelayError> {
        let orchestrator = Self::new(
            connector,
            ChannelOptions::from(&cfg.channel),
            &cfg.coordinator,
            handlers,
        );
        for (node_id, node) in cfg.node.iter() {
            orchestrator
                .register_node(NodeRegistration::from_config(node_id.clone(), node))
                .await?;
        }
        Ok(orchestrator)
    }

    fn plans(&self) -> MutexGuard<'_, HashMap<PlanId, PlanEntry>> {
        self.plans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, plan_id: &str) -> Result<(SharedPlan, CancellationToken), PlanError> {
        self.plans()
            .get(plan_id)
            .map(|e| (Arc::clone(&e.plan), e.cancel.clone()))
            .ok_or_else(|| PlanError::UnknownPlan(plan_id.to_string()))
    }

    pub fn channel(&self) -> &Arc<ChannelManager> {
        &self.channel
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    /// Add a node to the allocator and open its tunnel.
    ///
    /// A failed first connection is not an error: the tunnel stays in `error`
    /// and keeps reconnecting in the background.
    pub async fn register_node(&self, registration: NodeRegistration) -> Result<(), DagRelayError> {
        if registration.capacity == 0 {
            return Err(DagRelayError::ConfigError(format!(
                "node {}: capacity must be at least 1",
                registration.node_id
            )));
        }

        self.allocator.add_node(NodeDescriptor::new(
            registration.node_id.clone(),
            registration.capabilities.iter().cloned(),
            registration.capacity,
        ))?;

        let endpoint = NodeEndpoint {
            node_id: registration.node_id.clone(),
            target: registration.target.clone(),
        };
        if let Err(e) = self.channel.open(endpoint).await {
            warn!(
                node = %registration.node_id,
                error = %e,
                "initial connection failed; reconnecting in background"
            );
        }
        Ok(())
    }

    /// Validate and level a graph, and store the resulting plan.
    pub fn submit(&self, graph: &TaskGraph) -> Result<PlanId, PlanError> {
        let plan_id = format!("exec_{}", Uuid::new_v4().simple());
        let plan = build_plan(plan_id.clone(), graph)?;

        info!(
            plan_id = %plan_id,
            tasks = plan.len(),
            levels = plan.levels().len(),
            "plan submitted"
        );

        self.plans().insert(
            plan_id.clone(),
            PlanEntry {
                plan: Arc::new(Mutex::new(plan)),
                cancel: CancellationToken::new(),
            },
        );
        Ok(plan_id)
    }

    /// Run a submitted plan to its terminal status.
    ///
    /// Levels run strictly in order. After each level the abort policy is
    /// applied; a cancelled plan stops after the level in flight.
    pub async fn run(&self, plan_id: &str) -> Result<PlanStatus, PlanError> {
        let (plan, cancel) = self.entry(plan_id)?;

        let levels = {
            let mut guard = lock_plan(&plan);
            if guard.is_empty() {
                info!(plan_id = %plan_id, "empty plan; nothing to run");
                return Ok(guard.status());
            }
            guard.start()?;
            guard.levels().to_vec()
        };

        info!(plan_id = %plan_id, levels = levels.len(), "plan started");

        for (index, level) in levels.iter().enumerate() {
            if cancel.is_cancelled() {
                lock_plan(&plan).abort("plan cancelled");
                break;
            }

            info!(plan_id = %plan_id, level = index, tasks = ?level, "running level");
            let outcome = self.dispatcher.run_level(&plan, level, &cancel).await;

            if cancel.is_cancelled() {
                lock_plan(&plan).abort("plan cancelled");
                break;
            }

            if outcome.all_succeeded() {
                continue;
            }

            let mut guard = lock_plan(&plan);
            if let Some(task_id) = self.policy.critical_failure(&guard, &outcome.failed) {
                let reason = format!("critical task '{task_id}' failed at level {index}");
                warn!(plan_id = %plan_id, reason = %reason, "aborting plan");
                guard.abort(reason);
                break;
            }
            warn!(
                plan_id = %plan_id,
                level = index,
                failed = ?outcome.failed,
                "non-critical failures; continuing"
            );
        }

        let status = lock_plan(&plan).finish();
        info!(plan_id = %plan_id, status = %status, "plan finished");
        Ok(status)
    }

    /// Submit and run in one call.
    pub async fn execute(&self, graph: &TaskGraph) -> Result<PlanStatusReport, PlanError> {
        let plan_id = self.submit(graph)?;
        self.run(&plan_id).await?;
        self.plan_status(&plan_id)
    }

    pub fn plan_status(&self, plan_id: &str) -> Result<PlanStatusReport, PlanError> {
        let (plan, _) = self.entry(plan_id)?;
        let guard = lock_plan(&plan);
        Ok(PlanStatusReport::from(&*guard))
    }

    pub fn plan_ids(&self) -> Vec<PlanId> {
        let mut ids: Vec<PlanId> = self.plans().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Signal a plan to stop: in-flight tasks abandon retries, unstarted
    /// levels are skipped, completed tasks stay completed.
    pub fn cancel(&self, plan_id: &str) -> Result<(), PlanError> {
        let (_, cancel) = self.entry(plan_id)?;
        info!(plan_id = %plan_id, "cancelling plan");
        cancel.cancel();
        Ok(())
    }

    pub fn node_report(&self) -> Vec<NodeHealthReport> {
        self.allocator
            .snapshot()
            .into_iter()
            .map(|snapshot| {
                let tunnel = self.channel.tunnel_status(&snapshot.node_id);
                NodeHealthReport::new(snapshot, tunnel)
            })
            .collect()
    }

    pub fn tunnel_statuses(&self) -> Vec<TunnelStatusReport> {
        self.channel.tunnel_statuses()
    }

    /// Cancel every plan and close every tunnel.
    pub async fn shutdown(&self) {
        let tokens: Vec<CancellationToken> =
            self.plans().values().map(|e| e.cancel.clone()).collect();
        for token in tokens {
            token.cancel();
        }
        self.channel.close_all().await;
        info!("orchestrator shut down");
    }
}
