// src/lib.rs

pub mod alloc;
pub mod channel;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod logging;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::channel::TcpConnector;
use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::dag::build_plan;
use crate::engine::Orchestrator;
use crate::exec::HandlerRegistry;
use crate::graph::{TaskGraph, load_graph};
use crate::types::PlanStatus;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config and graph loading
/// - the orchestrator with a TCP connector and the remote handler
/// - Ctrl-C handling (cancels the running plan)
///
/// Prints the final plan status as JSON on stdout. Returns whether the plan
/// completed.
pub async fn run(args: CliArgs) -> Result<bool> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let graph = load_graph(&args.graph)?;

    if args.dry_run {
        print_dry_run(&graph)?;
        return Ok(true);
    }

    let orchestrator = Arc::new(
        Orchestrator::from_config(&cfg, Arc::new(TcpConnector), HandlerRegistry::remote()).await?,
    );
    let plan_id = orchestrator.submit(&graph)?;

    // Ctrl-C → cancel the plan; the run loop winds down on its own.
    {
        let orchestrator = Arc::clone(&orchestrator);
        let plan_id = plan_id.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!(plan_id = %plan_id, "Ctrl+C received; cancelling plan");
            if let Err(e) = orchestrator.cancel(&plan_id) {
                warn!(error = %e, "cancel failed");
            }
        });
    }

    let status = orchestrator.run(&plan_id).await?;
    let report = orchestrator.plan_status(&plan_id)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    orchestrator.shutdown().await;
    Ok(status == PlanStatus::Completed)
}

/// Print the execution levels without contacting any node.
fn print_dry_run(graph: &TaskGraph) -> Result<()> {
    let plan = build_plan("dry-run".to_string(), graph)?;

    println!("dagrelay dry-run");
    println!("tasks ({}), levels ({}):", plan.len(), plan.levels().len());
    for (index, level) in plan.levels().iter().enumerate() {
        println!("  level {index}:");
        for id in level {
            if let Some(task) = plan.task(id) {
                println!("    - {id} ({})", task.kind);
                if !task.dependencies.is_empty() {
                    println!("        after: {:?}", task.dependencies);
                }
            }
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
