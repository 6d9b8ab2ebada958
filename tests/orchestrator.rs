// tests/orchestrator.rs

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;

use dagrelay::channel::{RemoteRequest, RemoteResponse};
use dagrelay::engine::{NodeRegistration, Orchestrator};
use dagrelay::errors::{DagRelayError, PlanError};
use dagrelay::exec::{HandlerRegistry, TaskHandler};
use dagrelay::graph::TaskGraph;
use dagrelay::types::{PlanStatus, TaskStatus, TunnelStatus};
use dagrelay_test_utils::builders::{ConfigFileBuilder, GraphBuilder, TaskSpecBuilder};
use dagrelay_test_utils::fake_remote::Responder;
use dagrelay_test_utils::{FakeConnector, ScriptedHandler, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn two_node_config() -> ConfigFileBuilder {
    ConfigFileBuilder::new()
        .with_node("node-img", &["image", "text"], 2)
        .with_node("node-vid", &["video"], 1)
}

async fn scripted_orchestrator(
    cfg: ConfigFileBuilder,
    handler: ScriptedHandler,
) -> (Orchestrator, Arc<ScriptedHandler>) {
    init_tracing();
    let handler = Arc::new(handler);
    let as_handler: Arc<dyn TaskHandler> = handler.clone();
    let orchestrator = Orchestrator::from_config(
        &cfg.build(),
        Arc::new(FakeConnector::new()),
        HandlerRegistry::new().with_fallback(as_handler),
    )
    .await
    .unwrap();
    (orchestrator, handler)
}

fn chain_graph() -> TaskGraph {
    GraphBuilder::new()
        .with_task(TaskSpecBuilder::new("A", "image").params(json!({ "prompt": "a red fox" })))
        .with_task(TaskSpecBuilder::new("B", "video").after("A"))
        .build()
}

#[tokio::test]
async fn image_result_flows_into_video_task_over_remote_handler() -> TestResult {
    init_tracing();
    let responder: Responder = Arc::new(|node: &str, request: &RemoteRequest| match request {
        RemoteRequest::Execute { task_id, inputs, .. } if task_id == "A" => {
            assert_eq!(node, "node-img");
            assert_eq!(inputs["prompt"], "a red fox");
            Ok(RemoteResponse::Result {
                payload: json!({ "image": "x" }),
            })
        }
        RemoteRequest::Execute { inputs, .. } => Ok(RemoteResponse::Result {
            payload: json!({ "received": inputs, "node": node }),
        }),
        RemoteRequest::Ping => Ok(RemoteResponse::Pong),
    });

    let orchestrator = Orchestrator::from_config(
        &two_node_config().build(),
        Arc::new(FakeConnector::with_responder(responder)),
        HandlerRegistry::remote(),
    )
    .await?;

    let plan_id = orchestrator.submit(&chain_graph())?;
    assert!(plan_id.starts_with("exec_"));
    assert_eq!(plan_id.len(), "exec_".len() + 32);

    let status = with_timeout(orchestrator.run(&plan_id)).await?;
    assert_eq!(status, PlanStatus::Completed);

    let report = orchestrator.plan_status(&plan_id)?;
    assert_eq!(report.status, PlanStatus::Completed);
    assert_eq!(report.levels, vec![vec!["A".to_string()], vec!["B".to_string()]]);
    let b = report.task("B").unwrap();
    assert_eq!(b.status, TaskStatus::Completed);
    assert_eq!(b.retry_count, 0);
    assert_eq!(b.assigned_node.as_deref(), Some("node-vid"));
    let result = b.result.as_ref().unwrap();
    assert_eq!(result["received"]["image"], "x");
    assert!(b.failure_detail.is_none());

    let json = serde_json::to_value(&report)?;
    assert_eq!(json["perTaskStatus"][0]["status"], "completed");
    assert_eq!(json["status"], "completed");
    Ok(())
}

#[tokio::test]
async fn remote_transient_failure_is_retried() -> TestResult {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let responder: Responder = {
        let calls = Arc::clone(&calls);
        Arc::new(move |_: &str, request: &RemoteRequest| match request {
            RemoteRequest::Execute { .. } => {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(RemoteResponse::Failed {
                        message: "busy".to_string(),
                        transient: true,
                    })
                } else {
                    Ok(RemoteResponse::Result { payload: json!({ "ok": true }) })
                }
            }
            RemoteRequest::Ping => Ok(RemoteResponse::Pong),
        })
    };

    let orchestrator = Orchestrator::from_config(
        &two_node_config().build(),
        Arc::new(FakeConnector::with_responder(responder)),
        HandlerRegistry::remote(),
    )
    .await?;

    let report = with_timeout(orchestrator.execute(&GraphBuilder::new().task("A", "image").build())).await?;

    assert_eq!(report.status, PlanStatus::Completed);
    assert_eq!(report.task("A").unwrap().retry_count, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn critical_failure_aborts_the_plan() -> TestResult {
    let (orchestrator, handler) = scripted_orchestrator(
        two_node_config().critical_kind("text"),
        ScriptedHandler::new().fail("intent", "cannot parse brief"),
    )
    .await;

    let graph = GraphBuilder::new()
        .task("intent", "text")
        .task("art", "image")
        .with_task(TaskSpecBuilder::new("final", "video").after("intent").after("art"))
        .build();

    let report = with_timeout(orchestrator.execute(&graph)).await?;

    assert_eq!(report.status, PlanStatus::Failed);
    assert!(report.abort_reason.as_deref().unwrap().contains("intent"));
    assert_eq!(report.task("intent").unwrap().status, TaskStatus::FailedTerminal);
    assert_eq!(report.task("art").unwrap().status, TaskStatus::Completed);
    assert_eq!(report.task("final").unwrap().status, TaskStatus::Pending);
    assert_eq!(handler.calls_for("final"), 0);

    let detail = report.task("intent").unwrap().failure_detail.clone().unwrap();
    assert_eq!(detail.class, "HandlerError");
    assert!(!detail.retryable);
    Ok(())
}

#[tokio::test]
async fn non_critical_failure_continues_into_next_level() -> TestResult {
    let (orchestrator, handler) = scripted_orchestrator(
        two_node_config().critical_kind("text"),
        ScriptedHandler::new().fail("broken", "bad params"),
    )
    .await;

    let graph = GraphBuilder::new()
        .task("broken", "image")
        .task("fine", "image")
        .with_task(TaskSpecBuilder::new("uses_fine", "video").after("fine"))
        .with_task(TaskSpecBuilder::new("uses_broken", "video").after("broken"))
        .build();

    let report = with_timeout(orchestrator.execute(&graph)).await?;

    assert!(report.abort_reason.is_none());
    assert_eq!(report.task("uses_fine").unwrap().status, TaskStatus::Completed);
    let dependent = report.task("uses_broken").unwrap();
    assert_eq!(dependent.status, TaskStatus::FailedTerminal);
    assert_eq!(dependent.failure_detail.as_ref().unwrap().class, "MissingInput");
    assert_eq!(handler.calls_for("uses_broken"), 0);
    // Not every task completed, so the plan still reports failure.
    assert_eq!(report.status, PlanStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn cancel_stops_the_plan_after_the_current_level() -> TestResult {
    let (orchestrator, handler) = scripted_orchestrator(
        two_node_config(),
        ScriptedHandler::new().delay("A", Duration::from_millis(200)),
    )
    .await;
    let orchestrator = Arc::new(orchestrator);

    let plan_id = orchestrator.submit(&chain_graph())?;
    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        let plan_id = plan_id.clone();
        tokio::spawn(async move { orchestrator.run(&plan_id).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        orchestrator.plan_status(&plan_id)?.status,
        PlanStatus::Running
    );
    orchestrator.cancel(&plan_id)?;

    let status = with_timeout(run).await??;
    assert_eq!(status, PlanStatus::Failed);

    let report = orchestrator.plan_status(&plan_id)?;
    assert_eq!(report.abort_reason.as_deref(), Some("plan cancelled"));
    let a = report.task("A").unwrap();
    assert_eq!(a.status, TaskStatus::FailedTerminal);
    assert_eq!(a.failure_detail.as_ref().unwrap().class, "Cancelled");
    assert_eq!(report.task("B").unwrap().status, TaskStatus::Pending);
    assert_eq!(handler.calls_for("B"), 0);
    assert_eq!(orchestrator.allocator().live_reservations(), 0);
    Ok(())
}

#[tokio::test]
async fn structural_errors_are_rejected_at_submission() {
    let (orchestrator, _) = scripted_orchestrator(two_node_config(), ScriptedHandler::new()).await;

    let cyclic = GraphBuilder::new()
        .with_task(TaskSpecBuilder::new("A", "image").after("C"))
        .with_task(TaskSpecBuilder::new("B", "image").after("A"))
        .with_task(TaskSpecBuilder::new("C", "image").after("B"))
        .build();
    assert!(matches!(
        orchestrator.submit(&cyclic),
        Err(PlanError::CyclicGraph { .. })
    ));

    let dangling = GraphBuilder::new()
        .with_task(TaskSpecBuilder::new("B", "video").after("missing"))
        .build();
    assert!(matches!(
        orchestrator.submit(&dangling),
        Err(PlanError::UnknownDependency { .. })
    ));

    assert!(orchestrator.plan_ids().is_empty());
}

#[tokio::test]
async fn empty_plan_completes_without_running() -> TestResult {
    let (orchestrator, handler) = scripted_orchestrator(two_node_config(), ScriptedHandler::new()).await;
    let plan_id = orchestrator.submit(&TaskGraph::default())?;

    assert_eq!(orchestrator.run(&plan_id).await?, PlanStatus::Completed);
    assert!(handler.invocations().is_empty());
    Ok(())
}

#[tokio::test]
async fn plans_run_once_and_unknown_plans_are_reported() -> TestResult {
    let (orchestrator, _) = scripted_orchestrator(two_node_config(), ScriptedHandler::new()).await;
    let plan_id = orchestrator.submit(&chain_graph())?;

    assert_eq!(orchestrator.run(&plan_id).await?, PlanStatus::Completed);
    assert_eq!(
        orchestrator.run(&plan_id).await.unwrap_err(),
        PlanError::AlreadyStarted(plan_id.clone())
    );
    assert_eq!(
        orchestrator.plan_status("exec_nope").unwrap_err(),
        PlanError::UnknownPlan("exec_nope".to_string())
    );
    assert!(orchestrator.cancel("exec_nope").is_err());
    Ok(())
}

#[tokio::test]
async fn node_report_joins_allocator_and_tunnel_state() -> TestResult {
    init_tracing();
    let connector = Arc::new(FakeConnector::new());
    connector.refuse("node-vid", true);

    let orchestrator = Orchestrator::from_config(
        &two_node_config().build(),
        connector.clone(),
        HandlerRegistry::remote(),
    )
    .await?;

    let report = orchestrator.node_report();
    assert_eq!(report.len(), 2);

    let img = &report[0];
    assert_eq!(img.node_id, "node-img");
    assert!(img.reachable);
    assert_eq!(img.capacity, 2);
    assert_eq!(img.reservation_count, 0);
    assert_eq!(img.tunnel_status, Some(TunnelStatus::Connected));

    let vid = &report[1];
    assert_eq!(vid.node_id, "node-vid");
    assert!(!vid.reachable);
    assert_eq!(vid.tunnel_status, Some(TunnelStatus::Error));
    assert!(vid.last_error.is_some());

    orchestrator.shutdown().await;
    assert!(
        orchestrator
            .tunnel_statuses()
            .iter()
            .all(|t| t.status == TunnelStatus::Closed)
    );
    Ok(())
}

#[tokio::test]
async fn registering_a_node_twice_fails() {
    let (orchestrator, _) = scripted_orchestrator(two_node_config(), ScriptedHandler::new()).await;
    let err = orchestrator
        .register_node(NodeRegistration {
            node_id: "node-img".to_string(),
            target: "fake://node-img".to_string(),
            capabilities: vec!["image".to_string()],
            capacity: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DagRelayError::DuplicateNode(_)));
}

#[tokio::test]
async fn node_registered_at_runtime_takes_work() -> TestResult {
    let (orchestrator, handler) = scripted_orchestrator(two_node_config(), ScriptedHandler::new()).await;
    orchestrator
        .register_node(NodeRegistration {
            node_id: "node-txt".to_string(),
            target: "fake://node-txt".to_string(),
            capabilities: vec!["caption".to_string()],
            capacity: 1,
        })
        .await?;

    let report = with_timeout(orchestrator.execute(&GraphBuilder::new().task("c", "caption").build())).await?;
    assert_eq!(report.status, PlanStatus::Completed);
    assert_eq!(handler.invocations()[0].node_id, "node-txt");
    Ok(())
}
