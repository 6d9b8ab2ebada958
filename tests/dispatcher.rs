// tests/dispatcher.rs

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use dagrelay::alloc::{Allocator, NodeDescriptor};
use dagrelay::channel::{ChannelManager, RemoteChannel};
use dagrelay::dag::{SharedPlan, build_plan, lock_plan};
use dagrelay::errors::TaskError;
use dagrelay::exec::{DispatchOptions, Dispatcher, HandlerRegistry, TaskHandler};
use dagrelay::graph::TaskGraph;
use dagrelay::types::TaskStatus;
use dagrelay_test_utils::builders::{GraphBuilder, TaskSpecBuilder};
use dagrelay_test_utils::{
    FakeConnector, ScriptedHandler, all_reachable, fast_channel_options, init_tracing, with_timeout,
};

struct Harness {
    allocator: Arc<Allocator>,
    handler: Arc<ScriptedHandler>,
    dispatcher: Arc<Dispatcher>,
}

fn options() -> DispatchOptions {
    DispatchOptions {
        max_retries: 3,
        reserve_wait: Duration::from_millis(500),
    }
}

fn harness(handler: ScriptedHandler, nodes: &[(&str, &str, usize)], options: DispatchOptions) -> Harness {
    init_tracing();
    let allocator = Arc::new(Allocator::new(all_reachable()));
    for (id, kind, capacity) in nodes {
        allocator
            .add_node(NodeDescriptor::new(*id, [*kind], *capacity))
            .unwrap();
    }
    let handler = Arc::new(handler);
    let as_handler: Arc<dyn TaskHandler> = handler.clone();
    let channel: Arc<dyn RemoteChannel> = Arc::new(ChannelManager::new(
        Arc::new(FakeConnector::new()),
        fast_channel_options(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&allocator),
        channel,
        HandlerRegistry::new().with_fallback(as_handler),
        options,
    ));
    Harness {
        allocator,
        handler,
        dispatcher,
    }
}

fn shared(graph: &TaskGraph) -> SharedPlan {
    Arc::new(Mutex::new(build_plan("exec_test".to_string(), graph).unwrap()))
}

fn level(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn status_of(plan: &SharedPlan, id: &str) -> (TaskStatus, u32, Option<TaskError>) {
    let plan = lock_plan(plan);
    let task = plan.task(id).unwrap();
    (task.status(), task.retry_count(), task.failure().cloned())
}

#[tokio::test]
async fn transient_failures_twice_then_success_completes_with_two_retries() {
    let h = harness(
        ScriptedHandler::new().fail_then_succeed("A", 2, true, json!({ "image": "x" })),
        &[("node-a", "image", 1)],
        options(),
    );
    let plan = shared(&GraphBuilder::new().task("A", "image").build());

    let outcome = with_timeout(h.dispatcher.run_level(&plan, &level(&["A"]), &CancellationToken::new())).await;

    assert_eq!(outcome.completed, level(&["A"]));
    assert!(outcome.all_succeeded());
    let (status, retries, _) = status_of(&plan, "A");
    assert_eq!(status, TaskStatus::Completed);
    assert_eq!(retries, 2);
    assert_eq!(h.handler.calls_for("A"), 3);
    assert_eq!(
        lock_plan(&plan).task("A").unwrap().result(),
        Some(&json!({ "image": "x" }))
    );
    assert_eq!(h.allocator.live_reservations(), 0);
}

#[tokio::test]
async fn four_transient_failures_exhaust_the_retry_bound() {
    let h = harness(
        ScriptedHandler::new().fail_then_succeed("A", 4, true, json!({})),
        &[("node-a", "image", 1)],
        options(),
    );
    let plan = shared(&GraphBuilder::new().task("A", "image").build());

    let outcome = with_timeout(h.dispatcher.run_level(&plan, &level(&["A"]), &CancellationToken::new())).await;

    assert_eq!(outcome.failed, level(&["A"]));
    let (status, retries, failure) = status_of(&plan, "A");
    assert_eq!(status, TaskStatus::FailedTerminal);
    assert_eq!(retries, 3);
    assert!(matches!(failure, Some(TaskError::Handler { transient: true, .. })));
    assert_eq!(h.handler.calls_for("A"), 4);
    assert_eq!(h.allocator.live_reservations(), 0);
}

#[tokio::test]
async fn non_transient_handler_error_is_not_retried() {
    let h = harness(
        ScriptedHandler::new().fail("A", "invalid prompt"),
        &[("node-a", "image", 1)],
        options(),
    );
    let plan = shared(&GraphBuilder::new().task("A", "image").build());

    h.dispatcher
        .run_level(&plan, &level(&["A"]), &CancellationToken::new())
        .await;

    let (status, retries, _) = status_of(&plan, "A");
    assert_eq!(status, TaskStatus::FailedTerminal);
    assert_eq!(retries, 0);
    assert_eq!(h.handler.calls_for("A"), 1);
}

#[tokio::test]
async fn transient_markers_in_messages_are_retried() {
    let h = harness(
        ScriptedHandler::new().script(
            "A",
            [
                Err(TaskError::handler("remote said GPU_BUSY", false)),
                Ok(json!({ "ok": true })),
            ],
        ),
        &[("node-a", "image", 1)],
        options(),
    );
    let plan = shared(&GraphBuilder::new().task("A", "image").build());

    h.dispatcher
        .run_level(&plan, &level(&["A"]), &CancellationToken::new())
        .await;

    let (status, retries, _) = status_of(&plan, "A");
    assert_eq!(status, TaskStatus::Completed);
    assert_eq!(retries, 1);
}

#[tokio::test]
async fn successor_receives_merged_predecessor_result() {
    let h = harness(
        ScriptedHandler::new().succeed("A", json!({ "image": "x" })),
        &[("node-a", "image", 1), ("node-v", "video", 1)],
        options(),
    );
    let graph = GraphBuilder::new()
        .task("A", "image")
        .with_task(
            TaskSpecBuilder::new("B", "video")
                .after("A")
                .params(json!({ "fps": 24 })),
        )
        .build();
    let plan = shared(&graph);
    let cancel = CancellationToken::new();

    h.dispatcher.run_level(&plan, &level(&["A"]), &cancel).await;
    let outcome = h.dispatcher.run_level(&plan, &level(&["B"]), &cancel).await;

    assert!(outcome.all_succeeded());
    let b_call = h
        .handler
        .invocations()
        .into_iter()
        .find(|r| r.task_id == "B")
        .unwrap();
    assert_eq!(b_call.inputs["image"], "x");
    assert_eq!(b_call.inputs["fps"], 24);
    assert_eq!(b_call.node_id, "node-v");
    assert_eq!(
        lock_plan(&plan).task("B").unwrap().assigned_node(),
        Some("node-v")
    );
}

#[tokio::test]
async fn failed_predecessor_makes_successor_fail_with_missing_input() {
    let h = harness(
        ScriptedHandler::new().fail("A", "bad params"),
        &[("node-a", "image", 1), ("node-v", "video", 1)],
        options(),
    );
    let graph = GraphBuilder::new()
        .task("A", "image")
        .with_task(TaskSpecBuilder::new("B", "video").after("A"))
        .build();
    let plan = shared(&graph);
    let cancel = CancellationToken::new();

    h.dispatcher.run_level(&plan, &level(&["A"]), &cancel).await;
    let outcome = h.dispatcher.run_level(&plan, &level(&["B"]), &cancel).await;

    assert_eq!(outcome.failed, level(&["B"]));
    let (status, retries, failure) = status_of(&plan, "B");
    assert_eq!(status, TaskStatus::FailedTerminal);
    assert_eq!(retries, 0);
    assert_eq!(
        failure,
        Some(TaskError::MissingInput {
            predecessor: "A".to_string()
        })
    );
    assert_eq!(h.handler.calls_for("B"), 0);
    assert!(lock_plan(&plan).task("B").unwrap().assigned_node().is_none());
}

#[tokio::test]
async fn level_tasks_run_concurrently_up_to_capacity() {
    let handler = ScriptedHandler::new()
        .delay("t1", Duration::from_millis(50))
        .delay("t2", Duration::from_millis(50))
        .delay("t3", Duration::from_millis(50));
    let h = harness(handler, &[("node-a", "image", 3)], options());
    let graph = GraphBuilder::new()
        .task("t1", "image")
        .task("t2", "image")
        .task("t3", "image")
        .build();
    let plan = shared(&graph);

    let outcome = with_timeout(h.dispatcher.run_level(
        &plan,
        &level(&["t1", "t2", "t3"]),
        &CancellationToken::new(),
    ))
    .await;

    assert_eq!(outcome.completed, level(&["t1", "t2", "t3"]));
    assert_eq!(h.handler.max_in_flight(), 3);
}

#[tokio::test]
async fn capacity_one_serializes_a_level() {
    let handler = ScriptedHandler::new()
        .delay("t1", Duration::from_millis(20))
        .delay("t2", Duration::from_millis(20))
        .delay("t3", Duration::from_millis(20));
    let h = harness(
        handler,
        &[("node-a", "image", 1)],
        DispatchOptions {
            max_retries: 3,
            reserve_wait: Duration::from_secs(2),
        },
    );
    let graph = GraphBuilder::new()
        .task("t1", "image")
        .task("t2", "image")
        .task("t3", "image")
        .build();
    let plan = shared(&graph);

    let outcome = with_timeout(h.dispatcher.run_level(
        &plan,
        &level(&["t1", "t2", "t3"]),
        &CancellationToken::new(),
    ))
    .await;

    assert!(outcome.all_succeeded());
    assert_eq!(h.handler.max_in_flight(), 1);
    for id in ["t1", "t2", "t3"] {
        assert_eq!(status_of(&plan, id).1, 0);
    }
}

#[tokio::test]
async fn no_capable_node_fails_as_resource_unavailable_after_retries() {
    let h = harness(
        ScriptedHandler::new(),
        &[("node-a", "text", 1)],
        DispatchOptions {
            max_retries: 3,
            reserve_wait: Duration::from_millis(10),
        },
    );
    let plan = shared(&GraphBuilder::new().task("A", "image").build());

    h.dispatcher
        .run_level(&plan, &level(&["A"]), &CancellationToken::new())
        .await;

    let (status, retries, failure) = status_of(&plan, "A");
    assert_eq!(status, TaskStatus::FailedTerminal);
    assert_eq!(retries, 3);
    assert_eq!(
        failure,
        Some(TaskError::ResourceUnavailable {
            kind: "image".to_string()
        })
    );
    assert_eq!(h.handler.calls_for("A"), 0);
}

#[tokio::test]
async fn cancelled_before_dispatch_never_calls_the_handler() {
    let h = harness(ScriptedHandler::new(), &[("node-a", "image", 1)], options());
    let plan = shared(&GraphBuilder::new().task("A", "image").build());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = h.dispatcher.run_level(&plan, &level(&["A"]), &cancel).await;

    assert_eq!(outcome.failed, level(&["A"]));
    assert_eq!(status_of(&plan, "A").2, Some(TaskError::Cancelled));
    assert_eq!(h.handler.calls_for("A"), 0);
}

#[tokio::test]
async fn cancellation_discards_the_in_flight_result_and_releases() {
    let h = harness(
        ScriptedHandler::new().delay("A", Duration::from_millis(100)),
        &[("node-a", "image", 1)],
        options(),
    );
    let plan = shared(&GraphBuilder::new().task("A", "image").build());
    let cancel = CancellationToken::new();

    let run = {
        let dispatcher = Arc::clone(&h.dispatcher);
        let plan = Arc::clone(&plan);
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run_level(&plan, &level(&["A"]), &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(status_of(&plan, "A").0, TaskStatus::Running);
    assert_eq!(h.allocator.live_reservations(), 1);
    cancel.cancel();

    let outcome = with_timeout(run).await.unwrap();
    assert_eq!(outcome.failed, level(&["A"]));

    // The remote call still finished before the task was settled.
    assert_eq!(h.handler.calls_for("A"), 1);
    let plan_guard = lock_plan(&plan);
    let task = plan_guard.task("A").unwrap();
    assert_eq!(task.status(), TaskStatus::FailedTerminal);
    assert_eq!(task.failure(), Some(&TaskError::Cancelled));
    assert!(task.result().is_none());
    drop(plan_guard);
    assert_eq!(h.allocator.live_reservations(), 0);
}

#[tokio::test]
async fn kinds_without_a_handler_fail_terminally() {
    init_tracing();
    let allocator = Arc::new(Allocator::new(all_reachable()));
    allocator
        .add_node(NodeDescriptor::new("node-a", ["image"], 1))
        .unwrap();
    let channel: Arc<dyn RemoteChannel> = Arc::new(ChannelManager::new(
        Arc::new(FakeConnector::new()),
        fast_channel_options(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&allocator),
        channel,
        HandlerRegistry::new(),
        options(),
    ));
    let plan = shared(&GraphBuilder::new().task("A", "image").build());

    dispatcher
        .run_level(&plan, &level(&["A"]), &CancellationToken::new())
        .await;

    let (status, _, failure) = status_of(&plan, "A");
    assert_eq!(status, TaskStatus::FailedTerminal);
    assert!(matches!(failure, Some(TaskError::Handler { transient: false, .. })));
    assert_eq!(allocator.live_reservations(), 0);
}
