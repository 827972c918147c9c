//! Scenario and property tests for `QueueManager` (spec §8 S2/S3/S4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use nodes::context::StandaloneContext;
use nodes::mock::MockNode;
use nodes::retry::{with_retry, RetryEnvelope};
use nodes::traits::{ExecutableNode, ExecutionContext};
use nodes::variables::VariableStore;
use nodes::{Edge, ExecutionResult, Node, NodeError, NodeRegistry};

use crate::manager::QueueManager;
use crate::models::{QueueEvent, QueueItem, QueueStatus};

fn node(id: &str, kind: &str) -> Node {
    Node { id: id.into(), kind: kind.into(), label: None, config: Value::Null, data: json!({}) }
}

fn write_result(ctx: &dyn ExecutionContext, id: &str, result: ExecutionResult) {
    let mut delta = HashMap::new();
    delta.insert(id.to_string(), result);
    ctx.set_results(delta);
}

/// Wraps a per-call outcome script in `with_retry`, like the real
/// `LlmChainNode` wraps its provider dispatch — used so the S2 scenario
/// can exercise a node whose own retry policy resolves a transient
/// failure without the queue itself knowing about retries.
struct RetryingMockNode {
    kind: String,
    calls: AtomicUsize,
    fail_times: usize,
    final_error: Option<String>,
}

impl RetryingMockNode {
    fn succeeds_after(kind: impl Into<String>, fail_times: usize) -> Self {
        Self { kind: kind.into(), calls: AtomicUsize::new(0), fail_times, final_error: None }
    }

    fn always_fails(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), calls: AtomicUsize::new(0), fail_times: usize::MAX, final_error: Some(message.into()) }
    }
}

#[async_trait]
impl ExecutableNode for RetryingMockNode {
    fn can_execute(&self, kind: &str) -> bool {
        kind == self.kind
    }

    async fn execute(&self, node: &Node, ctx: &dyn ExecutionContext) -> Result<(), NodeError> {
        let outcome = with_retry(&node.id, RetryEnvelope::llm(), || async {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                let msg = self.final_error.clone().unwrap_or_else(|| "503 service unavailable".into());
                Err(NodeError::Retryable(msg))
            } else {
                Ok(json!({"ok": true}))
            }
        })
        .await;

        match outcome {
            Ok(value) => {
                write_result(ctx, &node.id, ExecutionResult::ok(value, 0));
                Ok(())
            }
            Err(err) => {
                write_result(ctx, &node.id, ExecutionResult::fail(err.to_string(), 0));
                Err(err)
            }
        }
    }
}

/// Sleeps a fixed duration then succeeds — used to give S3/S4 a
/// deterministic, observable "executing" window.
struct SleepyMockNode {
    kind: String,
    delay: Duration,
}

#[async_trait]
impl ExecutableNode for SleepyMockNode {
    fn can_execute(&self, kind: &str) -> bool {
        kind == self.kind
    }

    async fn execute(&self, node: &Node, ctx: &dyn ExecutionContext) -> Result<(), NodeError> {
        tokio::time::sleep(self.delay).await;
        write_result(ctx, &node.id, ExecutionResult::ok(json!(node.id), 0));
        Ok(())
    }
}

fn registry(entries: Vec<(&str, Arc<dyn ExecutableNode>)>) -> Arc<NodeRegistry> {
    let mut map: NodeRegistry = HashMap::new();
    for (kind, exec) in entries {
        map.insert(kind.to_string(), exec);
    }
    Arc::new(map)
}

#[tokio::test]
async fn scenario_s2_diamond_with_retry() {
    let nodes = vec![node("a", "trigger"), node("b", "retry_b"), node("c", "retry_c"), node("d", "trigger_d")];
    let edges = vec![
        Edge { from: "a".into(), to: "b".into() },
        Edge { from: "a".into(), to: "c".into() },
        Edge { from: "b".into(), to: "d".into() },
        Edge { from: "c".into(), to: "d".into() },
    ];

    let registry = registry(vec![
        ("trigger", Arc::new(SleepyMockNode { kind: "trigger".into(), delay: Duration::ZERO })),
        ("retry_b", Arc::new(RetryingMockNode::succeeds_after("retry_b", 2))),
        ("retry_c", Arc::new(RetryingMockNode::always_fails("retry_c", "401 unauthorized"))),
        ("trigger_d", Arc::new(SleepyMockNode { kind: "trigger_d".into(), delay: Duration::ZERO })),
    ]);

    let ctx: Arc<dyn ExecutionContext> =
        Arc::new(StandaloneContext::new(nodes, edges, VariableStore::new()));

    let manager = Arc::new(QueueManager::new(2));
    let now = Utc::now();
    manager
        .enqueue(vec![
            QueueItem::new("a", None, "trigger", 0, vec![], now),
            QueueItem::new("b", None, "retry_b", 0, vec!["a".into()], now),
            QueueItem::new("c", None, "retry_c", 0, vec!["a".into()], now),
            QueueItem::new("d", None, "trigger_d", 0, vec!["b".into(), "c".into()], now),
        ])
        .await;

    manager.clone().run(registry, ctx).await;

    let failed = manager.failed_ids().await;
    let completed = manager.completed_ids().await;

    assert!(completed.contains("a"));
    assert!(completed.contains("b"), "b should succeed on its third attempt");
    assert!(failed.contains("c"), "c should fail permanently");
    assert!(failed.contains("d"), "d should be cascade-failed");
    assert!(failed.len() >= 2);

    let items = manager.items().await;
    let d = items.iter().find(|i| i.node_id == "d").unwrap();
    assert!(d.error.as_deref().unwrap_or("").contains('c'), "d's error should reference the failed dependency: {:?}", d.error);
}

#[tokio::test]
async fn scenario_s3_stop_mid_flight() {
    let ids: Vec<String> = (1..=6).map(|n| format!("n{n}")).collect();
    let nodes: Vec<Node> = ids.iter().map(|id| node(id, "chain")).collect();
    let edges: Vec<Edge> = ids.windows(2).map(|w| Edge { from: w[0].clone(), to: w[1].clone() }).collect();

    let exec: Arc<dyn ExecutableNode> =
        Arc::new(SleepyMockNode { kind: "chain".into(), delay: Duration::from_millis(60) });
    let registry = registry(vec![("chain", exec)]);

    let ctx: Arc<dyn ExecutionContext> =
        Arc::new(StandaloneContext::new(nodes, edges, VariableStore::new()));

    let manager = Arc::new(QueueManager::new(1));
    let now = Utc::now();
    let items: Vec<QueueItem> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let deps = if i == 0 { vec![] } else { vec![ids[i - 1].clone()] };
            QueueItem::new(id.clone(), None, "chain", 0, deps, now)
        })
        .collect();
    manager.enqueue(items).await;

    let mut events = manager.subscribe();
    let stopper = manager.clone();
    tokio::spawn(async move {
        let mut completions = 0;
        while let Ok(event) = events.recv().await {
            if let QueueEvent::Progress(p) = event {
                if p.status == crate::models::ProgressStatus::Completed {
                    completions += 1;
                    if completions == 2 {
                        stopper.stop();
                        break;
                    }
                }
            }
        }
    });

    let run = manager.clone();
    run.run(registry, ctx).await;

    let completed = manager.completed_ids().await;
    assert!(completed.contains("n1"));
    assert!(completed.contains("n2"));

    let items = manager.items().await;
    let still_pending_failed = items.iter().filter(|i| i.status == QueueStatus::Failed).count();
    assert!(still_pending_failed >= 3, "at least the untouched tail should be force-failed");

    for item in items.iter().filter(|i| i.status == QueueStatus::Failed) {
        assert_eq!(item.error.as_deref(), Some("Flow stopped by user"));
    }

    let duration = manager.flow_duration_ms().await.unwrap();
    assert!(duration < 600, "stop should cut the run well short of all six sleeps: {duration}ms");
}

#[tokio::test]
async fn scenario_s4_skip_completed_resume() {
    let ids: Vec<String> = (1..=6).map(|n| format!("n{n}")).collect();
    let nodes: Vec<Node> = ids.iter().map(|id| node(id, "chain")).collect();
    let edges: Vec<Edge> = ids.windows(2).map(|w| Edge { from: w[0].clone(), to: w[1].clone() }).collect();

    let call_counter = Arc::new(AtomicUsize::new(0));
    struct CountingNode {
        calls: Arc<AtomicUsize>,
    }
    #[async_trait]
    impl ExecutableNode for CountingNode {
        fn can_execute(&self, kind: &str) -> bool {
            kind == "chain"
        }
        async fn execute(&self, node: &Node, ctx: &dyn ExecutionContext) -> Result<(), NodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            write_result(ctx, &node.id, ExecutionResult::ok(json!(node.id), 0));
            Ok(())
        }
    }

    let registry = registry(vec![("chain", Arc::new(CountingNode { calls: call_counter.clone() }))]);
    let ctx: Arc<dyn ExecutionContext> =
        Arc::new(StandaloneContext::new(nodes, edges, VariableStore::new()));

    let manager = Arc::new(QueueManager::new(2));
    manager.seed_completed(["n1".to_string(), "n2".to_string(), "n3".to_string()]).await;

    let now = Utc::now();
    let items: Vec<QueueItem> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let deps = if i == 0 { vec![] } else { vec![ids[i - 1].clone()] };
            QueueItem::new(id.clone(), None, "chain", 0, deps, now)
        })
        .collect();
    manager.enqueue(items).await;

    assert_eq!(manager.items().await.len(), 3, "only n4,n5,n6 should have entered the queue");

    manager.clone().run(registry, ctx).await;

    assert_eq!(call_counter.load(Ordering::SeqCst), 3, "exactly three executing transitions");
    let completed = manager.completed_ids().await;
    assert!(completed.contains("n4") && completed.contains("n5") && completed.contains("n6"));
}

/// Exercises `QueueManager::run` against `nodes::mock::MockNode`, the
/// same guard-respecting double every real `ExecutableNode` kind is
/// modeled on (`if node.is_executing() { return Ok(()); }`). Unlike the
/// doubles above, `MockNode` only writes a result the first time it's
/// entered while `isExecuting` is false — so if the manager ever patched
/// `isExecuting: true` onto the node before handing it to the executor
/// (rather than leaving that lock to the executor itself), this node
/// would short-circuit on its first and only attempt, write no result,
/// and the queue would report it `failed` with "produced no result"
/// instead of `completed`.
#[tokio::test]
async fn manager_respects_executor_is_executing_guard() {
    let nodes = vec![node("a", "mock"), node("b", "mock"), node("c", "mock")];
    let edges = vec![
        Edge { from: "a".into(), to: "b".into() },
        Edge { from: "b".into(), to: "c".into() },
    ];

    let registry = registry(vec![
        ("mock", Arc::new(MockNode::returning("mock", json!({"ok": true})))),
    ]);

    let ctx: Arc<dyn ExecutionContext> =
        Arc::new(StandaloneContext::new(nodes, edges, VariableStore::new()));

    let manager = Arc::new(QueueManager::new(1));
    let now = Utc::now();
    manager
        .enqueue(vec![
            QueueItem::new("a", None, "mock", 0, vec![], now),
            QueueItem::new("b", None, "mock", 0, vec!["a".into()], now),
            QueueItem::new("c", None, "mock", 0, vec!["b".into()], now),
        ])
        .await;

    manager.clone().run(registry, ctx).await;

    let failed = manager.failed_ids().await;
    assert!(failed.is_empty(), "no node should fail: {failed:?}");

    let completed = manager.completed_ids().await;
    assert!(completed.contains("a") && completed.contains("b") && completed.contains("c"));

    let items = manager.items().await;
    for id in ["a", "b", "c"] {
        let item = items.iter().find(|i| i.node_id == id).unwrap();
        assert_eq!(item.status, QueueStatus::Completed, "{id} should have completed, got {:?}", item.error);
        assert_eq!(item.output, Some(json!({"ok": true})));
    }
}
