//! The headless Planner/Driver (spec §4.6) — turns `{nodes, edges,
//! variables}` into a seeded, quiescent `QueueManager` run without any
//! host process around it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use nodes::context::StandaloneContext;
use nodes::{Edge as NodesEdge, ExecutionContext, ExecutionResult, NodeRegistry};
use queue::{QueueItem, QueueManager};

use crate::dag::analyze;
use crate::models::Workflow;
use crate::EngineError;

/// Upper bound the Driver enforces on caller-supplied `max_workers`
/// (spec §4.6 step 2).
const MAX_WORKERS: usize = 25;

/// What a completed (or cancelled) headless run produced.
#[derive(Debug, Clone)]
pub struct DriverSummary {
    pub success: bool,
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: i64,
    pub execution_results: HashMap<String, ExecutionResult>,
}

/// Priority base table (spec §4.5 "Priority assignment").
struct Bases {
    trigger: i64,
    input: i64,
    other: i64,
}

const CONNECTED_BASES: Bases = Bases { trigger: 2000, input: 1800, other: 1200 };
const ISOLATED_BASES: Bases = Bases { trigger: 900, input: 800, other: 400 };

/// Topologically order `workflow` and turn it into seeded, priority-ranked
/// [`QueueItem`]s — the same planning step [`run`] uses, exposed so the
/// DB-backed executor can seed a [`QueueManager`] the identical way.
pub(crate) fn plan_queue_items(workflow: &Workflow) -> Result<Vec<QueueItem>, EngineError> {
    let analysis = analyze(workflow)?;
    Ok(build_queue_items(workflow, &analysis.order, &analysis.dependencies))
}

/// Run `workflow` to quiescence against `registry`, seeded with
/// `variables` and (when `!clear_results`) the completed-node set implied
/// by `prior_results`.
pub async fn run(
    workflow: &Workflow,
    variables: nodes::VariableStore,
    prior_results: Option<HashMap<String, ExecutionResult>>,
    clear_results: bool,
    max_workers: usize,
    registry: Arc<NodeRegistry>,
) -> Result<DriverSummary, EngineError> {
    let analysis = analyze(workflow)?;

    let graph_nodes: Vec<nodes::Node> = workflow.nodes.iter().map(|n| n.to_node()).collect();
    let graph_edges: Vec<NodesEdge> =
        workflow.edges.iter().map(|e| NodesEdge { from: e.from.clone(), to: e.to.clone() }).collect();

    let ctx: Arc<dyn ExecutionContext> =
        Arc::new(StandaloneContext::with_registry(graph_nodes, graph_edges, variables, registry.clone()));

    let manager = Arc::new(QueueManager::new(max_workers.clamp(1, MAX_WORKERS)));

    let mut skipped = 0usize;
    if !clear_results {
        if let Some(prior) = &prior_results {
            let completed_ids: Vec<String> =
                prior.iter().filter(|(_, r)| r.success).map(|(id, _)| id.clone()).collect();
            skipped = completed_ids.len();
            manager.seed_completed(completed_ids).await;
        }
    }

    let items = build_queue_items(workflow, &analysis.order, &analysis.dependencies);
    manager.enqueue(items).await;

    manager.clone().run(registry, ctx.clone()).await;

    let failed = manager.failed_ids().await.len();
    let completed = manager.completed_ids().await.len();
    let duration_ms = manager.flow_duration_ms().await.unwrap_or(0);
    let was_stopped = manager.was_stopped();

    Ok(DriverSummary {
        success: failed == 0 && !was_stopped,
        executed: completed,
        failed,
        skipped,
        duration_ms,
        execution_results: ctx.results(),
    })
}

/// Directed, multi-source reachability from every in-degree-0 node (spec
/// §4.5 "Discover the 'connected' set via BFS from every node whose
/// in-degree is 0"). Everything reached from any such start node is
/// "connected"; everything else is "isolated" — including a node that
/// sits in its own separately-triggered pipeline with no edge at all into
/// the rest of the graph, since a node is judged by whether *it itself*
/// is reachable from *some* start node, not by which weakly-connected
/// component it happens to share with other nodes.
fn split_connected_and_isolated(
    workflow: &Workflow,
    dependencies: &HashMap<String, Vec<String>>,
) -> (HashSet<String>, HashSet<String>) {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in &workflow.nodes {
        adjacency.entry(node.id.as_str()).or_default();
    }
    for edge in &workflow.edges {
        adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
    }

    let start_set: Vec<&str> = workflow
        .nodes
        .iter()
        .filter(|n| dependencies.get(n.id.as_str()).map(|d| d.is_empty()).unwrap_or(true))
        .map(|n| n.id.as_str())
        .collect();

    let mut connected: HashSet<String> = HashSet::new();
    let mut queue = VecDeque::new();
    for start in start_set {
        if connected.insert(start.to_string()) {
            queue.push_back(start);
        }
    }
    while let Some(cur) = queue.pop_front() {
        if let Some(neighbours) = adjacency.get(cur) {
            for &next in neighbours {
                if connected.insert(next.to_string()) {
                    queue.push_back(next);
                }
            }
        }
    }

    let isolated = workflow
        .nodes
        .iter()
        .map(|n| n.id.clone())
        .filter(|id| !connected.contains(id))
        .collect();

    (connected, isolated)
}

fn build_queue_items(
    workflow: &Workflow,
    order: &[String],
    dependencies: &HashMap<String, Vec<String>>,
) -> Vec<QueueItem> {
    let (connected, isolated) = split_connected_and_isolated(workflow, dependencies);
    let node_by_id: HashMap<&str, _> = workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let connected_order: Vec<&String> = order.iter().filter(|id| connected.contains(*id)).collect();
    let isolated_order: Vec<&String> = order.iter().filter(|id| isolated.contains(*id)).collect();

    let mut items = Vec::with_capacity(order.len());
    let now = Utc::now();

    let mut push_phase = |phase_order: &[&String], bases: &Bases| {
        let phase_size = phase_order.len() as i64;
        for (index, id) in phase_order.iter().enumerate() {
            let node = node_by_id[id.as_str()];
            let in_degree = dependencies.get(id.as_str()).map(|d| d.len()).unwrap_or(0);
            let base = if node.node_type == "trigger" {
                bases.trigger
            } else if in_degree == 0 {
                bases.input
            } else {
                bases.other
            };
            let rank = phase_size - index as i64;
            let priority = base + rank;

            items.push(QueueItem::new(
                node.id.clone(),
                node.label.clone(),
                node.node_type.clone(),
                priority,
                dependencies.get(id.as_str()).cloned().unwrap_or_default(),
                now,
            ));
        }
    };

    push_phase(&connected_order, &CONNECTED_BASES);
    push_phase(&isolated_order, &ISOLATED_BASES);

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, NodeDefinition, Trigger};
    use nodes::mock::MockNode;
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn node(id: &str, node_type: &str) -> NodeDefinition {
        NodeDefinition { id: id.into(), node_type: node_type.into(), label: None, config: serde_json::Value::Null }
    }

    fn registry(kinds: &[&str]) -> Arc<NodeRegistry> {
        let mut map: NodeRegistry = Map::new();
        for kind in kinds {
            map.insert(kind.to_string(), Arc::new(MockNode::returning(*kind, json!({"ok": true}))));
        }
        Arc::new(map)
    }

    #[tokio::test]
    async fn scenario_s1_trivial_chain_runs_to_completion() {
        let workflow = Workflow::new(
            "trivial",
            Trigger::Manual,
            vec![node("t", "trigger"), node("l", "llm")],
            vec![Edge { from: "t".into(), to: "l".into() }],
        );

        let summary = run(
            &workflow,
            nodes::VariableStore::new(),
            None,
            true,
            4,
            registry(&["trigger", "llm"]),
        )
        .await
        .unwrap();

        assert!(summary.success);
        assert_eq!(summary.executed, 2);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn skip_completed_resume_honors_prior_results() {
        let workflow = Workflow::new(
            "resume",
            Trigger::Manual,
            vec![node("a", "trigger"), node("b", "llm"), node("c", "llm")],
            vec![
                Edge { from: "a".into(), to: "b".into() },
                Edge { from: "b".into(), to: "c".into() },
            ],
        );

        let mut prior = Map::new();
        prior.insert("a".to_string(), ExecutionResult::ok(json!(null), 0));
        prior.insert("b".to_string(), ExecutionResult::ok(json!(null), 0));

        let summary = run(
            &workflow,
            nodes::VariableStore::new(),
            Some(prior),
            false,
            2,
            registry(&["trigger", "llm"]),
        )
        .await
        .unwrap();

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.executed, 1, "only 'c' should actually run");
        assert!(summary.success);
    }

    #[tokio::test]
    async fn failure_cascades_and_summary_reports_failed() {
        struct AlwaysFatal;
        #[async_trait::async_trait]
        impl nodes::ExecutableNode for AlwaysFatal {
            fn can_execute(&self, kind: &str) -> bool {
                kind == "llm"
            }
            async fn execute(
                &self,
                node: &nodes::Node,
                ctx: &dyn ExecutionContext,
            ) -> Result<(), nodes::NodeError> {
                let mut delta = Map::new();
                delta.insert(node.id.clone(), ExecutionResult::fail("boom", 0));
                ctx.set_results(delta);
                Err(nodes::NodeError::Fatal("boom".into()))
            }
        }

        let workflow = Workflow::new(
            "cascade",
            Trigger::Manual,
            vec![node("a", "trigger"), node("b", "llm"), node("c", "llm")],
            vec![
                Edge { from: "a".into(), to: "b".into() },
                Edge { from: "b".into(), to: "c".into() },
            ],
        );

        let mut map: NodeRegistry = Map::new();
        map.insert("trigger".into(), Arc::new(MockNode::returning("trigger", json!(null))));
        map.insert("llm".into(), Arc::new(AlwaysFatal));

        let summary =
            run(&workflow, nodes::VariableStore::new(), None, true, 2, Arc::new(map)).await.unwrap();

        assert!(!summary.success);
        assert!(summary.failed >= 2, "b fails directly, c cascades");
    }

    /// Two independent trigger→chain pipelines, with no edge between them.
    /// Per spec §4.5, the "connected" set is BFS-reachable from *every*
    /// in-degree-0 node — so both triggers are start nodes and both of
    /// their chains are "connected", not just the first one. Both should
    /// therefore land in the high-priority (2000/1800/1200) bucket, not
    /// have the second pipeline demoted to "isolated" (900/800/400) for
    /// merely lacking a shared component with the first.
    #[test]
    fn two_independent_trigger_pipelines_are_both_connected() {
        let workflow = Workflow::new(
            "two-pipelines",
            Trigger::Manual,
            vec![node("t1", "trigger"), node("l1", "llm"), node("t2", "trigger"), node("l2", "llm")],
            vec![
                Edge { from: "t1".into(), to: "l1".into() },
                Edge { from: "t2".into(), to: "l2".into() },
            ],
        );

        let items = plan_queue_items(&workflow).unwrap();
        let by_id: Map<&str, &QueueItem> = items.iter().map(|i| (i.node_id.as_str(), i)).collect();

        for id in ["t1", "t2"] {
            assert!(
                by_id[id].priority >= CONNECTED_BASES.trigger,
                "{id} should use the connected trigger base, got {}",
                by_id[id].priority
            );
        }
        for id in ["l1", "l2"] {
            assert!(
                by_id[id].priority >= CONNECTED_BASES.other && by_id[id].priority < CONNECTED_BASES.input,
                "{id} should use the connected 'other' base, got {}",
                by_id[id].priority
            );
        }
    }
}
