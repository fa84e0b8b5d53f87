//! Mesh / NodeSelector (§4.7) — filter candidate peer nodes by required
//! labels, attempt dispatch in declared order, aggregate failures into a
//! `PlacementError`. Circuit-breaking around a flaky node is grounded on
//! the teacher's `resilience/circuit_breaker.rs`.

pub mod circuit_breaker;

use async_trait::async_trait;

use crate::error::{NodeFailure, PlacementError};
use crate::graph::Task;

pub use circuit_breaker::CircuitBreaker;

/// Labels/capabilities a peer node advertises at daemon start (§4.7).
#[derive(Debug, Clone)]
pub struct NodeCapabilities {
    pub labels: Vec<String>,
    pub cpu_cores: u32,
    pub memory_mb: u64,
    /// Coordinator-only nodes never execute tasks and never appear as
    /// candidates (§4.7).
    pub is_coordinator: bool,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub capabilities: NodeCapabilities,
}

/// Dispatches a task to a single node. A real implementation talks RPC to
/// the peer; tests substitute a stub.
#[async_trait]
pub trait NodeDispatch: Send + Sync {
    async fn dispatch(&self, node: &Node, task: &Task) -> Result<(), String>;
}

/// Auto-detected base labels for this process's own node (§4.7): OS, arch,
/// plus any labels from `SYKLI_LABELS` (comma-separated).
pub fn local_labels() -> Vec<String> {
    let mut labels = vec![std::env::consts::OS.to_string(), std::env::consts::ARCH.to_string()];
    if let Ok(extra) = std::env::var("SYKLI_LABELS") {
        labels.extend(extra.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string));
    }
    labels
}

/// §4.7 step 1: retain nodes whose labels are a superset of `task.requires`.
/// Coordinator-only nodes are excluded regardless of labels.
fn filter_candidates<'a>(nodes: &'a [Node], task: &Task) -> Vec<&'a Node> {
    nodes
        .iter()
        .filter(|n| !n.capabilities.is_coordinator)
        .filter(|n| task.requires.iter().all(|req| n.capabilities.labels.contains(req)))
        .collect()
}

/// Filter, then attempt dispatch to each candidate in order, stopping at the
/// first success (§4.7 steps 2-4).
pub async fn place(
    nodes: &[Node],
    task: &Task,
    dispatcher: &dyn NodeDispatch,
    breaker: Option<&CircuitBreaker>,
) -> Result<String, PlacementError> {
    let candidates = filter_candidates(nodes, task);

    if candidates.is_empty() {
        return Err(PlacementError {
            task_name: task.name.clone(),
            no_matching_nodes: true,
            required_labels: task.requires.clone(),
            available_nodes: nodes.iter().map(|n| n.name.clone()).collect(),
            failures: Vec::new(),
        });
    }

    let mut failures = Vec::new();
    for node in candidates {
        if let Some(breaker) = breaker {
            if !breaker.allow(&node.name) {
                failures.push(NodeFailure {
                    node: node.name.clone(),
                    reason: "circuit open: node recently failed repeatedly".to_string(),
                });
                continue;
            }
        }

        match dispatcher.dispatch(node, task).await {
            Ok(()) => {
                if let Some(breaker) = breaker {
                    breaker.record_success(&node.name);
                }
                return Ok(node.name.clone());
            }
            Err(reason) => {
                if let Some(breaker) = breaker {
                    breaker.record_failure(&node.name);
                }
                failures.push(NodeFailure { node: node.name.clone(), reason });
            }
        }
    }

    Err(PlacementError {
        task_name: task.name.clone(),
        no_matching_nodes: false,
        required_labels: task.requires.clone(),
        available_nodes: nodes.iter().map(|n| n.name.clone()).collect(),
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;
    #[async_trait]
    impl NodeDispatch for AlwaysFails {
        async fn dispatch(&self, _node: &Node, _task: &Task) -> Result<(), String> {
            Err("docker daemon unreachable".to_string())
        }
    }

    struct SucceedsOn(&'static str);
    #[async_trait]
    impl NodeDispatch for SucceedsOn {
        async fn dispatch(&self, node: &Node, _task: &Task) -> Result<(), String> {
            if node.name == self.0 {
                Ok(())
            } else {
                Err("rejected".to_string())
            }
        }
    }

    fn node(name: &str, labels: &[&str], coordinator: bool) -> Node {
        Node {
            name: name.to_string(),
            capabilities: NodeCapabilities {
                labels: labels.iter().map(|s| s.to_string()).collect(),
                cpu_cores: 4,
                memory_mb: 8192,
                is_coordinator: coordinator,
            },
        }
    }

    fn task(requires: &[&str]) -> Task {
        serde_json::from_value(serde_json::json!({
            "name": "deploy",
            "requires": requires,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn no_matching_nodes_reports_required_labels() {
        let nodes = vec![node("local", &["darwin", "arm64"], false), node("s1", &["linux", "docker"], false)];
        let task = task(&["quantum"]);
        let err = place(&nodes, &task, &AlwaysFails, None).await.unwrap_err();
        assert!(err.no_matching_nodes);
        assert_eq!(err.required_labels, vec!["quantum"]);
    }

    #[tokio::test]
    async fn dispatch_stops_at_first_success() {
        let nodes = vec![node("a", &["linux"], false), node("b", &["linux"], false)];
        let task = task(&["linux"]);
        let winner = place(&nodes, &task, &SucceedsOn("b"), None).await.unwrap();
        assert_eq!(winner, "b");
    }

    #[tokio::test]
    async fn coordinator_nodes_never_dispatch() {
        let nodes = vec![node("coord", &["linux"], true)];
        let task = task(&[]);
        let err = place(&nodes, &task, &AlwaysFails, None).await.unwrap_err();
        assert!(err.no_matching_nodes);
    }

    #[tokio::test]
    async fn all_failures_are_aggregated() {
        let nodes = vec![node("a", &[], false)];
        let err = place(&nodes, &task(&[]), &AlwaysFails, None).await.unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert!(err.hints().iter().any(|h| h.to_lowercase().contains("docker")));
    }
}
