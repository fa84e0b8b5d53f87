//! Placement Error Integration Test
//!
//! Seed scenario (§8 #5): a mesh of nodes without the labels a task
//! `requires` yields a `PlacementError` with `no_matching_nodes` and a hint
//! pointing at `SYKLI_LABELS`.

use async_trait::async_trait;

use sykli_core::mesh::{place, Node, NodeCapabilities, NodeDispatch};
use sykli_core::Task;

struct RejectsEverything;

#[async_trait]
impl NodeDispatch for RejectsEverything {
    async fn dispatch(&self, _node: &Node, _task: &Task) -> Result<(), String> {
        Err("rejected".to_string())
    }
}

fn node(name: &str, labels: &[&str]) -> Node {
    Node {
        name: name.to_string(),
        capabilities: NodeCapabilities {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            cpu_cores: 4,
            memory_mb: 4096,
            is_coordinator: false,
        },
    }
}

#[tokio::test]
async fn no_node_advertises_required_label() {
    let nodes = vec![node("local", &["darwin", "arm64"]), node("s1", &["linux", "docker"])];
    let task: Task = serde_json::from_value(serde_json::json!({
        "name": "deploy",
        "requires": ["quantum"],
    }))
    .unwrap();

    let err = place(&nodes, &task, &RejectsEverything, None).await.unwrap_err();

    assert!(err.no_matching_nodes);
    assert_eq!(err.required_labels, vec!["quantum"]);
    assert_eq!(err.available_nodes, vec!["local".to_string(), "s1".to_string()]);
    assert!(err.hints().iter().any(|h| h.contains("SYKLI_LABELS")));
}
