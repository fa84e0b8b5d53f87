//! Graph parsing & validation (§4.1).
//!
//! Each failure mode gets a distinct `ErrorCode` so SDK authors can match on
//! `code` rather than parse a message.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{ErrorCode, Result, SykliError};

use super::matrix::expand_matrices;
use super::{Graph, GraphDocument, Task};

/// `parse(json) -> Graph | Error(validation)` (§4.1).
pub fn parse(json: &str) -> Result<Graph> {
    let doc: GraphDocument = serde_json::from_str(json).map_err(|e| {
        SykliError::new(ErrorCode::InvalidGraph, format!("malformed graph document: {e}"))
    })?;

    if doc.tasks.is_empty() {
        return Err(SykliError::new(
            ErrorCode::InvalidGraph,
            "graph document has no tasks",
        ));
    }

    let tasks = expand_matrices(doc.tasks);

    validate_names(&tasks)?;
    validate_depends_on(&tasks)?;
    detect_cycle(&tasks)?;

    let graph = Graph::new(tasks);
    validate_artifacts(&graph)?;

    Ok(graph)
}

fn validate_names(tasks: &[Task]) -> Result<()> {
    let mut seen = FxHashSet::default();
    for task in tasks {
        if task.name.is_empty() {
            return Err(SykliError::new(ErrorCode::InvalidGraph, "task name must not be empty"));
        }
        if !seen.insert(task.name.as_str()) {
            return Err(SykliError::new(
                ErrorCode::InvalidGraph,
                format!("duplicate task name: {}", task.name),
            ));
        }
        if task.depends_on.iter().any(|d| d == &task.name) {
            return Err(SykliError::new(
                ErrorCode::InvalidGraph,
                format!("task {} depends on itself", task.name),
            ));
        }
    }
    Ok(())
}

fn validate_depends_on(tasks: &[Task]) -> Result<()> {
    let names: FxHashSet<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
    for task in tasks {
        for dep in &task.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(SykliError::new(
                    ErrorCode::InvalidGraph,
                    format!("task {} depends on unknown task {}", task.name, dep),
                ));
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm (§4.1 step 4): repeatedly remove zero-indegree nodes;
/// anything left over is part of a cycle. We then DFS within that leftover
/// set to report one concrete cycle path rather than just "a cycle exists".
fn detect_cycle(tasks: &[Task]) -> Result<()> {
    let mut in_degree: FxHashMap<&str, usize> = tasks.iter().map(|t| (t.name.as_str(), 0)).collect();
    let mut successors: FxHashMap<&str, Vec<&str>> = FxHashMap::default();

    for task in tasks {
        successors.entry(task.name.as_str()).or_default();
        for dep in &task.depends_on {
            *in_degree.get_mut(task.name.as_str()).unwrap() += 1;
            successors.entry(dep.as_str()).or_default().push(task.name.as_str());
        }
    }

    let mut queue: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();
    queue.sort_unstable();

    let mut removed: FxHashSet<&str> = FxHashSet::default();
    while let Some(name) = queue.pop() {
        removed.insert(name);
        for &succ in successors.get(name).into_iter().flatten() {
            if removed.contains(succ) {
                continue;
            }
            let deg = in_degree.get_mut(succ).unwrap();
            *deg -= 1;
            if *deg == 0 {
                queue.push(succ);
            }
        }
    }

    if removed.len() == tasks.len() {
        return Ok(());
    }

    let remaining: Vec<&str> = tasks
        .iter()
        .map(|t| t.name.as_str())
        .filter(|n| !removed.contains(n))
        .collect();
    let cycle = find_cycle_path(&remaining, &successors);
    Err(SykliError::new(
        ErrorCode::CycleDetected,
        format!("dependency cycle detected: {}", cycle.join(" -> ")),
    ))
}

fn find_cycle_path<'a>(remaining: &[&'a str], successors: &FxHashMap<&'a str, Vec<&'a str>>) -> Vec<&'a str> {
    let remaining_set: FxHashSet<&str> = remaining.iter().copied().collect();
    let start = remaining[0];
    let mut stack = vec![start];
    let mut visited = FxHashSet::default();
    visited.insert(start);

    loop {
        let current = *stack.last().unwrap();
        let next = successors
            .get(current)
            .into_iter()
            .flatten()
            .find(|n| remaining_set.contains(*n));
        match next {
            Some(&n) if n == start => {
                stack.push(n);
                return stack;
            }
            Some(&n) if !visited.contains(n) => {
                visited.insert(n);
                stack.push(n);
            }
            _ => return stack,
        }
    }
}

/// §4.1 step 5: every `task_inputs` entry's producer exists, declares the
/// named output, and is reachable from the consumer via `depends_on`.
fn validate_artifacts(graph: &Graph) -> Result<()> {
    for task in graph.tasks() {
        for input in &task.task_inputs {
            let producer = graph.get(&input.from_task).ok_or_else(|| {
                SykliError::new(
                    ErrorCode::InvalidArtifactRef,
                    format!(
                        "task {} references unknown producer task {}",
                        task.name, input.from_task
                    ),
                )
            })?;
            if !producer.outputs.contains_key(&input.output) {
                return Err(SykliError::new(
                    ErrorCode::InvalidArtifactRef,
                    format!(
                        "task {} references output {:?} not declared by {}",
                        task.name, input.output, input.from_task
                    ),
                ));
            }
            if !task.depends_on.contains(&input.from_task) && !graph.depends_transitively_on(&task.name, &input.from_task) {
                return Err(SykliError::new(
                    ErrorCode::InvalidArtifactRef,
                    format!(
                        "task {} consumes an artifact from {} but does not depend on it",
                        task.name, input.from_task
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(tasks_json: serde_json::Value) -> String {
        serde_json::json!({
            "version": "1",
            "tasks": tasks_json,
        })
        .to_string()
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse("not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidGraph);
    }

    #[test]
    fn rejects_self_dependency() {
        let json = doc(serde_json::json!([{"name": "a", "depends_on": ["a"]}]));
        let err = parse(&json).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidGraph);
    }

    #[test]
    fn rejects_unknown_dependency() {
        let json = doc(serde_json::json!([{"name": "a", "depends_on": ["missing"]}]));
        let err = parse(&json).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidGraph);
    }

    #[test]
    fn detects_three_node_cycle() {
        let json = doc(serde_json::json!([
            {"name": "a", "depends_on": ["c"]},
            {"name": "b", "depends_on": ["a"]},
            {"name": "c", "depends_on": ["b"]},
        ]));
        let err = parse(&json).unwrap_err();
        assert_eq!(err.code, ErrorCode::CycleDetected);
        assert!(err.message.contains("->"));
    }

    #[test]
    fn rejects_task_input_without_matching_depends_on() {
        let json = doc(serde_json::json!([
            {"name": "build", "outputs": {"bin": "out/bin"}},
            {"name": "deploy", "task_inputs": [{"from_task": "build", "output": "bin", "dest": "bin"}]},
        ]));
        let err = parse(&json).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArtifactRef);
    }

    #[test]
    fn rejects_task_input_referencing_undeclared_output() {
        let json = doc(serde_json::json!([
            {"name": "build", "outputs": {"bin": "out/bin"}},
            {"name": "deploy", "depends_on": ["build"], "task_inputs": [{"from_task": "build", "output": "tarball", "dest": "bin"}]},
        ]));
        let err = parse(&json).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArtifactRef);
    }

    #[test]
    fn accepts_well_formed_graph() {
        let json = doc(serde_json::json!([
            {"name": "build", "outputs": {"bin": "out/bin"}},
            {"name": "deploy", "depends_on": ["build"], "task_inputs": [{"from_task": "build", "output": "bin", "dest": "bin"}]},
        ]));
        let graph = parse(&json).unwrap();
        assert_eq!(graph.len(), 2);
    }
}
