//! Derived graph queries (§4.1): topological levels, transitive blockers,
//! critical path.

use rustc_hash::{FxHashMap, FxHashSet};

use super::Graph;

/// `topological_levels(graph) -> [[name]]`. Level 0 has no deps; level k
/// depends only on levels < k. Ties within a level are broken by name for
/// deterministic presentation (§5).
pub fn topological_levels(graph: &Graph) -> Vec<Vec<String>> {
    let mut remaining_deps: FxHashMap<&str, FxHashSet<&str>> = graph
        .tasks()
        .iter()
        .map(|t| (t.name.as_str(), t.depends_on.iter().map(String::as_str).collect()))
        .collect();

    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut placed: FxHashSet<&str> = FxHashSet::default();

    while placed.len() < graph.len() {
        let mut level: Vec<&str> = remaining_deps
            .iter()
            .filter(|(name, deps)| !placed.contains(*name) && deps.is_empty())
            .map(|(&name, _)| name)
            .collect();

        if level.is_empty() {
            // A cycle would have been rejected at parse time; defend anyway
            // by dumping whatever remains rather than looping forever.
            let mut rest: Vec<&str> = graph
                .names()
                .filter(|n| !placed.contains(n))
                .collect();
            rest.sort_unstable();
            levels.push(rest.into_iter().map(String::from).collect());
            break;
        }

        level.sort_unstable();
        for &name in &level {
            placed.insert(name);
        }
        for deps in remaining_deps.values_mut() {
            for name in &level {
                deps.remove(name);
            }
        }
        levels.push(level.into_iter().map(String::from).collect());
    }

    levels
}

/// `blocks(graph, name) -> set of tasks that transitively depend on name`
/// (used by the Scheduler to mark downstream tasks `blocked` on failure,
/// §4.5).
pub fn blocks(graph: &Graph, name: &str) -> FxHashSet<String> {
    let mut dependents: FxHashSet<String> = FxHashSet::default();
    let mut changed = true;
    while changed {
        changed = false;
        for task in graph.tasks() {
            if dependents.contains(&task.name) {
                continue;
            }
            let depends_on_target = task.depends_on.iter().any(|d| d == name || dependents.contains(d));
            if depends_on_target {
                dependents.insert(task.name.clone());
                changed = true;
            }
        }
    }
    dependents
}

/// `critical_path(graph, duration_map) -> [name]` — longest path by summed
/// duration over the weighted DAG, via DP over a topological order.
pub fn critical_path(graph: &Graph, duration_map: &FxHashMap<String, u64>) -> Vec<String> {
    let levels = topological_levels(graph);
    let mut finish: FxHashMap<&str, u64> = FxHashMap::default();
    let mut predecessor: FxHashMap<&str, &str> = FxHashMap::default();

    for level in &levels {
        for name in level {
            let own = duration_map.get(name).copied().unwrap_or(0);
            let deps = graph.depends_on(name);
            let mut best: Option<(&str, u64)> = None;
            for dep in deps {
                if let Some(&dep_finish) = finish.get(dep.as_str()) {
                    if best.map(|(_, b)| dep_finish > b).unwrap_or(true) {
                        best = Some((dep.as_str(), dep_finish));
                    }
                }
            }
            let total = own + best.map(|(_, f)| f).unwrap_or(0);
            finish.insert(name.as_str(), total);
            if let Some((pred, _)) = best {
                predecessor.insert(name.as_str(), pred);
            }
        }
    }

    let Some((&end, _)) = finish.iter().max_by_key(|(_, &v)| v) else {
        return Vec::new();
    };

    let mut path = vec![end.to_string()];
    let mut current = end;
    while let Some(&pred) = predecessor.get(current) {
        path.push(pred.to_string());
        current = pred;
    }
    path.reverse();
    path
}
