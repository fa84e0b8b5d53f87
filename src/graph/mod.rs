//! Graph — domain model for the task DAG (§3, §4.1).
//!
//! `task_ids` keeps tasks in document order (the order presented to callers
//! is otherwise deterministic by name, §5); `by_name` is the fast lookup
//! index used by validation, matrix expansion and the Scheduler.

pub mod matrix;
pub mod parse;
pub mod queries;
pub mod task;

use rustc_hash::FxHashMap;

pub use matrix::expand_matrices;
pub use parse::parse;
pub use queries::{blocks, critical_path, topological_levels};
pub use task::{Mount, MountType, OnFailure, Semantic, Service, Task, TaskInput};

/// Top-level SDK document (§6.1).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GraphDocument {
    pub version: String,
    #[serde(default)]
    pub required_env: Vec<String>,
    pub tasks: Vec<Task>,
}

/// Ordered list of tasks plus a name -> task index (§3).
#[derive(Debug, Clone)]
pub struct Graph {
    tasks: Vec<Task>,
    by_name: FxHashMap<String, usize>,
}

impl Graph {
    pub fn new(tasks: Vec<Task>) -> Self {
        let by_name = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        Self { tasks, by_name }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.by_name.get(name).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    /// Direct dependencies of `name`, empty if `name` is unknown.
    pub fn depends_on(&self, name: &str) -> &[String] {
        self.get(name).map(|t| t.depends_on.as_slice()).unwrap_or(&[])
    }

    /// `true` if `ancestor` is reachable from `name` by following
    /// `depends_on` edges (used by §4.1 step 5's artifact-dependency check).
    pub fn depends_transitively_on(&self, name: &str, ancestor: &str) -> bool {
        let mut stack = vec![name.to_string()];
        let mut seen = rustc_hash::FxHashSet::default();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for dep in self.depends_on(&current) {
                if dep == ancestor {
                    return true;
                }
                stack.push(dep.clone());
            }
        }
        false
    }
}
