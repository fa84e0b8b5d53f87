//! Shared helpers for the integration tests.

use std::path::Path;
use std::sync::Arc;

use sykli_core::events::EventBus;
use sykli_core::target::local::LocalTarget;
use sykli_core::{Graph, RunContext, RunOptions, Scheduler, Task};

pub fn task(json: serde_json::Value) -> Task {
    serde_json::from_value(json).expect("fixture task is well-formed")
}

pub fn graph(tasks: Vec<serde_json::Value>) -> Graph {
    Graph::new(tasks.into_iter().map(task).collect())
}

pub fn run_ctx(workdir: &Path, max_parallel: usize) -> RunContext {
    let opts = RunOptions { max_parallel, ..RunOptions::default() };
    RunContext::new(workdir.to_path_buf(), opts)
}

pub fn local_scheduler(workdir: &Path) -> Scheduler {
    let target = Arc::new(LocalTarget::new(workdir.to_path_buf()));
    Scheduler::new(target, Arc::new(EventBus::new()), workdir)
}
