//! Capability-negotiated execution substrate (§2 #5, §4.4).
//!
//! A `Target` answers *where* a task runs. Required: `run_task`. Optional
//! capabilities are separate traits (`Lifecycle`, `Secrets`, `Storage`,
//! `Services`) a concrete Target may or may not implement — the teacher's
//! behaviour-introspection pattern (`has_capability?`) becomes, in Rust, a
//! runtime capability table the Target reports plus a down-cast via
//! `as_secrets()` etc. (§9 design notes: "capabilities as distinct
//! interfaces/traits ... `has_capability?` becomes a compile-time or
//! type-cast check").

pub mod k8s;
pub mod local;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::graph::task::Task;
use crate::runtime::LineSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Lifecycle,
    Secrets,
    Storage,
    Services,
}

/// Options threaded into `run_task` / `setup` — source of `max_parallel`,
/// default timeouts, and the resolved K8sOptions pipeline defaults (§4.4.3).
#[derive(Debug, Clone, Default)]
pub struct TargetOpts {
    pub env: HashMap<String, String>,
    pub default_timeout_secs: u64,
    pub k8s_defaults: Option<crate::target::k8s::options::K8sOptions>,
}

/// Information about a started service sidecar network (§4.4's `services`
/// capability).
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub network_name: String,
}

/// The central abstraction (§4.4). Implementors execute a single task to
/// completion, synchronously from the caller's point of view (the
/// Scheduler is what parallelizes across tasks).
#[async_trait]
pub trait Target: Send + Sync {
    /// `cancel` must propagate to whatever this Target invokes underneath —
    /// kill a local process tree, delete a K8s Job — rather than being
    /// checked only at the Scheduler's dispatch boundary (§4.5
    /// "Cancellation", §5 cancellation semantics). `on_line`, if given, is
    /// called once per line of task output as it becomes available (§4.3
    /// "Output handling", §4.9).
    async fn run_task(
        &self,
        task: &Task,
        opts: &TargetOpts,
        cancel: &CancellationToken,
        on_line: Option<&LineSink>,
    ) -> Result<TaskRunOutcome>;

    /// Declared capabilities, probed by the Scheduler *before* it invokes an
    /// optional operation (§4.4: "Capability probing is the Scheduler's
    /// responsibility").
    fn capabilities(&self) -> &[Capability];

    fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities().contains(&cap)
    }

    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        None
    }
    fn as_secrets(&self) -> Option<&dyn Secrets> {
        None
    }
    fn as_storage(&self) -> Option<&dyn Storage> {
        None
    }
    fn as_services(&self) -> Option<&dyn Services> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct TaskRunOutcome {
    pub exit_code: i32,
    pub output: String,
    pub line_count: usize,
}

#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn setup(&self, opts: &TargetOpts) -> Result<()>;
    async fn teardown(&self) -> Result<()>;
}

#[async_trait]
pub trait Secrets: Send + Sync {
    async fn resolve_secret(&self, name: &str) -> Result<String>;
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn create_volume(&self, name: &str) -> Result<()>;
    fn artifact_path(&self, task_name: &str, artifact_name: &str, workdir: &std::path::Path) -> PathBuf;
    async fn copy_artifact(&self, src: &std::path::Path, dst: &std::path::Path, workdir: &std::path::Path) -> Result<()>;
}

#[async_trait]
pub trait Services: Send + Sync {
    async fn start_services(&self, task_name: &str, services: &[crate::graph::task::Service]) -> Result<NetworkInfo>;
    async fn stop_services(&self, network: &NetworkInfo) -> Result<()>;
}

/// `<workdir>/.sykli/artifacts/<task>/<name>` (§4.4.1, §6.2).
pub fn default_artifact_path(workdir: &std::path::Path, task_name: &str, artifact_name: &str) -> PathBuf {
    workdir
        .join(".sykli")
        .join("artifacts")
        .join(task_name)
        .join(artifact_name)
}

/// Both `src` and `dst`, after normalization, must remain under `workdir`
/// or this is a `path_traversal` error (§4.4.1).
pub fn confine_to_workdir(path: &std::path::Path, workdir: &std::path::Path) -> Result<PathBuf> {
    use crate::error::{ErrorCode, SykliError};

    let workdir = normalize(workdir);
    let candidate = if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&workdir.join(path))
    };

    if candidate.starts_with(&workdir) {
        Ok(candidate)
    } else {
        Err(SykliError::new(
            ErrorCode::PathTraversal,
            format!("path {} escapes workdir {}", candidate.display(), workdir.display()),
        ))
    }
}

/// Lexical normalization (no symlink resolution — the paths in question
/// don't exist yet when we confine a destination).
fn normalize(path: &std::path::Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confine_rejects_parent_traversal() {
        let workdir = PathBuf::from("/work");
        let err = confine_to_workdir(std::path::Path::new("../etc/passwd"), &workdir);
        assert!(err.is_err());
    }

    #[test]
    fn confine_accepts_nested_path() {
        let workdir = PathBuf::from("/work");
        let ok = confine_to_workdir(std::path::Path::new("artifacts/out.txt"), &workdir);
        assert_eq!(ok.unwrap(), PathBuf::from("/work/artifacts/out.txt"));
    }

    #[test]
    fn confine_rejects_absolute_outside_workdir() {
        let workdir = PathBuf::from("/work");
        let err = confine_to_workdir(std::path::Path::new("/etc/passwd"), &workdir);
        assert!(err.is_err());
    }
}
