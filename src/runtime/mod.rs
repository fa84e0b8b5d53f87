//! Process execution: shell or container (§2 #4, §4.3).
//!
//! A `Runtime` turns a command into a running process and enforces a
//! timeout by killing the process tree — it has no knowledge of the task
//! graph, caching, or targets; the `Local` Target composes with it
//! (§4.4.1).

mod docker;
mod shell;

pub use docker::DockerRuntime;
pub use shell::ShellRuntime;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::graph::task::Mount;

/// How a mount resolves against the host: `directory` binds a host path,
/// `cache` attaches a named volume keyed by `resource` (§3, §4.3).
#[derive(Debug, Clone)]
pub struct ResolvedMount {
    pub host_or_volume: String,
    pub container_path: String,
    pub is_named_volume: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    pub workdir: PathBuf,
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub mounts: Vec<ResolvedMount>,
    /// Shared service network name, if any (§4.3, §4.4's `services`).
    pub network: Option<String>,
}

/// A per-line output callback, invoked as each line of combined stdout/stderr
/// becomes available (§4.3 "Output handling", §4.9). Passed as a plain
/// argument rather than a `RunOpts` field so `RunOpts` can stay
/// `Debug`/`Clone`-derived.
pub type LineSink = dyn Fn(&str) + Send + Sync;

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub line_count: usize,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    Timeout,
    /// A run-wide cancel reached this process before it finished on its own
    /// (§4.5 "Cancellation"). The process tree is confirmed dead before this
    /// is returned, same as `Timeout`.
    Cancelled,
    Reason(String),
}

pub type RunResult = std::result::Result<RunOutput, RunFailure>;

/// Common contract for shell and container execution (§4.3).
#[async_trait]
pub trait Runtime: Send + Sync {
    /// `cancel` is observed cooperatively: firing it while `run` is in
    /// flight kills the process tree and returns `RunFailure::Cancelled`
    /// instead of waiting for the command to finish or time out (§4.5,
    /// §5 cancellation semantics — "observable ... within one timeout
    /// granularity"). `on_line`, if given, is called once per line of
    /// output as it is read from the child process.
    async fn run(
        &self,
        command: &str,
        image: Option<&str>,
        opts: &RunOpts,
        cancel: &CancellationToken,
        on_line: Option<&LineSink>,
    ) -> RunResult;

    /// Is the runtime's backing engine reachable (docker daemon, shell
    /// available)? Used by `Target::setup` fallback (§4.4.1).
    async fn available(&self) -> bool {
        true
    }
}

/// Reify mount specs into the runtime-level shape, resolving `src:<path>`
/// host references to an absolute path under `workdir` (§4.4.1).
pub fn resolve_mounts(mounts: &[Mount], workdir: &std::path::Path) -> Vec<ResolvedMount> {
    mounts
        .iter()
        .map(|m| match m.kind {
            crate::graph::task::MountType::Directory => {
                let host_path = if let Some(rel) = m.resource.strip_prefix("src:") {
                    workdir.join(rel).to_string_lossy().into_owned()
                } else {
                    m.resource.clone()
                };
                ResolvedMount {
                    host_or_volume: host_path,
                    container_path: m.path.clone(),
                    is_named_volume: false,
                }
            }
            crate::graph::task::MountType::Cache => ResolvedMount {
                host_or_volume: m.resource.clone(),
                container_path: m.path.clone(),
                is_named_volume: true,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::task::MountType;

    #[test]
    fn directory_mount_resolves_src_prefix_to_workdir() {
        let mounts = vec![Mount {
            kind: MountType::Directory,
            resource: "src:cache/npm".into(),
            path: "/app/node_modules".into(),
        }];
        let resolved = resolve_mounts(&mounts, std::path::Path::new("/work"));
        assert_eq!(resolved[0].host_or_volume, "/work/cache/npm");
        assert!(!resolved[0].is_named_volume);
    }

    #[test]
    fn cache_mount_is_named_volume_keyed_by_resource() {
        let mounts = vec![Mount {
            kind: MountType::Cache,
            resource: "npm-cache".into(),
            path: "/app/.npm".into(),
        }];
        let resolved = resolve_mounts(&mounts, std::path::Path::new("/work"));
        assert!(resolved[0].is_named_volume);
        assert_eq!(resolved[0].host_or_volume, "npm-cache");
    }
}
