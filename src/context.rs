//! `RunContext` — per-invocation state threaded through execution (§3).
//!
//! Lifecycle: created once per run, immutable apart from the Target state
//! it owns across setup/run/teardown (§3 "Ownership").

use std::path::PathBuf;
use std::time::Instant;

use ulid::Ulid;

use crate::util::ulid_gen::next_ulid;

/// `{url, sha}` used to seed a K8s Job's git-clone init container (§4.4.2,
/// §6.3) when the run is operating against a specific commit rather than a
/// pre-populated local workdir.
#[derive(Debug, Clone)]
pub struct GitContext {
    pub url: String,
    pub sha: String,
}

/// Per-run knobs: concurrency bound, default timeout, and the base ref for
/// an optional Delta filter (§4.5 step 4, §4.6).
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_parallel: usize,
    pub default_timeout_secs: u64,
    pub delta_base_ref: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_parallel: num_cpus(),
            default_timeout_secs: 300,
            delta_base_ref: None,
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// `{run_id (ULID), workdir, target_state, start_time, git_context?, opts}`
/// (§3). `target_state` isn't carried here as a field — the Scheduler owns
/// the live `Arc<dyn Target>` directly (§3 "Target state is exclusively
/// owned by the Scheduler across setup/run/teardown"), so `RunContext`
/// carries only the data a Target's `setup` needs to produce that state.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Ulid,
    pub workdir: PathBuf,
    pub start_time: Instant,
    pub git_context: Option<GitContext>,
    pub opts: RunOptions,
}

impl RunContext {
    pub fn new(workdir: PathBuf, opts: RunOptions) -> Self {
        Self {
            run_id: next_ulid(),
            workdir,
            start_time: Instant::now(),
            git_context: None,
            opts,
        }
    }

    pub fn with_git_context(mut self, git_context: GitContext) -> Self {
        self.git_context = Some(git_context);
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}
