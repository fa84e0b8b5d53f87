//! Scheduler / Executor (§4.5) — topological wavefront dispatch bounded by
//! `max_parallel`, with per-task cache check, condition gating, service
//! sidecars, artifact staging, run + retry, cache store, and a JSONL
//! occurrence log fed from the same event bus (§4.9).

pub mod retry;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cache::{Cache, CacheCheck};
use crate::condition::ConditionContext;
use crate::context::RunContext;
use crate::error::{ErrorCode, Result, SykliError};
use crate::events::{Event, EventBus, EventType};
use crate::graph::task::OnFailure;
use crate::graph::{blocks, critical_path, Graph, Task};
use crate::target::{Target, TargetOpts};

use retry::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Cached,
    Skipped,
    Succeeded,
    Failed,
    Blocked,
    Cancelled,
}

impl TaskStatus {
    /// A dependent may start once its dependency reaches one of these.
    fn satisfies_dependents(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Cached | TaskStatus::Skipped)
    }

    fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_name: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<SykliError>,
    pub cache_key: Option<String>,
}

impl TaskResult {
    fn new(task_name: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_name: task_name.into(),
            status,
            attempts: 0,
            duration_ms: 0,
            error: None,
            cache_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: ulid::Ulid,
    pub ok: bool,
    pub tasks: Vec<TaskResult>,
    pub critical_path: Vec<String>,
}

/// Topological wavefront executor (§4.5). Owns the cache, holds the run's
/// Target, and publishes lifecycle events.
pub struct Scheduler {
    target: Arc<dyn Target>,
    cache: Cache,
    events: Arc<EventBus>,
    retry_config: RetryConfig,
}

fn retry_limit(task: &Task) -> u32 {
    match task.on_failure {
        OnFailure::Retry(n) => n,
        _ => task.retry,
    }
}

impl Scheduler {
    pub fn new(target: Arc<dyn Target>, events: Arc<EventBus>, workdir: &Path) -> Self {
        Self {
            target,
            cache: Cache::new(workdir),
            events,
            retry_config: RetryConfig::default(),
        }
    }

    /// §4.5 pre-flight: every `secrets` name across the graph must resolve
    /// on the chosen Target before any task runs.
    async fn validate_secrets(&self, graph: &Graph) -> Result<()> {
        let Some(secrets) = self.target.as_secrets() else {
            if graph.tasks().iter().any(|t| !t.secrets.is_empty()) {
                return Err(SykliError::new(
                    ErrorCode::MissingCapability,
                    "task declares secrets but the target does not support secret resolution",
                ));
            }
            return Ok(());
        };

        let mut required: FxHashSet<&str> = FxHashSet::default();
        for task in graph.tasks() {
            required.extend(task.secrets.iter().map(String::as_str));
        }
        for name in required {
            secrets
                .resolve_secret(name)
                .await
                .map_err(|e| e.with_hint(format!("declare secret {name} before starting the run")))?;
        }
        Ok(())
    }

    async fn condition_context(workdir: &Path) -> ConditionContext {
        let branch = run_git_line(workdir, &["rev-parse", "--abbrev-ref", "HEAD"]).await;
        let tag = run_git_line(workdir, &["describe", "--tags", "--exact-match"]).await;
        ConditionContext {
            branch,
            tag,
            env: std::env::vars().collect(),
        }
    }

    /// §4.5: pre-flight secrets + `setup`, dispatch, `teardown` on every
    /// exit path. `affected` restricts the run to a delta-filtered subset
    /// (§4.5 step 4, §4.6) — `None` runs everything.
    #[instrument(skip_all, fields(run_id = %ctx.run_id))]
    pub async fn run(
        &self,
        graph: &Graph,
        ctx: &RunContext,
        opts: &TargetOpts,
        cancel: CancellationToken,
        affected: Option<&FxHashSet<String>>,
    ) -> Result<RunResult> {
        self.validate_secrets(graph).await?;

        if let Some(lifecycle) = self.target.as_lifecycle() {
            lifecycle.setup(opts).await?;
        }

        // One JSONL occurrence log per run (`.sykli/runs/<run_id>/occurrence.json`),
        // fed from the same event bus the dispatch loop publishes to below.
        let trace_handle = {
            let events = self.events.clone();
            let run_id = ctx.run_id;
            let workdir = ctx.workdir.clone();
            tokio::spawn(async move { crate::events::trace::export_run_trace(&events, run_id, &workdir).await })
        };

        self.events.publish(Event::new(
            "local",
            ctx.run_id,
            EventType::RunStarted,
            serde_json::json!({ "task_count": graph.len() }),
        ));

        let outcome = self.execute(graph, ctx, opts, &cancel, affected).await;

        if let Some(lifecycle) = self.target.as_lifecycle() {
            if let Err(e) = lifecycle.teardown().await {
                warn!(error = %e.message, "target teardown failed");
            }
        }

        let run_result = match outcome {
            Ok(r) => r,
            Err(e) => {
                Self::stop_trace_export(trace_handle).await;
                return Err(e);
            }
        };

        self.events.publish(Event::new(
            "local",
            ctx.run_id,
            EventType::RunCompleted,
            serde_json::json!({ "ok": run_result.ok }),
        ));
        Self::stop_trace_export(trace_handle).await;
        Ok(run_result)
    }

    /// The trace exporter drains the bus as events are published, not at
    /// shutdown, so a short grace period here is enough for the last
    /// (`RunCompleted`) line to land before the writer task is cut off.
    async fn stop_trace_export(handle: tokio::task::JoinHandle<()>) {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.abort();
    }

    async fn execute(
        &self,
        graph: &Graph,
        ctx: &RunContext,
        opts: &TargetOpts,
        cancel: &CancellationToken,
        affected: Option<&FxHashSet<String>>,
    ) -> Result<RunResult> {
        let condition_ctx = Self::condition_context(&ctx.workdir).await;
        let max_parallel = ctx.opts.max_parallel.max(1);

        let mut status: FxHashMap<String, TaskStatus> = graph
            .tasks()
            .iter()
            .map(|t| {
                let initial = match affected {
                    Some(set) if !set.contains(&t.name) => TaskStatus::Skipped,
                    _ => TaskStatus::Pending,
                };
                (t.name.clone(), initial)
            })
            .collect();

        let mut results: FxHashMap<String, TaskResult> = FxHashMap::default();
        let mut fingerprints: FxHashMap<String, String> = FxHashMap::default();
        let mut blocked_cause: FxHashMap<String, String> = FxHashMap::default();
        let mut stop_requested = false;

        type Pending<'a> = std::pin::Pin<Box<dyn std::future::Future<Output = (String, TaskResult)> + 'a>>;
        let mut in_flight: FuturesUnordered<Pending<'_>> = FuturesUnordered::new();

        loop {
            if cancel.is_cancelled() {
                stop_requested = true;
            }

            if stop_requested {
                // Tasks downstream of a failure are already `Blocked` (set
                // below, the moment the failure is observed); anything
                // still `Pending` here is an unrelated sibling that simply
                // never got to start.
                for t in graph.tasks() {
                    if status.get(&t.name).copied() == Some(TaskStatus::Pending) {
                        status.insert(t.name.clone(), TaskStatus::Cancelled);
                    }
                }
            } else {
                let capacity = max_parallel.saturating_sub(in_flight.len());
                if capacity > 0 {
                    let ready: Vec<String> = graph
                        .tasks()
                        .iter()
                        .filter(|t| status.get(&t.name).copied() == Some(TaskStatus::Pending))
                        .filter(|t| {
                            t.depends_on.iter().all(|d| {
                                status.get(d).copied().map(TaskStatus::satisfies_dependents).unwrap_or(false)
                            })
                        })
                        .map(|t| t.name.clone())
                        .take(capacity)
                        .collect();

                    for name in ready {
                        status.insert(name.clone(), TaskStatus::Running);
                        self.events.publish(Event::new(
                            "local",
                            ctx.run_id,
                            EventType::TaskStarted,
                            serde_json::json!({ "task": name }),
                        ));
                        let task = graph.get(&name).expect("dispatched task exists in graph").clone();
                        let fp_snapshot = fingerprints.clone();
                        let fut = self.run_one(task, ctx, opts, condition_ctx.clone(), fp_snapshot, cancel.clone());
                        in_flight.push(Box::pin(async move {
                            let result = fut.await;
                            (name, result)
                        }));
                    }
                }
            }

            let Some((name, task_result)) = in_flight.next().await else {
                break;
            };

            if task_result.status.satisfies_dependents() {
                if let Some(key) = &task_result.cache_key {
                    fingerprints.insert(name.clone(), key.clone());
                }
            }

            if task_result.status == TaskStatus::Failed {
                let task = graph.get(&name).expect("completed task exists in graph");
                let downstream = blocks(graph, &name);
                for d in &downstream {
                    if !status.get(d).copied().unwrap_or(TaskStatus::Pending).is_terminal() {
                        status.insert(d.clone(), TaskStatus::Blocked);
                        blocked_cause.entry(d.clone()).or_insert_with(|| name.clone());
                    }
                }
                if matches!(task.on_failure, OnFailure::Stop) {
                    stop_requested = true;
                }
            }

            self.events.publish(Event::new(
                "local",
                ctx.run_id,
                EventType::TaskCompleted,
                serde_json::json!({ "task": name, "status": format!("{:?}", task_result.status) }),
            ));

            status.insert(name.clone(), task_result.status);
            results.insert(name, task_result);
        }

        let mut tasks: Vec<TaskResult> = graph
            .tasks()
            .iter()
            .map(|t| {
                results.remove(&t.name).unwrap_or_else(|| {
                    let final_status = status.get(&t.name).copied().unwrap_or(TaskStatus::Pending);
                    let mut result = TaskResult::new(t.name.clone(), final_status);
                    if final_status == TaskStatus::Blocked {
                        let cause = blocked_cause.get(&t.name).cloned().unwrap_or_else(|| "a dependency".to_string());
                        result.error = Some(
                            SykliError::new(
                                ErrorCode::DependencyFailed,
                                format!("blocked: dependency {cause} failed"),
                            )
                            .with_task(t.name.clone()),
                        );
                    }
                    result
                })
            })
            .collect();
        tasks.sort_by(|a, b| a.task_name.cmp(&b.task_name));

        let ok = tasks.iter().all(|t| t.status.satisfies_dependents());

        let duration_map: FxHashMap<String, u64> =
            tasks.iter().map(|t| (t.task_name.clone(), t.duration_ms)).collect();
        let critical_path = critical_path(graph, &duration_map);

        Ok(RunResult { run_id: ctx.run_id, ok, tasks, critical_path })
    }

    /// The per-task worker body (§4.5 steps 1-8). `cancel` is threaded into
    /// `Target::run_task` so a run-wide cancel reaches an in-flight
    /// invocation directly, not just the dispatch loop between tasks (§4.5
    /// "Cancellation").
    async fn run_one(
        &self,
        task: Task,
        ctx: &RunContext,
        opts: &TargetOpts,
        condition_ctx: ConditionContext,
        upstream_fingerprints: FxHashMap<String, String>,
        cancel: CancellationToken,
    ) -> TaskResult {
        let start = Instant::now();

        if let Some(condition) = &task.condition {
            if !condition.eval(&condition_ctx) {
                return TaskResult::new(task.name.clone(), TaskStatus::Skipped);
            }
        }

        let mut cache_key: Option<String> = None;
        if task.is_cacheable() {
            match self.cache.check(&task, &ctx.workdir, &upstream_fingerprints).await {
                Ok(CacheCheck::Hit { key }) => match self.cache.restore(&key, &task, &ctx.workdir).await {
                    Ok(()) => {
                        self.events.publish(Event::new(
                            "local",
                            ctx.run_id,
                            EventType::CacheHit,
                            serde_json::json!({ "task": task.name, "fingerprint": key }),
                        ));
                        let mut result = TaskResult::new(task.name.clone(), TaskStatus::Cached);
                        result.cache_key = Some(key);
                        result.duration_ms = start.elapsed().as_millis() as u64;
                        return result;
                    }
                    Err(e) => {
                        warn!(task = %task.name, error = %e.message, "cache restore failed; running task instead");
                        cache_key = Some(key);
                    }
                },
                Ok(CacheCheck::Miss { key, reason }) => {
                    cache_key = key;
                    self.events.publish(Event::new(
                        "local",
                        ctx.run_id,
                        EventType::CacheMiss,
                        serde_json::json!({ "task": task.name, "reason": format!("{reason:?}") }),
                    ));
                }
                Err(e) => {
                    warn!(task = %task.name, error = %e.message, "fingerprint computation failed; treating as cache miss");
                }
            }
        }

        let mut network = None;
        if !task.services.is_empty() {
            match self.target.as_services() {
                Some(services) => match services.start_services(&task.name, &task.services).await {
                    Ok(n) => network = Some(n),
                    Err(e) => return self.failed_result(task.name.clone(), e, 0, start),
                },
                None => {
                    let e = SykliError::new(
                        ErrorCode::MissingCapability,
                        "task declares services but the target does not support sidecars",
                    )
                    .with_task(task.name.clone());
                    return self.failed_result(task.name.clone(), e, 0, start);
                }
            }
        }

        if !task.task_inputs.is_empty() {
            match self.target.as_storage() {
                Some(storage) => {
                    for input in &task.task_inputs {
                        let src = storage.artifact_path(&input.from_task, &input.output, &ctx.workdir);
                        let dst = ctx.workdir.join(&input.dest);
                        if let Err(e) = storage.copy_artifact(&src, &dst, &ctx.workdir).await {
                            self.stop_services_best_effort(network.as_ref()).await;
                            let e = e
                                .with_task(task.name.clone())
                                .with_hint(format!("check that {} produced output {}", input.from_task, input.output));
                            return self.failed_result(task.name.clone(), e, 0, start);
                        }
                    }
                }
                None => {
                    self.stop_services_best_effort(network.as_ref()).await;
                    let e = SykliError::new(
                        ErrorCode::MissingCapability,
                        "task declares task_inputs but the target does not support artifact staging",
                    )
                    .with_task(task.name.clone());
                    return self.failed_result(task.name.clone(), e, 0, start);
                }
            }
        }

        let max_attempts = 1 + retry_limit(&task);
        let mut attempt = 0u32;
        let mut last_error = None;
        let mut outcome = None;
        let mut cancelled = false;

        let run_id = ctx.run_id;
        let task_name = task.name.clone();
        let events = self.events.clone();
        let on_line = move |line: &str| {
            events.publish(Event::new(
                "local",
                run_id,
                EventType::TaskOutput,
                serde_json::json!({ "task": task_name, "line": line }),
            ));
        };

        while attempt < max_attempts {
            attempt += 1;
            match self.target.run_task(&task, opts, &cancel, Some(&on_line)).await {
                Ok(o) => {
                    outcome = Some(o);
                    break;
                }
                Err(e) if e.code == ErrorCode::Cancelled => {
                    last_error = Some(e);
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_attempts && !cancel.is_cancelled() {
                        let delay = self.retry_config.delay_for(attempt - 1);
                        info!(task = %task.name, attempt, delay_ms = delay.as_millis() as u64, "retrying after failure");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.stop_services_best_effort(network.as_ref()).await;

        let duration_ms = start.elapsed().as_millis() as u64;

        if cancelled {
            let mut result = TaskResult::new(task.name.clone(), TaskStatus::Cancelled);
            result.attempts = attempt;
            result.duration_ms = duration_ms;
            return result;
        }

        match outcome {
            Some(o) if o.exit_code == 0 => {
                if let Some(key) = &cache_key {
                    if let Err(e) = self.cache.store(key, &task, duration_ms, &ctx.workdir).await {
                        warn!(task = %task.name, error = %e.message, "cache store failed");
                    }
                }
                let mut result = TaskResult::new(task.name.clone(), TaskStatus::Succeeded);
                result.attempts = attempt;
                result.duration_ms = duration_ms;
                result.cache_key = cache_key;
                result
            }
            Some(o) => {
                let e = SykliError::new(ErrorCode::TaskFailed, format!("task exited with status {}", o.exit_code))
                    .with_task(task.name.clone())
                    .with_exit_code(o.exit_code)
                    .with_output(o.output);
                let mut result = self.failed_result(task.name.clone(), e, attempt, start);
                result.cache_key = cache_key;
                result
            }
            None => {
                let e = last_error.expect("loop always sets last_error or outcome before exiting");
                let mut result = self.failed_result(task.name.clone(), e, attempt, start);
                result.cache_key = cache_key;
                result
            }
        }
    }

    fn failed_result(&self, task_name: String, error: SykliError, attempts: u32, start: Instant) -> TaskResult {
        let mut result = TaskResult::new(task_name, TaskStatus::Failed);
        result.attempts = attempts;
        result.duration_ms = start.elapsed().as_millis() as u64;
        result.error = Some(error);
        result
    }

    async fn stop_services_best_effort(&self, network: Option<&crate::target::NetworkInfo>) {
        if let (Some(network), Some(services)) = (network, self.target.as_services()) {
            let _ = services.stop_services(network).await;
        }
    }
}

async fn run_git_line(workdir: &Path, args: &[&str]) -> Option<String> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::events::Scope;
    use crate::target::{Capability, TaskRunOutcome};

    struct ScriptedTarget {
        fail: FxHashSet<String>,
        attempts: Mutex<FxHashMap<String, u32>>,
        calls: AtomicU32,
    }

    impl ScriptedTarget {
        fn new(fail: &[&str]) -> Self {
            Self {
                fail: fail.iter().map(|s| s.to_string()).collect(),
                attempts: Mutex::new(FxHashMap::default()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Target for ScriptedTarget {
        async fn run_task(
            &self,
            task: &Task,
            _opts: &TargetOpts,
            _cancel: &CancellationToken,
            on_line: Option<&crate::runtime::LineSink>,
        ) -> Result<TaskRunOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(sink) = on_line {
                sink(&format!("running {}", task.name));
            }
            let mut attempts = self.attempts.lock().unwrap();
            *attempts.entry(task.name.clone()).or_insert(0) += 1;

            let exit_code = if self.fail.contains(&task.name) { 1 } else { 0 };
            Ok(TaskRunOutcome { exit_code, output: format!("ran {}", task.name), line_count: 1 })
        }

        fn capabilities(&self) -> &[Capability] {
            &[]
        }
    }

    struct SlowTarget {
        delay: std::time::Duration,
    }

    #[async_trait]
    impl Target for SlowTarget {
        async fn run_task(
            &self,
            task: &Task,
            _opts: &TargetOpts,
            cancel: &CancellationToken,
            _on_line: Option<&crate::runtime::LineSink>,
        ) -> Result<TaskRunOutcome> {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {
                    Ok(TaskRunOutcome { exit_code: 0, output: "done".to_string(), line_count: 1 })
                }
                _ = cancel.cancelled() => {
                    Err(SykliError::new(ErrorCode::Cancelled, "cancelled").with_task(task.name.clone()))
                }
            }
        }

        fn capabilities(&self) -> &[Capability] {
            &[]
        }
    }

    fn task(name: &str, deps: &[&str]) -> serde_json::Value {
        serde_json::json!({ "name": name, "command": "noop", "depends_on": deps })
    }

    fn graph(tasks: Vec<serde_json::Value>) -> Graph {
        let tasks: Vec<Task> = tasks.into_iter().map(|v| serde_json::from_value(v).unwrap()).collect();
        Graph::new(tasks)
    }

    fn run_ctx(workdir: &Path) -> RunContext {
        let mut ctx = RunContext::new(workdir.to_path_buf(), crate::context::RunOptions::default());
        ctx.opts.max_parallel = 4;
        ctx
    }

    #[tokio::test]
    async fn independent_tasks_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let g = graph(vec![task("a", &[]), task("b", &[])]);
        let target = Arc::new(ScriptedTarget::new(&[]));
        let scheduler = Scheduler::new(target, Arc::new(EventBus::new()), dir.path());
        let ctx = run_ctx(dir.path());
        let opts = TargetOpts::default();

        let result = scheduler.run(&g, &ctx, &opts, CancellationToken::new(), None).await.unwrap();
        assert!(result.ok);
        assert_eq!(result.tasks.len(), 2);
        assert!(result.tasks.iter().all(|t| t.status == TaskStatus::Succeeded));
    }

    #[tokio::test]
    async fn failed_task_blocks_dependents_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let g = graph(vec![task("build", &[]), task("deploy", &["build"])]);
        let target = Arc::new(ScriptedTarget::new(&["build"]));
        let scheduler = Scheduler::new(target, Arc::new(EventBus::new()), dir.path());
        let ctx = run_ctx(dir.path());
        let opts = TargetOpts::default();

        let result = scheduler.run(&g, &ctx, &opts, CancellationToken::new(), None).await.unwrap();
        assert!(!result.ok);
        let build = result.tasks.iter().find(|t| t.task_name == "build").unwrap();
        let deploy = result.tasks.iter().find(|t| t.task_name == "deploy").unwrap();
        assert_eq!(build.status, TaskStatus::Failed);
        assert_eq!(deploy.status, TaskStatus::Blocked);
        assert_eq!(deploy.error.as_ref().unwrap().code, ErrorCode::DependencyFailed);
    }

    #[tokio::test]
    async fn delta_filter_skips_unaffected_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let g = graph(vec![task("a", &[]), task("b", &[])]);
        let target = Arc::new(ScriptedTarget::new(&[]));
        let scheduler = Scheduler::new(target, Arc::new(EventBus::new()), dir.path());
        let ctx = run_ctx(dir.path());
        let opts = TargetOpts::default();

        let affected: FxHashSet<String> = ["a".to_string()].into_iter().collect();
        let result = scheduler.run(&g, &ctx, &opts, CancellationToken::new(), Some(&affected)).await.unwrap();
        let a = result.tasks.iter().find(|t| t.task_name == "a").unwrap();
        let b = result.tasks.iter().find(|t| t.task_name == "b").unwrap();
        assert_eq!(a.status, TaskStatus::Succeeded);
        assert_eq!(b.status, TaskStatus::Skipped);
        assert!(result.ok);
    }

    #[tokio::test]
    async fn retry_count_is_honored_before_failing() {
        let dir = tempfile::tempdir().unwrap();
        let g = graph(vec![serde_json::json!({ "name": "flaky", "command": "noop", "retry": 2 })]);
        let target = Arc::new(ScriptedTarget::new(&["flaky"]));
        let scheduler = Scheduler::new(target.clone(), Arc::new(EventBus::new()), dir.path());
        let ctx = run_ctx(dir.path());
        let opts = TargetOpts::default();

        let result = scheduler.run(&g, &ctx, &opts, CancellationToken::new(), None).await.unwrap();
        let flaky = result.tasks.iter().find(|t| t.task_name == "flaky").unwrap();
        assert_eq!(flaky.attempts, 3);
        assert_eq!(target.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancel_signal_reaches_an_in_flight_task() {
        let dir = tempfile::tempdir().unwrap();
        let g = graph(vec![task("slow", &[])]);
        let target = Arc::new(SlowTarget { delay: std::time::Duration::from_secs(30) });
        let scheduler = Scheduler::new(target, Arc::new(EventBus::new()), dir.path());
        let ctx = run_ctx(dir.path());
        let opts = TargetOpts::default();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            cancel_clone.cancel();
        });

        let start = std::time::Instant::now();
        let result = scheduler.run(&g, &ctx, &opts, cancel, None).await.unwrap();
        assert!(!result.ok);
        let slow = result.tasks.iter().find(|t| t.task_name == "slow").unwrap();
        assert_eq!(slow.status, TaskStatus::Cancelled);
        assert!(start.elapsed() < std::time::Duration::from_secs(3));
    }

    #[tokio::test]
    async fn task_output_is_published_to_the_event_bus() {
        let dir = tempfile::tempdir().unwrap();
        let g = graph(vec![task("build", &[])]);
        let target = Arc::new(ScriptedTarget::new(&[]));
        let events = Arc::new(EventBus::new());
        let mut rx = events.subscribe(Scope::All);
        let scheduler = Scheduler::new(target, events, dir.path());
        let ctx = run_ctx(dir.path());
        let opts = TargetOpts::default();

        scheduler.run(&g, &ctx, &opts, CancellationToken::new(), None).await.unwrap();

        let mut saw_output = false;
        while let Ok(event) = rx.try_recv() {
            if event.event_type == EventType::TaskOutput {
                assert_eq!(event.data["task"], "build");
                assert_eq!(event.data["line"], "running build");
                saw_output = true;
            }
        }
        assert!(saw_output, "expected a TaskOutput event for task `build`");
    }

    #[tokio::test]
    async fn run_writes_an_occurrence_log() {
        let dir = tempfile::tempdir().unwrap();
        let g = graph(vec![task("build", &[])]);
        let target = Arc::new(ScriptedTarget::new(&[]));
        let scheduler = Scheduler::new(target, Arc::new(EventBus::new()), dir.path());
        let ctx = run_ctx(dir.path());
        let opts = TargetOpts::default();

        let result = scheduler.run(&g, &ctx, &opts, CancellationToken::new(), None).await.unwrap();

        let trace_path = dir.path().join(".sykli").join("runs").join(result.run_id.to_string()).join("occurrence.json");
        let contents = tokio::fs::read_to_string(&trace_path).await.unwrap();
        assert!(contents.lines().count() >= 2, "expected at least RunStarted and RunCompleted");
        assert!(contents.contains("run_started"));
        assert!(contents.contains("run_completed"));
    }
}
