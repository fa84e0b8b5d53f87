//! Local Target — composes a Runtime (shell or docker) on this machine
//! (§4.4.1).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{ErrorCode, Result, SykliError};
use crate::graph::task::{Service, Task};
use crate::runtime::{resolve_mounts, DockerRuntime, LineSink, RunFailure, RunOpts, Runtime, ShellRuntime};

use super::{
    confine_to_workdir, default_artifact_path, Capability, Lifecycle, NetworkInfo, Secrets,
    Services, Storage, Target, TargetOpts, TaskRunOutcome,
};

const CAPABILITIES: &[Capability] = &[
    Capability::Lifecycle,
    Capability::Secrets,
    Capability::Storage,
    Capability::Services,
];

pub struct LocalTarget {
    workdir: PathBuf,
    shell: ShellRuntime,
    docker: DockerRuntime,
    docker_available: RwLock<bool>,
}

impl LocalTarget {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            shell: ShellRuntime::new(),
            docker: DockerRuntime::new(),
            docker_available: RwLock::new(false),
        }
    }

    fn runtime_for(&self, task: &Task) -> Result<&dyn Runtime> {
        if task.runs_in_container() {
            if *self.docker_available.read() {
                Ok(&self.docker)
            } else {
                Err(SykliError::new(
                    ErrorCode::MissingCapability,
                    "task requires a container runtime but docker is unavailable on this node",
                )
                .with_task(task.name.clone()))
            }
        } else {
            Ok(&self.shell)
        }
    }

    fn task_workdir(&self, task: &Task) -> PathBuf {
        match &task.workdir {
            Some(rel) => self.workdir.join(rel),
            None => self.workdir.clone(),
        }
    }
}

#[async_trait]
impl Target for LocalTarget {
    #[instrument(skip(self, task, opts, cancel, on_line), fields(task = %task.name))]
    async fn run_task(
        &self,
        task: &Task,
        opts: &TargetOpts,
        cancel: &CancellationToken,
        on_line: Option<&LineSink>,
    ) -> Result<TaskRunOutcome> {
        let runtime = self.runtime_for(task)?;
        let command = task
            .command
            .clone()
            .ok_or_else(|| SykliError::new(ErrorCode::Internal, "task has no command").with_task(task.name.clone()))?;

        let mut env = opts.env.clone();
        env.extend(task.env.clone());

        let run_opts = RunOpts {
            workdir: self.task_workdir(task),
            env,
            timeout_ms: Some(task.timeout.unwrap_or(opts.default_timeout_secs) * 1000),
            mounts: resolve_mounts(&task.mounts, &self.workdir),
            network: None,
        };

        match runtime.run(&command, task.container.as_deref(), &run_opts, cancel, on_line).await {
            Ok(output) => Ok(TaskRunOutcome {
                exit_code: output.exit_code,
                output: output.output,
                line_count: output.line_count,
            }),
            Err(RunFailure::Timeout) => Err(SykliError::new(
                ErrorCode::TaskTimeout,
                format!("task exceeded its {}s timeout", task.timeout.unwrap_or(opts.default_timeout_secs)),
            )
            .with_task(task.name.clone())),
            Err(RunFailure::Cancelled) => Err(SykliError::new(
                ErrorCode::Cancelled,
                "task cancelled by run-wide cancel signal",
            )
            .with_task(task.name.clone())),
            Err(RunFailure::Reason(reason)) => {
                Err(SykliError::new(ErrorCode::Internal, reason).with_task(task.name.clone()))
            }
        }
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }
    fn as_secrets(&self) -> Option<&dyn Secrets> {
        Some(self)
    }
    fn as_storage(&self) -> Option<&dyn Storage> {
        Some(self)
    }
    fn as_services(&self) -> Option<&dyn Services> {
        Some(self)
    }
}

#[async_trait]
impl Lifecycle for LocalTarget {
    async fn setup(&self, _opts: &TargetOpts) -> Result<()> {
        let available = self.docker.available().await;
        *self.docker_available.write() = available;
        if !available {
            warn!("docker runtime unavailable; tasks without a container will still run via shell");
        }
        info!(workdir = %self.workdir.display(), "local target ready");
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Secrets for LocalTarget {
    /// Reference secret backends (Vault, cloud secret managers) are
    /// out of scope (§1); the Local Target resolves secrets from the
    /// process environment by name, matching the fallback strategy noted
    /// for K8s in §9 design notes.
    async fn resolve_secret(&self, name: &str) -> Result<String> {
        std::env::var(name).map_err(|_| {
            SykliError::new(ErrorCode::MissingSecrets, format!("secret {name} not found in environment"))
        })
    }
}

#[async_trait]
impl Storage for LocalTarget {
    async fn create_volume(&self, name: &str) -> Result<()> {
        let path = self.workdir.join(".sykli").join("volumes").join(name);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))
    }

    fn artifact_path(&self, task_name: &str, artifact_name: &str, workdir: &Path) -> PathBuf {
        default_artifact_path(workdir, task_name, artifact_name)
    }

    async fn copy_artifact(&self, src: &Path, dst: &Path, workdir: &Path) -> Result<()> {
        let src = confine_to_workdir(src, workdir)?;
        let dst = confine_to_workdir(dst, workdir)?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))?;
        }
        tokio::fs::copy(&src, &dst)
            .await
            .map(|_| ())
            .map_err(|e| SykliError::new(ErrorCode::Internal, format!("copy_artifact failed: {e}")))
    }
}

#[async_trait]
impl Services for LocalTarget {
    async fn start_services(&self, task_name: &str, services: &[Service]) -> Result<NetworkInfo> {
        let network = format!("sykli-{task_name}-{}", crate::util::ulid_gen::next_ulid());
        self.docker
            .create_network(&network)
            .await
            .map_err(|_| SykliError::new(ErrorCode::Internal, "failed to create service network"))?;

        for service in services {
            self.docker
                .start_service(&service.name, &service.image, &network)
                .await
                .map_err(|_| {
                    SykliError::new(
                        ErrorCode::Internal,
                        format!("failed to start service {}", service.name),
                    )
                })?;
        }

        Ok(NetworkInfo {
            network_name: network,
        })
    }

    async fn stop_services(&self, network: &NetworkInfo) -> Result<()> {
        let _ = self.docker.remove_network(&network.network_name).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn opts() -> TargetOpts {
        TargetOpts {
            env: HashMap::new(),
            default_timeout_secs: 60,
            k8s_defaults: None,
        }
    }

    #[tokio::test]
    async fn shell_task_runs_without_docker() {
        let dir = tempfile::tempdir().unwrap();
        let target = LocalTarget::new(dir.path().to_path_buf());
        let task: Task = serde_json::from_value(serde_json::json!({
            "name": "echo",
            "command": "echo hi"
        }))
        .unwrap();

        let outcome = target.run_task(&task, &opts(), &CancellationToken::new(), None).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.output.contains("hi"));
    }

    #[tokio::test]
    async fn container_task_without_docker_is_missing_capability() {
        let dir = tempfile::tempdir().unwrap();
        let target = LocalTarget::new(dir.path().to_path_buf());
        // docker_available defaults false until setup() probes it
        let task: Task = serde_json::from_value(serde_json::json!({
            "name": "build",
            "command": "make",
            "container": "golang:1.22"
        }))
        .unwrap();

        let err = target.run_task(&task, &opts(), &CancellationToken::new(), None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingCapability);
    }

    #[tokio::test]
    async fn cancel_signal_stops_an_in_flight_task() {
        let dir = tempfile::tempdir().unwrap();
        let target = LocalTarget::new(dir.path().to_path_buf());
        let task: Task = serde_json::from_value(serde_json::json!({
            "name": "slow",
            "command": "sleep 30"
        }))
        .unwrap();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            cancel_clone.cancel();
        });

        let start = std::time::Instant::now();
        let err = target.run_task(&task, &opts(), &cancel, None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
        assert!(start.elapsed() < std::time::Duration::from_secs(3));
    }

    #[tokio::test]
    async fn output_lines_reach_the_on_line_sink() {
        let dir = tempfile::tempdir().unwrap();
        let target = LocalTarget::new(dir.path().to_path_buf());
        let task: Task = serde_json::from_value(serde_json::json!({
            "name": "echo",
            "command": "echo one && echo two"
        }))
        .unwrap();

        let lines = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let lines_clone = lines.clone();
        let sink = move |line: &str| lines_clone.lock().push(line.to_string());

        let outcome = target
            .run_task(&task, &opts(), &CancellationToken::new(), Some(&sink))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(*lines.lock(), vec!["one".to_string(), "two".to_string()]);
    }
}
