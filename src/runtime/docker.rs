//! Docker (container engine) runtime (§4.3).
//!
//! Invokes the `docker` binary directly rather than linking a client
//! library — the same shelling-out approach the shell runtime uses,
//! kept consistent so both runtimes share one mental model: build an
//! argv, run it, capture combined output, enforce a timeout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::{LineSink, RunFailure, RunOpts, RunOutput, RunResult, Runtime};

async fn collect_lines<R>(reader: R, on_line: Option<&LineSink>) -> Vec<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut collected = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(sink) = on_line {
            sink(&line);
        }
        collected.push(line);
    }
    collected
}

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    fn build_args(&self, container_name: &str, image: &str, command: &str, opts: &RunOpts) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name.to_string(),
        ];

        for mount in &opts.mounts {
            if mount.is_named_volume {
                args.push("-v".to_string());
                args.push(format!("{}:{}", mount.host_or_volume, mount.container_path));
            } else {
                args.push("-v".to_string());
                args.push(format!("{}:{}", mount.host_or_volume, mount.container_path));
            }
        }

        for (k, v) in &opts.env {
            args.push("-e".to_string());
            args.push(format!("{k}={v}"));
        }

        if let Some(network) = &opts.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        args.push("-w".to_string());
        args.push(opts.workdir.to_string_lossy().into_owned());

        args.push(image.to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    #[instrument(skip(self, opts, cancel, on_line), fields(image))]
    async fn run(
        &self,
        command: &str,
        image: Option<&str>,
        opts: &RunOpts,
        cancel: &CancellationToken,
        on_line: Option<&LineSink>,
    ) -> RunResult {
        let image = match image {
            Some(i) => i,
            None => return Err(RunFailure::Reason("docker runtime requires an image".into())),
        };

        let container_name = format!("sykli-{}", crate::util::ulid_gen::next_ulid());
        let args = self.build_args(&container_name, image, command, opts);

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return Err(RunFailure::Reason(format!("docker spawn failed: {e}"))),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let read_output = async move {
            let mut lines = Vec::new();
            if let Some(s) = stdout {
                lines.extend(collect_lines(s, on_line).await);
            }
            if let Some(s) = stderr {
                lines.extend(collect_lines(s, on_line).await);
            }
            lines
        };

        let run = async {
            let lines = read_output.await;
            let status = child.wait().await;
            (status, lines)
        };

        let timeout = async {
            match opts.timeout_ms {
                Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            (status, lines) = run => {
                let line_count = lines.len();
                let output = lines.join("\n");
                match status {
                    Ok(status) => Ok(RunOutput {
                        exit_code: status.code().unwrap_or(-1),
                        line_count,
                        output,
                    }),
                    Err(e) => Err(RunFailure::Reason(format!("docker wait failed: {e}"))),
                }
            }
            _ = timeout => {
                // `docker run --rm` means killing the container removes it on exit.
                let _ = Command::new(&self.binary).args(["kill", &container_name]).output().await;
                let _ = child.wait().await;
                Err(RunFailure::Timeout)
            }
            _ = cancel.cancelled() => {
                let _ = Command::new(&self.binary).args(["kill", &container_name]).output().await;
                let _ = child.wait().await;
                Err(RunFailure::Cancelled)
            }
        }
    }

    async fn available(&self) -> bool {
        match Command::new(&self.binary).arg("info").output().await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}

impl DockerRuntime {
    pub async fn create_network(&self, name: &str) -> RunResult {
        self.simple(&["network", "create", name]).await
    }

    pub async fn remove_network(&self, name: &str) -> RunResult {
        self.simple(&["network", "rm", name]).await
    }

    pub async fn start_service(&self, name: &str, image: &str, network: &str) -> RunResult {
        self.simple(&[
            "run", "-d", "--rm", "--name", name, "--network", network, image,
        ])
        .await
    }

    pub async fn stop_service(&self, name: &str) -> RunResult {
        self.simple(&["stop", name]).await
    }

    async fn simple(&self, args: &[&str]) -> RunResult {
        let mut child = match Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return Err(RunFailure::Reason(e.to_string())),
        };
        // Bounded generously: these are local control-plane calls
        // (network/service lifecycle), not task execution.
        match tokio::time::timeout(Duration::from_secs(30), child.wait()).await {
            Ok(Ok(status)) => Ok(RunOutput {
                exit_code: status.code().unwrap_or(-1),
                line_count: 0,
                output: String::new(),
            }),
            Ok(Err(e)) => Err(RunFailure::Reason(e.to_string())),
            Err(_) => {
                warn!("docker control command timed out");
                let _ = child.start_kill();
                Err(RunFailure::Timeout)
            }
        }
    }
}
