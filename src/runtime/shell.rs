//! Shell runtime (§4.3).
//!
//! Spawns the command in a fresh process group so that a timeout can kill
//! the whole tree, not just the shell itself — a child spawning
//! grandchildren (e.g. `make`) must not outlive its task's deadline.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::{LineSink, RunFailure, RunOpts, RunOutput, RunResult, Runtime};

/// Reads `reader` line by line, forwarding each line to `on_line` as it
/// arrives and returning the accumulated lines once the stream closes.
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

const KILL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct ShellRuntime;

impl ShellRuntime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runtime for ShellRuntime {
    #[instrument(skip(self, opts, cancel, on_line), fields(workdir = %opts.workdir.display()))]
    async fn run(
        &self,
        command: &str,
        _image: Option<&str>,
        opts: &RunOpts,
        cancel: &CancellationToken,
        on_line: Option<&LineSink>,
    ) -> RunResult {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&opts.workdir)
            .envs(&opts.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return Err(RunFailure::Reason(format!("spawn failed: {e}"))),
        };

        let pid = child.id();

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let read_all = async {
            let (mut out_lines, err_lines) = tokio::join!(
                collect_lines(stdout, on_line),
                collect_lines(stderr, on_line),
            );
            out_lines.extend(err_lines);
            out_lines
        };

        let run = async {
            let lines = read_all.await;
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
                    Err(e) => Err(RunFailure::Reason(format!("wait failed: {e}"))),
                }
            }
            _ = timeout => {
                kill_process_tree(pid, &mut child).await;
                Err(RunFailure::Timeout)
            }
            _ = cancel.cancelled() => {
                kill_process_tree(pid, &mut child).await;
                Err(RunFailure::Cancelled)
            }
        }
    }
}

/// SIGTERM the process group, wait a short grace period, SIGKILL if still
/// alive, then confirm dead via `wait()` — the process MUST NOT continue
/// after timeout returns (§4.3).
async fn kill_process_tree(pid: Option<u32>, child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
        tokio::time::sleep(KILL_GRACE).await;
        if child.try_wait().ok().flatten().is_none() {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    if let Err(e) = child.wait().await {
        warn!(error = %e, "failed to reap killed process tree");
    }
}
