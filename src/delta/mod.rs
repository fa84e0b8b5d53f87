//! Delta — git-diff-based change impact (§4.6).
//!
//! Shells out to `git` the way the teacher shells out to external tools at
//! its process boundaries (`runtime/`); there is no crate in the teacher's
//! or the wider pack's stack that replaces a working tree diff, so this
//! stays a subprocess call rather than a hand-rolled git-object reader.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use tokio::process::Command;

use crate::error::{ErrorCode, Result, SykliError};
use crate::graph::Graph;
use crate::util::glob;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffectedReason {
    Direct { matched_files: Vec<PathBuf> },
    Dependent { upstream: String },
}

#[derive(Debug, Clone)]
pub struct Affected {
    pub task_name: String,
    pub reason: AffectedReason,
}

/// `get_changed_files(base_ref, workdir)` — union of `git diff --name-only
/// <base>..HEAD` and untracked files respecting `.gitignore` (§4.6 step 1).
pub async fn get_changed_files(base_ref: &str, workdir: &Path) -> Result<BTreeSet<PathBuf>> {
    ensure_git_repo(workdir).await?;
    ensure_known_ref(base_ref, workdir).await?;

    let mut files = BTreeSet::new();

    let range = format!("{base_ref}..HEAD");
    let diff = run_git(workdir, &["diff", "--name-only", &range]).await.map_err(|e| {
        if e.code == ErrorCode::GitFailed {
            SykliError::new(ErrorCode::BadRevision, format!("bad revision range {range:?}: {}", e.message))
        } else {
            e
        }
    })?;
    for line in diff.lines() {
        if !line.is_empty() {
            files.insert(PathBuf::from(line));
        }
    }

    let untracked = run_git(workdir, &["ls-files", "--others", "--exclude-standard"]).await?;
    for line in untracked.lines() {
        if !line.is_empty() {
            files.insert(PathBuf::from(line));
        }
    }

    Ok(files)
}

/// Compute the affected subset of `graph`'s tasks relative to `changed_files`
/// (§4.6 steps 2-4).
pub fn affected_tasks(graph: &Graph, changed_files: &BTreeSet<PathBuf>) -> Vec<Affected> {
    let changed: Vec<&Path> = changed_files.iter().map(PathBuf::as_path).collect();

    let mut direct: FxHashSet<&str> = FxHashSet::default();
    let mut results = Vec::new();

    for task in graph.tasks() {
        if task.inputs.is_empty() {
            continue;
        }
        let matched: Vec<PathBuf> = changed
            .iter()
            .filter(|path| glob::matches_any(&task.inputs, path))
            .map(|p| p.to_path_buf())
            .collect();
        if !matched.is_empty() {
            direct.insert(task.name.as_str());
            results.push(Affected {
                task_name: task.name.clone(),
                reason: AffectedReason::Direct { matched_files: matched },
            });
        }
    }

    // Tasks with no inputs are always affected (§4.6 step 3).
    for task in graph.tasks() {
        if task.inputs.is_empty() && !direct.contains(task.name.as_str()) {
            results.push(Affected {
                task_name: task.name.clone(),
                reason: AffectedReason::Dependent { upstream: task.name.clone() },
            });
        }
    }

    // Fixed point: anything transitively depending on an affected task.
    let mut affected_names: FxHashSet<String> = results.iter().map(|a| a.task_name.clone()).collect();
    let mut changed_this_round = true;
    while changed_this_round {
        changed_this_round = false;
        for task in graph.tasks() {
            if affected_names.contains(&task.name) {
                continue;
            }
            if let Some(upstream) = task.depends_on.iter().find(|d| affected_names.contains(*d)) {
                affected_names.insert(task.name.clone());
                results.push(Affected {
                    task_name: task.name.clone(),
                    reason: AffectedReason::Dependent { upstream: upstream.clone() },
                });
                changed_this_round = true;
            }
        }
    }

    results
}

async fn ensure_git_repo(workdir: &Path) -> Result<()> {
    if !workdir.join(".git").exists() {
        return Err(SykliError::new(
            ErrorCode::NotAGitRepo,
            format!("{} is not a git repository", workdir.display()),
        )
        .with_hint("run from a git checkout or pass --delta-base only inside one"));
    }
    Ok(())
}

async fn ensure_known_ref(base_ref: &str, workdir: &Path) -> Result<()> {
    let output = Command::new("git")
        .args(["rev-parse", "--verify", base_ref])
        .current_dir(workdir)
        .output()
        .await
        .map_err(|e| SykliError::new(ErrorCode::GitFailed, format!("failed to invoke git: {e}")))?;

    if !output.status.success() {
        return Err(SykliError::new(ErrorCode::UnknownRef, format!("unknown ref {base_ref:?}"))
            .with_hint("check the base ref exists locally, e.g. `git fetch origin main`"));
    }
    Ok(())
}

async fn run_git(workdir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .await
        .map_err(|e| SykliError::new(ErrorCode::GitFailed, format!("failed to invoke git: {e}")))?;

    if !output.status.success() {
        return Err(SykliError::new(
            ErrorCode::GitFailed,
            format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            ),
        )
        .with_exit_code(output.status.code().unwrap_or(-1)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
