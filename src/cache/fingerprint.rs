//! Fingerprint algorithm (§4.2).
//!
//! Hash, in order: task `name`/`command`/`container`/sorted `env`; for each
//! `inputs` glob, the sorted matching paths each followed by its content
//! hash; for each `task_inputs` entry, the producer's own fingerprint.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::error::{ErrorCode, Result, SykliError};
use crate::graph::task::Task;
use crate::util::glob;
use crate::util::hash::{hash_file, hash_parts};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintOutcome {
    /// `inputs` is empty or missing (§3, §4.2).
    NotCacheable,
    /// `inputs` non-empty but every glob matched zero files.
    NoInputsFound,
    Value(String),
}

/// Compute the fingerprint for `task`. `upstream_fingerprints` must already
/// contain an entry for every `task_inputs[].from_task` — the Scheduler
/// walks tasks in dependency order so this always holds (§4.5 step 1).
pub async fn compute(
    task: &Task,
    workdir: &Path,
    upstream_fingerprints: &FxHashMap<String, String>,
) -> Result<FingerprintOutcome> {
    if task.inputs.is_empty() {
        return Ok(FingerprintOutcome::NotCacheable);
    }

    let mut parts: Vec<String> = vec![
        task.name.clone(),
        task.command.clone().unwrap_or_default(),
        task.container.clone().unwrap_or_default(),
    ];

    let mut env_pairs: Vec<(&String, &String)> = task.env.iter().collect();
    env_pairs.sort_by(|a, b| a.0.cmp(b.0));
    for (k, v) in env_pairs {
        parts.push(format!("{k}={v}"));
    }

    let mut any_input_matched = false;
    for pattern in &task.inputs {
        let matches = glob::expand(workdir, pattern)
            .map_err(|e| SykliError::new(ErrorCode::Internal, format!("glob expansion failed for {pattern:?}: {e}")))?;
        for rel_path in matches {
            any_input_matched = true;
            let content_hash = hash_file(&workdir.join(&rel_path))
                .await
                .map_err(|e| SykliError::new(ErrorCode::Internal, format!("failed to hash {}: {e}", rel_path.display())))?;
            parts.push(rel_path.to_string_lossy().into_owned());
            parts.push(content_hash);
        }
    }

    if !any_input_matched {
        return Ok(FingerprintOutcome::NoInputsFound);
    }

    for input in &task.task_inputs {
        let upstream = upstream_fingerprints.get(&input.from_task).cloned().unwrap_or_default();
        parts.push(upstream);
    }

    Ok(FingerprintOutcome::Value(hash_parts(parts)))
}
