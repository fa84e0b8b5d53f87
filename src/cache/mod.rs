//! Content-addressed cache (§4.2, §6.2).
//!
//! Layout under `<workdir>/.sykli/cache/`:
//! `entries/<fingerprint>.json` (a `CacheEntry`), `blobs/<content-hash>`
//! (the actual output bytes). Stores are atomic via temp-file + rename; a
//! per-fingerprint lock (grounded on the teacher's per-key locking in
//! `store/` for concurrent writers) keeps concurrent `store` calls for the
//! same key from racing.

pub mod fingerprint;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::error::{ErrorCode, Result, SykliError};
use crate::graph::task::Task;

pub use fingerprint::FingerprintOutcome;

/// Changed inputs aren't a distinct reason: they just produce a fingerprint
/// that collapses to `NoEntry`, the same as a first-ever run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NotCacheable,
    NoInputsFound,
    NoEntry,
}

#[derive(Debug, Clone)]
pub enum CacheCheck {
    Hit { key: String },
    Miss { key: Option<String>, reason: MissReason },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub task_name: String,
    /// output name -> content hash of the stored blob.
    pub stored_outputs: HashMap<String, String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

pub struct Cache {
    root: PathBuf,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl Cache {
    pub fn new(workdir: &Path) -> Self {
        Self {
            root: workdir.join(".sykli").join("cache"),
            locks: DashMap::new(),
        }
    }

    fn entries_dir(&self) -> PathBuf {
        self.root.join("entries")
    }

    fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.entries_dir().join(format!("{fingerprint}.json"))
    }

    fn lock_for(&self, fingerprint: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// `check(task, workdir) -> {hit, key} | {miss, key, reason}` (§4.2).
    pub async fn check(
        &self,
        task: &Task,
        workdir: &Path,
        upstream_fingerprints: &FxHashMap<String, String>,
    ) -> Result<CacheCheck> {
        let outcome = fingerprint::compute(task, workdir, upstream_fingerprints).await?;
        let key = match outcome {
            FingerprintOutcome::NotCacheable => {
                return Ok(CacheCheck::Miss { key: None, reason: MissReason::NotCacheable })
            }
            FingerprintOutcome::NoInputsFound => {
                return Ok(CacheCheck::Miss { key: None, reason: MissReason::NoInputsFound })
            }
            FingerprintOutcome::Value(key) => key,
        };

        match self.read_entry(&key).await {
            Ok(Some(_)) => Ok(CacheCheck::Hit { key }),
            Ok(None) => Ok(CacheCheck::Miss { key: Some(key), reason: MissReason::NoEntry }),
            Err(e) => {
                warn!(fingerprint = %key, error = %e, "cache entry read failed; treating as miss");
                Ok(CacheCheck::Miss { key: Some(key), reason: MissReason::NoEntry })
            }
        }
    }

    async fn read_entry(&self, fingerprint: &str) -> std::io::Result<Option<CacheEntry>> {
        let path = self.entry_path(fingerprint);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `restore(key, workdir) -> ok | error` (§4.2): copy each stored blob to
    /// its declared output path. Restore failures degrade to a cache miss
    /// rather than failing the run (§7 "propagation policy").
    pub async fn restore(&self, key: &str, task: &Task, workdir: &Path) -> Result<()> {
        let entry = self
            .read_entry(key)
            .await
            .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))?
            .ok_or_else(|| SykliError::new(ErrorCode::Internal, format!("no cache entry for {key}")))?;

        for (output_name, content_hash) in &entry.stored_outputs {
            let Some(dest_rel) = task.outputs.get(output_name) else {
                continue;
            };
            let blob = self.blobs_dir().join(content_hash);
            let dest = workdir.join(dest_rel);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))?;
            }
            tokio::fs::copy(&blob, &dest)
                .await
                .map_err(|e| SykliError::new(ErrorCode::Internal, format!("failed to restore {output_name}: {e}")))?;
        }
        Ok(())
    }

    /// `store(key, task, outputs, duration_ms, workdir) -> ok | error`
    /// (§4.2). Atomic per fingerprint: write blobs, then the entry JSON via
    /// temp-file + rename, guarded by a per-key async lock so only one
    /// writer touches a given fingerprint at a time (§4.2 "Concurrency
    /// guarantee", §5 "Locking discipline").
    pub async fn store(
        &self,
        key: &str,
        task: &Task,
        duration_ms: u64,
        workdir: &Path,
    ) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        if self
            .read_entry(key)
            .await
            .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))?
            .is_some()
        {
            debug!(fingerprint = %key, "cache entry already present; store is a no-op");
            return Ok(());
        }

        tokio::fs::create_dir_all(self.blobs_dir())
            .await
            .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))?;
        tokio::fs::create_dir_all(self.entries_dir())
            .await
            .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))?;

        let mut stored_outputs = HashMap::new();
        for (name, rel_path) in &task.outputs {
            let src = workdir.join(rel_path);
            let bytes = match tokio::fs::read(&src).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(output = %name, path = %src.display(), error = %e, "output missing at store time; skipping");
                    continue;
                }
            };
            let content_hash = crate::util::hash::hash_bytes(&bytes);
            let blob_path = self.blobs_dir().join(&content_hash);
            if tokio::fs::metadata(&blob_path).await.is_err() {
                let tmp = self.blobs_dir().join(format!(".{content_hash}.tmp-{}", crate::util::ulid_gen::next_ulid()));
                tokio::fs::write(&tmp, &bytes)
                    .await
                    .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))?;
                tokio::fs::rename(&tmp, &blob_path)
                    .await
                    .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))?;
            }
            stored_outputs.insert(name.clone(), content_hash);
        }

        let entry = CacheEntry {
            fingerprint: key.to_string(),
            task_name: task.name.clone(),
            stored_outputs,
            duration_ms,
            created_at: Utc::now(),
        };

        let json = serde_json::to_vec_pretty(&entry)
            .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))?;
        let final_path = self.entry_path(key);
        let tmp_path = self.entries_dir().join(format!(".{key}.tmp-{}", crate::util::ulid_gen::next_ulid()));
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| SykliError::new(ErrorCode::Internal, e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_output(name: &str, inputs: &[&str]) -> Task {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "command": "echo x",
            "inputs": inputs,
            "outputs": {"out": "out.txt"},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn store_then_check_is_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("out.txt"), b"built").unwrap();

        let task = task_with_output("build", &["a.txt"]);
        let cache = Cache::new(dir.path());
        let upstream = FxHashMap::default();

        let first = cache.check(&task, dir.path(), &upstream).await.unwrap();
        let key = match first {
            CacheCheck::Miss { key: Some(k), reason: MissReason::NoEntry } => k,
            other => panic!("expected NoEntry miss, got {other:?}"),
        };

        cache.store(&key, &task, 5, dir.path()).await.unwrap();

        let second = cache.check(&task, dir.path(), &upstream).await.unwrap();
        assert!(matches!(second, CacheCheck::Hit { .. }));
    }

    #[tokio::test]
    async fn restore_round_trips_stored_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("out.txt"), b"built").unwrap();

        let task = task_with_output("build", &["a.txt"]);
        let cache = Cache::new(dir.path());
        let upstream = FxHashMap::default();

        let CacheCheck::Miss { key: Some(key), .. } = cache.check(&task, dir.path(), &upstream).await.unwrap() else {
            panic!("expected miss");
        };
        cache.store(&key, &task, 5, dir.path()).await.unwrap();

        std::fs::remove_file(dir.path().join("out.txt")).unwrap();
        cache.restore(&key, &task, dir.path()).await.unwrap();
        let restored = std::fs::read(dir.path().join("out.txt")).unwrap();
        assert_eq!(restored, b"built");
    }

    #[tokio::test]
    async fn no_inputs_found_is_distinct_from_not_cacheable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let upstream = FxHashMap::default();

        let cacheable_but_empty = task_with_output("t", &["missing/*.txt"]);
        let check = cache.check(&cacheable_but_empty, dir.path(), &upstream).await.unwrap();
        assert!(matches!(check, CacheCheck::Miss { reason: MissReason::NoInputsFound, .. }));

        let not_cacheable: Task = serde_json::from_value(serde_json::json!({"name": "t2"})).unwrap();
        let check = cache.check(&not_cacheable, dir.path(), &upstream).await.unwrap();
        assert!(matches!(check, CacheCheck::Miss { reason: MissReason::NotCacheable, .. }));
    }
}
