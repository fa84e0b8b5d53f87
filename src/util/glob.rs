//! Glob matching shared by `inputs` resolution (§4.2) and Delta's
//! affected-file matching (§4.6): `**` matches zero or more path segments,
//! `*` matches within one segment, exact paths match literally.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSetBuilder};

/// Expand a single glob pattern against `root`, returning matching paths
/// sorted for determinism (fingerprint stability, §4.2, §8 invariant:
/// "identical workdir state ... produce identical fingerprints").
pub fn expand(root: &Path, pattern: &str) -> std::io::Result<Vec<PathBuf>> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let matcher = glob.compile_matcher();
    let mut matches = Vec::new();

    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if matcher.is_match(rel) {
            matches.push(rel.to_path_buf());
        }
    }

    matches.sort();
    Ok(matches)
}

/// Does `path` (workdir-relative) match any of `patterns`?
pub fn matches_any(patterns: &[String], path: &Path) -> bool {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = GlobBuilder::new(pattern).literal_separator(true).build() {
            builder.add(glob);
        }
    }
    match builder.build() {
        Ok(set) => set.is_match(path),
        Err(_) => false,
    }
}
