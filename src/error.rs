//! Sykli Error Types
//!
//! Every subsystem boundary in the Core returns `Result<T, SykliError>` —
//! errors are values, never exceptions (§3, §4.8). `SykliError` is a single
//! struct rather than a per-cause enum: the wire shape is uniform
//! (`code`, `kind`, `message`, optional `task`/`exit_code`/`output`,
//! `hints`, `locations`) and callers branch on `code`, not on Rust type.
//!
//! Code ranges mirror a stable vocabulary (§4.8):
//! - execution:  `task_failed`, `task_timeout`, `job_failed`, `cancelled`
//! - dependency: `dependency_failed`, `missing_artifact`
//! - secrets:    `missing_secrets`
//! - filesystem: `path_traversal`
//! - git/delta:  `not_a_git_repo`, `unknown_ref`, `bad_revision`, `git_failed`
//! - k8s:        `kubeconfig_invalid`
//! - validation: `invalid_graph`, `cycle_detected`, `invalid_artifact_ref`,
//!               `invalid_k8s_options`, `missing_capability`
//! - system:     `internal`

use std::fmt;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level error taxonomy (§4.8, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Execution,
    Timeout,
    Placement,
    System,
}

/// Stable error code vocabulary (§4.8). New codes are additive, never
/// renamed or removed — reporters and SDKs match on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    TaskFailed,
    TaskTimeout,
    MissingSecrets,
    MissingArtifact,
    DependencyFailed,
    Internal,
    PathTraversal,
    NotAGitRepo,
    UnknownRef,
    BadRevision,
    GitFailed,
    KubeconfigInvalid,
    JobFailed,
    /// A run-wide cancel reached this in-flight Target invocation before it
    /// finished on its own (§4.5 "Cancellation", §5).
    Cancelled,
    // Validation-only codes (§4.1, §4.4.3), not enumerated in §4.8's
    // execution-time list but required by the validation contracts.
    InvalidGraph,
    CycleDetected,
    InvalidArtifactRef,
    InvalidK8sOptions,
    MissingCapability,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::TaskFailed => "task_failed",
            ErrorCode::TaskTimeout => "task_timeout",
            ErrorCode::MissingSecrets => "missing_secrets",
            ErrorCode::MissingArtifact => "missing_artifact",
            ErrorCode::DependencyFailed => "dependency_failed",
            ErrorCode::Internal => "internal",
            ErrorCode::PathTraversal => "path_traversal",
            ErrorCode::NotAGitRepo => "not_a_git_repo",
            ErrorCode::UnknownRef => "unknown_ref",
            ErrorCode::BadRevision => "bad_revision",
            ErrorCode::GitFailed => "git_failed",
            ErrorCode::KubeconfigInvalid => "kubeconfig_invalid",
            ErrorCode::JobFailed => "job_failed",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::InvalidGraph => "invalid_graph",
            ErrorCode::CycleDetected => "cycle_detected",
            ErrorCode::InvalidArtifactRef => "invalid_artifact_ref",
            ErrorCode::InvalidK8sOptions => "invalid_k8s_options",
            ErrorCode::MissingCapability => "missing_capability",
        };
        f.write_str(s)
    }
}

impl ErrorCode {
    fn default_kind(self) -> ErrorKind {
        match self {
            ErrorCode::TaskFailed | ErrorCode::JobFailed => ErrorKind::Execution,
            ErrorCode::TaskTimeout => ErrorKind::Timeout,
            ErrorCode::MissingSecrets
            | ErrorCode::MissingArtifact
            | ErrorCode::DependencyFailed => ErrorKind::Execution,
            ErrorCode::Internal => ErrorKind::System,
            ErrorCode::Cancelled => ErrorKind::System,
            ErrorCode::PathTraversal => ErrorKind::System,
            ErrorCode::NotAGitRepo
            | ErrorCode::UnknownRef
            | ErrorCode::BadRevision
            | ErrorCode::GitFailed => ErrorKind::System,
            ErrorCode::KubeconfigInvalid => ErrorKind::System,
            ErrorCode::InvalidGraph
            | ErrorCode::CycleDetected
            | ErrorCode::InvalidArtifactRef
            | ErrorCode::InvalidK8sOptions
            | ErrorCode::MissingCapability => ErrorKind::Validation,
        }
    }
}

/// A single parsed source location, populated by an (out-of-scope, §4.8)
/// output parser. The Core only carries the shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    pub message: String,
}

/// The uniform Core error value (§3).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code} {kind:?}: {message}")]
pub struct SykliError {
    pub code: ErrorCode,
    pub kind: ErrorKind,
    pub message: String,
    pub task: Option<String>,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub locations: Vec<SourceLocation>,
}

impl Diagnostic for SykliError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        if self.hints.is_empty() {
            None
        } else {
            Some(Box::new(self.hints.join("; ")))
        }
    }
}

impl SykliError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: code.default_kind(),
            code,
            message: message.into(),
            task: None,
            exit_code: None,
            output: None,
            hints: Vec::new(),
            locations: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    pub fn with_locations(mut self, locations: Vec<SourceLocation>) -> Self {
        self.locations = locations;
        self
    }

    /// One-line "simple" render: `✗ <task> <kind> (<context>)` (§4.8).
    pub fn render_simple(&self) -> String {
        let task = self.task.as_deref().unwrap_or("<run>");
        format!("✗ {} {} ({})", task, self.code, self.message)
    }

    /// Boxed "full" render: code, kind, command context, exit code, last N
    /// lines of output, parsed locations, hints (§4.8).
    pub fn render_full(&self, max_output_lines: usize) -> String {
        let mut out = String::new();
        out.push_str(&format!("┌─ {} ─────────────────────\n", self.code));
        out.push_str(&format!("│ kind:   {:?}\n", self.kind));
        if let Some(task) = &self.task {
            out.push_str(&format!("│ task:   {task}\n"));
        }
        if let Some(exit_code) = self.exit_code {
            out.push_str(&format!("│ exit:   {exit_code}\n"));
        }
        out.push_str(&format!("│ {}\n", self.message));
        if let Some(output) = &self.output {
            let lines: Vec<&str> = output.lines().collect();
            let start = lines.len().saturating_sub(max_output_lines);
            out.push_str("│ output (tail):\n");
            for line in &lines[start..] {
                out.push_str(&format!("│   {line}\n"));
            }
        }
        for loc in &self.locations {
            match loc.column {
                Some(col) => out.push_str(&format!(
                    "│ --> {}:{}:{}: {}\n",
                    loc.file, loc.line, col, loc.message
                )),
                None => out.push_str(&format!(
                    "│ --> {}:{}: {}\n",
                    loc.file, loc.line, loc.message
                )),
            }
        }
        for hint in &self.hints {
            out.push_str(&format!("│ hint: {hint}\n"));
        }
        out.push_str("└─────────────────────────────────\n");
        out
    }
}

/// A single candidate-node dispatch failure (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node: String,
    pub reason: String,
}

/// Mesh placement failure (§3, §4.7).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("placement failed for task {task_name}: no candidate node accepted the task")]
pub struct PlacementError {
    pub task_name: String,
    pub no_matching_nodes: bool,
    pub required_labels: Vec<String>,
    pub available_nodes: Vec<String>,
    #[serde(default)]
    pub failures: Vec<NodeFailure>,
}

impl PlacementError {
    /// Hints per §4.7: label guidance, plus a Docker nudge when any failure
    /// mentions it.
    pub fn hints(&self) -> Vec<String> {
        let mut hints = Vec::new();
        if self.no_matching_nodes {
            hints.push(
                "no node advertises the required labels; set SYKLI_LABELS on a candidate node or relax `requires`".to_string(),
            );
        } else {
            if self
                .failures
                .iter()
                .any(|f| f.reason.to_lowercase().contains("docker"))
            {
                hints.push("a candidate node rejected the task citing Docker; confirm the Docker daemon is running there".to_string());
            }
            hints.push("adjust `requires` labels or add a node with matching capabilities".to_string());
        }
        hints
    }
}

pub type Result<T> = std::result::Result<T, SykliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_display_matches_wire_vocabulary() {
        assert_eq!(ErrorCode::TaskFailed.to_string(), "task_failed");
        assert_eq!(ErrorCode::DependencyFailed.to_string(), "dependency_failed");
        assert_eq!(ErrorCode::KubeconfigInvalid.to_string(), "kubeconfig_invalid");
    }

    #[test]
    fn render_simple_includes_task_and_code() {
        let err = SykliError::new(ErrorCode::TaskFailed, "exit 1").with_task("build");
        let rendered = err.render_simple();
        assert!(rendered.contains("build"));
        assert!(rendered.contains("task_failed"));
    }

    #[test]
    fn render_full_truncates_output_tail() {
        let output = (0..20).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let err = SykliError::new(ErrorCode::TaskFailed, "boom").with_output(output);
        let rendered = err.render_full(5);
        assert!(rendered.contains("line 19"));
        assert!(!rendered.contains("line 0\n"));
    }

    #[test]
    fn placement_error_hints_mention_labels_when_no_match() {
        let err = PlacementError {
            task_name: "deploy".into(),
            no_matching_nodes: true,
            required_labels: vec!["quantum".into()],
            available_nodes: vec!["local".into(), "s1".into()],
            failures: vec![],
        };
        let hints = err.hints();
        assert!(hints.iter().any(|h| h.contains("SYKLI_LABELS")));
    }

    #[test]
    fn placement_error_hints_mention_docker_when_relevant() {
        let err = PlacementError {
            task_name: "build".into(),
            no_matching_nodes: false,
            required_labels: vec![],
            available_nodes: vec!["s1".into()],
            failures: vec![NodeFailure {
                node: "s1".into(),
                reason: "docker daemon unreachable".into(),
            }],
        };
        let hints = err.hints();
        assert!(hints.iter().any(|h| h.to_lowercase().contains("docker")));
    }
}
