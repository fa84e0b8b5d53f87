//! Task-graph domain types (§3, §6.1 wire schema).
//!
//! These are the `serde`-deserialized shape of the SDK's JSON document.
//! Field naming matches the wire schema directly; no renaming layer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::target::k8s::options::K8sOptions;

/// `{type: directory|cache, resource, path}` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountType {
    Directory,
    Cache,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    #[serde(rename = "type")]
    pub kind: MountType,
    pub resource: String,
    pub path: String,
}

/// `{name, image}` — a side-car container (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub image: String,
}

/// `{from_task, output, dest}` — an upstream artifact this task consumes
/// (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInput {
    pub from_task: String,
    pub output: String,
    pub dest: String,
}

/// `stop | continue | retry:N` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OnFailure {
    Stop,
    Continue,
    Retry(u32),
}

impl Default for OnFailure {
    fn default() -> Self {
        OnFailure::Stop
    }
}

impl<'de> Deserialize<'de> for OnFailure {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        OnFailure::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl OnFailure {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "stop" => Ok(OnFailure::Stop),
            "continue" => Ok(OnFailure::Continue),
            other => {
                let n = other
                    .strip_prefix("retry:")
                    .ok_or_else(|| format!("invalid on_failure value: {other}"))?;
                let n: u32 = n
                    .parse()
                    .map_err(|_| format!("invalid retry count in on_failure: {other}"))?;
                Ok(OnFailure::Retry(n))
            }
        }
    }
}

/// Optional `semantic` metadata attached to a task (§3, §6.1). The Core
/// does not interpret these beyond carrying them through to results/events
/// for reporters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Semantic {
    #[serde(default)]
    pub covers: Vec<String>,
    pub intent: Option<String>,
    pub criticality: Option<String>,
}

/// A Cartesian-product expansion spec: dimension name -> candidate values
/// (§4.1).
pub type MatrixSpec = HashMap<String, Vec<serde_json::Value>>;

fn default_retry() -> u32 {
    0
}

/// The atomic unit of work (§3, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub command: Option<String>,
    pub container: Option<String>,
    pub workdir: Option<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: HashMap<String, String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub task_inputs: Vec<TaskInput>,
    pub timeout: Option<u64>,
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default)]
    pub on_failure: OnFailure,
    #[serde(default)]
    pub requires: Vec<String>,
    pub condition: Option<Condition>,
    pub k8s: Option<K8sOptions>,
    pub matrix: Option<MatrixSpec>,
    #[serde(default)]
    pub semantic: Option<Semantic>,
}

impl Task {
    /// A task is non-cacheable when `inputs` is empty or missing (§3, §4.2).
    pub fn is_cacheable(&self) -> bool {
        !self.inputs.is_empty()
    }

    pub fn runs_in_container(&self) -> bool {
        self.container.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_failure_parses_retry_n() {
        assert_eq!(OnFailure::parse("retry:3").unwrap(), OnFailure::Retry(3));
        assert_eq!(OnFailure::parse("stop").unwrap(), OnFailure::Stop);
        assert_eq!(OnFailure::parse("continue").unwrap(), OnFailure::Continue);
        assert!(OnFailure::parse("retry:abc").is_err());
        assert!(OnFailure::parse("banana").is_err());
    }

    #[test]
    fn task_without_inputs_is_not_cacheable() {
        let task: Task = serde_json::from_value(serde_json::json!({"name": "t"})).unwrap();
        assert!(!task.is_cacheable());
    }
}
