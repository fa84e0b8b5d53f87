//! K8sOptions schema & merge semantics (§4.4.3).
//!
//! Declarative pod-spec overrides, validated up front the way the teacher
//! validates `use:` wiring (`binding/validate.rs`) — reject early with a
//! specific error code rather than let a malformed value reach the API.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, SykliError};

static MEMORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]+(\.[0-9]+)?(Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E)?$").unwrap()
});
static CPU_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?m?$").unwrap());

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSpec {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resources {
    pub requests: Option<ResourceSpec>,
    pub limits: Option<ResourceSpec>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum TolerationOperator {
    Exists,
    Equal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum TolerationEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toleration {
    pub key: Option<String>,
    pub operator: TolerationOperator,
    pub value: Option<String>,
    pub effect: Option<TolerationEffect>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum DnsPolicy {
    ClusterFirst,
    ClusterFirstWithHostNet,
    Default,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Affinity(pub serde_json::Value);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecurityContext(pub serde_json::Value);

/// Declarative, validatable pod-spec overrides (§4.4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct K8sOptions {
    pub resources: Option<Resources>,
    #[serde(default)]
    pub tolerations: Option<Vec<Toleration>>,
    pub affinity: Option<Affinity>,
    #[serde(default)]
    pub node_selector: Option<HashMap<String, String>>,
    pub security_context: Option<SecurityContext>,
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default)]
    pub annotations: Option<HashMap<String, String>>,
    pub service_account: Option<String>,
    pub priority_class: Option<String>,
    #[serde(default)]
    pub host_network: Option<bool>,
    pub dns_policy: Option<DnsPolicy>,
    #[serde(default)]
    pub volumes: Option<Vec<VolumeMount>>,
}

/// A common typo correction, e.g. `32gb` -> `32Gi` (§4.4.3, §8).
fn suggest_memory_fix(value: &str) -> Option<String> {
    let lower = value.to_lowercase();
    let digits: String = lower.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
    if digits.is_empty() {
        return None;
    }
    let suffix = &lower[digits.len()..];
    let corrected_suffix = match suffix {
        "gb" | "g" => Some("Gi"),
        "mb" | "m" => Some("Mi"),
        "kb" | "k" => Some("Ki"),
        "tb" | "t" => Some("Ti"),
        _ => None,
    }?;
    Some(format!("{digits}{corrected_suffix}"))
}

fn validate_memory(field: &str, value: &str) -> Result<(), SykliError> {
    if MEMORY_RE.is_match(value) {
        return Ok(());
    }
    let mut err = SykliError::new(
        ErrorCode::InvalidK8sOptions,
        format!("{field} value {value:?} is not a valid Kubernetes quantity"),
    );
    if let Some(suggestion) = suggest_memory_fix(value) {
        err = err.with_hint(format!("did you mean {suggestion:?}?"));
    }
    Err(err)
}

fn validate_cpu(field: &str, value: &str) -> Result<(), SykliError> {
    if CPU_RE.is_match(value) {
        Ok(())
    } else {
        Err(SykliError::new(
            ErrorCode::InvalidK8sOptions,
            format!("{field} value {value:?} is not a valid Kubernetes CPU quantity"),
        ))
    }
}

fn validate_resource_spec(label: &str, spec: &ResourceSpec) -> Result<(), SykliError> {
    if let Some(cpu) = &spec.cpu {
        validate_cpu(&format!("{label}.cpu"), cpu)?;
    }
    if let Some(memory) = &spec.memory {
        validate_memory(&format!("{label}.memory"), memory)?;
    }
    Ok(())
}

impl K8sOptions {
    /// Validate up front (§4.4.3): memory/cpu quantity regexes, toleration
    /// operator/effect enums (enforced by the type system via `serde`),
    /// volume mount path/name requirements.
    pub fn validate(&self) -> Result<(), SykliError> {
        if let Some(resources) = &self.resources {
            if let Some(requests) = &resources.requests {
                validate_resource_spec("resources.requests", requests)?;
            }
            if let Some(limits) = &resources.limits {
                validate_resource_spec("resources.limits", limits)?;
            }
        }
        if let Some(volumes) = &self.volumes {
            for volume in volumes {
                if volume.name.is_empty() {
                    return Err(SykliError::new(
                        ErrorCode::InvalidK8sOptions,
                        "volume mount requires a non-empty name",
                    ));
                }
                if !volume.path.starts_with('/') {
                    return Err(SykliError::new(
                        ErrorCode::InvalidK8sOptions,
                        format!("volume mount path {:?} must start with '/'", volume.path),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Merge pipeline defaults (`self`) with task-level overrides (`task`),
    /// per §4.4.3's table: scalars task-wins-if-non-null; maps deep-merge
    /// with task winning on key collision; lists/structured overrides
    /// replace wholesale when non-null; resources merge field-by-field.
    pub fn merge(&self, task: &K8sOptions) -> K8sOptions {
        K8sOptions {
            resources: merge_resources(&self.resources, &task.resources),
            tolerations: task.tolerations.clone().or_else(|| self.tolerations.clone()),
            affinity: task.affinity.clone().or_else(|| self.affinity.clone()),
            node_selector: merge_maps(&self.node_selector, &task.node_selector),
            security_context: task
                .security_context
                .clone()
                .or_else(|| self.security_context.clone()),
            labels: merge_maps(&self.labels, &task.labels),
            annotations: merge_maps(&self.annotations, &task.annotations),
            service_account: task.service_account.clone().or_else(|| self.service_account.clone()),
            priority_class: task.priority_class.clone().or_else(|| self.priority_class.clone()),
            host_network: task.host_network.or(self.host_network),
            dns_policy: task.dns_policy.or(self.dns_policy),
            volumes: task.volumes.clone().or_else(|| self.volumes.clone()),
        }
    }
}

fn merge_maps(
    base: &Option<HashMap<String, String>>,
    task: &Option<HashMap<String, String>>,
) -> Option<HashMap<String, String>> {
    match (base, task) {
        (None, None) => None,
        (Some(b), None) => Some(b.clone()),
        (None, Some(t)) => Some(t.clone()),
        (Some(b), Some(t)) => {
            let mut merged = b.clone();
            for (k, v) in t {
                merged.insert(k.clone(), v.clone());
            }
            Some(merged)
        }
    }
}

fn merge_resource_spec(base: &Option<ResourceSpec>, task: &Option<ResourceSpec>) -> Option<ResourceSpec> {
    match (base, task) {
        (None, None) => None,
        (Some(b), None) => Some(b.clone()),
        (None, Some(t)) => Some(t.clone()),
        (Some(b), Some(t)) => Some(ResourceSpec {
            cpu: t.cpu.clone().or_else(|| b.cpu.clone()),
            memory: t.memory.clone().or_else(|| b.memory.clone()),
        }),
    }
}

fn merge_resources(base: &Option<Resources>, task: &Option<Resources>) -> Option<Resources> {
    match (base, task) {
        (None, None) => None,
        (Some(b), None) => Some(b.clone()),
        (None, Some(t)) => Some(t.clone()),
        (Some(b), Some(t)) => Some(Resources {
            requests: merge_resource_spec(&b.requests, &t.requests),
            limits: merge_resource_spec(&b.limits, &t.limits),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_memory_quantities_pass() {
        for v in ["32Gi", "512Mi", "1.5Gi", "100"] {
            assert!(validate_memory("m", v).is_ok(), "{v}");
        }
    }

    #[test]
    fn common_typo_suggests_correction() {
        let opts = K8sOptions {
            resources: Some(Resources {
                requests: Some(ResourceSpec {
                    cpu: None,
                    memory: Some("32gb".into()),
                }),
                limits: None,
            }),
            ..Default::default()
        };
        let err = opts.validate().unwrap_err();
        assert!(err.hints.iter().any(|h| h.contains("32Gi")));
    }

    #[test]
    fn volume_path_must_start_with_slash() {
        let opts = K8sOptions {
            volumes: Some(vec![VolumeMount {
                name: "cache".into(),
                path: "relative/path".into(),
            }]),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn merge_task_wins_on_scalar_and_map_collision() {
        let mut base_labels = HashMap::new();
        base_labels.insert("team".to_string(), "infra".to_string());
        base_labels.insert("tier".to_string(), "default".to_string());
        let base = K8sOptions {
            labels: Some(base_labels),
            service_account: Some("default-sa".into()),
            ..Default::default()
        };

        let mut task_labels = HashMap::new();
        task_labels.insert("tier".to_string(), "override".to_string());
        let task = K8sOptions {
            labels: Some(task_labels),
            service_account: Some("task-sa".into()),
            ..Default::default()
        };

        let merged = base.merge(&task);
        assert_eq!(merged.service_account.as_deref(), Some("task-sa"));
        let labels = merged.labels.unwrap();
        assert_eq!(labels.get("team").map(String::as_str), Some("infra"));
        assert_eq!(labels.get("tier").map(String::as_str), Some("override"));
    }

    #[test]
    fn merge_resources_is_field_by_field() {
        let base = K8sOptions {
            resources: Some(Resources {
                requests: Some(ResourceSpec {
                    cpu: Some("500m".into()),
                    memory: Some("256Mi".into()),
                }),
                limits: None,
            }),
            ..Default::default()
        };
        let task = K8sOptions {
            resources: Some(Resources {
                requests: Some(ResourceSpec {
                    cpu: None,
                    memory: Some("512Mi".into()),
                }),
                limits: None,
            }),
            ..Default::default()
        };
        let merged = base.merge(&task).resources.unwrap().requests.unwrap();
        assert_eq!(merged.cpu.as_deref(), Some("500m"));
        assert_eq!(merged.memory.as_deref(), Some("512Mi"));
    }
}
