//! Job manifest construction (§6.3).
//!
//! One Job per task. Structure and defaults (`backoffLimit: 0`,
//! `ttlSecondsAfterFinished: 300`, `restartPolicy: Never`) grounded on the
//! `build_job` pattern in the retrieval pack's `wseaton-dagrun` K8s runner,
//! extended with the init-container / sidecar / pod-overlay fields §6.3
//! names.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, PodSecurityContext, PodSpec, PodTemplateSpec,
    ResourceRequirements, Toleration as K8sToleration, Volume, VolumeMount as K8sVolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::context::GitContext;
use crate::graph::task::Task;

use super::options::{DnsPolicy, K8sOptions, TolerationEffect, TolerationOperator};

/// `sykli-<sanitized-task>-<4-random-hex>` (§4.4.2 step 1).
pub fn generate_job_name(task_name: &str) -> String {
    let sanitized = sanitize_k8s_name(task_name);
    let suffix: String = {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        (0..4).map(|_| format!("{:x}", rng.gen_range(0..16))).collect()
    };
    format!("sykli-{sanitized}-{suffix}")
}

fn sanitize_k8s_name(s: &str) -> String {
    let sanitized: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.len() > 40 {
        trimmed[..40].trim_end_matches('-').to_string()
    } else {
        trimmed.to_string()
    }
}

fn resource_requirements(options: &K8sOptions) -> Option<ResourceRequirements> {
    let resources = options.resources.as_ref()?;
    let to_map = |spec: &super::options::ResourceSpec| {
        let mut map = BTreeMap::new();
        if let Some(cpu) = &spec.cpu {
            map.insert("cpu".to_string(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &spec.memory {
            map.insert("memory".to_string(), Quantity(memory.clone()));
        }
        map
    };
    Some(ResourceRequirements {
        requests: resources.requests.as_ref().map(to_map),
        limits: resources.limits.as_ref().map(to_map),
        ..Default::default()
    })
}

fn tolerations(options: &K8sOptions) -> Option<Vec<K8sToleration>> {
    options.tolerations.as_ref().map(|tols| {
        tols.iter()
            .map(|t| K8sToleration {
                key: t.key.clone(),
                operator: Some(
                    match t.operator {
                        TolerationOperator::Exists => "Exists",
                        TolerationOperator::Equal => "Equal",
                    }
                    .to_string(),
                ),
                value: t.value.clone(),
                effect: t.effect.map(|e| {
                    match e {
                        TolerationEffect::NoSchedule => "NoSchedule",
                        TolerationEffect::PreferNoSchedule => "PreferNoSchedule",
                        TolerationEffect::NoExecute => "NoExecute",
                    }
                    .to_string()
                }),
                ..Default::default()
            })
            .collect()
    })
}

fn dns_policy(options: &K8sOptions) -> Option<String> {
    options.dns_policy.map(|p| {
        match p {
            DnsPolicy::ClusterFirst => "ClusterFirst",
            DnsPolicy::ClusterFirstWithHostNet => "ClusterFirstWithHostNet",
            DnsPolicy::Default => "Default",
            DnsPolicy::None => "None",
        }
        .to_string()
    })
}

fn git_clone_init_container(git: &GitContext) -> Container {
    Container {
        name: "git-clone".to_string(),
        image: Some("alpine/git".to_string()),
        command: Some(vec!["sh".to_string(), "-c".to_string()]),
        args: Some(vec![format!(
            "git clone {} /workspace && cd /workspace && git checkout {}",
            git.url, git.sha
        )]),
        volume_mounts: Some(vec![K8sVolumeMount {
            name: "workspace".to_string(),
            mount_path: "/workspace".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn service_sidecar(service: &crate::graph::task::Service) -> Container {
    Container {
        name: service.name.clone(),
        image: Some(service.image.clone()),
        ..Default::default()
    }
}

/// Build the Job object for a task (§4.4.2 step 2, §6.3).
pub fn build_job_manifest(
    task: &Task,
    job_name: &str,
    namespace: &str,
    options: &K8sOptions,
    git_context: Option<&GitContext>,
) -> Job {
    let command = task.command.clone().unwrap_or_default();
    let image = task.container.clone().unwrap_or_else(|| "alpine:latest".to_string());

    let env: Vec<EnvVar> = task
        .env
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        })
        .collect();

    let mut volume_mounts: Vec<K8sVolumeMount> = task
        .mounts
        .iter()
        .map(|m| K8sVolumeMount {
            name: sanitize_k8s_name(&m.resource),
            mount_path: m.path.clone(),
            ..Default::default()
        })
        .collect();

    let mut volumes: Vec<Volume> = Vec::new();
    if let Some(task_volumes) = &options.volumes {
        for v in task_volumes {
            volume_mounts.push(K8sVolumeMount {
                name: v.name.clone(),
                mount_path: v.path.clone(),
                ..Default::default()
            });
            volumes.push(Volume {
                name: v.name.clone(),
                ..Default::default()
            });
        }
    }

    let working_dir = task
        .workdir
        .clone()
        .or_else(|| git_context.map(|_| "/workspace".to_string()));

    if git_context.is_some() {
        volume_mounts.push(K8sVolumeMount {
            name: "workspace".to_string(),
            mount_path: "/workspace".to_string(),
            ..Default::default()
        });
        volumes.push(Volume {
            name: "workspace".to_string(),
            ..Default::default()
        });
    }

    let main_container = Container {
        name: "task".to_string(),
        image: Some(image),
        command: Some(vec!["sh".to_string(), "-c".to_string()]),
        args: Some(vec![command]),
        working_dir,
        env: if env.is_empty() { None } else { Some(env) },
        resources: resource_requirements(options),
        volume_mounts: if volume_mounts.is_empty() {
            None
        } else {
            Some(volume_mounts)
        },
        ..Default::default()
    };

    let mut containers = vec![main_container];
    containers.extend(task.services.iter().map(service_sidecar));

    let init_containers = git_context.map(|git| vec![git_clone_init_container(git)]);

    let mut labels = BTreeMap::new();
    labels.insert("sykli.io/task".to_string(), task.name.clone());
    if let Some(extra) = &options.labels {
        for (k, v) in extra {
            labels.insert(k.clone(), v.clone());
        }
    }

    let node_selector = options.node_selector.as_ref().map(|m| {
        m.iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<BTreeMap<_, _>>()
    });

    let pod_spec = PodSpec {
        restart_policy: Some("Never".to_string()),
        containers,
        init_containers,
        volumes: if volumes.is_empty() { None } else { Some(volumes) },
        node_selector,
        tolerations: tolerations(options),
        affinity: options.affinity.as_ref().and_then(|a| {
            serde_json::from_value::<Affinity>(a.0.clone()).ok()
        }),
        service_account_name: options.service_account.clone(),
        priority_class_name: options.priority_class.clone(),
        host_network: options.host_network,
        dns_policy: dns_policy(options),
        security_context: options.security_context.as_ref().and_then(|s| {
            serde_json::from_value::<PodSecurityContext>(s.0.clone()).ok()
        }),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            annotations: options.annotations.as_ref().map(|a| {
                a.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(300),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
