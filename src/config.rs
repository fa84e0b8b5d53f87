//! Ambient configuration (SPEC_FULL §0): TOML under the XDG config dir,
//! loaded the way the teacher's `config.rs` loads `~/.config/nika/`.
//!
//! Priority: environment variables > config file > defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, Result, SykliError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Local,
    K8s,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct K8sDefaults {
    pub namespace: Option<String>,
    pub kubeconfig: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SykliConfig {
    #[serde(default)]
    pub target: Option<TargetKind>,
    #[serde(default)]
    pub max_parallel: Option<usize>,
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
    #[serde(default)]
    pub default_runtime: Option<String>,
    #[serde(default)]
    pub k8s: K8sDefaults,
}

impl Default for SykliConfig {
    fn default() -> Self {
        Self {
            target: None,
            max_parallel: None,
            cache_root: None,
            default_runtime: None,
            k8s: K8sDefaults::default(),
        }
    }
}

impl SykliConfig {
    /// `~/.config/sykli/` on Unix, `%APPDATA%/sykli/` on Windows.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("sykli")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Defaults if the file doesn't exist; error if it exists but is
    /// malformed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default().with_env());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| SykliError::new(ErrorCode::Internal, format!("failed to read config file: {e}")))?;
        let config: SykliConfig = toml::from_str(&content)
            .map_err(|e| SykliError::new(ErrorCode::Internal, format!("failed to parse config file: {e}")))?;
        Ok(config.with_env())
    }

    /// Environment variables win over whatever the file declared.
    pub fn with_env(mut self) -> Self {
        if let Ok(target) = std::env::var("SYKLI_TARGET") {
            self.target = match target.as_str() {
                "local" => Some(TargetKind::Local),
                "k8s" => Some(TargetKind::K8s),
                _ => self.target,
            };
        }
        if let Ok(n) = std::env::var("SYKLI_MAX_PARALLEL") {
            if let Ok(n) = n.parse() {
                self.max_parallel = Some(n);
            }
        }
        if let Ok(ns) = std::env::var("SYKLI_K8S_NAMESPACE") {
            if !ns.is_empty() {
                self.k8s.namespace = Some(ns);
            }
        }
        if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
            if !kubeconfig.is_empty() {
                self.k8s.kubeconfig = Some(kubeconfig);
            }
        }
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        })
    }

    pub fn k8s_namespace(&self) -> &str {
        self.k8s.namespace.as_deref().unwrap_or("default")
    }
}
