//! Kubernetes Target (§2 #5, §4.4.2, §6.3).
//!
//! The `K8sOptions` schema (§4.4.3) is always available — it's pure data
//! plus validation/merge logic, useful even when building for a host that
//! never talks to a cluster. The actual API-talking Target is behind the
//! `k8s` feature, grounded on `kube` + `k8s-openapi`, the crates the wider
//! example pack reaches for (see `k8s.rs` in the retrieval pack's
//! `wseaton-dagrun` example) rather than shelling out to `kubectl` for
//! everything.

pub mod options;

#[cfg(feature = "k8s")]
pub mod manifest;
#[cfg(feature = "k8s")]
mod target_impl;

#[cfg(feature = "k8s")]
pub use target_impl::K8sTarget;
