//! Common utilities for talos-ci: errors, deadline polling, text matching,
//! subprocess execution and Kubernetes helpers

#![deny(missing_docs)]

pub mod error;
pub mod format;
pub mod kube_utils;
pub mod poll;
pub mod process;
pub mod tokens;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding the cluster's system pods (CoreDNS, kube-proxy, ...)
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Label selector matching the cluster DNS pods
pub const DNS_LABEL_SELECTOR: &str = "k8s-app=kube-dns";

/// Kubernetes condition type for readiness
pub const CONDITION_READY: &str = "Ready";

/// Kubernetes condition status for a satisfied condition
pub const STATUS_TRUE: &str = "True";
