//! Verification inputs
//!
//! A [`ReadinessConfig`] is built once per run and never mutated. Only the
//! endpoint, node count, timeout and the two flags come from the caller in
//! practice; the interval and probe blocks carry the defaults the CI job
//! relies on.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use talos_ci_common::{DNS_LABEL_SELECTOR, KUBE_SYSTEM_NAMESPACE};

use crate::{Error, Result};

/// Backend that `talosctl cluster create` used for the nodes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provisioner {
    /// Nodes are Docker containers
    #[default]
    Docker,
    /// Nodes are QEMU virtual machines
    Qemu,
}

impl fmt::Display for Provisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provisioner::Docker => write!(f, "docker"),
            Provisioner::Qemu => write!(f, "qemu"),
        }
    }
}

/// Fixed retry intervals per stage. No backoff growth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollIntervals {
    pub api: Duration,
    pub etcd: Duration,
    pub kubeconfig: Duration,
    pub readiness: Duration,
    /// Cadence of the intermediate status snapshot during the readiness stage
    pub status: Duration,
    pub dns: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            api: Duration::from_secs(3),
            etcd: Duration::from_secs(3),
            kubeconfig: Duration::from_secs(3),
            readiness: Duration::from_secs(5),
            status: Duration::from_secs(30),
            dns: Duration::from_secs(2),
        }
    }
}

/// Settings for the in-cluster DNS lookup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsProbeConfig {
    /// Namespace of the DNS service pods
    pub dns_namespace: String,
    /// Label selector of the DNS service pods
    pub dns_selector: String,
    /// Budget for the DNS pods to turn Ready
    pub dns_ready_budget: Duration,
    /// Namespace the probe pod is created in
    pub namespace: String,
    pub pod_name: String,
    pub image: String,
    /// Budget for the probe pod to turn Ready
    pub probe_ready_budget: Duration,
    /// Name resolved from inside the probe
    pub lookup: String,
}

impl Default for DnsProbeConfig {
    fn default() -> Self {
        Self {
            dns_namespace: KUBE_SYSTEM_NAMESPACE.to_string(),
            dns_selector: DNS_LABEL_SELECTOR.to_string(),
            dns_ready_budget: Duration::from_secs(120),
            namespace: "default".to_string(),
            pod_name: "dns-probe".to_string(),
            image: "busybox:1.36".to_string(),
            probe_ready_budget: Duration::from_secs(60),
            lookup: "kubernetes.default".to_string(),
        }
    }
}

/// Immutable input to a verification run
#[derive(Clone, Debug)]
pub struct ReadinessConfig {
    /// Name given to `talosctl cluster create`
    pub cluster_name: String,
    /// Control-plane node address used for every talosctl call
    pub endpoint: String,
    pub provisioner: Provisioner,
    /// Workers + 1 control plane
    pub expected_nodes: usize,
    /// Overall budget shared by every stage
    pub timeout: Duration,
    pub wait_for_ready: bool,
    pub dns_readiness_check: bool,
    /// talosconfig written by `talosctl cluster create`
    pub talosconfig: PathBuf,
    /// Where the retrieved kubeconfig is written (overwritten if present)
    pub kubeconfig: PathBuf,
    pub intervals: PollIntervals,
    pub dns_probe: DnsProbeConfig,
}

impl ReadinessConfig {
    /// Build a config for a cluster with `workers` worker nodes and one
    /// control-plane node.
    pub fn new(
        cluster_name: impl Into<String>,
        endpoint: impl Into<String>,
        workers: usize,
        timeout: Duration,
        talosconfig: impl Into<PathBuf>,
        kubeconfig: impl Into<PathBuf>,
    ) -> Result<Self> {
        let expected_nodes = workers
            .checked_add(1)
            .ok_or_else(|| Error::validation("worker count is too large"))?;
        let config = Self {
            cluster_name: cluster_name.into(),
            endpoint: endpoint.into(),
            provisioner: Provisioner::default(),
            expected_nodes,
            timeout,
            wait_for_ready: true,
            dns_readiness_check: false,
            talosconfig: talosconfig.into(),
            kubeconfig: kubeconfig.into(),
            intervals: PollIntervals::default(),
            dns_probe: DnsProbeConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::validation("control-plane endpoint must not be empty"));
        }
        if self.cluster_name.trim().is_empty() {
            return Err(Error::validation("cluster name must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(Error::validation("timeout must be greater than zero"));
        }
        if self.expected_nodes == 0 {
            return Err(Error::validation("expected node count must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(workers: usize, timeout: u64) -> Result<ReadinessConfig> {
        ReadinessConfig::new(
            "talos-default",
            "10.5.0.2",
            workers,
            Duration::from_secs(timeout),
            "/tmp/talosconfig",
            "/tmp/kubeconfig",
        )
    }

    #[test]
    fn expected_nodes_counts_control_plane() {
        assert_eq!(config(0, 300).unwrap().expected_nodes, 1);
        assert_eq!(config(1, 300).unwrap().expected_nodes, 2);
        assert_eq!(config(3, 300).unwrap().expected_nodes, 4);
    }

    #[test]
    fn overflowing_worker_count_is_rejected() {
        let err = config(usize::MAX, 300).unwrap_err();
        assert!(err.to_string().contains("worker"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = config(1, 0).unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let err = ReadinessConfig::new(
            "talos-default",
            "  ",
            1,
            Duration::from_secs(60),
            "/tmp/talosconfig",
            "/tmp/kubeconfig",
        )
        .unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn defaults_match_ci_cadence() {
        let c = config(1, 300).unwrap();
        assert!(c.wait_for_ready);
        assert!(!c.dns_readiness_check);
        assert_eq!(c.intervals.api, Duration::from_secs(3));
        assert_eq!(c.intervals.readiness, Duration::from_secs(5));
        assert_eq!(c.intervals.status, Duration::from_secs(30));
        assert_eq!(c.dns_probe.dns_ready_budget, Duration::from_secs(120));
        assert_eq!(c.dns_probe.probe_ready_budget, Duration::from_secs(60));
        assert_eq!(c.dns_probe.dns_selector, "k8s-app=kube-dns");
    }

    #[test]
    fn provisioner_display() {
        assert_eq!(Provisioner::Docker.to_string(), "docker");
        assert_eq!(Provisioner::Qemu.to_string(), "qemu");
    }
}
