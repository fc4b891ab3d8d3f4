//! Readiness verification for freshly created Talos clusters
//!
//! A [`Verifier`] walks a fixed sequence of stages against one shared
//! deadline: control-plane API, bootstrap, etcd, kubeconfig, cluster
//! readiness and an in-cluster DNS lookup. The collaborators it polls
//! ([`ControlPlane`], [`ClusterApi`], [`HostRuntime`]) are traits so the
//! pipeline can be exercised without a cluster.

pub mod cluster;
pub mod config;
pub mod control_plane;
pub mod diagnostics;
pub mod dns;
pub mod error;
pub mod host;
pub mod readiness;
pub mod state;
pub mod verifier;

pub use cluster::{ClusterApi, KubeClusterApi};
pub use config::{DnsProbeConfig, PollIntervals, Provisioner, ReadinessConfig};
pub use control_plane::{ControlPlane, Talosctl};
pub use error::{Error, Result};
pub use host::{CliHostRuntime, HostRuntime};
pub use state::{BootstrapOutcome, ReadinessSummary, Stage};
pub use verifier::Verifier;
