//! Per-run bookkeeping: stages, poll state and the success summary

use std::fmt;
use std::time::Duration;

use talos_ci_common::poll::Deadline;
use tokio::time::Instant;

/// Verification stages, in pipeline order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    ApiReachability,
    Bootstrap,
    EtcdHealth,
    Kubeconfig,
    ClusterReadiness,
    DnsFunctional,
}

impl Stage {
    /// Whether the orchestration API is usable once this stage is reached
    pub fn has_kubeconfig(self) -> bool {
        self > Stage::Kubeconfig
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ApiReachability => "api-reachability",
            Stage::Bootstrap => "bootstrap",
            Stage::EtcdHealth => "etcd-health",
            Stage::Kubeconfig => "kubeconfig",
            Stage::ClusterReadiness => "cluster-readiness",
            Stage::DnsFunctional => "dns-functional",
        };
        f.write_str(name)
    }
}

/// Result of one readiness attempt. Only the latest one is kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageResult {
    pub ready: bool,
    pub diagnostic: String,
}

impl StageResult {
    pub fn ready(diagnostic: impl Into<String>) -> Self {
        Self {
            ready: true,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn pending(diagnostic: impl Into<String>) -> Self {
        Self {
            ready: false,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Mutable state owned by a single verifier run
#[derive(Debug)]
pub struct PollState {
    /// Shared by every stage; never restarted
    pub deadline: Deadline,
    stage: Stage,
    completed: Vec<Stage>,
    last_status_print: Instant,
}

impl PollState {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Deadline::after(timeout),
            stage: Stage::ApiReachability,
            completed: Vec::new(),
            last_status_print: Instant::now(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn elapsed(&self) -> Duration {
        self.deadline.elapsed()
    }

    /// Move to `stage`. Stages only ever advance.
    pub fn enter(&mut self, stage: Stage) {
        debug_assert!(stage >= self.stage, "stages never regress");
        self.stage = stage;
        self.last_status_print = Instant::now();
    }

    /// Record the current stage as confirmed
    pub fn complete(&mut self) {
        if !self.completed.contains(&self.stage) {
            self.completed.push(self.stage);
        }
    }

    pub fn completed(&self) -> &[Stage] {
        &self.completed
    }

    /// Whether a status snapshot is due, given the print cadence
    pub fn status_due(&self, every: Duration) -> bool {
        self.last_status_print.elapsed() >= every
    }

    pub fn mark_status_printed(&mut self) {
        self.last_status_print = Instant::now();
    }
}

/// How the one-shot bootstrap call went
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Completed,
    /// Non-zero result, usually because the cluster is already bootstrapped
    SoftFailed(String),
}

/// Returned when every enabled stage passed
#[derive(Clone, Debug)]
pub struct ReadinessSummary {
    pub elapsed: Duration,
    pub bootstrap: BootstrapOutcome,
    /// Ready nodes seen by the readiness stage (None if it was skipped)
    pub ready_nodes: Option<usize>,
    pub expected_nodes: usize,
    pub dns_verified: bool,
    pub stages: Vec<Stage>,
}

impl fmt::Display for ReadinessSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster verified in {:?}", self.elapsed)?;
        if let Some(ready) = self.ready_nodes {
            write!(f, ", {}/{} nodes ready", ready, self.expected_nodes)?;
        }
        if self.dns_verified {
            write!(f, ", DNS resolving")?;
        }
        if let BootstrapOutcome::SoftFailed(_) = self.bootstrap {
            write!(f, " (bootstrap reported an error)")?;
        }
        Ok(())
    }
}
