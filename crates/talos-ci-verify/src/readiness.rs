//! Full-readiness rule evaluated on every poll of the cluster-readiness stage

use talos_ci_common::tokens::count_with_any_token;

use crate::cluster::{NodeSummary, PodSummary};
use crate::state::StageResult;

/// Pod STATUS tokens that count as a crashing system pod
pub const CRASH_STATUSES: &[&str] = &["Error", "CrashLoopBackOff"];
/// STATUS prefix `kubectl get pods` uses while init containers run
const INIT_STATUS_PREFIX: &str = "Init:";

/// Everything one readiness poll observed
#[derive(Clone, Debug)]
pub struct ClusterSnapshot {
    /// `Err` if the node list query failed
    pub nodes: Result<Vec<NodeSummary>, String>,
    pub dns_pods: Vec<PodSummary>,
    /// Crashing pods in kube-system; a failed query counts as zero
    pub crashing_pods: usize,
}

impl ClusterSnapshot {
    pub fn ready_nodes(&self) -> usize {
        self.nodes
            .as_ref()
            .map(|nodes| nodes.iter().filter(|n| n.is_ready()).count())
            .unwrap_or(0)
    }
}

/// Number of pods whose STATUS is a crash status token.
///
/// Init container failures render as `Init:<reason>` and count the same as
/// their main-container equivalents.
pub fn count_crashing(pods: &[PodSummary]) -> usize {
    count_with_any_token(
        pods.iter().map(|p| {
            let status = p.status.as_str();
            status.strip_prefix(INIT_STATUS_PREFIX).unwrap_or(status)
        }),
        CRASH_STATUSES,
    )
}

/// Apply the readiness rule.
///
/// Ready only when the node list succeeded, at least one node and at least
/// `expected_nodes` nodes are Ready, DNS pods exist and are all Running with
/// every condition True, and no system pod is crash-looping. The diagnostic
/// lists every unmet condition.
pub fn evaluate(snapshot: &ClusterSnapshot, expected_nodes: usize) -> StageResult {
    let mut unmet = Vec::new();

    let ready_nodes = snapshot.ready_nodes();
    match &snapshot.nodes {
        Err(e) => unmet.push(format!("node list unavailable: {}", e)),
        Ok(nodes) => {
            if ready_nodes == 0 {
                unmet.push(format!("no Ready nodes ({} registered)", nodes.len()));
            }
            if ready_nodes < expected_nodes {
                unmet.push(format!("ready nodes {}/{}", ready_nodes, expected_nodes));
            }
        }
    }

    if snapshot.dns_pods.is_empty() {
        unmet.push("no DNS pods found".to_string());
    } else {
        let not_ready: Vec<String> = snapshot
            .dns_pods
            .iter()
            .filter(|p| !p.is_running_and_ready())
            .map(|p| format!("{} ({})", p.name, p.status))
            .collect();
        if !not_ready.is_empty() {
            unmet.push(format!("DNS pods not ready: {}", not_ready.join(", ")));
        }
    }

    if snapshot.crashing_pods > 0 {
        unmet.push(format!(
            "{} system pod(s) in Error/CrashLoopBackOff",
            snapshot.crashing_pods
        ));
    }

    if unmet.is_empty() {
        StageResult::ready(format!(
            "{}/{} nodes ready, {} DNS pod(s) ready",
            ready_nodes,
            expected_nodes,
            snapshot.dns_pods.len()
        ))
    } else {
        StageResult::pending(unmet.join("; "))
    }
}
