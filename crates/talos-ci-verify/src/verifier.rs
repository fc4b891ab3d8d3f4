//! The readiness pipeline
//!
//! Stages run strictly in order against one deadline created when the run
//! starts. A stage that times out dumps diagnostics and ends the run; a
//! transient error inside a stage is just another failed attempt.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use talos_ci_common::poll::{poll_until_deadline, Attempt, Deadline};
use talos_ci_common::tokens::{field_row, has_token};
use talos_ci_common::{Error as CommonError, KUBE_SYSTEM_NAMESPACE};

use crate::cluster::{render_nodes, render_pods, ClusterApi, PodSummary};
use crate::config::ReadinessConfig;
use crate::control_plane::ControlPlane;
use crate::diagnostics;
use crate::dns::{self, DnsFailure};
use crate::error::{Error, Result};
use crate::host::HostRuntime;
use crate::readiness::{count_crashing, evaluate, ClusterSnapshot};
use crate::state::{BootstrapOutcome, PollState, ReadinessSummary, Stage};

/// Rows of the pod table shown in periodic status snapshots
const STATUS_POD_ROWS: usize = 10;

/// Runs the verification stages for one cluster
pub struct Verifier<P, C, H> {
    config: ReadinessConfig,
    control_plane: P,
    cluster: C,
    host: H,
}

impl<P, C, H> Verifier<P, C, H>
where
    P: ControlPlane,
    C: ClusterApi,
    H: HostRuntime,
{
    pub fn new(config: ReadinessConfig, control_plane: P, cluster: C, host: H) -> Self {
        Self {
            config,
            control_plane,
            cluster,
            host,
        }
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.config
    }

    /// Run every enabled stage until all pass or the deadline expires
    pub async fn run(&self) -> Result<ReadinessSummary> {
        self.config.validate()?;
        let intervals = &self.config.intervals;
        let mut state = PollState::new(self.config.timeout);

        info!(
            cluster = %self.config.cluster_name,
            endpoint = %self.config.endpoint,
            expected_nodes = self.config.expected_nodes,
            timeout = ?self.config.timeout,
            "Verifying cluster readiness"
        );

        let cp = &self.control_plane;
        let deadline = state.deadline;

        state.enter(Stage::ApiReachability);
        self.wait_stage(&state, intervals.api, "control-plane API", move || async move {
            Attempt::from_result(bounded(deadline, cp.version()).await)
        })
        .await?;
        self.stage_passed(&mut state);

        state.enter(Stage::Bootstrap);
        let bootstrap = match bounded(deadline, cp.bootstrap()).await {
            Ok(()) => BootstrapOutcome::Completed,
            Err(e) => {
                warn!(error = %e, "Bootstrap returned an error, continuing (cluster may already be bootstrapped)");
                BootstrapOutcome::SoftFailed(e.to_string())
            }
        };
        self.stage_passed(&mut state);

        state.enter(Stage::EtcdHealth);
        self.wait_stage(&state, intervals.etcd, "etcd service", move || async move {
            match bounded(deadline, cp.service_status("etcd")).await {
                Ok(output) => etcd_state(&output),
                Err(e) => Attempt::Pending(e.to_string()),
            }
        })
        .await?;
        self.stage_passed(&mut state);

        state.enter(Stage::Kubeconfig);
        let kubeconfig = self.config.kubeconfig.as_path();
        self.wait_stage(&state, intervals.kubeconfig, "kubeconfig", move || async move {
            Attempt::from_result(bounded(deadline, cp.write_kubeconfig(kubeconfig)).await)
        })
        .await?;
        info!(path = %kubeconfig.display(), "Kubeconfig written");
        self.stage_passed(&mut state);

        let ready_nodes = if self.config.wait_for_ready {
            state.enter(Stage::ClusterReadiness);
            let ready = self.wait_for_cluster_ready(&mut state).await?;
            self.stage_passed(&mut state);
            Some(ready)
        } else {
            info!("Skipping cluster readiness wait");
            None
        };

        let dns_verified = if self.config.dns_readiness_check {
            state.enter(Stage::DnsFunctional);
            match dns::verify_dns(
                &self.cluster,
                &self.config.dns_probe,
                &state.deadline,
                intervals.dns,
            )
            .await
            {
                Ok(answer) => info!(answer = %answer, "DNS lookup succeeded"),
                Err(DnsFailure::Timeout { last_status, .. }) => {
                    return Err(self.timed_out(&state, last_status).await)
                }
                Err(DnsFailure::Lookup(message)) => {
                    error!(error = %message, "DNS functional check failed");
                    return Err(Error::functional("dns lookup", message));
                }
            }
            self.stage_passed(&mut state);
            true
        } else {
            false
        };

        let summary = ReadinessSummary {
            elapsed: state.elapsed(),
            bootstrap,
            ready_nodes,
            expected_nodes: self.config.expected_nodes,
            dns_verified,
            stages: state.completed().to_vec(),
        };
        info!("{}", summary);
        Ok(summary)
    }

    fn stage_passed(&self, state: &mut PollState) {
        info!(stage = %state.stage(), elapsed = ?state.elapsed(), "Stage passed");
        state.complete();
    }

    /// Poll one stage at a fixed interval against the shared deadline
    async fn wait_stage<T, F, Fut>(
        &self,
        state: &PollState,
        interval: Duration,
        description: &str,
        check: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        info!(stage = %state.stage(), "Waiting for {}...", description);
        match poll_until_deadline(&state.deadline, interval, description, check).await {
            Ok(value) => Ok(value),
            Err(CommonError::Timeout { last_status, .. }) => {
                Err(self.timed_out(state, last_status).await)
            }
            Err(other) => Err(self.timed_out(state, other.to_string()).await),
        }
    }

    /// Readiness loop: evaluate, print a status snapshot when due, then give up
    /// or sleep. Returns the number of Ready nodes.
    async fn wait_for_cluster_ready(&self, state: &mut PollState) -> Result<usize> {
        let intervals = &self.config.intervals;
        info!(
            expected_nodes = self.config.expected_nodes,
            "Waiting for nodes, DNS and system pods..."
        );

        loop {
            let (snapshot, system_pods) = self.observe().await;
            let result = evaluate(&snapshot, self.config.expected_nodes);
            if result.ready {
                info!(status = %result.diagnostic, "Cluster is ready");
                return Ok(snapshot.ready_nodes());
            }
            debug!(reason = %result.diagnostic, "Cluster not ready yet");

            if state.status_due(intervals.status) {
                self.log_status(state, &snapshot, &system_pods);
                state.mark_status_printed();
            }

            if state.deadline.is_expired() {
                return Err(self.timed_out(state, result.diagnostic).await);
            }
            state.deadline.sleep(intervals.readiness).await;
        }
    }

    /// One pass over the orchestration API for the readiness rule
    async fn observe(&self) -> (ClusterSnapshot, Vec<PodSummary>) {
        let dns = &self.config.dns_probe;
        let nodes = self.cluster.nodes().await.map_err(|e| e.to_string());
        let dns_pods = self
            .cluster
            .pods(&dns.dns_namespace, &dns.dns_selector)
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "Failed to list DNS pods");
                Vec::new()
            });
        let system_pods = self
            .cluster
            .pods(KUBE_SYSTEM_NAMESPACE, "")
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "Failed to list system pods");
                Vec::new()
            });

        let snapshot = ClusterSnapshot {
            nodes,
            dns_pods,
            crashing_pods: count_crashing(&system_pods),
        };
        (snapshot, system_pods)
    }

    fn log_status(&self, state: &PollState, snapshot: &ClusterSnapshot, system_pods: &[PodSummary]) {
        let now = Utc::now();
        let nodes = match &snapshot.nodes {
            Ok(nodes) => render_nodes(nodes, &now),
            Err(e) => format!("node list unavailable: {}", e),
        };
        let pods = render_pods(system_pods, &now);
        let mut head: Vec<&str> = pods.lines().take(STATUS_POD_ROWS + 1).collect();
        let hidden = system_pods.len().saturating_sub(STATUS_POD_ROWS);
        let more = format!("... {} more", hidden);
        if hidden > 0 {
            head.push(&more);
        }
        info!(
            elapsed = ?state.elapsed(),
            ready_nodes = snapshot.ready_nodes(),
            expected_nodes = self.config.expected_nodes,
            "Cluster status\n{}\n\n{}",
            nodes,
            head.join("\n")
        );
    }

    /// Collect and emit diagnostics for the current stage, then build the error
    async fn timed_out(&self, state: &PollState, last_status: String) -> Error {
        let stage = state.stage();
        let elapsed = state.elapsed();
        error!(
            stage = %stage,
            elapsed = ?elapsed,
            last_status = %last_status,
            "Stage timed out"
        );

        let diagnostics = diagnostics::collect(
            stage,
            &self.config,
            &self.control_plane,
            &self.cluster,
            &self.host,
        )
        .await;
        diagnostics.emit();

        Error::Timeout {
            stage,
            elapsed,
            last_status,
            diagnostics,
        }
    }
}

/// Run one control-plane call, cut off once the shared deadline passes
async fn bounded<T, Fut>(deadline: Deadline, call: Fut) -> std::result::Result<T, CommonError>
where
    Fut: Future<Output = std::result::Result<T, CommonError>>,
{
    deadline.run(call).await.unwrap_or_else(|| {
        Err(CommonError::command(
            "talosctl",
            "call cut off at the verification deadline",
        ))
    })
}

/// Ready once the `STATE` row of `talosctl service etcd` reads `Running`
fn etcd_state(output: &str) -> Attempt<()> {
    match field_row(output, "STATE") {
        Some(row) if has_token(row, "Running") => Attempt::Ready(()),
        Some(row) => Attempt::Pending(row.trim().to_string()),
        None => Attempt::Pending("no STATE row in etcd service output".to_string()),
    }
}
