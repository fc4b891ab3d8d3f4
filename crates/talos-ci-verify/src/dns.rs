//! In-cluster DNS lookup through a disposable probe pod
//!
//! Node and pod readiness say nothing about whether CoreDNS actually answers.
//! This check creates a small pod, resolves a well-known service name from
//! inside it and removes the pod again, whatever the outcome.

use std::time::Duration;

use tracing::{debug, info, warn};

use talos_ci_common::poll::{poll_until_deadline, Attempt, Deadline};
use talos_ci_common::tokens::tokens;
use talos_ci_common::Error as CommonError;

use crate::cluster::{ClusterApi, ProbePod};
use crate::config::DnsProbeConfig;

/// How long the probe container stays alive waiting for the exec
const PROBE_KEEPALIVE_SECS: &str = "3600";

/// Why the DNS check did not pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsFailure {
    /// The DNS pods or the probe pod did not turn Ready in time
    Timeout {
        elapsed: Duration,
        last_status: String,
    },
    /// The probe could not be started or the lookup returned no answer
    Lookup(String),
}

impl From<CommonError> for DnsFailure {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Timeout {
                description,
                elapsed,
                last_status,
            } => DnsFailure::Timeout {
                elapsed,
                last_status: format!("waiting for {}: {}", description, last_status),
            },
            other => DnsFailure::Lookup(other.to_string()),
        }
    }
}

/// Pod spec for the lookup probe
pub fn probe_pod(config: &DnsProbeConfig) -> ProbePod {
    ProbePod {
        namespace: config.namespace.clone(),
        name: config.pod_name.clone(),
        image: config.image.clone(),
        command: vec!["sleep".to_string(), PROBE_KEEPALIVE_SECS.to_string()],
    }
}

/// Run the DNS functional check.
///
/// Both waits use their own budget capped by `deadline`. The probe pod is
/// deleted on every path once creation was attempted. Returns the resolved
/// answer on success.
pub async fn verify_dns<C>(
    cluster: &C,
    config: &DnsProbeConfig,
    deadline: &Deadline,
    interval: Duration,
) -> Result<String, DnsFailure>
where
    C: ClusterApi + ?Sized,
{
    let ready = wait_for_dns_pods(cluster, config, deadline, interval).await?;
    info!(pods = ready, "DNS pods ready, starting lookup probe");

    let probe = probe_pod(config);
    let result = run_probe(cluster, config, &probe, deadline, interval).await;

    match cluster.delete_pod(&probe.namespace, &probe.name).await {
        Ok(()) => debug!(pod = %probe.name, "Probe pod deleted"),
        Err(e) => warn!(pod = %probe.name, error = %e, "Failed to delete probe pod"),
    }

    result
}

async fn wait_for_dns_pods<C>(
    cluster: &C,
    config: &DnsProbeConfig,
    deadline: &Deadline,
    interval: Duration,
) -> Result<usize, CommonError>
where
    C: ClusterApi + ?Sized,
{
    let budget = deadline.capped(config.dns_ready_budget);
    let namespace = config.dns_namespace.as_str();
    let selector = config.dns_selector.as_str();

    poll_until_deadline(&budget, interval, "DNS pods to be ready", move || async move {
        let pods = match cluster.pods(namespace, selector).await {
            Ok(pods) => pods,
            Err(e) => return Attempt::Pending(e.to_string()),
        };
        if pods.is_empty() {
            return Attempt::Pending(format!("no pods matching {}", selector));
        }
        let not_ready: Vec<String> = pods
            .iter()
            .filter(|p| !p.is_running_and_ready())
            .map(|p| format!("{} ({})", p.name, p.status))
            .collect();
        if not_ready.is_empty() {
            Attempt::Ready(pods.len())
        } else {
            Attempt::Pending(format!("not ready: {}", not_ready.join(", ")))
        }
    })
    .await
}

async fn run_probe<C>(
    cluster: &C,
    config: &DnsProbeConfig,
    probe: &ProbePod,
    deadline: &Deadline,
    interval: Duration,
) -> Result<String, DnsFailure>
where
    C: ClusterApi + ?Sized,
{
    cluster
        .create_pod(probe)
        .await
        .map_err(|e| DnsFailure::Lookup(format!("failed to create probe pod: {}", e)))?;

    let budget = deadline.capped(config.probe_ready_budget);
    let namespace = probe.namespace.as_str();
    let name = probe.name.as_str();
    poll_until_deadline(&budget, interval, "DNS probe pod to be ready", move || async move {
        match cluster.pod(namespace, name).await {
            Ok(Some(pod)) if pod.is_running_and_ready() => Attempt::Ready(()),
            Ok(Some(pod)) => Attempt::Pending(format!("probe pod is {}", pod.status)),
            Ok(None) => Attempt::Pending("probe pod not found".to_string()),
            Err(e) => Attempt::Pending(e.to_string()),
        }
    })
    .await?;

    let output = cluster
        .exec(
            namespace,
            name,
            vec!["nslookup".to_string(), config.lookup.clone()],
        )
        .await
        .map_err(|e| DnsFailure::Lookup(format!("exec into probe pod failed: {}", e)))?;

    let answer = parse_answer(&output.stdout);
    match answer {
        Some(answer) if output.success => Ok(answer),
        _ => {
            let detail = [output.stderr.trim(), output.stdout.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or("no output");
            Err(DnsFailure::Lookup(format!(
                "nslookup {} did not resolve: {}",
                config.lookup, detail
            )))
        }
    }
}

/// Resolved name (and first address, if printed) from nslookup output
fn parse_answer(stdout: &str) -> Option<String> {
    let mut lines = stdout
        .lines()
        .skip_while(|line| tokens(line).next() != Some("Name:"));
    let name = tokens(lines.next()?).nth(1)?;
    let address = lines.find_map(|line| {
        let mut t = tokens(line);
        if t.next() == Some("Address:") {
            t.next()
        } else {
            None
        }
    });
    Some(match address {
        Some(address) => format!("{} -> {}", name, address),
        None => name.to_string(),
    })
}
