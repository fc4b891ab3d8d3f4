//! Diagnostic bundles dumped when a stage gives up
//!
//! Collection is best effort: every section records either the command
//! output or why it could not be gathered. Nothing here influences whether a
//! stage passes.

use std::fmt::Display;
use std::io::Write;

use chrono::Utc;
use tracing::error;

use talos_ci_common::KUBE_SYSTEM_NAMESPACE;

use crate::cluster::{render_events, render_nodes, render_pods, ClusterApi};
use crate::config::ReadinessConfig;
use crate::control_plane::ControlPlane;
use crate::host::HostRuntime;
use crate::state::Stage;

/// Log lines kept per DNS pod container instance
const DNS_LOG_TAIL_LINES: i64 = 50;
/// Events kept from the system namespace
const EVENT_LIMIT: usize = 30;

/// One titled block of the bundle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticSection {
    pub title: String,
    pub body: String,
}

/// Ordered diagnostic sections for a failed run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticBundle {
    sections: Vec<DiagnosticSection>,
}

impl DiagnosticBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a section from a collection result; failures become the body
    pub fn push<E: Display>(&mut self, title: impl Into<String>, result: Result<String, E>) {
        let body = match result {
            Ok(body) if body.trim().is_empty() => "(no output)".to_string(),
            Ok(body) => body.trim_end().to_string(),
            Err(e) => format!("unavailable: {}", e),
        };
        self.sections.push(DiagnosticSection {
            title: title.into(),
            body,
        });
    }

    pub fn sections(&self) -> &[DiagnosticSection] {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Render as collapsible GitHub Actions log groups
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&format!(
                "::group::{}\n{}\n::endgroup::\n",
                section.title, section.body
            ));
        }
        out
    }

    /// Write the rendered bundle to stderr
    pub fn emit(&self) {
        error!(sections = self.sections.len(), "Dumping cluster diagnostics");
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(self.render().as_bytes());
        let _ = stderr.flush();
    }
}

/// Gather diagnostics appropriate for a failure in `stage`.
///
/// Control-plane and host sections are always collected. Kubernetes sections
/// need the kubeconfig, so they are only collected once that stage passed.
pub async fn collect<P, C, H>(
    stage: Stage,
    config: &ReadinessConfig,
    control_plane: &P,
    cluster: &C,
    host: &H,
) -> DiagnosticBundle
where
    P: ControlPlane + ?Sized,
    C: ClusterApi + ?Sized,
    H: HostRuntime + ?Sized,
{
    let mut bundle = DiagnosticBundle::new();

    bundle.push("talosctl health", control_plane.health().await);
    bundle.push("talosctl services", control_plane.services().await);
    bundle.push(
        format!("{} nodes", config.provisioner),
        host.snapshot().await,
    );

    if !stage.has_kubeconfig() {
        return bundle;
    }

    let now = Utc::now();
    bundle.push(
        "kubectl get nodes",
        cluster.nodes().await.map(|n| render_nodes(&n, &now)),
    );
    bundle.push(
        format!("kubectl get pods -n {}", KUBE_SYSTEM_NAMESPACE),
        cluster
            .pods(KUBE_SYSTEM_NAMESPACE, "")
            .await
            .map(|p| render_pods(&p, &now)),
    );

    let dns = &config.dns_probe;
    bundle.push(
        format!("describe pods -l {}", dns.dns_selector),
        cluster
            .describe_pods(&dns.dns_namespace, &dns.dns_selector)
            .await,
    );

    match cluster.pods(&dns.dns_namespace, &dns.dns_selector).await {
        Ok(dns_pods) => {
            for pod in &dns_pods {
                for previous in [false, true] {
                    let label = if previous { "previous" } else { "current" };
                    bundle.push(
                        format!("logs {} ({})", pod.name, label),
                        cluster
                            .pod_logs(&dns.dns_namespace, &pod.name, previous, DNS_LOG_TAIL_LINES)
                            .await,
                    );
                }
            }
        }
        Err(e) => bundle.push::<String>("DNS pod logs", Err(e.to_string())),
    }

    bundle.push(
        format!("events -n {}", KUBE_SYSTEM_NAMESPACE),
        cluster
            .events(KUBE_SYSTEM_NAMESPACE, EVENT_LIMIT)
            .await
            .map(|e| render_events(&e, &now)),
    );

    bundle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MockClusterApi, NodeSummary, PodSummary};
    use crate::control_plane::MockControlPlane;
    use crate::host::MockHostRuntime;
    use std::time::Duration;
    use talos_ci_common::Error;

    fn config() -> ReadinessConfig {
        ReadinessConfig::new(
            "talos-default",
            "10.5.0.2",
            1,
            Duration::from_secs(300),
            "/tmp/talosconfig",
            "/tmp/kubeconfig",
        )
        .unwrap()
    }

    fn control_plane() -> MockControlPlane {
        let mut cp = MockControlPlane::new();
        cp.expect_health()
            .returning(|| Err(Error::command("talosctl", "etcd unhealthy")));
        cp.expect_services()
            .returning(|| Ok("SERVICE   STATE\netcd      Preparing\n".to_string()));
        cp
    }

    fn host() -> MockHostRuntime {
        let mut host = MockHostRuntime::new();
        host.expect_snapshot()
            .returning(|| Ok("talos-default-controlplane-1   Up 2 minutes".to_string()));
        host
    }

    #[test]
    fn push_records_failures_and_empty_output() {
        let mut bundle = DiagnosticBundle::new();
        bundle.push::<String>("ok", Ok("line\n".to_string()));
        bundle.push::<String>("empty", Ok("  \n".to_string()));
        bundle.push("failed", Err::<String, _>("boom"));

        let bodies: Vec<&str> = bundle.sections().iter().map(|s| s.body.as_str()).collect();
        assert_eq!(bodies, vec!["line", "(no output)", "unavailable: boom"]);
    }

    #[test]
    fn render_wraps_sections_in_groups() {
        let mut bundle = DiagnosticBundle::new();
        bundle.push::<String>("nodes", Ok("cp Ready".to_string()));
        assert_eq!(bundle.render(), "::group::nodes\ncp Ready\n::endgroup::\n");
    }

    #[tokio::test]
    async fn early_stage_skips_kubernetes_sections() {
        // No expectations: any ClusterApi call would panic
        let cluster = MockClusterApi::new();
        let bundle = collect(
            Stage::EtcdHealth,
            &config(),
            &control_plane(),
            &cluster,
            &host(),
        )
        .await;

        let titles: Vec<&str> = bundle.sections().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["talosctl health", "talosctl services", "docker nodes"]
        );
        assert!(bundle.sections()[0].body.contains("etcd unhealthy"));
    }

    #[tokio::test]
    async fn readiness_stage_collects_full_bundle() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_nodes().returning(|| {
            Ok(vec![NodeSummary {
                name: "talos-default-controlplane-1".to_string(),
                status: "Ready".to_string(),
                roles: "control-plane".to_string(),
                version: "v1.32.0".to_string(),
                created: None,
            }])
        });
        cluster.expect_pods().returning(|_, _| {
            Ok(vec![PodSummary {
                name: "coredns-a".to_string(),
                namespace: "kube-system".to_string(),
                phase: "Running".to_string(),
                status: "CrashLoopBackOff".to_string(),
                ready_containers: "0/1".to_string(),
                restarts: 5,
                conditions_true: false,
                created: None,
            }])
        });
        cluster
            .expect_describe_pods()
            .returning(|_, _| Ok("Name: coredns-a".to_string()));
        cluster
            .expect_pod_logs()
            .withf(|ns, name, _, tail| ns == "kube-system" && name == "coredns-a" && *tail == 50)
            .times(2)
            .returning(|_, _, previous, _| {
                Ok(if previous { "panic: plugin/loop" } else { "" }.to_string())
            });
        cluster.expect_events().returning(|_, _| Ok(vec![]));

        let bundle = collect(
            Stage::ClusterReadiness,
            &config(),
            &control_plane(),
            &cluster,
            &host(),
        )
        .await;

        let titles: Vec<&str> = bundle.sections().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "talosctl health",
                "talosctl services",
                "docker nodes",
                "kubectl get nodes",
                "kubectl get pods -n kube-system",
                "describe pods -l k8s-app=kube-dns",
                "logs coredns-a (current)",
                "logs coredns-a (previous)",
                "events -n kube-system",
            ]
        );
        let previous = &bundle.sections()[7];
        assert_eq!(previous.body, "panic: plugin/loop");
    }
}
