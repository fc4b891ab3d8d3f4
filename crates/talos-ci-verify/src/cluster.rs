//! Kubernetes API access for readiness checks, diagnostics and the DNS probe
//!
//! The real implementation talks to the API server through kube-rs using the
//! kubeconfig written by the control-plane stage. Results are reduced to
//! small summaries carrying the same STATUS strings `kubectl get` prints.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, Event, Node, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, AttachParams, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;
use tracing::debug;

use talos_ci_common::format::{format_age, render_table};
use talos_ci_common::kube_utils::{
    self, all_conditions_true, is_conflict, is_not_found, node_status, pod_ready_containers,
    pod_restarts, pod_status,
};
use talos_ci_common::tokens::has_token;
use talos_ci_common::Error;

/// Label put on pods created by talos-ci
pub const MANAGED_BY_LABEL: (&str, &str) = ("app.kubernetes.io/managed-by", "talos-ci");

/// One row of `kubectl get nodes`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSummary {
    pub name: String,
    /// STATUS column, e.g. `Ready` or `NotReady,SchedulingDisabled`
    pub status: String,
    pub roles: String,
    pub version: String,
    pub created: Option<DateTime<Utc>>,
}

impl NodeSummary {
    /// Whether the STATUS column carries the standalone `Ready` token
    pub fn is_ready(&self) -> bool {
        has_token(&self.status, "Ready")
    }

    fn from_node(node: &Node) -> Self {
        let labels = node.metadata.labels.clone().unwrap_or_default();
        let mut roles: Vec<&str> = labels
            .keys()
            .filter_map(|k| k.strip_prefix("node-role.kubernetes.io/"))
            .collect();
        roles.sort_unstable();
        Self {
            name: node.metadata.name.clone().unwrap_or_default(),
            status: node_status(node),
            roles: if roles.is_empty() {
                "<none>".to_string()
            } else {
                roles.join(",")
            },
            version: node
                .status
                .as_ref()
                .and_then(|s| s.node_info.as_ref())
                .map(|i| i.kubelet_version.clone())
                .unwrap_or_default(),
            created: node.metadata.creation_timestamp.as_ref().map(|t| t.0),
        }
    }
}

/// One row of `kubectl get pods`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    /// Raw pod phase (`Pending`, `Running`, ...)
    pub phase: String,
    /// STATUS column, e.g. `Running`, `CrashLoopBackOff`, `Error`
    pub status: String,
    /// READY column, e.g. `1/1`
    pub ready_containers: String,
    pub restarts: i32,
    /// Pod has conditions and all of them are `True`
    pub conditions_true: bool,
    pub created: Option<DateTime<Utc>>,
}

impl PodSummary {
    /// Phase `Running` and every condition `True`
    pub fn is_running_and_ready(&self) -> bool {
        self.phase == "Running" && self.conditions_true
    }

    fn from_pod(pod: &Pod) -> Self {
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            phase: pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            status: pod_status(pod),
            ready_containers: pod_ready_containers(pod),
            restarts: pod_restarts(pod),
            conditions_true: all_conditions_true(pod),
            created: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
        }
    }
}

/// One row of `kubectl get events`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSummary {
    pub last_seen: Option<DateTime<Utc>>,
    pub type_: String,
    pub reason: String,
    /// `kind/name` of the involved object
    pub object: String,
    pub message: String,
}

impl EventSummary {
    fn from_event(event: &Event) -> Self {
        let last_seen = event
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0))
            .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0));
        let obj = &event.involved_object;
        Self {
            last_seen,
            type_: event.type_.clone().unwrap_or_default(),
            reason: event.reason.clone().unwrap_or_default(),
            object: format!(
                "{}/{}",
                obj.kind.as_deref().unwrap_or_default().to_lowercase(),
                obj.name.as_deref().unwrap_or_default()
            ),
            message: event.message.clone().unwrap_or_default().trim().to_string(),
        }
    }
}

/// Disposable pod created to run a command inside the cluster network
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbePod {
    pub namespace: String,
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
}

impl ProbePod {
    fn to_pod(&self) -> Pod {
        let labels = BTreeMap::from([
            (MANAGED_BY_LABEL.0.to_string(), MANAGED_BY_LABEL.1.to_string()),
            ("app.kubernetes.io/name".to_string(), self.name.clone()),
        ]);
        Pod {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "probe".to_string(),
                    image: Some(self.image.clone()),
                    command: Some(self.command.clone()),
                    ..Default::default()
                }],
                restart_policy: Some("Never".to_string()),
                termination_grace_period_seconds: Some(0),
                ..Default::default()
            }),
            status: None,
        }
    }
}

/// Output of a command executed inside a pod
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Orchestration API operations used by the verifier
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn nodes(&self) -> Result<Vec<NodeSummary>, Error>;

    /// Pods in `namespace` matching `selector` (empty selector matches all)
    async fn pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodSummary>, Error>;

    /// A single pod, `None` if it does not exist
    async fn pod(&self, namespace: &str, name: &str) -> Result<Option<PodSummary>, Error>;

    /// Detailed spec/status dump of matching pods (diagnostics only)
    async fn describe_pods(&self, namespace: &str, selector: &str) -> Result<String, Error>;

    /// Tail of a pod's logs, current or previous container instance
    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        previous: bool,
        tail_lines: i64,
    ) -> Result<String, Error>;

    /// Most recent events in `namespace`, oldest first
    async fn events(&self, namespace: &str, limit: usize) -> Result<Vec<EventSummary>, Error>;

    /// Create a probe pod; an existing pod with the same name is reused
    async fn create_pod(&self, probe: &ProbePod) -> Result<(), Error>;

    async fn exec(
        &self,
        namespace: &str,
        name: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput, Error>;

    /// Delete a pod; a pod that is already gone is not an error
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// [`ClusterApi`] backed by kube-rs.
///
/// The client is built on first use from `kubeconfig`, which only exists once
/// the control plane has handed out credentials.
pub struct KubeClusterApi {
    kubeconfig: PathBuf,
    client: OnceCell<Client>,
}

impl KubeClusterApi {
    pub fn new(kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<Client, Error> {
        self.client
            .get_or_try_init(|| kube_utils::create_client(&self.kubeconfig))
            .await
            .cloned()
    }

    async fn pod_api(&self, namespace: &str) -> Result<Api<Pod>, Error> {
        Ok(Api::namespaced(self.client().await?, namespace))
    }
}

fn list_params(selector: &str) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(selector)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn nodes(&self) -> Result<Vec<NodeSummary>, Error> {
        let api: Api<Node> = Api::all(self.client().await?);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(NodeSummary::from_node).collect())
    }

    async fn pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodSummary>, Error> {
        let list = self
            .pod_api(namespace)
            .await?
            .list(&list_params(selector))
            .await?;
        Ok(list.items.iter().map(PodSummary::from_pod).collect())
    }

    async fn pod(&self, namespace: &str, name: &str) -> Result<Option<PodSummary>, Error> {
        let pod = self.pod_api(namespace).await?.get_opt(name).await?;
        Ok(pod.as_ref().map(PodSummary::from_pod))
    }

    async fn describe_pods(&self, namespace: &str, selector: &str) -> Result<String, Error> {
        let list = self
            .pod_api(namespace)
            .await?
            .list(&list_params(selector))
            .await?;
        if list.items.is_empty() {
            return Ok(format!("no pods matching '{}' in {}", selector, namespace));
        }

        let mut out = String::new();
        for pod in &list.items {
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            let node = pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.as_deref())
                .unwrap_or("<unscheduled>");
            let status = serde_yaml::to_string(&pod.status).map_err(|e| {
                Error::internal_with_context("describe_pods", format!("yaml: {}", e))
            })?;
            out.push_str(&format!(
                "Name: {}\nNamespace: {}\nNode: {}\nStatus:\n{}\n",
                name, namespace, node, status
            ));
        }
        Ok(out)
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        previous: bool,
        tail_lines: i64,
    ) -> Result<String, Error> {
        let params = LogParams {
            previous,
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        Ok(self.pod_api(namespace).await?.logs(name, &params).await?)
    }

    async fn events(&self, namespace: &str, limit: usize) -> Result<Vec<EventSummary>, Error> {
        let api: Api<Event> = Api::namespaced(self.client().await?, namespace);
        let list = api.list(&ListParams::default()).await?;
        let mut events: Vec<EventSummary> =
            list.items.iter().map(EventSummary::from_event).collect();
        events.sort_by_key(|e| e.last_seen);
        let skip = events.len().saturating_sub(limit);
        Ok(events.split_off(skip))
    }

    async fn create_pod(&self, probe: &ProbePod) -> Result<(), Error> {
        let api = self.pod_api(&probe.namespace).await?;
        match api.create(&PostParams::default(), &probe.to_pod()).await {
            Ok(_) => Ok(()),
            Err(e) if is_conflict(&e) => {
                debug!(pod = %probe.name, "Probe pod already exists, reusing it");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exec(
        &self,
        namespace: &str,
        name: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput, Error> {
        let api = self.pod_api(namespace).await?;
        let mut attached = api
            .exec(name, command, &AttachParams::default().stdout(true).stderr(true))
            .await?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();
        let read_stdout = async {
            match stdout_reader {
                Some(mut r) => r.read_to_string(&mut stdout).await.map(|_| ()),
                None => Ok(()),
            }
        };
        let read_stderr = async {
            match stderr_reader {
                Some(mut r) => r.read_to_string(&mut stderr).await.map(|_| ()),
                None => Ok(()),
            }
        };
        let (out_res, err_res) = tokio::join!(read_stdout, read_stderr);
        out_res
            .and(err_res)
            .map_err(|e| Error::internal_with_context("exec", format!("read output: {}", e)))?;

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| Error::internal_with_context("exec", e.to_string()))?;

        // The error channel carries a metav1.Status; "Success" means exit code 0
        let success = status
            .and_then(|s| serde_json::to_value(&s).ok())
            .and_then(|v| v.get("status").and_then(|s| s.as_str()).map(|s| s == "Success"))
            .unwrap_or(false);

        Ok(ExecOutput {
            success,
            stdout,
            stderr,
        })
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api = self.pod_api(namespace).await?;
        match api.delete(name, &DeleteParams::default().grace_period(0)).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(pod = %name, "Pod already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Node table as printed in status snapshots and diagnostics
pub fn render_nodes(nodes: &[NodeSummary], now: &DateTime<Utc>) -> String {
    let rows: Vec<Vec<String>> = nodes
        .iter()
        .map(|n| {
            vec![
                n.name.clone(),
                n.status.clone(),
                n.roles.clone(),
                n.created
                    .map(|t| format_age(&t, now))
                    .unwrap_or_else(|| "<unknown>".to_string()),
                n.version.clone(),
            ]
        })
        .collect();
    render_table(&["NAME", "STATUS", "ROLES", "AGE", "VERSION"], &rows)
}

/// Pod table as printed in status snapshots and diagnostics
pub fn render_pods(pods: &[PodSummary], now: &DateTime<Utc>) -> String {
    let rows: Vec<Vec<String>> = pods
        .iter()
        .map(|p| {
            vec![
                p.namespace.clone(),
                p.name.clone(),
                p.ready_containers.clone(),
                p.status.clone(),
                p.restarts.to_string(),
                p.created
                    .map(|t| format_age(&t, now))
                    .unwrap_or_else(|| "<unknown>".to_string()),
            ]
        })
        .collect();
    render_table(
        &["NAMESPACE", "NAME", "READY", "STATUS", "RESTARTS", "AGE"],
        &rows,
    )
}

/// Event table as printed in diagnostics
pub fn render_events(events: &[EventSummary], now: &DateTime<Utc>) -> String {
    let rows: Vec<Vec<String>> = events
        .iter()
        .map(|e| {
            vec![
                e.last_seen
                    .map(|t| format_age(&t, now))
                    .unwrap_or_else(|| "<unknown>".to_string()),
                e.type_.clone(),
                e.reason.clone(),
                e.object.clone(),
                e.message.clone(),
            ]
        })
        .collect();
    render_table(&["LAST SEEN", "TYPE", "REASON", "OBJECT", "MESSAGE"], &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus, NodeSystemInfo, ObjectReference};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn node(name: &str, ready: &str, roles: &[&str]) -> Node {
        let labels = roles
            .iter()
            .map(|r| (format!("node-role.kubernetes.io/{}", r), String::new()))
            .collect();
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    ..Default::default()
                }]),
                node_info: Some(NodeSystemInfo {
                    kubelet_version: "v1.32.0".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn node_summary_from_node() {
        let summary = NodeSummary::from_node(&node("talos-cp-1", "True", &["control-plane"]));
        assert_eq!(summary.name, "talos-cp-1");
        assert_eq!(summary.status, "Ready");
        assert_eq!(summary.roles, "control-plane");
        assert_eq!(summary.version, "v1.32.0");
        assert!(summary.is_ready());

        let worker = NodeSummary::from_node(&node("talos-worker-1", "False", &[]));
        assert_eq!(worker.roles, "<none>");
        assert!(!worker.is_ready());
    }

    #[test]
    fn node_named_like_ready_is_not_ready() {
        let summary = NodeSummary {
            name: "Ready".to_string(),
            status: "NotReady".to_string(),
            roles: "<none>".to_string(),
            version: String::new(),
            created: None,
        };
        assert!(!summary.is_ready());
    }

    #[test]
    fn probe_pod_never_restarts() {
        let probe = ProbePod {
            namespace: "default".to_string(),
            name: "dns-probe".to_string(),
            image: "busybox:1.36".to_string(),
            command: vec!["sleep".to_string(), "3600".to_string()],
        };
        let pod = probe.to_pod();
        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.containers[0].image.as_deref(), Some("busybox:1.36"));
        assert_eq!(
            spec.containers[0].command,
            Some(vec!["sleep".to_string(), "3600".to_string()])
        );
        let labels = pod.metadata.labels.unwrap();
        assert_eq!(
            labels.get(MANAGED_BY_LABEL.0).map(String::as_str),
            Some("talos-ci")
        );
    }

    #[test]
    fn event_summary_prefers_last_timestamp() {
        let now = Utc::now();
        let event = Event {
            last_timestamp: Some(Time(now)),
            type_: Some("Warning".to_string()),
            reason: Some("BackOff".to_string()),
            message: Some("Back-off restarting failed container\n".to_string()),
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some("coredns-abc".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let summary = EventSummary::from_event(&event);
        assert_eq!(summary.last_seen, Some(now));
        assert_eq!(summary.object, "pod/coredns-abc");
        assert_eq!(summary.message, "Back-off restarting failed container");
    }

    #[test]
    fn render_pods_includes_status_column() {
        let now = Utc::now();
        let pods = vec![PodSummary {
            name: "coredns-abc".to_string(),
            namespace: "kube-system".to_string(),
            phase: "Running".to_string(),
            status: "CrashLoopBackOff".to_string(),
            ready_containers: "0/1".to_string(),
            restarts: 4,
            conditions_true: false,
            created: None,
        }];
        let table = render_pods(&pods, &now);
        assert!(table.starts_with("NAMESPACE"));
        assert!(table.contains("CrashLoopBackOff"));
        assert!(table.contains("<unknown>"));
    }

    #[test]
    fn list_params_with_empty_selector_matches_all() {
        assert!(list_params("").label_selector.is_none());
        assert_eq!(
            list_params("k8s-app=kube-dns").label_selector.as_deref(),
            Some("k8s-app=kube-dns")
        );
    }
}
