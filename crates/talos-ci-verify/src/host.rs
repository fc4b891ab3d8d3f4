//! Host-side view of the cluster nodes (containers or VMs), for diagnostics

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use talos_ci_common::process::{run_cmd, DEFAULT_COMMAND_TIMEOUT};
use talos_ci_common::Error;

use crate::config::Provisioner;

/// Docker label talosctl puts on every node container
const TALOS_CLUSTER_LABEL: &str = "talos.cluster.name";

/// Lists the containers or VMs backing the cluster. Never used for gating.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostRuntime: Send + Sync {
    async fn snapshot(&self) -> Result<String, Error>;
}

/// [`HostRuntime`] using `docker ps` or the process table for QEMU
#[derive(Clone, Debug)]
pub struct CliHostRuntime {
    provisioner: Provisioner,
    cluster_name: String,
}

impl CliHostRuntime {
    pub fn new(provisioner: Provisioner, cluster_name: impl Into<String>) -> Self {
        Self {
            provisioner,
            cluster_name: cluster_name.into(),
        }
    }

    fn command(&self) -> (&'static str, Vec<String>) {
        match self.provisioner {
            Provisioner::Docker => (
                "docker",
                vec![
                    "ps".to_string(),
                    "-a".to_string(),
                    "--filter".to_string(),
                    format!("label={}={}", TALOS_CLUSTER_LABEL, self.cluster_name),
                ],
            ),
            Provisioner::Qemu => ("ps", vec!["-eo".to_string(), "pid,etime,args".to_string()]),
        }
    }
}

/// Keep the header and the QEMU processes belonging to `cluster_name`
fn filter_qemu_processes(ps_output: &str, cluster_name: &str) -> String {
    let mut lines = ps_output.lines();
    let mut out: Vec<&str> = lines.next().into_iter().collect();
    out.extend(
        lines.filter(|l| l.contains("qemu-system") && l.contains(cluster_name)),
    );
    if out.len() <= 1 {
        return format!("no qemu processes found for cluster {}", cluster_name);
    }
    out.join("\n")
}

#[async_trait]
impl HostRuntime for CliHostRuntime {
    async fn snapshot(&self) -> Result<String, Error> {
        let (program, args) = self.command();
        let output = run_cmd(program, &args, DEFAULT_COMMAND_TIMEOUT).await?;
        Ok(match self.provisioner {
            Provisioner::Docker => output.stdout,
            Provisioner::Qemu => filter_qemu_processes(&output.stdout, &self.cluster_name),
        })
    }
}
