//! Talos control-plane access via `talosctl`
//!
//! Talos exposes no Rust client, so every call shells out to `talosctl`
//! pinned to a single node and talosconfig.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use talos_ci_common::process::{run_cmd, DEFAULT_COMMAND_TIMEOUT};
use talos_ci_common::Error;

/// `talosctl health` waits on its own; give it room beyond its wait timeout
const HEALTH_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const HEALTH_WAIT_TIMEOUT: &str = "30s";

/// Control-plane management API operations used by the verifier
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Version/identity query; succeeds once the API answers
    async fn version(&self) -> Result<String, Error>;

    /// One-time bootstrap of the consensus store
    async fn bootstrap(&self) -> Result<(), Error>;

    /// Raw status output for a single service (e.g. "etcd")
    async fn service_status(&self, service: &str) -> Result<String, Error>;

    /// Fetch cluster credentials and write them to `path`, overwriting it
    async fn write_kubeconfig(&self, path: &Path) -> Result<(), Error>;

    /// Built-in health check output (diagnostics only)
    async fn health(&self) -> Result<String, Error>;

    /// Service list output (diagnostics only)
    async fn services(&self) -> Result<String, Error>;
}

/// [`ControlPlane`] backed by the `talosctl` binary
#[derive(Clone, Debug)]
pub struct Talosctl {
    binary: String,
    talosconfig: PathBuf,
    endpoint: String,
    command_timeout: Duration,
}

impl Talosctl {
    pub fn new(talosconfig: impl Into<PathBuf>, endpoint: impl Into<String>) -> Self {
        Self {
            binary: "talosctl".to_string(),
            talosconfig: talosconfig.into(),
            endpoint: endpoint.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Use a specific talosctl binary instead of the one on PATH
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Full argument list for a subcommand, connection flags first
    fn args(&self, subcommand: &[&str]) -> Vec<String> {
        let mut args = vec![
            "--talosconfig".to_string(),
            self.talosconfig.display().to_string(),
            "--nodes".to_string(),
            self.endpoint.clone(),
            "--endpoints".to_string(),
            self.endpoint.clone(),
        ];
        args.extend(subcommand.iter().map(|s| s.to_string()));
        args
    }

    async fn run(&self, subcommand: &[&str], timeout: Duration) -> Result<String, Error> {
        let args = self.args(subcommand);
        debug!(command = %subcommand.join(" "), "talosctl");
        let output = run_cmd(&self.binary, &args, timeout).await?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl ControlPlane for Talosctl {
    async fn version(&self) -> Result<String, Error> {
        self.run(&["version"], self.command_timeout).await
    }

    async fn bootstrap(&self) -> Result<(), Error> {
        self.run(&["bootstrap"], self.command_timeout)
            .await
            .map(|_| ())
    }

    async fn service_status(&self, service: &str) -> Result<String, Error> {
        self.run(&["service", service], self.command_timeout).await
    }

    async fn write_kubeconfig(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::command(
                    &self.binary,
                    format!("failed to create {}: {}", parent.display(), e),
                )
            })?;
        }
        let target = path.display().to_string();
        self.run(
            &["kubeconfig", &target, "--force", "--merge=false"],
            self.command_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn health(&self) -> Result<String, Error> {
        let wait = format!("--wait-timeout={}", HEALTH_WAIT_TIMEOUT);
        self.run(&["health", &wait], HEALTH_COMMAND_TIMEOUT).await
    }

    async fn services(&self) -> Result<String, Error> {
        self.run(&["services"], self.command_timeout).await
    }
}
