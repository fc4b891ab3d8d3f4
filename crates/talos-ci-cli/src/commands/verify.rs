//! Verify command - wait for a freshly created Talos cluster to be usable
//!
//! Every flag can also be set through the GitHub Actions input variable of
//! the same name (`INPUT_WORKERS`, `INPUT_WAIT-FOR-READY`, ...), so the action
//! definition only has to invoke `talos-ci verify`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, ValueEnum};
use tracing::info;

use talos_ci_verify::{
    CliHostRuntime, KubeClusterApi, Provisioner, ReadinessConfig, Talosctl, Verifier,
};

use super::CommandErrorExt;
use crate::config::{resolve_kubeconfig, resolve_talosconfig};
use crate::outputs::ActionEnv;
use crate::Result;

/// Backend the cluster nodes run on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ProvisionerArg {
    #[default]
    Docker,
    Qemu,
}

impl From<ProvisionerArg> for Provisioner {
    fn from(arg: ProvisionerArg) -> Self {
        match arg {
            ProvisionerArg::Docker => Provisioner::Docker,
            ProvisionerArg::Qemu => Provisioner::Qemu,
        }
    }
}

/// Wait for the cluster to become ready and export its credentials
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Cluster name given to `talosctl cluster create`
    #[arg(long, env = "INPUT_CLUSTER-NAME", default_value = "talos-default")]
    pub cluster_name: String,

    /// Control-plane node address
    #[arg(long, env = "INPUT_ENDPOINT", default_value = "10.5.0.2")]
    pub endpoint: String,

    /// Number of worker nodes (one control-plane node is always expected)
    #[arg(long, env = "INPUT_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Overall timeout in seconds, shared by every stage
    #[arg(long = "timeout", env = "INPUT_TIMEOUT", default_value_t = 600)]
    pub timeout_secs: u64,

    /// Node backend, used for diagnostics
    #[arg(long, env = "INPUT_PROVISIONER", value_enum, default_value_t = ProvisionerArg::Docker)]
    pub provisioner: ProvisionerArg,

    /// Wait for nodes, DNS pods and system pods to be ready
    #[arg(
        long,
        env = "INPUT_WAIT-FOR-READY",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub wait_for_ready: bool,

    /// Resolve a service name from inside the cluster
    #[arg(
        long,
        env = "INPUT_DNS-READINESS-CHECK",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub dns_readiness_check: bool,

    /// talosconfig path (defaults to $TALOSCONFIG, then ~/.talos/config)
    #[arg(long)]
    pub talosconfig: Option<PathBuf>,

    /// Where to write the kubeconfig (defaults to $RUNNER_TEMP/kubeconfig)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// talosctl binary to use
    #[arg(long, env = "TALOSCTL", default_value = "talosctl")]
    pub talosctl: String,
}

impl VerifyArgs {
    /// Build the validated verifier configuration
    pub fn to_config(&self) -> Result<ReadinessConfig> {
        let talosconfig = resolve_talosconfig(self.talosconfig.as_deref())?;
        let kubeconfig = absolute(&resolve_kubeconfig(self.kubeconfig.as_deref()))?;

        let mut config = ReadinessConfig::new(
            &self.cluster_name,
            &self.endpoint,
            self.workers,
            Duration::from_secs(self.timeout_secs),
            talosconfig,
            kubeconfig,
        )?;
        config.provisioner = self.provisioner.into();
        config.wait_for_ready = self.wait_for_ready;
        config.dns_readiness_check = self.dns_readiness_check;
        Ok(config)
    }
}

/// Published paths must stay valid for later steps running elsewhere
fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).cmd_err()
}

pub async fn run(args: VerifyArgs) -> Result<()> {
    let config = args.to_config()?;
    info!(
        cluster = %config.cluster_name,
        provisioner = %config.provisioner,
        workers = args.workers,
        wait_for_ready = config.wait_for_ready,
        dns_readiness_check = config.dns_readiness_check,
        "Starting verification"
    );

    let control_plane =
        Talosctl::new(&config.talosconfig, &config.endpoint).with_binary(&args.talosctl);
    let cluster = KubeClusterApi::new(&config.kubeconfig);
    let host = CliHostRuntime::new(config.provisioner, &config.cluster_name);
    let verifier = Verifier::new(config, control_plane, cluster, host);

    let summary = verifier.run().await?;

    let config = verifier.config();
    ActionEnv::from_env().publish(&config.kubeconfig, &config.talosconfig)?;

    info!(
        elapsed = ?summary.elapsed,
        kubeconfig = %config.kubeconfig.display(),
        "Cluster is ready"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cli, Commands};
    use clap::Parser;

    fn parse(extra: &[&str]) -> VerifyArgs {
        let mut argv = vec!["talos-ci", "verify", "--talosconfig", "/tmp/talosconfig"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Verify(args) => args,
        }
    }

    #[test]
    fn defaults_match_action_inputs() {
        let args = parse(&["--kubeconfig", "/tmp/kubeconfig"]);
        assert_eq!(args.endpoint, "10.5.0.2");
        assert_eq!(args.workers, 1);
        assert_eq!(args.timeout_secs, 600);
        assert!(args.wait_for_ready);
        assert!(!args.dns_readiness_check);

        let config = args.to_config().unwrap();
        assert_eq!(config.expected_nodes, 2);
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert_eq!(config.provisioner, Provisioner::Docker);
        assert_eq!(config.kubeconfig, PathBuf::from("/tmp/kubeconfig"));
        assert_eq!(config.talosconfig, PathBuf::from("/tmp/talosconfig"));
    }

    #[test]
    fn flags_override_defaults() {
        let args = parse(&[
            "--workers",
            "3",
            "--timeout",
            "900",
            "--provisioner",
            "qemu",
            "--wait-for-ready",
            "false",
            "--dns-readiness-check",
            "yes",
        ]);
        let config = args.to_config().unwrap();
        assert_eq!(config.expected_nodes, 4);
        assert_eq!(config.provisioner, Provisioner::Qemu);
        assert!(!config.wait_for_ready);
        assert!(config.dns_readiness_check);
    }

    #[test]
    fn relative_kubeconfig_is_made_absolute() {
        let config = parse(&["--kubeconfig", "kubeconfig"]).to_config().unwrap();
        assert!(config.kubeconfig.is_absolute());
        assert!(config.kubeconfig.ends_with("kubeconfig"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = parse(&["--timeout", "0"]).to_config().unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn unknown_provisioner_is_rejected() {
        let result = Cli::try_parse_from([
            "talos-ci",
            "verify",
            "--provisioner",
            "virtualbox",
        ]);
        assert!(result.is_err());
    }
}
