//! GitHub Actions step outputs and job environment
//!
//! Outputs are appended to `$GITHUB_OUTPUT` and environment variables to
//! `$GITHUB_ENV`, one `NAME=value` line each. Outside Actions neither file is
//! set and the values are only logged.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::env_path;
use crate::{Error, Result};

const GITHUB_OUTPUT_ENV: &str = "GITHUB_OUTPUT";
const GITHUB_ENV_ENV: &str = "GITHUB_ENV";

/// Files the runner reads outputs and exported variables from
#[derive(Clone, Debug, Default)]
pub struct ActionEnv {
    pub github_output: Option<PathBuf>,
    pub github_env: Option<PathBuf>,
}

impl ActionEnv {
    pub fn from_env() -> Self {
        Self {
            github_output: env_path(GITHUB_OUTPUT_ENV),
            github_env: env_path(GITHUB_ENV_ENV),
        }
    }

    /// Publish the credential paths as step outputs and job env vars
    pub fn publish(&self, kubeconfig: &Path, talosconfig: &Path) -> Result<()> {
        let kubeconfig = kubeconfig.display().to_string();
        let talosconfig = talosconfig.display().to_string();

        write_pairs(
            self.github_output.as_deref(),
            GITHUB_OUTPUT_ENV,
            &[("kubeconfig", &kubeconfig), ("talosconfig", &talosconfig)],
        )?;
        write_pairs(
            self.github_env.as_deref(),
            GITHUB_ENV_ENV,
            &[("KUBECONFIG", &kubeconfig), ("TALOSCONFIG", &talosconfig)],
        )
    }
}

fn write_pairs(target: Option<&Path>, var: &str, pairs: &[(&str, &str)]) -> Result<()> {
    let Some(path) = target else {
        for (name, value) in pairs {
            info!("{} not set, {}={}", var, name, value);
        }
        return Ok(());
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::command_failed(format!("failed to open {}: {}", path.display(), e)))?;
    for (name, value) in pairs {
        writeln!(file, "{}={}", name, value)?;
    }
    info!(file = %path.display(), count = pairs.len(), "Wrote {} entries", var);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_appends_outputs_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output");
        let env = dir.path().join("env");
        std::fs::write(&output, "earlier=step\n").unwrap();

        let action = ActionEnv {
            github_output: Some(output.clone()),
            github_env: Some(env.clone()),
        };
        action
            .publish(Path::new("/tmp/_temp/kubeconfig"), Path::new("/home/runner/.talos/config"))
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "earlier=step\nkubeconfig=/tmp/_temp/kubeconfig\ntalosconfig=/home/runner/.talos/config\n"
        );
        assert_eq!(
            std::fs::read_to_string(&env).unwrap(),
            "KUBECONFIG=/tmp/_temp/kubeconfig\nTALOSCONFIG=/home/runner/.talos/config\n"
        );
    }

    #[test]
    fn publish_without_runner_files_is_a_noop() {
        let action = ActionEnv::default();
        action
            .publish(Path::new("kubeconfig"), Path::new("talosconfig"))
            .unwrap();
    }

    #[test]
    fn unwritable_output_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let action = ActionEnv {
            github_output: Some(dir.path().join("missing").join("output")),
            github_env: None,
        };
        let err = action
            .publish(Path::new("kubeconfig"), Path::new("talosconfig"))
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }
}
