//! Credential path resolution
//!
//! talosconfig (highest priority first):
//! 1. Explicit `--talosconfig` flag
//! 2. `TALOSCONFIG` environment variable
//! 3. `~/.talos/config`, where `talosctl cluster create` writes it
//!
//! Kubeconfig output:
//! 1. Explicit `--kubeconfig` flag
//! 2. `$RUNNER_TEMP/kubeconfig` on GitHub runners
//! 3. `./kubeconfig`

use std::path::{Path, PathBuf};

use crate::{Error, Result};

const TALOS_DIR_NAME: &str = ".talos";
const TALOS_CONFIG_FILE_NAME: &str = "config";
const KUBECONFIG_FILE_NAME: &str = "kubeconfig";
const TALOSCONFIG_ENV: &str = "TALOSCONFIG";
const RUNNER_TEMP_ENV: &str = "RUNNER_TEMP";

/// Non-empty value of an environment variable
pub(crate) fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Resolve the talosconfig path using the priority chain
pub fn resolve_talosconfig(explicit: Option<&Path>) -> Result<PathBuf> {
    talosconfig_from(explicit, env_path(TALOSCONFIG_ENV), dirs::home_dir())
}

fn talosconfig_from(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = from_env {
        return Ok(path);
    }
    let home = home.ok_or_else(|| {
        Error::validation("could not determine home directory, pass --talosconfig")
    })?;
    Ok(home.join(TALOS_DIR_NAME).join(TALOS_CONFIG_FILE_NAME))
}

/// Resolve where the kubeconfig is written
pub fn resolve_kubeconfig(explicit: Option<&Path>) -> PathBuf {
    kubeconfig_from(explicit, env_path(RUNNER_TEMP_ENV))
}

fn kubeconfig_from(explicit: Option<&Path>, runner_temp: Option<PathBuf>) -> PathBuf {
    match (explicit, runner_temp) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(temp)) => temp.join(KUBECONFIG_FILE_NAME),
        (None, None) => PathBuf::from(KUBECONFIG_FILE_NAME),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn talosconfig_explicit_wins() {
        let path = talosconfig_from(
            Some(Path::new("/explicit/talosconfig")),
            Some(PathBuf::from("/env/talosconfig")),
            Some(PathBuf::from("/home/runner")),
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("/explicit/talosconfig"));
    }

    #[test]
    fn talosconfig_env_before_home() {
        let path = talosconfig_from(
            None,
            Some(PathBuf::from("/env/talosconfig")),
            Some(PathBuf::from("/home/runner")),
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("/env/talosconfig"));
    }

    #[test]
    fn talosconfig_defaults_to_home() {
        let path = talosconfig_from(None, None, Some(PathBuf::from("/home/runner"))).unwrap();
        assert_eq!(path, PathBuf::from("/home/runner/.talos/config"));
    }

    #[test]
    fn talosconfig_without_home_is_an_error() {
        let err = talosconfig_from(None, None, None).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn kubeconfig_prefers_runner_temp() {
        assert_eq!(
            kubeconfig_from(None, Some(PathBuf::from("/home/runner/work/_temp"))),
            PathBuf::from("/home/runner/work/_temp/kubeconfig")
        );
        assert_eq!(kubeconfig_from(None, None), PathBuf::from("kubeconfig"));
        assert_eq!(
            kubeconfig_from(
                Some(Path::new("/tmp/kc")),
                Some(PathBuf::from("/home/runner/work/_temp"))
            ),
            PathBuf::from("/tmp/kc")
        );
    }
}
