//! Running external tools (talosctl, docker, ps)

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::trace;

use crate::Error;

/// Default per-invocation limit; a hung CLI must not eat the whole budget
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured output of a successful command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
}

/// Run `program` with `args`, failing on spawn error, non-zero exit or timeout.
///
/// The child is killed if the timeout fires.
pub async fn run_cmd(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, Error> {
    trace!(program, args = ?args, "Running command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::command(program, format!("failed to spawn: {}", e)))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| Error::command(program, format!("timed out after {:?}", timeout)))?
        .map_err(|e| Error::command(program, format!("error waiting for process: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let detail = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        return Err(Error::command(
            program,
            format!("{} ({})", detail, output.status),
        ));
    }

    Ok(CommandOutput { stdout, stderr })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = run_cmd("sh", &args(&["-c", "echo hello"]), DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let err = run_cmd(
            "sh",
            &args(&["-c", "echo 'service not found' >&2; exit 3"]),
            DEFAULT_COMMAND_TIMEOUT,
        )
        .await
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("sh failed"));
        assert!(msg.contains("service not found"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let err = run_cmd("definitely-not-a-real-binary", &[], DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn hung_command_times_out() {
        let err = run_cmd("sleep", &args(&["5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
