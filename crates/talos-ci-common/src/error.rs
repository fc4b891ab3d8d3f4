//! Error types shared across talos-ci crates
//!
//! Variants carry the context needed to explain a CI failure from the log
//! alone: the program that failed, the wait that timed out, and so on.

use std::time::Duration;

use thiserror::Error;

/// Main error type for talos-ci utilities
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// An external program could not be run or exited unsuccessfully
    #[error("{program} failed: {message}")]
    Command {
        /// Program name (e.g. "talosctl", "docker")
        program: String,
        /// Captured stderr or spawn failure
        message: String,
    },

    /// A bounded wait reached its deadline
    #[error("timeout after {elapsed:?} waiting for {description}: {last_status}")]
    Timeout {
        /// What was being waited for
        description: String,
        /// Time spent before giving up
        elapsed: Duration,
        /// The most recent reason the condition was not met
        last_status: String,
    },

    /// Invalid input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "create_client")
        context: String,
    },
}

impl Error {
    /// Create a command error for the given program
    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: context.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_names_program() {
        let err = Error::command("talosctl", "connection refused");
        assert_eq!(err.to_string(), "talosctl failed: connection refused");
    }

    #[test]
    fn timeout_error_includes_last_status() {
        let err = Error::Timeout {
            description: "etcd to be running".to_string(),
            elapsed: Duration::from_secs(30),
            last_status: "STATE Preparing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("30s"));
        assert!(msg.contains("etcd to be running"));
        assert!(msg.contains("STATE Preparing"));
    }
}
