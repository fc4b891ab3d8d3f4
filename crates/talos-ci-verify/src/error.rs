//! Verification errors
//!
//! Only two things end a run early: a wait hitting the shared deadline, and a
//! functional check that ran and gave the wrong answer. Everything transient
//! is retried inside the stage.

use std::time::Duration;

use crate::diagnostics::DiagnosticBundle;
use crate::state::Stage;

/// Verifier result type
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal verification errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A stage did not become ready before the deadline
    #[error("timeout in stage '{stage}' after {elapsed:?}: {last_status}")]
    Timeout {
        /// Stage that was still pending
        stage: Stage,
        /// Time since the run started
        elapsed: Duration,
        /// Latest reason the stage was not ready
        last_status: String,
        /// Cluster state captured before giving up
        diagnostics: DiagnosticBundle,
    },

    /// A check ran to completion and failed
    #[error("{check} failed: {message}")]
    FunctionalFailure {
        /// Name of the failing check
        check: String,
        /// What went wrong
        message: String,
    },

    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },
}

impl Error {
    pub fn functional(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FunctionalFailure {
            check: check.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Diagnostics attached to the error, if any were collected
    pub fn diagnostics(&self) -> Option<&DiagnosticBundle> {
        match self {
            Self::Timeout { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}
