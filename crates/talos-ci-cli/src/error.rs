//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Verify(#[from] talos_ci_verify::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use talos_ci_verify::Stage;

    #[test]
    fn verify_errors_display_unchanged() {
        let err: Error = talos_ci_verify::Error::Timeout {
            stage: Stage::EtcdHealth,
            elapsed: Duration::from_secs(600),
            last_status: "STATE    Preparing".to_string(),
            diagnostics: Default::default(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "timeout in stage 'etcd-health' after 600s: STATE    Preparing"
        );
    }
}
