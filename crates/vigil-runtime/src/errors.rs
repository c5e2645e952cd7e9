//! Runtime error types.
//!
//! Only fatal failures are errors here. Tool failures go back into the
//! conversation, and budget exhaustion or a stuck batch become outcome
//! values.

use vigil_core::errors::{ErrorKind, sanitize_message};
use vigil_llm::ProviderError;
use vigil_transport::TransportError;

/// Result alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that abort an agent loop, batch or plan run.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Model provider failed (auth, HTTP, malformed reply).
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Automation subprocess failed after its retry.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid input or settings (empty plan, duplicate step numbers).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A collaborator (report sink, screenshot store) failed.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Filesystem error from a local collaborator.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing a report failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Position in the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(e) => e.kind(),
            Self::Transport(e) => e.kind(),
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Collaborator(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Protocol,
        }
    }

    /// Whether the same run could succeed if started again.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::Transport(e) => e.is_recoverable(),
            Self::Io(_) | Self::Collaborator(_) => true,
            Self::Configuration(_) | Self::Json(_) => false,
        }
    }

    /// Error category string for logs.
    pub fn category(&self) -> &str {
        match self {
            Self::Provider(_) => "provider",
            Self::Transport(_) => "transport",
            Self::Configuration(_) => "configuration",
            Self::Collaborator(_) => "collaborator",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// Short message safe to show in a report.
    pub fn user_message(&self) -> String {
        sanitize_message(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn provider_error_converts() {
        let err: RuntimeError = ProviderError::Auth {
            message: "bad key".into(),
        }
        .into();
        assert_matches!(err, RuntimeError::Provider(_));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.category(), "provider");
        assert!(!err.is_recoverable());
        assert!(err.kind().is_fatal());
    }

    #[test]
    fn transport_error_converts() {
        let err: RuntimeError = TransportError::ProcessDied {
            reason: "exit status 1".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.category(), "transport");
    }

    #[test]
    fn user_message_is_sanitized() {
        let err = RuntimeError::Configuration("plan /home/ci/plans/a.json has no steps\ndetails".into());
        assert_eq!(err.user_message(), "Configuration error: plan <path> has no steps");
    }
}
