//! Transport errors.

use thiserror::Error;
use vigil_core::errors::ErrorKind;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures talking to the automation subprocess.
///
/// A timed-out or failed tool call is *not* an error here: it comes back as
/// an unsuccessful [`ToolOutcome`](vigil_core::tools::ToolOutcome) so the
/// model can see it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The executable could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Configured command.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The `initialize` exchange failed.
    #[error("handshake failed: {reason}")]
    Handshake {
        /// What went wrong.
        reason: String,
    },

    /// The subprocess died again after one respawn.
    #[error("automation process died: {reason}")]
    ProcessDied {
        /// Last observed failure.
        reason: String,
    },

    /// Pipe I/O failed outside a call.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The subprocess answered a protocol-level request with an error.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Remote error code.
        code: i64,
        /// Remote error text.
        message: String,
    },
}

impl TransportError {
    /// Error category string for logs.
    pub fn category(&self) -> &str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Handshake { .. } => "handshake",
            Self::ProcessDied { .. } => "process_died",
            Self::Io(_) => "io",
            Self::Json(_) => "parse",
            Self::Remote { .. } => "remote",
        }
    }

    /// Whether a fresh process could succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ProcessDied { .. } | Self::Io(_))
    }

    /// Position in the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_is_transport_kind() {
        let errors = [
            TransportError::Handshake { reason: "x".into() },
            TransportError::ProcessDied { reason: "eof".into() },
            TransportError::Remote { code: -1, message: "bad".into() },
            TransportError::Io(std::io::Error::other("pipe")),
        ];
        for err in &errors {
            assert_eq!(err.kind(), ErrorKind::Transport);
            assert!(err.kind().is_fatal());
        }
    }

    #[test]
    fn spawn_error_names_command() {
        let err = TransportError::Spawn {
            command: "no-such-bin".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("no-such-bin"));
        assert_eq!(err.category(), "spawn");
        assert!(!err.is_recoverable());
    }
}
