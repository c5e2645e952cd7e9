//! # Provider Trait
//!
//! Core abstraction for model backends. One [`Provider::execute_with_tools`]
//! call is one model round: the caller owns the iteration loop and passes
//! its budget along in [`ProviderOptions`] for request tagging.
//!
//! Failures are fatal for the call. There is no fallback to another
//! provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vigil_core::errors::ErrorKind;
use vigil_core::messages::{Message, ToolCall};
use vigil_core::tools::ToolDefinition;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Authentication failed (missing or rejected key).
    #[error("Auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// Provider returned an API error.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
        /// Provider-specific error code.
        code: Option<String>,
        /// Whether this error can be retried.
        retryable: bool,
    },

    /// Response body did not have the expected shape.
    #[error("Malformed response: {message}")]
    Malformed {
        /// What was wrong.
        message: String,
    },

    /// Provider is registered but not configured.
    #[error("Provider {provider} unavailable: {reason}")]
    Unavailable {
        /// Registry name.
        provider: String,
        /// Missing configuration.
        reason: String,
    },

    /// No provider registered under this name.
    #[error("Unknown provider: {name}")]
    UnknownProvider {
        /// Requested name.
        name: String,
    },
}

impl ProviderError {
    /// Whether the same request could succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s == reqwest::StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                    })
            }
            Self::Api { retryable, .. } => *retryable,
            Self::Json(_)
            | Self::Auth { .. }
            | Self::Malformed { .. }
            | Self::Unavailable { .. }
            | Self::UnknownProvider { .. } => false,
        }
    }

    /// Error category string for logs.
    pub fn category(&self) -> &str {
        match self {
            Self::Http(_) => "network",
            Self::Json(_) | Self::Malformed { .. } => "parse",
            Self::Auth { .. } => "auth",
            Self::Api { .. } => "api",
            Self::Unavailable { .. } | Self::UnknownProvider { .. } => "configuration",
        }
    }

    /// Position in the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth { .. } | Self::Unavailable { .. } | Self::UnknownProvider { .. } => {
                ErrorKind::Configuration
            }
            Self::Http(_) | Self::Json(_) | Self::Api { .. } | Self::Malformed { .. } => {
                ErrorKind::Protocol
            }
        }
    }
}

/// Options for one provider call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOptions {
    /// Iteration budget of the calling loop.
    pub max_iterations: u32,
    /// Output token limit override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ProviderOptions {
    /// Options for a loop with the given budget.
    #[must_use]
    pub fn with_budget(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            ..Self::default()
        }
    }
}

/// Token usage reported by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Generated tokens.
    pub output_tokens: u64,
}

/// Outcome of one model round.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderTurn {
    /// Reply text (partial when tool calls are present).
    pub text: Option<String>,
    /// Requested tool calls, in order.
    pub tool_calls: Vec<ToolCall>,
    /// `true` when the model produced a final answer.
    pub complete: bool,
    /// Token usage, when reported.
    pub usage: Option<TokenUsage>,
}

impl ProviderTurn {
    /// A final answer.
    #[must_use]
    pub fn complete(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
            complete: true,
            usage: None,
        }
    }

    /// Tool calls to run before the model can continue.
    #[must_use]
    pub fn incomplete(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text,
            tool_calls,
            complete: false,
            usage: None,
        }
    }

    /// Build from parsed reply parts: any tool call makes the turn incomplete.
    #[must_use]
    pub fn from_parts(text: Option<String>, tool_calls: Vec<ToolCall>, usage: Option<TokenUsage>) -> Self {
        let text = text.filter(|t| !t.trim().is_empty());
        Self {
            complete: tool_calls.is_empty(),
            text,
            tool_calls,
            usage,
        }
    }

    /// Reply text or the empty string.
    #[must_use]
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// Core model provider trait.
///
/// Implementors must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry name (e.g. `"anthropic"`, `"openai"`).
    fn name(&self) -> &'static str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Whether required configuration (credentials, endpoint) is present.
    fn is_available(&self) -> bool;

    /// Run one model round over `messages` with `tools` advertised.
    async fn execute_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &ProviderOptions,
    ) -> ProviderResult<ProviderTurn>;
}

/// Parse an API error body of the common `{"error": {"message", "type"|"code"}}` shape.
pub(crate) fn parse_api_error(body: &str, status: u16) -> (String, Option<String>, bool) {
    let retryable = status == 429 || status >= 500;
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let error = &json["error"];
        let message = error["message"]
            .as_str()
            .unwrap_or("Unknown error")
            .to_string();
        let code = error["type"]
            .as_str()
            .or_else(|| error["code"].as_str())
            .map(String::from);
        (message, code, retryable)
    } else {
        (format!("HTTP {status}: {body}"), None, retryable)
    }
}

/// Map a non-success HTTP status to a provider error.
pub(crate) fn status_error(status: u16, body: &str) -> ProviderError {
    let (message, code, retryable) = parse_api_error(body, status);
    if status == 401 || status == 403 {
        return ProviderError::Auth { message };
    }
    ProviderError::Api {
        status,
        message,
        code,
        retryable,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::Map;

    #[test]
    fn provider_error_auth_not_retryable() {
        let err = ProviderError::Auth {
            message: "invalid key".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "auth");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn provider_error_api_server_error_is_retryable_protocol() {
        let err = status_error(503, r#"{"error": {"message": "overloaded", "type": "overloaded_error"}}"#);
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_matches!(err, ProviderError::Api { status: 503, code: Some(c), .. } if c == "overloaded_error");
    }

    #[test]
    fn status_401_is_auth() {
        assert_matches!(status_error(401, "{}"), ProviderError::Auth { .. });
    }

    #[test]
    fn parse_api_error_non_json() {
        let (message, code, retryable) = parse_api_error("gateway exploded", 502);
        assert_eq!(message, "HTTP 502: gateway exploded");
        assert!(code.is_none());
        assert!(retryable);
    }

    #[test]
    fn configuration_errors() {
        let err = ProviderError::UnknownProvider { name: "x".into() };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "Unknown provider: x");
        let err = ProviderError::Malformed { message: "no choices".into() };
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn turn_from_parts_with_calls_is_incomplete() {
        let call = ToolCall::new("c1", "click", Map::new());
        let turn = ProviderTurn::from_parts(Some("  ".into()), vec![call], None);
        assert!(!turn.complete);
        assert!(turn.text.is_none());
        assert_eq!(turn.text_or_empty(), "");
    }

    #[test]
    fn turn_from_parts_text_only_is_complete() {
        let turn = ProviderTurn::from_parts(Some("done".into()), Vec::new(), None);
        assert!(turn.complete);
        assert_eq!(turn, ProviderTurn::complete("done"));
    }
}
