//! Error taxonomy shared by every Vigil crate.
//!
//! Each crate defines its own `thiserror` enum; all of them classify into
//! one [`ErrorKind`], which decides whether a failure ends the run, is fed
//! back into the conversation, or becomes a step outcome.
//!
//! [`sanitize_message`] turns internal error text into the short message
//! shown to users. Full details go to the logs only.

use serde::{Deserialize, Serialize};

/// Maximum length of a user-visible error message.
pub const MAX_USER_MESSAGE_CHARS: usize = 200;

// ─────────────────────────────────────────────────────────────────────────────
// ErrorKind
// ─────────────────────────────────────────────────────────────────────────────

/// Classification of every failure the execution core can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Provider unavailable or misconfigured. Fatal, never retried.
    Configuration,
    /// Malformed provider reply. Fatal for that call.
    Protocol,
    /// A single tool call failed. Reported into the conversation.
    Tool,
    /// The automation subprocess died. Retried once, then fatal.
    Transport,
    /// The iteration budget ran out. Reported as an outcome.
    BudgetExhausted,
    /// Repeated snapshot requests without progress. Becomes a failed step.
    StuckBatch,
}

impl ErrorKind {
    /// Whether this kind aborts the current invocation.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Configuration | Self::Protocol | Self::Transport)
    }

    /// Short label for logs and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Protocol => "protocol",
            Self::Tool => "tool",
            Self::Transport => "transport",
            Self::BudgetExhausted => "budget_exhausted",
            Self::StuckBatch => "stuck_batch",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sanitizing
// ─────────────────────────────────────────────────────────────────────────────

/// Reduce internal error text to a short user-facing message.
///
/// Keeps the first non-empty line, drops `caused by`/backtrace tails and
/// anything that looks like an absolute filesystem path, then bounds the
/// length to [`MAX_USER_MESSAGE_CHARS`].
#[must_use]
pub fn sanitize_message(raw: &str) -> String {
    let first = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Unexpected error");

    let head = first
        .split(" caused by")
        .next()
        .unwrap_or(first)
        .trim();

    let cleaned: Vec<&str> = head
        .split_whitespace()
        .map(|word| {
            let bare = word.trim_matches(|c: char| c == '\'' || c == '"' || c == '(' || c == ')');
            if bare.starts_with('/') && bare.len() > 1 && bare[1..].contains('/') {
                "<path>"
            } else {
                word
            }
        })
        .collect();
    let joined = cleaned.join(" ");

    if joined.chars().count() > MAX_USER_MESSAGE_CHARS {
        let mut out: String = joined.chars().take(MAX_USER_MESSAGE_CHARS - 3).collect();
        out.push_str("...");
        out
    } else {
        joined
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
