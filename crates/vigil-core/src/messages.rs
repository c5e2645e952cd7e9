//! Message types for the Vigil conversation model.
//!
//! Messages form the conversation history passed to providers. Four roles:
//! system, user, assistant and tool. Assistant messages may carry tool
//! calls; tool messages answer exactly one of them by id.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Tool call
// ─────────────────────────────────────────────────────────────────────────────

/// A tool call emitted by the assistant. Never mutated after creation;
/// derived variants are new values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique tool call ID (provider-assigned or synthetic).
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool arguments (JSON object).
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Create a tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Look up a single argument.
    #[must_use]
    pub fn argument(&self, key: &str) -> Option<&Value> {
        self.arguments.get(key)
    }

    /// A copy of this call with `key` removed from its arguments.
    #[must_use]
    pub fn without_argument(&self, key: &str) -> Self {
        let mut arguments = self.arguments.clone();
        let _ = arguments.remove(key);
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata attached to assistant and tool messages.
///
/// `toolName` records which tool produced a tool message so later policies
/// (snapshot dedup) never need to inspect content.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Originating tool for tool messages.
    #[serde(rename = "toolName", skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Free-form extra keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageMetadata {
    /// Metadata naming the originating tool.
    #[must_use]
    pub fn for_tool(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            extra: Map::new(),
        }
    }

    /// Whether no key is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tool_name.is_none() && self.extra.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// Message role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt.
    System,
    /// User instruction.
    User,
    /// Model reply.
    Assistant,
    /// Tool result.
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A conversation message (discriminated by `role`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// System prompt.
    System {
        /// Prompt text.
        content: String,
    },
    /// User instruction.
    User {
        /// Instruction text.
        content: String,
    },
    /// Assistant reply, possibly carrying tool calls.
    Assistant {
        /// Reply text, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Requested tool calls.
        #[serde(rename = "toolCalls", default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        /// Metadata.
        #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
        metadata: MessageMetadata,
    },
    /// Result of one tool call.
    Tool {
        /// ID of the answered tool call.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Result text.
        content: String,
        /// Error flag.
        #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        /// Metadata.
        #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
        metadata: MessageMetadata,
    },
}

impl Message {
    /// Create a system message.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: text.into(),
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: text.into(),
        }
    }

    /// Create a text-only assistant message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(text.into()),
            tool_calls: Vec::new(),
            metadata: MessageMetadata::default(),
        }
    }

    /// Create an assistant message carrying tool calls.
    #[must_use]
    pub fn assistant_with_tools(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: text.filter(|t| !t.is_empty()),
            tool_calls,
            metadata: MessageMetadata::default(),
        }
    }

    /// Create a tool result message tagged with its originating tool.
    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: is_error.then_some(true),
            metadata: MessageMetadata::for_tool(tool_name),
        }
    }

    /// The message role.
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::Tool { .. } => Role::Tool,
        }
    }

    /// Returns `true` for system messages.
    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    /// Returns `true` for user messages.
    #[must_use]
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    /// Returns `true` for assistant messages.
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    /// Returns `true` for tool messages.
    #[must_use]
    pub fn is_tool(&self) -> bool {
        matches!(self, Self::Tool { .. })
    }

    /// Text content, if any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::System { content } | Self::User { content } | Self::Tool { content, .. } => {
                Some(content)
            }
            Self::Assistant { content, .. } => content.as_deref(),
        }
    }

    /// Tool calls of an assistant message (empty for other roles).
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Answered call id of a tool message.
    #[must_use]
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// Originating tool name of a tool message.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::Tool { metadata, .. } => metadata.tool_name.as_deref(),
            _ => None,
        }
    }

    /// Whether this tool message reported an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Tool { is_error: Some(true), .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pairing
// ─────────────────────────────────────────────────────────────────────────────

/// A break in the call/result pairing that providers reject.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PairingViolation {
    /// A tool message that does not answer the immediately preceding
    /// assistant message.
    #[error("tool result {tool_call_id} at index {index} has no matching tool call")]
    OrphanToolResult {
        /// Position in the message list.
        index: usize,
        /// Offending id.
        tool_call_id: String,
    },
    /// A tool call with no answering tool message.
    #[error("tool call {tool_call_id} at index {index} has no tool result")]
    MissingToolResult {
        /// Position of the assistant message.
        index: usize,
        /// Unanswered id.
        tool_call_id: String,
    },
}

/// Check that every assistant message with tool calls is immediately
/// followed by tool messages answering exactly those ids, and that no tool
/// message appears elsewhere.
pub fn validate_pairing(messages: &[Message]) -> Result<(), PairingViolation> {
    let mut i = 0;
    while i < messages.len() {
        match &messages[i] {
            Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                let mut expected: HashSet<&str> = tool_calls.iter().map(|c| c.id.as_str()).collect();
                let mut j = i + 1;
                while let Some(Message::Tool { tool_call_id, .. }) = messages.get(j) {
                    if !expected.remove(tool_call_id.as_str()) {
                        return Err(PairingViolation::OrphanToolResult {
                            index: j,
                            tool_call_id: tool_call_id.clone(),
                        });
                    }
                    j += 1;
                }
                if let Some(missing) = tool_calls.iter().find(|c| expected.contains(c.id.as_str())) {
                    return Err(PairingViolation::MissingToolResult {
                        index: i,
                        tool_call_id: missing.id.clone(),
                    });
                }
                i = j;
            }
            Message::Tool { tool_call_id, .. } => {
                return Err(PairingViolation::OrphanToolResult {
                    index: i,
                    tool_call_id: tool_call_id.clone(),
                });
            }
            _ => i += 1,
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
