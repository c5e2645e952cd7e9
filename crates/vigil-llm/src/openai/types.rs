//! Wire types for the `OpenAI` Chat Completions API.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vigil_settings::ProviderEndpoint;

/// Default base URL for the `OpenAI` API.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Configuration for the `OpenAI` provider.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Model ID.
    pub model: String,
    /// API key, if configured.
    pub api_key: Option<String>,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Build from a settings endpoint block, resolving the key from the environment.
    #[must_use]
    pub fn from_endpoint(endpoint: &ProviderEndpoint) -> Self {
        Self {
            model: endpoint.model.clone(),
            api_key: endpoint.resolve_api_key(),
            max_tokens: endpoint.max_tokens,
            base_url: Some(endpoint.base_url.clone()).filter(|u| !u.is_empty()),
            timeout: Duration::from_millis(endpoint.timeout_ms),
        }
    }
}

/// Chat message in wire format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, `assistant` or `tool`.
    pub role: String,
    /// Text content. `null` for tool-call-only assistant turns.
    pub content: Option<String>,
    /// Tool calls of an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    /// Answered call id of a tool turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// A tool call in wire format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    /// Call id.
    pub id: String,
    /// Always `function`.
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    /// Function name and JSON-encoded arguments.
    pub function: WireFunction,
}

fn function_type() -> String {
    "function".into()
}

/// Function part of a wire tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireFunction {
    /// Tool name.
    pub name: String,
    /// Arguments as a JSON string.
    #[serde(default)]
    pub arguments: String,
}

/// Tool definition in wire format.
#[derive(Clone, Debug, Serialize)]
pub struct ChatTool {
    /// Always `function`.
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function schema.
    pub function: Value,
}

/// Chat Completions request body.
#[derive(Clone, Debug, Serialize)]
pub struct ChatRequest {
    /// Model ID.
    pub model: String,
    /// Messages.
    pub messages: Vec<ChatMessage>,
    /// Available tools.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ChatTool>,
    /// Output token limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Chat Completions response body.
#[derive(Clone, Debug, Deserialize)]
pub struct ChatResponse {
    /// Candidate replies; only the first is used.
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    /// Token usage.
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

/// One candidate reply.
#[derive(Clone, Debug, Deserialize)]
pub struct ChatChoice {
    /// The reply message.
    pub message: ChatMessage,
    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Usage block of a response.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct ChatUsage {
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Generated tokens.
    #[serde(default)]
    pub completion_tokens: u64,
}
