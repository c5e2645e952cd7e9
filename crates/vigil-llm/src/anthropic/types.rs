//! Wire types for the Anthropic Messages API.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vigil_settings::ProviderEndpoint;

/// Default base URL for the Anthropic API.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value.
pub const API_VERSION: &str = "2023-06-01";

/// Configuration for the Anthropic provider.
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
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

impl AnthropicConfig {
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

/// Tool definition for the Anthropic API.
#[derive(Clone, Debug, Serialize)]
pub struct AnthropicTool {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for input parameters.
    pub input_schema: Value,
}

/// Anthropic Messages API request body.
#[derive(Clone, Debug, Serialize)]
pub struct AnthropicRequest {
    /// Model ID.
    pub model: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Messages.
    pub messages: Vec<AnthropicMessageParam>,
    /// System prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Available tools.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<AnthropicTool>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// A message in the Anthropic Messages API format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessageParam {
    /// Role: `"user"` or `"assistant"`.
    pub role: String,
    /// Content blocks.
    pub content: Vec<Value>,
}

/// Non-streaming response body.
#[derive(Clone, Debug, Deserialize)]
pub struct AnthropicResponse {
    /// Content blocks in order.
    #[serde(default)]
    pub content: Vec<ResponseBlock>,
    /// Why generation stopped.
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Token usage.
    #[serde(default)]
    pub usage: Option<ResponseUsage>,
}

/// One content block of a response.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    /// Text output.
    Text {
        /// The text.
        text: String,
    },
    /// Tool invocation.
    ToolUse {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
        /// Arguments.
        #[serde(default)]
        input: Value,
    },
    /// Blocks this client does not use (thinking, etc.).
    #[serde(other)]
    Other,
}

/// Usage block of a response.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct ResponseUsage {
    /// Prompt tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Generated tokens.
    #[serde(default)]
    pub output_tokens: u64,
}
