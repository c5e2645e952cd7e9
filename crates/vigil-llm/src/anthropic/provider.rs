//! Anthropic provider implementing the [`Provider`] trait.
//!
//! Sends non-streaming requests to the Messages API and maps the returned
//! content blocks onto a [`ProviderTurn`].

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, error, info, instrument};
use vigil_core::messages::{Message, ToolCall};
use vigil_core::tools::ToolDefinition;

use crate::provider::{
    Provider, ProviderError, ProviderOptions, ProviderResult, ProviderTurn, TokenUsage,
    status_error,
};

use super::message_converter::{convert_messages, convert_tools};
use super::types::{
    API_VERSION, AnthropicConfig, AnthropicRequest, AnthropicResponse, DEFAULT_BASE_URL,
    ResponseBlock,
};

/// Anthropic model provider.
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a provider with its own HTTP client.
    ///
    /// Fails when the HTTP client cannot be built (TLS backend setup).
    pub fn new(config: AnthropicConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                error!(error = %e, "Anthropic HTTP client setup failed");
                ProviderError::Http(e)
            })?;
        info!(model = %config.model, "Anthropic provider initialized");
        Ok(Self { config, client })
    }

    fn build_headers(&self) -> ProviderResult<HeaderMap> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| ProviderError::Auth {
            message: "no Anthropic API key configured".into(),
        })?;
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let _ = headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        let _ = headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key).map_err(|e| ProviderError::Auth {
                message: format!("Invalid API key header: {e}"),
            })?,
        );
        Ok(headers)
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &ProviderOptions,
    ) -> AnthropicRequest {
        let (system, messages) = convert_messages(messages);
        AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: options.max_tokens.unwrap_or(self.config.max_tokens),
            messages,
            system,
            tools: convert_tools(tools),
            temperature: options.temperature,
        }
    }
}

/// Map a parsed response onto a turn.
fn parse_response(response: AnthropicResponse) -> ProviderResult<ProviderTurn> {
    let mut texts: Vec<String> = Vec::new();
    let mut calls: Vec<ToolCall> = Vec::new();
    for block in response.content {
        match block {
            ResponseBlock::Text { text } => texts.push(text),
            ResponseBlock::ToolUse { id, name, input } => {
                let arguments = match input {
                    serde_json::Value::Object(map) => map,
                    serde_json::Value::Null => serde_json::Map::new(),
                    other => {
                        return Err(ProviderError::Malformed {
                            message: format!("tool_use {id} input is not an object: {other}"),
                        });
                    }
                };
                if id.is_empty() || name.is_empty() {
                    return Err(ProviderError::Malformed {
                        message: "tool_use block without id or name".into(),
                    });
                }
                calls.push(ToolCall::new(id, name, arguments));
            }
            ResponseBlock::Other => {}
        }
    }
    let text = (!texts.is_empty()).then(|| texts.join("\n"));
    let usage = response.usage.map(|u| TokenUsage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
    });
    Ok(ProviderTurn::from_parts(text, calls, usage))
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_available(&self) -> bool {
        self.config.api_key.as_deref().is_some_and(|k| !k.is_empty()) && !self.config.model.is_empty()
    }

    #[instrument(skip_all, fields(provider = "anthropic", model = %self.config.model))]
    async fn execute_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &ProviderOptions,
    ) -> ProviderResult<ProviderTurn> {
        let headers = self.build_headers()?;
        let request = self.build_request(messages, tools, options);
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{}/v1/messages", base_url.trim_end_matches('/'));

        debug!(
            message_count = request.messages.len(),
            tool_count = request.tools.len(),
            max_iterations = options.max_iterations,
            "sending Anthropic request"
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let err = status_error(status.as_u16(), &body);
            error!(status = status.as_u16(), category = err.category(), "Anthropic API error");
            return Err(err);
        }

        let parsed: AnthropicResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::Malformed {
                message: format!("unexpected Anthropic response body: {e}"),
            }
        })?;
        debug!(stop_reason = parsed.stop_reason.as_deref().unwrap_or("none"), "Anthropic response");
        parse_response(parsed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
