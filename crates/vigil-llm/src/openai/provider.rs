//! `OpenAI` provider implementing the [`Provider`] trait.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, error, info, instrument};
use vigil_core::messages::Message;
use vigil_core::tools::ToolDefinition;

use crate::provider::{
    Provider, ProviderError, ProviderOptions, ProviderResult, ProviderTurn, TokenUsage,
    status_error,
};

use super::message_converter::{convert_messages, convert_tools, parse_tool_calls};
use super::types::{ChatRequest, ChatResponse, DEFAULT_BASE_URL, OpenAiConfig};

/// `OpenAI` model provider.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a provider with its own HTTP client.
    ///
    /// Fails when the HTTP client cannot be built (TLS backend setup).
    pub fn new(config: OpenAiConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                error!(error = %e, "OpenAI HTTP client setup failed");
                ProviderError::Http(e)
            })?;
        info!(model = %config.model, "OpenAI provider initialized");
        Ok(Self { config, client })
    }

    fn build_headers(&self) -> ProviderResult<HeaderMap> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| ProviderError::Auth {
            message: "no OpenAI API key configured".into(),
        })?;
        let mut headers = HeaderMap::new();
        let _ = headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|e| ProviderError::Auth {
                message: format!("Invalid authorization header: {e}"),
            })?,
        );
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &ProviderOptions,
    ) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: convert_messages(messages),
            tools: convert_tools(tools),
            max_tokens: options.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: options.temperature,
        }
    }
}

fn parse_response(response: ChatResponse) -> ProviderResult<ProviderTurn> {
    let usage = response.usage.map(|u| TokenUsage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed {
            message: "response has no choices".into(),
        })?;
    debug!(
        finish_reason = choice.finish_reason.as_deref().unwrap_or("none"),
        "OpenAI response"
    );
    let calls = parse_tool_calls(&choice.message.tool_calls)?;
    Ok(ProviderTurn::from_parts(choice.message.content, calls, usage))
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_available(&self) -> bool {
        self.config.api_key.as_deref().is_some_and(|k| !k.is_empty()) && !self.config.model.is_empty()
    }

    #[instrument(skip_all, fields(provider = "openai", model = %self.config.model))]
    async fn execute_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &ProviderOptions,
    ) -> ProviderResult<ProviderTurn> {
        let headers = self.build_headers()?;
        let request = self.build_request(messages, tools, options);
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));

        debug!(
            message_count = request.messages.len(),
            tool_count = request.tools.len(),
            max_iterations = options.max_iterations,
            "sending OpenAI request"
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
            error!(status = status.as_u16(), category = err.category(), "OpenAI API error");
            return Err(err);
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
                message: format!("unexpected OpenAI response body: {e}"),
            })?;
        parse_response(parsed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
