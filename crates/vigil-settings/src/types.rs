//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial
//! JSON files are accepted; missing fields take their [`Default`] value.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the Vigil agent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigilSettings {
    /// Model provider selection and credentials.
    pub provider: ProviderSettings,
    /// Agent loop and batch executor tuning.
    pub agent: AgentSettings,
    /// Automation subprocess settings.
    pub transport: TransportSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl VigilSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let agent = &self.agent;
        if agent.max_iterations == 0 {
            return Err(SettingsError::InvalidValue(
                "agent.maxIterations must be at least 1".into(),
            ));
        }
        if agent.history_iterations < -1 {
            return Err(SettingsError::InvalidValue(
                "agent.historyIterations must be -1 (disabled) or non-negative".into(),
            ));
        }
        if agent.batch_size == 0 {
            return Err(SettingsError::InvalidValue(
                "agent.batchSize must be at least 1".into(),
            ));
        }
        if agent.snapshot_escalated_max_chars < agent.snapshot_max_chars {
            return Err(SettingsError::InvalidValue(
                "agent.snapshotEscalatedMaxChars must not be below agent.snapshotMaxChars".into(),
            ));
        }
        if self.transport.command.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "transport.command must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Provider selection plus per-provider blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// Registry name of the provider used for new sessions.
    #[serde(rename = "default")]
    pub default_provider: String,
    /// Content-block style provider.
    pub anthropic: ProviderEndpoint,
    /// Function-call style provider.
    pub openai: ProviderEndpoint,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            default_provider: "anthropic".to_string(),
            anthropic: ProviderEndpoint {
                api_key_env: "ANTHROPIC_API_KEY".to_string(),
                base_url: "https://api.anthropic.com".to_string(),
                model: "claude-sonnet-4-5".to_string(),
                ..ProviderEndpoint::default()
            },
            openai: ProviderEndpoint {
                api_key_env: "OPENAI_API_KEY".to_string(),
                base_url: "https://api.openai.com".to_string(),
                model: "gpt-4.1".to_string(),
                ..ProviderEndpoint::default()
            },
        }
    }
}

impl ProviderSettings {
    /// Endpoint block for a registry name.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> Option<&ProviderEndpoint> {
        match name {
            "anthropic" => Some(&self.anthropic),
            "openai" => Some(&self.openai),
            _ => None,
        }
    }
}

/// Connection settings for one provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderEndpoint {
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Inline API key. Takes precedence over `api_key_env`; never written back.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Base URL without the API path.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Output token limit per call.
    pub max_tokens: u32,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ProviderEndpoint {
    fn default() -> Self {
        Self {
            api_key_env: String::new(),
            api_key: None,
            base_url: String::new(),
            model: String::new(),
            max_tokens: 4096,
            timeout_ms: 120_000,
        }
    }
}

impl ProviderEndpoint {
    /// Resolve the API key from the inline value or the environment.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                if self.api_key_env.is_empty() {
                    return None;
                }
                std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

/// Agent loop and batch executor tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Configured iteration floor for a single step.
    pub max_iterations: u32,
    /// Tail segments kept by history compaction; -1 disables it.
    pub history_iterations: i32,
    /// Snapshot character budget.
    pub snapshot_max_chars: usize,
    /// Snapshot budget while a batch is stuck.
    pub snapshot_escalated_max_chars: usize,
    /// Plan steps offered per batch call.
    pub batch_size: usize,
    /// No-progress rounds before a step is failed.
    pub max_stuck_rounds: u32,
    /// Capture a screenshot after each state-changing tool.
    pub auto_screenshot: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            history_iterations: 3,
            snapshot_max_chars: 20_000,
            snapshot_escalated_max_chars: 40_000,
            batch_size: 5,
            max_stuck_rounds: 4,
            auto_screenshot: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Automation subprocess settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Executable to spawn.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Handshake timeout in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Per tool call timeout in milliseconds.
    pub call_timeout_ms: u64,
    /// Directory screenshots are written to.
    pub screenshot_dir: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            command: "vigil-automation".to_string(),
            args: Vec::new(),
            handshake_timeout_ms: 30_000,
            call_timeout_ms: 60_000,
            screenshot_dir: "screenshots".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_validate() {
        let settings = VigilSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.agent.max_iterations, 3);
        assert_eq!(settings.agent.max_stuck_rounds, 4);
        assert_eq!(settings.provider.default_provider, "anthropic");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: VigilSettings =
            serde_json::from_str(r#"{"agent": {"batchSize": 8}}"#).unwrap();
        assert_eq!(settings.agent.batch_size, 8);
        assert_eq!(settings.agent.history_iterations, 3);
        assert_eq!(settings.transport.call_timeout_ms, 60_000);
    }

    #[test]
    fn escalated_budget_below_normal_is_rejected() {
        let mut settings = VigilSettings::default();
        settings.agent.snapshot_escalated_max_chars = 100;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn history_below_minus_one_is_rejected() {
        let mut settings = VigilSettings::default();
        settings.agent.history_iterations = -2;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
        settings.agent.history_iterations = -1;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn inline_api_key_wins_and_is_not_serialized() {
        let endpoint = ProviderEndpoint {
            api_key: Some("sk-inline".into()),
            api_key_env: "VIGIL_TEST_UNSET_KEY_VAR".into(),
            ..ProviderEndpoint::default()
        };
        assert_eq!(endpoint.resolve_api_key().as_deref(), Some("sk-inline"));
        let v = serde_json::to_value(&endpoint).unwrap();
        assert!(v.get("apiKey").is_none());
    }

    #[test]
    fn missing_key_resolves_to_none() {
        let endpoint = ProviderEndpoint {
            api_key_env: "VIGIL_TEST_DEFINITELY_UNSET".into(),
            ..ProviderEndpoint::default()
        };
        assert!(endpoint.resolve_api_key().is_none());
    }

    #[test]
    fn endpoint_lookup_by_name() {
        let p = ProviderSettings::default();
        assert_eq!(p.endpoint("openai").unwrap().api_key_env, "OPENAI_API_KEY");
        assert!(p.endpoint("gemini").is_none());
    }
}
