//! Long-lived conversation state for one test run.
//!
//! A [`Session`] is owned by exactly one run and mutated through `&mut`
//! by one loop invocation at a time. It carries the message list, the tool
//! catalog offered to the model, and the snapshot and compaction policies
//! applied after every tool round.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vigil_context::{CompactionResult, SnapshotBudget, SnapshotManager, SnapshotPolicy, compact};
use vigil_core::ids::SessionId;
use vigil_core::messages::{Message, ToolCall};
use vigil_core::tools::ToolOutcome;
use vigil_llm::Provider;
use vigil_settings::AgentSettings;

use crate::catalog::ToolCatalog;

/// The application under test.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppContext {
    /// Display name.
    pub name: String,
    /// Entry URL.
    pub base_url: String,
    /// Free-form notes for the model (login hints, quirks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Per-session tuning, resolved from [`AgentSettings`].
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    /// Configured iteration floor per step.
    pub max_iterations: u32,
    /// Tail segments kept by compaction; negative disables it.
    pub history_iterations: i32,
    /// Snapshot tool name and budgets.
    pub snapshot: SnapshotPolicy,
    /// Screenshot after each successful state-changing call.
    pub auto_screenshot: bool,
    /// Plan steps offered per batch.
    pub batch_size: usize,
    /// No-progress rounds before a batch step fails.
    pub max_stuck_rounds: u32,
}

impl SessionConfig {
    /// Resolve from settings.
    #[must_use]
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            history_iterations: settings.history_iterations,
            snapshot: SnapshotPolicy::from_settings(settings),
            auto_screenshot: settings.auto_screenshot,
            batch_size: settings.batch_size.max(1),
            max_stuck_rounds: settings.max_stuck_rounds.max(1),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&AgentSettings::default())
    }
}

/// Conversation state for one run.
pub struct Session {
    id: SessionId,
    provider: Arc<dyn Provider>,
    catalog: ToolCatalog,
    messages: Vec<Message>,
    app: AppContext,
    config: SessionConfig,
    snapshots: SnapshotManager,
    variables: BTreeMap<String, String>,
}

impl Session {
    /// Empty session offering the full tool catalog.
    pub fn new(provider: Arc<dyn Provider>, app: AppContext, config: SessionConfig) -> Self {
        let snapshots = SnapshotManager::new(config.snapshot.clone());
        Self {
            id: SessionId::new(),
            provider,
            catalog: ToolCatalog::full(),
            messages: Vec::new(),
            app,
            config,
            snapshots,
            variables: BTreeMap::new(),
        }
    }

    /// Start the conversation with a system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.messages.insert(0, Message::system(prompt));
        self
    }

    /// Replace the tool catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Model provider.
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Tools offered by default.
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Conversation so far.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Application under test.
    pub fn app(&self) -> &AppContext {
        &self.app
    }

    /// Tuning.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Snapshot policy in force.
    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// Variables extracted so far. A later value for a name wins.
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append the result of `call`. Snapshot results go through the
    /// snapshot manager so at most one stays resident.
    pub fn push_tool_result(&mut self, call: &ToolCall, outcome: &ToolOutcome, budget: SnapshotBudget) {
        let text = outcome.conversation_text();
        if self.snapshots.is_snapshot_call(call) {
            let stats = self
                .snapshots
                .insert_result(&mut self.messages, &call.id, &text, budget, !outcome.success);
            if !stats.is_empty() {
                debug!(session_id = %self.id, ?stats, "superseded snapshot pruned");
            }
        } else {
            self.messages
                .push(Message::tool_result(&call.id, &call.name, text, !outcome.success));
        }
    }

    /// Append a caller-side snapshot as a synthetic call/result pair.
    /// Returns the synthetic call id.
    pub fn inject_snapshot(&mut self, content: &str, budget: SnapshotBudget) -> String {
        self.snapshots.inject(&mut self.messages, content, budget)
    }

    /// Run history compaction with the configured window.
    pub fn compact(&mut self) -> CompactionResult {
        let result = compact(&self.messages, self.config.history_iterations);
        if result.removed > 0 {
            self.messages.clone_from(&result.messages);
        }
        result
    }

    /// Merge extracted variables.
    pub fn record_variables(&mut self, variables: &BTreeMap<String, String>) {
        for (name, value) in variables {
            let _ = self.variables.insert(name.clone(), value.clone());
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("messages", &self.messages.len())
            .field("app", &self.app.name)
            .finish_non_exhaustive()
    }
}
