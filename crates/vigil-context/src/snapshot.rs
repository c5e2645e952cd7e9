//! Snapshot deduplication and truncation.
//!
//! Page snapshots dominate token cost. Before a new snapshot result enters
//! the conversation every earlier one is retired:
//!
//! - an assistant message whose calls were *all* snapshot calls is removed
//!   together with its results;
//! - an assistant message that mixed a snapshot call with other calls stays,
//!   and its stale snapshot result is replaced by a short placeholder so the
//!   call still has an answer.
//!
//! Retired placeholders are marked with a `superseded` metadata key and are
//! not counted as resident.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use vigil_core::constants::SNAPSHOT_TOOL;
use vigil_core::ids::synthetic_call_id;
use vigil_core::messages::{Message, ToolCall};
use vigil_settings::AgentSettings;

/// Content of a retired snapshot result that still has to answer its call.
pub const SUPERSEDED_PLACEHOLDER: &str = "[snapshot superseded by a newer snapshot]";

const SUPERSEDED_KEY: &str = "superseded";

/// Which character budget applies to a snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBudget {
    /// Regular budget.
    #[default]
    Normal,
    /// Larger budget used while a batch is stuck.
    Escalated,
}

/// Snapshot tool name and budgets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPolicy {
    /// Tool whose results are snapshots.
    pub tool_name: String,
    /// Normal budget in characters.
    pub max_chars: usize,
    /// Escalated budget in characters.
    pub escalated_max_chars: usize,
}

impl SnapshotPolicy {
    /// Policy from agent settings.
    #[must_use]
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self {
            tool_name: SNAPSHOT_TOOL.to_owned(),
            max_chars: settings.snapshot_max_chars,
            escalated_max_chars: settings.snapshot_escalated_max_chars,
        }
    }

    /// Character limit for `budget`.
    #[must_use]
    pub fn limit(&self, budget: SnapshotBudget) -> usize {
        match budget {
            SnapshotBudget::Normal => self.max_chars,
            SnapshotBudget::Escalated => self.escalated_max_chars,
        }
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self::from_settings(&AgentSettings::default())
    }
}

/// What a prune pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Snapshot results removed outright.
    pub removed_results: usize,
    /// Snapshot-only assistant messages removed.
    pub removed_assistants: usize,
    /// Snapshot results replaced by the placeholder.
    pub replaced: usize,
}

impl PruneStats {
    /// Whether the pass changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed_results == 0 && self.removed_assistants == 0 && self.replaced == 0
    }
}

/// Keeps at most one snapshot resident in a message list.
#[derive(Clone, Debug, Default)]
pub struct SnapshotManager {
    policy: SnapshotPolicy,
}

impl SnapshotManager {
    /// Create a manager for `policy`.
    #[must_use]
    pub fn new(policy: SnapshotPolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> &SnapshotPolicy {
        &self.policy
    }

    /// Whether `call` requests a snapshot.
    #[must_use]
    pub fn is_snapshot_call(&self, call: &ToolCall) -> bool {
        call.name == self.policy.tool_name
    }

    /// Whether `msg` is a snapshot result that has not been retired.
    #[must_use]
    pub fn is_resident(&self, msg: &Message) -> bool {
        match msg {
            Message::Tool { metadata, .. } => {
                metadata.tool_name.as_deref() == Some(self.policy.tool_name.as_str())
                    && !metadata.extra.contains_key(SUPERSEDED_KEY)
            }
            _ => false,
        }
    }

    /// Number of resident snapshots.
    #[must_use]
    pub fn resident_count(&self, messages: &[Message]) -> usize {
        messages.iter().filter(|m| self.is_resident(m)).count()
    }

    /// Retire every snapshot result currently in `messages`.
    pub fn prune_before_insert(&self, messages: &mut Vec<Message>) -> PruneStats {
        let stale: HashSet<String> = messages
            .iter()
            .filter(|m| m.tool_name() == Some(self.policy.tool_name.as_str()))
            .filter_map(|m| m.tool_call_id().map(str::to_owned))
            .collect();
        if stale.is_empty() {
            return PruneStats::default();
        }

        // Owner assistant of every call id, and whether that owner only made
        // stale snapshot calls.
        let mut owner: HashMap<&str, usize> = HashMap::new();
        let mut exclusive: HashSet<usize> = HashSet::new();
        for (idx, msg) in messages.iter().enumerate() {
            let calls = msg.tool_calls();
            if calls.is_empty() {
                continue;
            }
            for call in calls {
                let _ = owner.insert(call.id.as_str(), idx);
            }
            if calls.iter().all(|c| stale.contains(&c.id)) {
                let _ = exclusive.insert(idx);
            }
        }

        let mut stats = PruneStats::default();
        let mut remove = vec![false; messages.len()];
        let mut replace = vec![false; messages.len()];
        for (idx, msg) in messages.iter().enumerate() {
            if exclusive.contains(&idx) {
                remove[idx] = true;
                stats.removed_assistants += 1;
                continue;
            }
            let Some(id) = msg.tool_call_id() else {
                continue;
            };
            if !stale.contains(id) {
                continue;
            }
            match owner.get(id) {
                Some(o) if !exclusive.contains(o) => {
                    if self.is_resident(msg) {
                        replace[idx] = true;
                        stats.replaced += 1;
                    }
                }
                _ => {
                    remove[idx] = true;
                    stats.removed_results += 1;
                }
            }
        }

        if stats.is_empty() {
            return stats;
        }

        let old = std::mem::take(messages);
        messages.extend(
            old.into_iter()
                .enumerate()
                .filter(|(idx, _)| !remove[*idx])
                .map(|(idx, msg)| if replace[idx] { retire(msg) } else { msg }),
        );

        debug!(
            removed_results = stats.removed_results,
            removed_assistants = stats.removed_assistants,
            replaced = stats.replaced,
            "pruned stale snapshots"
        );
        stats
    }

    /// Prune, then append the result of snapshot call `call_id` truncated
    /// to `budget`.
    pub fn insert_result(
        &self,
        messages: &mut Vec<Message>,
        call_id: &str,
        content: &str,
        budget: SnapshotBudget,
        is_error: bool,
    ) -> PruneStats {
        let stats = self.prune_before_insert(messages);
        let body = truncate_snapshot(content, self.policy.limit(budget));
        messages.push(Message::tool_result(call_id, &self.policy.tool_name, body, is_error));
        stats
    }

    /// Append a snapshot the runtime took on its own as a synthetic
    /// call/result pair. Returns the synthetic call id.
    pub fn inject(&self, messages: &mut Vec<Message>, content: &str, budget: SnapshotBudget) -> String {
        let _ = self.prune_before_insert(messages);
        let call_id = synthetic_call_id();
        messages.push(Message::assistant_with_tools(
            None,
            vec![ToolCall::new(&call_id, &self.policy.tool_name, Map::new())],
        ));
        let body = truncate_snapshot(content, self.policy.limit(budget));
        messages.push(Message::tool_result(&call_id, &self.policy.tool_name, body, false));
        debug!(call_id = %call_id, budget = ?budget, "injected snapshot");
        call_id
    }
}

fn retire(msg: Message) -> Message {
    match msg {
        Message::Tool {
            tool_call_id,
            mut metadata,
            ..
        } => {
            let _ = metadata.extra.insert(SUPERSEDED_KEY.into(), Value::Bool(true));
            Message::Tool {
                tool_call_id,
                content: SUPERSEDED_PLACEHOLDER.to_owned(),
                is_error: None,
                metadata,
            }
        }
        other => other,
    }
}

/// Cut `content` to at most `max_chars` characters and append a marker
/// naming both lengths. Content within budget is returned unchanged.
#[must_use]
pub fn truncate_snapshot(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_owned();
    }
    let cut = content
        .char_indices()
        .nth(max_chars)
        .map_or(content.len(), |(i, _)| i);
    format!(
        "{}\n\n[snapshot truncated: showing {max_chars} of {total} characters]",
        &content[..cut]
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
