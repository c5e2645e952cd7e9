//! Agent loop: one plan step, driven to completion.
//!
//! Each iteration is one model round. A turn with tool calls runs them in
//! order against the backend, appends the Assistant and Tool messages,
//! prunes stale snapshots and compacts history before the next round. A
//! turn without tool calls ends the step.
//!
//! ```text
//! ITERATE ──► complete ──► NEED_SNAPSHOT? ──► NeedSnapshot
//!    │                          └─────────► Completed (variables parsed)
//!    └──► tool calls ──► dispatch ──► prune + compact ──► ITERATE
//! budget spent ──► MaxIterations
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use vigil_context::SnapshotBudget;
use vigil_core::messages::Message;
use vigil_llm::{Provider, ProviderOptions};
use vigil_transport::ToolBackend;

use crate::catalog::ToolCatalog;
use crate::errors::RuntimeResult;
use crate::grammar::{is_bare_need_snapshot, is_need_snapshot, parse_extracted_variables};
use crate::intent::effective_max_iterations;
use crate::session::{AppContext, Session, SessionConfig};
use crate::tool_dispatch::{DispatchOptions, dispatch_call};

/// How a step ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The model finished with a final reply.
    Completed,
    /// The model asked for a fresh page snapshot.
    NeedSnapshot,
    /// The iteration budget ran out.
    MaxIterations,
}

/// One tool call made while running a step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionLog {
    /// Tool name.
    pub tool_name: String,
    /// Arguments as dispatched (step tag removed).
    pub arguments: Map<String, Value>,
    /// One-line outcome.
    pub result_summary: String,
    /// Screenshot taken by or after the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    /// Whether the tool succeeded.
    pub success: bool,
    /// Plan step the call was tagged with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_number: Option<u32>,
}

/// Result of [`execute_step`].
#[derive(Clone, Debug, PartialEq)]
pub struct StepRunResult {
    /// How the step ended.
    pub status: StepStatus,
    /// Final reply text, if the model gave one.
    pub final_text: Option<String>,
    /// Variables parsed from the final reply.
    pub extracted_variables: BTreeMap<String, String>,
    /// Model rounds used.
    pub iterations: u32,
    /// Budget the step ran under.
    pub max_iterations: u32,
    /// Tool calls made.
    pub log: Vec<StepExecutionLog>,
}

impl StepRunResult {
    /// Last screenshot taken during the step.
    #[must_use]
    pub fn last_screenshot(&self) -> Option<&str> {
        self.log.iter().rev().find_map(|e| e.screenshot_path.as_deref())
    }
}

/// Per-invocation options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepOptions {
    /// Hide the snapshot tool; the caller supplies page state.
    pub exclude_snapshot: bool,
    /// Override the configured iteration floor.
    pub max_iterations: Option<u32>,
    /// The instruction is already in the conversation; push
    /// [`CONTINUE_STEP`] instead of repeating it.
    pub resume: bool,
}

/// User turn that resumes a step after a fresh snapshot.
pub const CONTINUE_STEP: &str = "The page snapshot above is current. Continue the same step.";

/// Run one instruction on a long-lived session.
///
/// Tool errors go back to the model as error results. Provider errors and
/// transport errors that survived the retry abort with `Err`.
#[instrument(skip_all, fields(session_id = %session.id(), max_iterations))]
pub async fn execute_step(
    session: &mut Session,
    backend: &dyn ToolBackend,
    instruction: &str,
    options: StepOptions,
) -> RuntimeResult<StepRunResult> {
    let configured = options.max_iterations.unwrap_or(session.config().max_iterations);
    let max_iterations = effective_max_iterations(instruction, configured);
    let _ = tracing::Span::current().record("max_iterations", max_iterations);

    let catalog = if options.exclude_snapshot {
        session.catalog().without_snapshot()
    } else {
        session.catalog().clone()
    };
    let provider_options = ProviderOptions::with_budget(max_iterations);
    let provider: Arc<dyn Provider> = Arc::clone(session.provider());
    let auto_screenshot = session.config().auto_screenshot;

    session.push(Message::user(if options.resume {
        CONTINUE_STEP
    } else {
        instruction
    }));
    let mut log = Vec::new();

    for iteration in 1..=max_iterations {
        let turn = provider
            .execute_with_tools(session.messages(), catalog.definitions(), &provider_options)
            .await?;

        if turn.tool_calls.is_empty() {
            let text = turn.text.unwrap_or_default();
            if is_need_snapshot(&text) {
                debug!(iteration, "model requested a snapshot");
                if !is_bare_need_snapshot(&text) {
                    session.push(Message::assistant(&text));
                }
                return Ok(StepRunResult {
                    status: StepStatus::NeedSnapshot,
                    final_text: Some(text),
                    extracted_variables: BTreeMap::new(),
                    iterations: iteration,
                    max_iterations,
                    log,
                });
            }
            if !text.trim().is_empty() {
                session.push(Message::assistant(&text));
            }
            let variables = parse_extracted_variables(&text);
            session.record_variables(&variables);
            info!(iteration, tool_calls = log.len(), "step completed");
            return Ok(StepRunResult {
                status: StepStatus::Completed,
                final_text: Some(text),
                extracted_variables: variables,
                iterations: iteration,
                max_iterations,
                log,
            });
        }

        debug!(iteration, calls = turn.tool_calls.len(), "executing tool calls");
        session.push(Message::assistant_with_tools(turn.text, turn.tool_calls.clone()));
        for call in &turn.tool_calls {
            let dispatched = dispatch_call(
                session,
                backend,
                call,
                DispatchOptions {
                    catalog: &catalog,
                    budget: SnapshotBudget::Normal,
                    auto_screenshot,
                },
            )
            .await?;
            log.push(dispatched.log);
        }
        let _ = session.compact();
    }

    warn!(max_iterations, "step budget exhausted");
    Ok(StepRunResult {
        status: StepStatus::MaxIterations,
        final_text: None,
        extracted_variables: BTreeMap::new(),
        iterations: max_iterations,
        max_iterations,
        log,
    })
}

/// One-shot variant: a fresh session with the full catalog.
pub async fn execute(
    provider: Arc<dyn Provider>,
    backend: &dyn ToolBackend,
    app: AppContext,
    system_prompt: &str,
    config: SessionConfig,
    instruction: &str,
) -> RuntimeResult<StepRunResult> {
    let mut session = Session::new(provider, app, config)
        .with_catalog(ToolCatalog::full())
        .with_system_prompt(system_prompt);
    execute_step(&mut session, backend, instruction, StepOptions::default()).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RuntimeError;
    use crate::test_support::{MockBackend, MockProvider, call, session, session_with, tools_turn};
    use assert_matches::assert_matches;
    use serde_json::json;
    use vigil_core::messages::validate_pairing;
    use vigil_core::tools::ToolOutcome;
    use vigil_llm::{ProviderError, ProviderTurn};
    use vigil_transport::TransportError;

    #[tokio::test]
    async fn text_only_reply_completes() {
        let provider = MockProvider::new(vec![ProviderTurn::complete("Page loaded.")]);
        let mut session = session(Arc::clone(&provider));
        let backend = MockBackend::new();

        let result = execute_step(&mut session, &backend, "Open the home page", StepOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.iterations, 1);
        assert!(backend.calls().is_empty());
        let last = session.messages().last().unwrap();
        assert!(last.is_assistant());
        assert_eq!(last.content(), Some("Page loaded."));
    }

    #[tokio::test]
    async fn tool_round_then_completion() {
        let provider = MockProvider::new(vec![
            tools_turn(vec![call("c1", "navigate", json!({"url": "https://shop.test"}))]),
            ProviderTurn::complete("Done.\nEXTRACTED_VARIABLE:title=Shop Home"),
        ]);
        let mut session = session(Arc::clone(&provider));
        let backend = MockBackend::new();

        let result = execute_step(&mut session, &backend, "Open the shop", StepOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.extracted_variables["title"], "Shop Home");
        assert_eq!(session.variables()["title"], "Shop Home");
        // navigate changes state, so a screenshot follows it.
        assert_eq!(backend.call_names(), vec!["navigate", "take_screenshot"]);
        assert_eq!(result.log.len(), 1);
        assert_eq!(result.log[0].screenshot_path.as_deref(), Some("shot-2.png"));
        assert_eq!(result.last_screenshot(), Some("shot-2.png"));
        validate_pairing(session.messages()).unwrap();

        // The second request saw the tool result.
        let second = &provider.requests()[1];
        assert!(second.iter().any(|m| m.tool_call_id() == Some("c1")));
    }

    #[tokio::test]
    async fn no_screenshot_after_read_only_or_failed_calls() {
        let provider = MockProvider::new(vec![
            tools_turn(vec![
                call("c1", "wait_for", json!({"time": 1})),
                call("c2", "click", json!({"element": "Buy", "ref": "e9"})),
            ]),
            ProviderTurn::complete("ok"),
        ]);
        let mut session = session(Arc::clone(&provider));
        let backend = MockBackend::new().respond("click", ToolOutcome::failure("element not found"));

        let result = execute_step(&mut session, &backend, "Buy", StepOptions::default())
            .await
            .unwrap();

        assert_eq!(backend.call_names(), vec!["wait_for", "click"]);
        assert!(!result.log[1].success);
        let err_msg = session
            .messages()
            .iter()
            .find(|m| m.tool_call_id() == Some("c2"))
            .unwrap();
        assert!(err_msg.is_error());
        assert_eq!(err_msg.content(), Some("Error: element not found"));
    }

    #[tokio::test]
    async fn auto_screenshot_can_be_disabled() {
        let provider = MockProvider::new(vec![
            tools_turn(vec![call("c1", "click", json!({"element": "Buy", "ref": "e9"}))]),
            ProviderTurn::complete("ok"),
        ]);
        let config = SessionConfig {
            auto_screenshot: false,
            ..SessionConfig::default()
        };
        let mut session = session_with(Arc::clone(&provider), config);
        let backend = MockBackend::new();
        let _ = execute_step(&mut session, &backend, "Buy", StepOptions::default())
            .await
            .unwrap();
        assert_eq!(backend.call_names(), vec!["click"]);
    }

    #[tokio::test]
    async fn screenshot_failure_is_swallowed() {
        let provider = MockProvider::new(vec![
            tools_turn(vec![call("c1", "press_key", json!({"key": "Enter"}))]),
            ProviderTurn::complete("ok"),
        ]);
        let mut session = session(Arc::clone(&provider));
        let backend = MockBackend::new().queue(
            "take_screenshot",
            Err(TransportError::Handshake {
                reason: "gone".into(),
            }),
        );
        let (logs, _guard) = vigil_core::logging::test_utils::capture_logs();

        let result = execute_step(&mut session, &backend, "Submit", StepOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Completed);
        assert!(result.log[0].screenshot_path.is_none());
        assert!(logs.has_event(tracing::Level::WARN, "screenshot transport error"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_model() {
        let provider = MockProvider::new(vec![
            tools_turn(vec![call("c1", "hover", json!({}))]),
            ProviderTurn::complete("gave up"),
        ]);
        let mut session = session(Arc::clone(&provider));
        let backend = MockBackend::new();

        let result = execute_step(&mut session, &backend, "Hover", StepOptions::default())
            .await
            .unwrap();

        assert!(backend.calls().is_empty());
        assert_eq!(result.log[0].result_summary, "error: Unknown tool: hover");
        validate_pairing(session.messages()).unwrap();
    }

    #[tokio::test]
    async fn need_snapshot_is_terminal() {
        let provider = MockProvider::new(vec![ProviderTurn::complete("  need_snapshot\n")]);
        let mut session = session(Arc::clone(&provider));
        let backend = MockBackend::new();
        let before = session.messages().len();

        let result = execute_step(
            &mut session,
            &backend,
            "Click Checkout",
            StepOptions {
                exclude_snapshot: true,
                ..StepOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(result.status, StepStatus::NeedSnapshot);
        // Only the instruction was added; the sentinel reply is not kept.
        assert_eq!(session.messages().len(), before + 1);
        assert!(!provider.offered_tools()[0].contains(&"snapshot".to_owned()));
    }

    #[tokio::test]
    async fn budget_exhaustion_is_an_outcome() {
        let turns = (0..3)
            .map(|i| tools_turn(vec![call(&format!("c{i}"), "wait_for", json!({"time": 1}))]))
            .collect();
        let provider = MockProvider::new(turns);
        let mut session = session(Arc::clone(&provider));
        let backend = MockBackend::new();

        let result = execute_step(&mut session, &backend, "Wait for the banner", StepOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::MaxIterations);
        assert_eq!(result.iterations, 3);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.budgets(), vec![3, 3, 3]);
    }

    #[tokio::test]
    async fn date_selection_raises_budget() {
        let provider = MockProvider::new(vec![ProviderTurn::complete("done")]);
        let mut session = session(Arc::clone(&provider));
        let result = execute_step(
            &mut session,
            &MockBackend::new(),
            "select March 5 2024 from the date picker",
            StepOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(result.max_iterations, 6);
        assert_eq!(provider.budgets(), vec![6]);
    }

    #[tokio::test]
    async fn history_is_compacted_between_rounds() {
        let mut turns: Vec<ProviderTurn> = (0..5)
            .map(|i| tools_turn(vec![call(&format!("c{i}"), "wait_for", json!({"time": 1}))]))
            .collect();
        turns.push(ProviderTurn::complete("done"));
        let provider = MockProvider::new(turns);
        let config = SessionConfig {
            history_iterations: 1,
            ..SessionConfig::default()
        };
        let mut session = session_with(Arc::clone(&provider), config);

        let result = execute_step(
            &mut session,
            &MockBackend::new(),
            "Wait",
            StepOptions {
                max_iterations: Some(6),
                ..StepOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(result.status, StepStatus::Completed);
        // System + instruction + one segment (assistant + tool) on the last request.
        let last_request = provider.requests().last().cloned().unwrap();
        assert_eq!(last_request.len(), 4);
        assert_eq!(last_request[3].tool_call_id(), Some("c4"));
    }

    #[tokio::test]
    async fn repeated_snapshots_keep_one_resident() {
        let provider = MockProvider::new(vec![
            tools_turn(vec![call("s1", "snapshot", json!({}))]),
            tools_turn(vec![call("s2", "snapshot", json!({}))]),
            ProviderTurn::complete("done"),
        ]);
        let config = SessionConfig {
            history_iterations: -1,
            ..SessionConfig::default()
        };
        let mut session = session_with(Arc::clone(&provider), config);

        let _ = execute_step(&mut session, &MockBackend::new(), "Look", StepOptions::default())
            .await
            .unwrap();

        let snapshot_results: Vec<&Message> = session
            .messages()
            .iter()
            .filter(|m| m.tool_name() == Some("snapshot"))
            .collect();
        assert_eq!(snapshot_results.len(), 1);
        assert_eq!(snapshot_results[0].tool_call_id(), Some("s2"));
        validate_pairing(session.messages()).unwrap();
    }

    #[tokio::test]
    async fn provider_error_aborts() {
        let provider = MockProvider::failing(ProviderError::Auth {
            message: "bad key".into(),
        });
        let mut session = session(provider);
        let err = execute_step(&mut session, &MockBackend::new(), "Open", StepOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, RuntimeError::Provider(ProviderError::Auth { .. }));
    }

    #[tokio::test]
    async fn transport_error_aborts() {
        let provider = MockProvider::new(vec![tools_turn(vec![call("c1", "navigate", json!({"url": "x"}))])]);
        let mut session = session(provider);
        let backend = MockBackend::new().queue(
            "navigate",
            Err(TransportError::ProcessDied {
                reason: "exit status 1".into(),
            }),
        );
        let err = execute_step(&mut session, &backend, "Open", StepOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, RuntimeError::Transport(TransportError::ProcessDied { .. }));
    }

    #[tokio::test]
    async fn one_shot_execute_uses_fresh_session() {
        let provider = MockProvider::new(vec![ProviderTurn::complete("done")]);
        let result = execute(
            Arc::clone(&provider) as Arc<dyn Provider>,
            &MockBackend::new(),
            AppContext::default(),
            "system",
            SessionConfig::default(),
            "Open the page",
        )
        .await
        .unwrap();
        assert_eq!(result.status, StepStatus::Completed);
        let request = &provider.requests()[0];
        assert!(request[0].is_system());
        assert_eq!(request[1].content(), Some("Open the page"));
        assert!(provider.offered_tools()[0].contains(&"snapshot".to_owned()));
    }
}
