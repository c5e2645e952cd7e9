//! Batch executor.
//!
//! One provider conversation advances through as many of the next few plan
//! steps as the current page snapshot justifies. The model tags every tool
//! call with the step it belongs to, screenshots the end of each step and
//! closes with per-step verdicts plus `EXECUTED_STEP_NUMBERS`. What it
//! claims is then clamped: executed steps form a prefix of the offered
//! order, and a FAIL ends that prefix.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use vigil_context::SnapshotBudget;
use vigil_core::constants::{SCREENSHOT_TOOL, SNAPSHOT_TOOL};
use vigil_core::ids::SessionId;
use vigil_core::messages::Message;
use vigil_llm::{Provider, ProviderOptions};
use vigil_transport::ToolBackend;

use crate::agent_loop::StepExecutionLog;
use crate::catalog::STEP_NUMBER_FIELD;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::grammar::{
    HardFailureRule, NEED_SNAPSHOT, StepVerdict, default_hard_failure_rules, is_bare_need_snapshot,
    parse_extracted_variables, read_batch_reply,
};
use crate::plan::PlanStep;
use crate::session::Session;
use crate::tool_dispatch::{DispatchOptions, capture_screenshot, dispatch_call, step_tag};

/// Tool result for calls skipped after an earlier failure in the batch.
pub const NOT_EXECUTED: &str = "Not executed: an earlier tool call in this batch failed";

const SNAPSHOT_REFUSED: &str =
    "The page snapshot is supplied by the runner. Reply NEED_SNAPSHOT if the current one is not enough.";

/// What one batch achieved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchResult {
    /// Steps offered, in plan order.
    pub offered: Vec<u32>,
    /// Trusted executed steps: a prefix of `offered`.
    pub executed_step_numbers: Vec<u32>,
    /// Verdicts for executed steps.
    pub outcomes: BTreeMap<u32, StepVerdict>,
    /// Screenshot per executed step.
    pub screenshots: BTreeMap<u32, String>,
    /// The model asked for a fresh snapshot.
    pub needs_snapshot: bool,
    /// Diagnostic of a hard-failure rule, if one fired.
    pub hard_failure: Option<String>,
    /// Variables from the final reply.
    pub extracted_variables: BTreeMap<String, String>,
    /// Tool calls made.
    pub log: Vec<StepExecutionLog>,
    /// Final reply text.
    pub final_text: String,
    /// Model rounds used.
    pub iterations: u32,
}

impl BatchResult {
    /// At least one step was executed.
    #[must_use]
    pub fn made_progress(&self) -> bool {
        !self.executed_step_numbers.is_empty()
    }
}

/// Drives batches with a set of hard-failure rules.
pub struct BatchExecutor {
    rules: Vec<Box<dyn HardFailureRule>>,
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("BatchExecutor").field("rules", &names).finish()
    }
}

impl BatchExecutor {
    /// Executor with the default hard-failure rules.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rules(default_hard_failure_rules())
    }

    /// Executor with custom hard-failure rules.
    #[must_use]
    pub fn with_rules(rules: Vec<Box<dyn HardFailureRule>>) -> Self {
        Self { rules }
    }

    /// Instruction message listing the candidate steps and the reply
    /// protocol.
    #[must_use]
    pub fn build_instruction(steps: &[PlanStep]) -> String {
        let mut text = String::from(
            "Execute as many of the following test steps as the current page snapshot allows, in order:\n\n",
        );
        for step in steps {
            let _ = writeln!(text, "Step {}: {}", step.number, step.instruction.trim());
        }
        let _ = write!(
            text,
            "\nProtocol:\n\
             - Add \"{STEP_NUMBER_FIELD}\": <n> to the arguments of every tool call, naming the step it belongs to.\n\
             - Call {SCREENSHOT_TOOL} at the end of each step.\n\
             - Never skip a step. Stop before the first step you cannot complete from the current snapshot \
               and put {NEED_SNAPSHOT} on its own line.\n\
             - For every step you executed write \"Step <n>: PASS - <reason>\" or \"Step <n>: FAIL - <reason>\".\n\
             - To record a value write EXTRACTED_VARIABLE:<name>=<value>.\n\
             - End with \"EXECUTED_STEP_NUMBERS: <comma-separated step numbers>\".\n"
        );
        text
    }

    /// Run one batch over `steps` on `session`.
    ///
    /// A failing tool call fails its step; later calls in the same turn get
    /// [`NOT_EXECUTED`] results and the model gets one more round to report.
    #[instrument(skip_all, fields(session_id = %session.id(), first_step, steps = steps.len()))]
    pub async fn execute_batch(
        &self,
        session: &mut Session,
        backend: &dyn ToolBackend,
        steps: &[PlanStep],
        budget: SnapshotBudget,
    ) -> RuntimeResult<BatchResult> {
        let offered: Vec<u32> = steps.iter().map(|s| s.number).collect();
        let Some(&first) = offered.first() else {
            return Err(RuntimeError::Configuration("batch has no steps".into()));
        };
        let _ = tracing::Span::current().record("first_step", first);

        let catalog = session.catalog().for_batch();
        let step_count = u32::try_from(steps.len()).unwrap_or(u32::MAX);
        let max_rounds = session.config().max_iterations.max(2).saturating_add(step_count);
        let provider_options = ProviderOptions::with_budget(max_rounds);
        let provider: Arc<dyn Provider> = Arc::clone(session.provider());
        let session_id = session.id().clone();

        session.push(Message::user(Self::build_instruction(steps)));

        let mut forced: BTreeMap<u32, StepVerdict> = BTreeMap::new();
        let mut dispatched_steps: BTreeSet<u32> = BTreeSet::new();
        let mut screenshots: BTreeMap<u32, String> = BTreeMap::new();
        let mut log = Vec::new();
        let mut current: Option<u32> = None;
        let mut failed = false;
        let mut final_text: Option<String> = None;
        let mut text_in_history = false;
        let mut iterations = 0;

        for round in 1..=max_rounds {
            iterations = round;
            let turn = provider
                .execute_with_tools(session.messages(), catalog.definitions(), &provider_options)
                .await?;

            if turn.tool_calls.is_empty() {
                final_text = turn.text;
                break;
            }

            // After a failure the model only gets to report.
            let reporting_round = failed;
            let turn_text = turn.text.clone();
            session.push(Message::assistant_with_tools(turn.text, turn.tool_calls.clone()));

            for call in &turn.tool_calls {
                if failed {
                    session.push(Message::tool_result(&call.id, &call.name, NOT_EXECUTED, true));
                    continue;
                }
                if call.name == SNAPSHOT_TOOL {
                    session.push(Message::tool_result(&call.id, &call.name, SNAPSHOT_REFUSED, true));
                    continue;
                }

                let step = step_tag(call)
                    .filter(|n| offered.contains(n))
                    .or(current)
                    .unwrap_or(first);
                if let Some(prev) = current.filter(|&prev| prev != step) {
                    fallback_screenshot(backend, &session_id, prev, &mut screenshots).await;
                }
                current = Some(step);

                let dispatched = dispatch_call(
                    session,
                    backend,
                    call,
                    DispatchOptions {
                        catalog: &catalog,
                        budget,
                        auto_screenshot: false,
                    },
                )
                .await?;

                if call.name == SCREENSHOT_TOOL
                    && let Some(path) = &dispatched.log.screenshot_path
                {
                    let _ = screenshots.insert(step, path.clone());
                }
                if dispatched.outcome.success {
                    if step_tag(call).is_some() {
                        let _ = dispatched_steps.insert(step);
                    }
                } else {
                    debug!(step, tool_name = %call.name, "tool failure fails its step");
                    let reason = format!("{}: {}", call.name, dispatched.outcome.message);
                    let _ = forced.insert(step, StepVerdict::fail(Some(reason)));
                    failed = true;
                }
                let mut entry = dispatched.log;
                entry.step_number = Some(step);
                log.push(entry);
            }
            let _ = session.compact();

            if reporting_round {
                final_text = turn_text;
                text_in_history = true;
                break;
            }
        }

        let text = final_text.unwrap_or_default();
        if text.trim().is_empty() && forced.is_empty() {
            warn!(iterations, "batch ended without a report");
        }
        if !text_in_history && !text.trim().is_empty() && !is_bare_need_snapshot(&text) {
            session.push(Message::assistant(&text));
        }

        let reading = read_batch_reply(&text, &offered, &forced, &dispatched_steps, &self.rules);
        for &step in &reading.executed {
            if !screenshots.contains_key(&step) {
                fallback_screenshot(backend, &session_id, step, &mut screenshots).await;
            }
        }

        let extracted_variables = parse_extracted_variables(&text);
        session.record_variables(&extracted_variables);

        let executed = reading.executed;
        let outcomes = reading
            .verdicts
            .into_iter()
            .filter(|(step, _)| executed.contains(step))
            .collect();
        screenshots.retain(|step, _| executed.contains(step));

        info!(
            executed = ?executed,
            needs_snapshot = reading.need_snapshot,
            hard_failure = reading.hard_failure.is_some(),
            "batch finished"
        );
        Ok(BatchResult {
            offered,
            executed_step_numbers: executed,
            outcomes,
            screenshots,
            needs_snapshot: reading.need_snapshot,
            hard_failure: reading.hard_failure,
            extracted_variables,
            log,
            final_text: text,
            iterations,
        })
    }
}

/// Capture the one fallback screenshot for `step` unless it already has one.
async fn fallback_screenshot(
    backend: &dyn ToolBackend,
    session_id: &SessionId,
    step: u32,
    screenshots: &mut BTreeMap<u32, String>,
) {
    if screenshots.contains_key(&step) {
        return;
    }
    let mut arguments = Map::new();
    let _ = arguments.insert(
        "filename".into(),
        Value::String(format!("{session_id}-step-{step}.png")),
    );
    if let Some(path) = capture_screenshot(backend, arguments).await {
        debug!(step, path = %path, "fallback screenshot");
        let _ = screenshots.insert(step, path);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
