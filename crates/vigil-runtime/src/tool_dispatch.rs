//! Executes one model tool call against the backend.
//!
//! Pipeline: strip step tag → catalog check → backend call → append result
//! (snapshot results through the snapshot manager) → optional screenshot.

use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use vigil_context::SnapshotBudget;
use vigil_core::constants::SCREENSHOT_TOOL;
use vigil_core::messages::ToolCall;
use vigil_core::tools::ToolOutcome;
use vigil_transport::ToolBackend;

use crate::agent_loop::StepExecutionLog;
use crate::catalog::{BrowserTool, STEP_NUMBER_FIELD, ToolCatalog};
use crate::errors::RuntimeResult;
use crate::session::Session;

const SUMMARY_CHARS: usize = 200;

/// Step tag of a batch tool call, if present and numeric.
pub(crate) fn step_tag(call: &ToolCall) -> Option<u32> {
    let value = call.argument(STEP_NUMBER_FIELD)?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .and_then(|n| u32::try_from(n).ok())
}

/// How a call is dispatched.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DispatchOptions<'a> {
    /// Tools the model was offered on this turn.
    pub catalog: &'a ToolCatalog,
    /// Budget for snapshot results.
    pub budget: SnapshotBudget,
    /// Screenshot after a successful state-changing call.
    pub auto_screenshot: bool,
}

/// Result of one dispatched call.
#[derive(Debug)]
pub(crate) struct Dispatched {
    pub outcome: ToolOutcome,
    pub log: StepExecutionLog,
}

/// Run `call` and append its Tool message to the session.
///
/// Tool failures (unknown tool, `success: false`, timeout) are appended as
/// error results. Only a transport failure after its retry is an `Err`.
#[instrument(skip_all, fields(tool_name = %call.name, tool_call_id = %call.id))]
pub(crate) async fn dispatch_call(
    session: &mut Session,
    backend: &dyn ToolBackend,
    call: &ToolCall,
    options: DispatchOptions<'_>,
) -> RuntimeResult<Dispatched> {
    let step_number = step_tag(call);
    let stripped = call.without_argument(STEP_NUMBER_FIELD);

    let outcome = if options.catalog.contains(&stripped.name) {
        backend.execute(&stripped.name, &stripped.arguments).await?
    } else {
        warn!("model requested a tool outside the catalog");
        ToolOutcome::failure(format!("Unknown tool: {}", stripped.name))
    };
    debug!(success = outcome.success, "tool finished");

    session.push_tool_result(&stripped, &outcome, options.budget);

    let mut log = StepExecutionLog {
        tool_name: stripped.name.clone(),
        arguments: stripped.arguments.clone(),
        result_summary: outcome.summary(SUMMARY_CHARS),
        screenshot_path: None,
        success: outcome.success,
        step_number,
    };
    if stripped.name == SCREENSHOT_TOOL && outcome.success {
        log.screenshot_path.clone_from(&outcome.path);
    }

    let changes_state = BrowserTool::from_name(&stripped.name).is_some_and(BrowserTool::changes_state);
    if options.auto_screenshot && outcome.success && changes_state {
        log.screenshot_path = capture_screenshot(backend, Map::new()).await;
    }

    Ok(Dispatched { outcome, log })
}

/// Screenshot issued by the runtime itself. Never fails the caller.
pub(crate) async fn capture_screenshot(
    backend: &dyn ToolBackend,
    arguments: Map<String, Value>,
) -> Option<String> {
    match backend.execute(SCREENSHOT_TOOL, &arguments).await {
        Ok(outcome) if outcome.success => {
            if outcome.path.is_none() {
                warn!("screenshot succeeded without a path");
            }
            outcome.path
        }
        Ok(outcome) => {
            warn!(message = %outcome.message, "screenshot failed");
            None
        }
        Err(e) => {
            warn!(error = %e, "screenshot transport error");
            None
        }
    }
}
