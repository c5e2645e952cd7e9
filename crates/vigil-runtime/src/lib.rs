//! # vigil-runtime
//!
//! Drives a tool-calling model through browser test plans.
//!
//! - **Agent loop**: one instruction, iterated call → tools → results until
//!   the model answers in text or the iteration budget runs out
//! - **Batch executor**: several plan steps in one conversation, tool calls
//!   tagged with their step number, verdicts read from the final text
//! - **Plan runner**: batches or single steps over a whole plan, snapshot
//!   refresh and stuck escalation, reports to a [`StepResultSink`]
//! - **Reply grammar**: `NEED_SNAPSHOT`, `Step N: PASS|FAIL`,
//!   `EXECUTED_STEP_NUMBERS` and `EXTRACTED_VARIABLE` parsing
//! - **Session**: conversation, provider, catalog, snapshot manager and
//!   extracted variables for one run

#![deny(unsafe_code)]

pub mod agent_loop;
pub mod batch;
pub mod catalog;
pub mod errors;
pub mod grammar;
pub mod intent;
pub mod interfaces;
pub mod plan;
pub mod plan_runner;
pub mod session;
pub(crate) mod tool_dispatch;

#[cfg(test)]
mod test_support;

pub use agent_loop::{StepExecutionLog, StepOptions, StepRunResult, StepStatus, execute, execute_step};
pub use batch::{BatchExecutor, BatchResult};
pub use catalog::{BrowserTool, ToolCatalog};
pub use errors::{RuntimeError, RuntimeResult};
pub use grammar::{HardFailureRule, StepVerdict, Verdict};
pub use interfaces::{
    DefaultPromptAssembler, JsonReportSink, LocalScreenshotStore, PromptAssembler, ScreenshotStore,
    StepResultSink,
};
pub use plan::{PlanStep, PlanSummary, ReportStatus, StepReport, TestPlan};
pub use plan_runner::{ExecutionMode, PlanRunner};
pub use session::{AppContext, Session, SessionConfig};
