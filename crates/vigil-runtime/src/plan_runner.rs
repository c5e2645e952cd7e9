//! Plan runner: drives a whole test plan through batches or single steps.
//!
//! Batch mode injects a fresh page snapshot before every batch. When a
//! batch makes no progress the next attempt first tries to reveal more of
//! the page:
//!
//! | No-progress rounds | Before the next batch | Snapshot budget |
//! |---|---|---|
//! | 1 | re-snapshot | normal |
//! | 2 | `PageDown`, re-snapshot | escalated |
//! | 3+ | `End`, re-snapshot | escalated |
//! | `max_stuck_rounds` | step fails, runner moves on | |
//!
//! Failed steps do not stop the run. A fatal error marks every remaining
//! step skipped and is returned.

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};
use vigil_context::SnapshotBudget;
use vigil_core::constants::SNAPSHOT_TOOL;
use vigil_core::errors::ErrorKind;
use vigil_core::messages::Message;
use vigil_transport::ToolBackend;

use crate::agent_loop::{StepOptions, StepStatus, execute_step};
use crate::batch::{BatchExecutor, BatchResult};
use crate::catalog::BrowserTool;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::grammar::{
    HardFailureRule, Verdict, default_hard_failure_rules, is_need_snapshot, read_step_reply,
};
use crate::interfaces::{ScreenshotStore, StepResultSink};
use crate::plan::{PlanStep, PlanSummary, ReportStatus, StepReport, TestPlan};
use crate::session::Session;

/// How plan steps are fed to the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Several steps per provider conversation.
    #[default]
    Batch,
    /// One agent loop per step.
    Single,
}

impl FromStr for ExecutionMode {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "single" => Ok(Self::Single),
            other => Err(RuntimeError::Configuration(format!(
                "unknown execution mode '{other}' (expected batch or single)"
            ))),
        }
    }
}

/// Key pressed before re-snapshotting after `stuck_rounds` fruitless batches.
fn reveal_key(stuck_rounds: u32) -> Option<&'static str> {
    match stuck_rounds {
        0 | 1 => None,
        2 => Some("PageDown"),
        _ => Some("End"),
    }
}

fn budget_for(stuck_rounds: u32) -> SnapshotBudget {
    if stuck_rounds >= 2 {
        SnapshotBudget::Escalated
    } else {
        SnapshotBudget::Normal
    }
}

/// Runs plans against one backend, reporting each settled step.
pub struct PlanRunner {
    backend: Arc<dyn ToolBackend>,
    sink: Arc<dyn StepResultSink>,
    screenshots: Arc<dyn ScreenshotStore>,
    executor: BatchExecutor,
    rules: Vec<Box<dyn HardFailureRule>>,
    mode: ExecutionMode,
}

impl PlanRunner {
    /// Batch-mode runner with the default hard-failure rules.
    pub fn new(
        backend: Arc<dyn ToolBackend>,
        sink: Arc<dyn StepResultSink>,
        screenshots: Arc<dyn ScreenshotStore>,
    ) -> Self {
        Self {
            backend,
            sink,
            screenshots,
            executor: BatchExecutor::new(),
            rules: default_hard_failure_rules(),
            mode: ExecutionMode::Batch,
        }
    }

    /// Select the execution mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the batch executor.
    #[must_use]
    pub fn with_executor(mut self, executor: BatchExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Execution mode in force.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run every step of `plan` on `session`.
    #[instrument(skip_all, fields(plan = %plan.name, mode = ?self.mode, session_id = %session.id()))]
    pub async fn run(&self, session: &mut Session, plan: &TestPlan) -> RuntimeResult<PlanSummary> {
        plan.validate()?;
        let mut summary = PlanSummary {
            plan: plan.name.clone(),
            ..PlanSummary::default()
        };
        let mut cursor = 0;

        session.push(Message::user(goal_message(plan)));
        let outcome = match self.open_app(plan).await {
            Ok(()) => match self.mode {
                ExecutionMode::Batch => self.run_batches(session, &plan.steps, &mut cursor, &mut summary).await,
                ExecutionMode::Single => self.run_single(session, &plan.steps, &mut cursor, &mut summary).await,
            },
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            let kind = e.kind();
            error!(
                error = %e,
                category = e.category(),
                kind = %kind,
                fatal = kind.is_fatal(),
                remaining = plan.steps.len() - cursor,
                "plan aborted"
            );
            let message = e.user_message();
            for step in &plan.steps[cursor..] {
                let report = StepReport::new(step.number, ReportStatus::Skipped, Some(message.clone()))
                    .with_error_kind(kind);
                if let Err(sink_err) = self.settle(report, &mut summary).await {
                    warn!(error = %sink_err, step = step.number, "could not record skipped step");
                }
            }
            return Err(e);
        }

        summary.variables = session.variables().clone();
        info!(
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            "plan finished"
        );
        Ok(summary)
    }

    async fn open_app(&self, plan: &TestPlan) -> RuntimeResult<()> {
        let url = plan.app.base_url.trim();
        if url.is_empty() {
            return Ok(());
        }
        let mut arguments = Map::new();
        let _ = arguments.insert("url".into(), Value::String(url.to_owned()));
        let outcome = self
            .backend
            .execute(BrowserTool::Navigate.name(), &arguments)
            .await?;
        if !outcome.success {
            warn!(url, message = %outcome.message, "initial navigation failed");
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Batch mode
    // ─────────────────────────────────────────────────────────────────────

    async fn run_batches(
        &self,
        session: &mut Session,
        steps: &[PlanStep],
        cursor: &mut usize,
        summary: &mut PlanSummary,
    ) -> RuntimeResult<()> {
        let batch_size = session.config().batch_size;
        let max_stuck_rounds = session.config().max_stuck_rounds;
        let mut stuck_rounds = 0;

        while *cursor < steps.len() {
            let end = (*cursor + batch_size).min(steps.len());
            let window = &steps[*cursor..end];
            let budget = budget_for(stuck_rounds);

            self.refresh_snapshot(session, stuck_rounds, budget).await?;
            let result = self
                .executor
                .execute_batch(session, self.backend.as_ref(), window, budget)
                .await?;

            if result.made_progress() {
                stuck_rounds = 0;
                for report in self.batch_reports(&result).await {
                    self.settle(report, summary).await?;
                    *cursor += 1;
                }
                continue;
            }

            stuck_rounds += 1;
            let step = window[0].number;
            warn!(step, stuck_rounds, "batch made no progress");
            if stuck_rounds >= max_stuck_rounds {
                let detail = result
                    .final_text
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty() && !is_need_snapshot(l) && !l.starts_with("EXECUTED_STEP_NUMBERS"))
                    .unwrap_or("the model kept requesting a new snapshot");
                let message = format!("Stuck after {stuck_rounds} attempts without progress: {detail}");
                let report = StepReport::new(step, ReportStatus::Failed, Some(message))
                    .with_error_kind(ErrorKind::StuckBatch);
                self.settle(report, summary).await?;
                *cursor += 1;
                stuck_rounds = 0;
            }
        }
        Ok(())
    }

    async fn batch_reports(&self, result: &BatchResult) -> Vec<StepReport> {
        let last = result.executed_step_numbers.last().copied();
        let mut reports = Vec::with_capacity(result.executed_step_numbers.len());
        for &number in &result.executed_step_numbers {
            let (status, message) = match result.outcomes.get(&number) {
                Some(v) if v.verdict == Verdict::Fail => (ReportStatus::Failed, v.reason.clone()),
                Some(v) => (ReportStatus::Passed, v.reason.clone()),
                None => (ReportStatus::Passed, None),
            };
            let mut report = StepReport::new(number, status, message);
            report.screenshot = self.publish(result.screenshots.get(&number).map(String::as_str)).await;
            if Some(number) == last {
                report.extracted_variables.clone_from(&result.extracted_variables);
            }
            reports.push(report);
        }
        reports
    }

    /// Optionally reveal more of the page, then inject a fresh snapshot.
    async fn refresh_snapshot(
        &self,
        session: &mut Session,
        stuck_rounds: u32,
        budget: SnapshotBudget,
    ) -> RuntimeResult<()> {
        if let Some(key) = reveal_key(stuck_rounds) {
            let mut arguments = Map::new();
            let _ = arguments.insert("key".into(), Value::String(key.to_owned()));
            let outcome = self
                .backend
                .execute(BrowserTool::PressKey.name(), &arguments)
                .await?;
            if !outcome.success {
                warn!(key, message = %outcome.message, "reveal key press failed");
            }
        }
        let outcome = self.backend.execute(SNAPSHOT_TOOL, &Map::new()).await?;
        if !outcome.success {
            warn!(message = %outcome.message, "caller-side snapshot failed");
        }
        let _ = session.inject_snapshot(&outcome.conversation_text(), budget);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Single mode
    // ─────────────────────────────────────────────────────────────────────

    async fn run_single(
        &self,
        session: &mut Session,
        steps: &[PlanStep],
        cursor: &mut usize,
        summary: &mut PlanSummary,
    ) -> RuntimeResult<()> {
        let max_stuck_rounds = session.config().max_stuck_rounds;

        while let Some(step) = steps.get(*cursor) {
            let mut stuck_rounds = 0;
            let result = loop {
                let options = StepOptions {
                    resume: stuck_rounds > 0,
                    ..StepOptions::default()
                };
                let result = execute_step(session, self.backend.as_ref(), &step.instruction, options)
                    .await?;
                if result.status != StepStatus::NeedSnapshot || stuck_rounds + 1 >= max_stuck_rounds {
                    break result;
                }
                stuck_rounds += 1;
                self.refresh_snapshot(session, stuck_rounds, budget_for(stuck_rounds))
                    .await?;
            };

            let (status, message, kind) = match result.status {
                StepStatus::Completed => {
                    let text = result.final_text.as_deref().unwrap_or_default();
                    let verdict = read_step_reply(text, step.number, &self.rules);
                    let status = if verdict.is_fail() {
                        ReportStatus::Failed
                    } else {
                        ReportStatus::Passed
                    };
                    (status, verdict.reason, None)
                }
                StepStatus::NeedSnapshot => (
                    ReportStatus::Failed,
                    Some(format!(
                        "Stuck after {} attempts without progress: the model kept requesting a new snapshot",
                        stuck_rounds + 1
                    )),
                    Some(ErrorKind::StuckBatch),
                ),
                StepStatus::MaxIterations => (
                    ReportStatus::Failed,
                    Some(format!(
                        "Step did not finish within {} iterations",
                        result.max_iterations
                    )),
                    Some(ErrorKind::BudgetExhausted),
                ),
            };

            let mut report = StepReport::new(step.number, status, message);
            report.error_kind = kind;
            report.screenshot = self.publish(result.last_screenshot()).await;
            report.extracted_variables = result.extracted_variables;
            self.settle(report, summary).await?;
            *cursor += 1;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reporting
    // ─────────────────────────────────────────────────────────────────────

    async fn publish(&self, path: Option<&str>) -> Option<String> {
        let path = path?;
        match self.screenshots.publish(path).await {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!(error = %e, path, "screenshot publish failed");
                None
            }
        }
    }

    async fn settle(&self, report: StepReport, summary: &mut PlanSummary) -> RuntimeResult<()> {
        info!(step = report.number, status = ?report.status, "step settled");
        summary.count(&report);
        self.sink.record(report).await
    }
}

impl std::fmt::Debug for PlanRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanRunner")
            .field("mode", &self.mode)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

fn goal_message(plan: &TestPlan) -> String {
    let mut text = format!("Test plan \"{}\" for {}", plan.name, plan.app.name);
    let url = plan.app.base_url.trim();
    if !url.is_empty() {
        let _ = write!(text, " at {url}");
    }
    let _ = write!(
        text,
        ". It has {} steps; you will receive them in order.",
        plan.steps.len()
    );
    text
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
