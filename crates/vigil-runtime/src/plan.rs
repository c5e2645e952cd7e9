//! Test plans and step reports.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use vigil_core::errors::ErrorKind;

use crate::errors::{RuntimeError, RuntimeResult};
use crate::session::AppContext;

/// One natural-language step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// Step number as written in the plan.
    pub number: u32,
    /// What to do.
    pub instruction: String,
}

impl PlanStep {
    /// Build a step.
    #[must_use]
    pub fn new(number: u32, instruction: impl Into<String>) -> Self {
        Self {
            number,
            instruction: instruction.into(),
        }
    }
}

/// A plan file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPlan {
    /// Plan name.
    pub name: String,
    /// Application under test.
    pub app: AppContext,
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
}

impl TestPlan {
    /// Parse and validate a JSON plan.
    pub fn from_json(json: &str) -> RuntimeResult<Self> {
        let plan: Self = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Read and validate a JSON plan file.
    pub async fn load(path: &Path) -> RuntimeResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json(&raw)
    }

    /// Steps must be present with non-blank instructions and strictly
    /// increasing numbers starting at 1 or above.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.steps.is_empty() {
            return Err(RuntimeError::Configuration(format!("plan '{}' has no steps", self.name)));
        }
        let mut last = 0;
        for step in &self.steps {
            if step.instruction.trim().is_empty() {
                return Err(RuntimeError::Configuration(format!(
                    "step {} has an empty instruction",
                    step.number
                )));
            }
            if step.number <= last {
                return Err(RuntimeError::Configuration(format!(
                    "step numbers must be strictly increasing, got {} after {last}",
                    step.number
                )));
            }
            last = step.number;
        }
        Ok(())
    }
}

/// Final status of a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// The step succeeded.
    Passed,
    /// The step failed or could not be completed.
    Failed,
    /// The run ended before the step was attempted.
    Skipped,
}

/// What the persistence sink receives per step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    /// Plan step number.
    pub number: u32,
    /// Final status.
    pub status: ReportStatus,
    /// Reason or diagnostic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Published screenshot reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    /// Variables extracted while running this step.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extracted_variables: BTreeMap<String, String>,
    /// Failure class when the step ended without a model verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl StepReport {
    /// Report with no screenshot or variables.
    #[must_use]
    pub fn new(number: u32, status: ReportStatus, message: Option<String>) -> Self {
        Self {
            number,
            status,
            message,
            screenshot: None,
            extracted_variables: BTreeMap::new(),
            error_kind: None,
        }
    }

    /// Tag the report with the failure class that produced it.
    #[must_use]
    pub fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }
}

/// Totals for a finished plan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    /// Plan name.
    pub plan: String,
    /// Passed steps.
    pub passed: usize,
    /// Failed steps.
    pub failed: usize,
    /// Skipped steps.
    pub skipped: usize,
    /// All variables extracted during the run.
    pub variables: BTreeMap<String, String>,
}

impl PlanSummary {
    /// Count one report.
    pub fn count(&mut self, report: &StepReport) {
        match report.status {
            ReportStatus::Passed => self.passed += 1,
            ReportStatus::Failed => self.failed += 1,
            ReportStatus::Skipped => self.skipped += 1,
        }
    }

    /// Every step passed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.passed > 0
    }
}
