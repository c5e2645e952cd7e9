//! Collaborators the runtime reports to, with local implementations.
//!
//! A hosting service plugs in its own persistence, blob storage and
//! prompt templates; the CLI and the tests use the implementations here.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tracing::debug;

use crate::errors::RuntimeResult;
use crate::grammar::NEED_SNAPSHOT;
use crate::plan::StepReport;
use crate::session::AppContext;

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Receives each step report as soon as the step settles.
#[async_trait]
pub trait StepResultSink: Send + Sync {
    /// Persist one report.
    async fn record(&self, report: StepReport) -> RuntimeResult<()>;
}

/// Turns a local screenshot path into a reference a reader can open.
#[async_trait]
pub trait ScreenshotStore: Send + Sync {
    /// Publish the file at `path` and return its reference.
    async fn publish(&self, path: &str) -> RuntimeResult<String>;
}

/// Builds the system prompt for a session.
pub trait PromptAssembler: Send + Sync {
    /// System prompt for testing `app`.
    fn system_prompt(&self, app: &AppContext) -> String;
}

// ─────────────────────────────────────────────────────────────────────────────
// JsonReportSink
// ─────────────────────────────────────────────────────────────────────────────

/// Collects reports in memory and writes them as one JSON document.
#[derive(Debug, Default)]
pub struct JsonReportSink {
    reports: Mutex<Vec<StepReport>>,
}

impl JsonReportSink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports recorded so far, in arrival order.
    pub fn reports(&self) -> Vec<StepReport> {
        self.reports.lock().clone()
    }

    /// `{"plan": name, "steps": [...]}`.
    pub fn to_json(&self, plan: &str) -> serde_json::Value {
        let steps = self.reports();
        json!({
            "plan": plan,
            "steps": steps,
        })
    }

    /// Write [`Self::to_json`] to `path`, pretty-printed.
    pub async fn write_to(&self, path: &Path, plan: &str) -> RuntimeResult<()> {
        let body = serde_json::to_string_pretty(&self.to_json(plan))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, body).await?;
        debug!(path = %path.display(), "report written");
        Ok(())
    }
}

#[async_trait]
impl StepResultSink for JsonReportSink {
    async fn record(&self, report: StepReport) -> RuntimeResult<()> {
        self.reports.lock().push(report);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LocalScreenshotStore
// ─────────────────────────────────────────────────────────────────────────────

/// Screenshots stay where the automation process wrote them; references
/// are `file://` URLs. Relative paths resolve against `root`.
#[derive(Clone, Debug)]
pub struct LocalScreenshotStore {
    root: PathBuf,
}

impl LocalScreenshotStore {
    /// Store resolving relative paths under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ScreenshotStore for LocalScreenshotStore {
    async fn publish(&self, path: &str) -> RuntimeResult<String> {
        let path = Path::new(path);
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        Ok(format!("file://{}", full.display()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DefaultPromptAssembler
// ─────────────────────────────────────────────────────────────────────────────

/// Built-in system prompt.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPromptAssembler;

impl PromptAssembler for DefaultPromptAssembler {
    fn system_prompt(&self, app: &AppContext) -> String {
        let mut prompt = format!(
            "You are a QA engineer executing a manual test of the web application \"{}\" ({}) \
             through browser automation tools.\n",
            app.name, app.base_url
        );
        if let Some(description) = app.description.as_deref().filter(|d| !d.trim().is_empty()) {
            let _ = writeln!(prompt, "\nAbout the application:\n{}", description.trim());
        }
        let _ = write!(
            prompt,
            "\nRules:\n\
             - Use element references from the most recent page snapshot. Never invent references.\n\
             - Perform only what the current instruction asks.\n\
             - If the page snapshot does not show what you need, reply with exactly {NEED_SNAPSHOT}.\n\
             - When asked to remember a value, add a line EXTRACTED_VARIABLE:<name>=<value>.\n\
             - When the instruction is done, reply with a one-line summary and no tool calls.\n"
        );
        prompt
    }
}
