//! # vigil-agent
//!
//! Command line entry point: loads settings, wires a provider and an
//! automation transport, runs one test plan and writes the JSON report.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use vigil_core::ids::ExecutionId;
use vigil_llm::ProviderRegistry;
use vigil_runtime::{
    DefaultPromptAssembler, ExecutionMode, JsonReportSink, LocalScreenshotStore, PlanRunner,
    PromptAssembler, ScreenshotStore, Session, SessionConfig, StepResultSink, TestPlan,
};
use vigil_settings::VigilSettings;
use vigil_transport::{ToolBackend, TransportConfig, TransportRegistry};

/// Natural-language browser test runner.
#[derive(Parser, Debug)]
#[command(name = "vigil-agent", about = "Run natural-language browser test plans")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one test plan.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Plan file (JSON).
    #[arg(long)]
    plan: PathBuf,

    /// `batch` or `single`.
    #[arg(long, default_value = "batch")]
    mode: ExecutionMode,

    /// Provider registry name (overrides settings).
    #[arg(long)]
    provider: Option<String>,

    /// Model id for the selected provider (overrides settings).
    #[arg(long)]
    model: Option<String>,

    /// Plan steps offered per batch (overrides settings).
    #[arg(long)]
    batch_size: Option<usize>,

    /// Where the JSON report is written.
    #[arg(long, default_value = "vigil-report.json")]
    output: PathBuf,

    /// Settings file (defaults to `~/.vigil/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

/// Load settings and fold the command line overrides into them.
fn resolve_settings(args: &RunArgs) -> Result<VigilSettings> {
    let path = args
        .settings
        .clone()
        .unwrap_or_else(vigil_settings::settings_path);
    let mut settings = vigil_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(ref provider) = args.provider {
        settings.provider.default_provider.clone_from(provider);
    }
    if let Some(ref model) = args.model {
        let name = settings.provider.default_provider.clone();
        let endpoint = match name.as_str() {
            "anthropic" => &mut settings.provider.anthropic,
            "openai" => &mut settings.provider.openai,
            other => bail!("--model given for unknown provider '{other}'"),
        };
        endpoint.model.clone_from(model);
    }
    if let Some(batch_size) = args.batch_size {
        if batch_size == 0 {
            bail!("--batch-size must be at least 1");
        }
        settings.agent.batch_size = batch_size;
    }
    if let Some(ref level) = args.log_level {
        settings.logging.level.clone_from(level);
    }
    Ok(settings)
}

fn init_logging(settings: &VigilSettings) {
    if settings.logging.json {
        vigil_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        vigil_core::logging::init_subscriber(&settings.logging.level);
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let settings = resolve_settings(&args)?;
    init_logging(&settings);

    let plan = TestPlan::load(&args.plan)
        .await
        .with_context(|| format!("Failed to load plan {}", args.plan.display()))?;

    let provider = ProviderRegistry::with_defaults()
        .create_default(&settings.provider)
        .context("Failed to create provider")?;
    tracing::info!(
        provider = provider.name(),
        model = provider.model(),
        plan = %plan.name,
        steps = plan.steps.len(),
        mode = ?args.mode,
        "starting run"
    );

    let transports = TransportRegistry::new(TransportConfig::from_settings(&settings.transport));
    let execution_id = ExecutionId::new();
    let transport = transports.get_or_create(&execution_id);

    let sink = Arc::new(JsonReportSink::new());
    let screenshots: Arc<dyn ScreenshotStore> =
        Arc::new(LocalScreenshotStore::new(&settings.transport.screenshot_dir));
    let runner = PlanRunner::new(
        transport as Arc<dyn ToolBackend>,
        Arc::clone(&sink) as Arc<dyn StepResultSink>,
        screenshots,
    )
    .with_mode(args.mode);

    let prompt = DefaultPromptAssembler.system_prompt(&plan.app);
    let mut session = Session::new(
        provider,
        plan.app.clone(),
        SessionConfig::from_settings(&settings.agent),
    )
    .with_system_prompt(prompt);

    let outcome = runner.run(&mut session, &plan).await;
    let _ = transports.release(&execution_id).await;
    write_report(&sink, &args.output, &plan.name).await?;

    let summary = outcome.context("Plan aborted")?;
    tracing::info!(
        passed = summary.passed,
        failed = summary.failed,
        skipped = summary.skipped,
        report = %args.output.display(),
        "run finished"
    );
    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn write_report(sink: &JsonReportSink, path: &Path, plan: &str) -> Result<()> {
    sink.write_to(path, plan)
        .await
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["vigil-agent", "run", "--plan", "plan.json"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Run(args) => args,
        }
    }

    fn with_settings_file(args: &mut RunArgs, dir: &Path, body: &str) {
        let path = dir.join("settings.json");
        std::fs::write(&path, body).unwrap();
        args.settings = Some(path);
    }

    #[test]
    fn cli_defaults() {
        let args = run_args(&[]);
        assert_eq!(args.plan, PathBuf::from("plan.json"));
        assert_eq!(args.mode, ExecutionMode::Batch);
        assert_eq!(args.output, PathBuf::from("vigil-report.json"));
        assert!(args.provider.is_none());
        assert!(args.batch_size.is_none());
    }

    #[test]
    fn cli_single_mode() {
        let args = run_args(&["--mode", "single"]);
        assert_eq!(args.mode, ExecutionMode::Single);
    }

    #[test]
    fn cli_rejects_unknown_mode() {
        let result = Cli::try_parse_from(["vigil-agent", "run", "--plan", "p.json", "--mode", "fast"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_requires_plan() {
        assert!(Cli::try_parse_from(["vigil-agent", "run"]).is_err());
    }

    #[test]
    fn overrides_fold_into_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = run_args(&[
            "--provider",
            "openai",
            "--model",
            "gpt-test",
            "--batch-size",
            "2",
            "--log-level",
            "debug",
        ]);
        with_settings_file(&mut args, dir.path(), "{}");

        let settings = resolve_settings(&args).unwrap();
        assert_eq!(settings.provider.default_provider, "openai");
        assert_eq!(settings.provider.openai.model, "gpt-test");
        assert_eq!(settings.agent.batch_size, 2);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn file_values_survive_without_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = run_args(&[]);
        with_settings_file(&mut args, dir.path(), r#"{"agent": {"batchSize": 7}}"#);

        let settings = resolve_settings(&args).unwrap();
        assert_eq!(settings.agent.batch_size, 7);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = run_args(&["--batch-size", "0"]);
        with_settings_file(&mut args, dir.path(), "{}");
        assert!(resolve_settings(&args).is_err());
    }

    #[test]
    fn model_for_unknown_provider_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = run_args(&["--provider", "mystery", "--model", "m"]);
        with_settings_file(&mut args, dir.path(), "{}");
        let err = resolve_settings(&args).unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }
}
