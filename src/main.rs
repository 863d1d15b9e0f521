//! CourseForge CLI
//!
//! Runs the content pipeline for one outline: generate, review, fix,
//! publish, report. Exit code 1 means a usage or configuration problem,
//! 2 means a pipeline stage failed after all retries.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use courseforge_core::{AutoApplyMode, PipelineConfig, SubjectType};
use courseforge_llm::LlmRegistry;
use courseforge_pipeline::{run_stage, Orchestrator, RunOptions, StagePolicy};

#[derive(Parser, Debug)]
#[command(
    name = "courseforge",
    version,
    about = "Chapter-scoped tutorial content pipeline"
)]
struct Cli {
    /// Outline JSON file
    outline: PathBuf,

    /// Configuration file (TOML or JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Chapter title to process (repeatable); omit to process all chapters
    #[arg(long = "chapter")]
    chapters: Vec<String>,

    /// Override subject classification (theory or tool)
    #[arg(long)]
    subject_type: Option<SubjectType>,

    /// Output language for generated content
    #[arg(long, default_value = "English")]
    language: String,

    /// Override the configured auto-apply mode (off, safe, aggressive, all)
    #[arg(long)]
    auto_apply: Option<AutoApplyMode>,

    /// Skip the review stage (implies no fixes)
    #[arg(long)]
    skip_review: bool,

    /// Skip the fix stage
    #[arg(long)]
    skip_fixes: bool,

    /// Directory that output paths are resolved against
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => {
            let mut config = PipelineConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    // Config problems are usage errors, not pipeline failures
    let bootstrap_policy = StagePolicy {
        attempts: 1,
        timeout: Duration::from_secs(30),
        retry_delay: Duration::from_secs(0),
    };
    let config = match run_stage("load-config", &bootstrap_policy, || {
        let path = cli.config.clone();
        async move { load_config(path.as_ref()) }
    })
    .await
    {
        Ok(mut config) => {
            if cli.debug {
                config.debug = true;
            }
            config
        }
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(1);
        }
    };

    let registry = match LlmRegistry::from_config(&config) {
        Ok(registry) => registry,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(1);
        }
    };

    let options = RunOptions {
        outline_path: cli.outline,
        selected_chapters: cli.chapters,
        subject_override: cli.subject_type,
        language: cli.language,
        auto_apply_override: cli.auto_apply,
        skip_content_review: cli.skip_review,
        skip_fixes: cli.skip_fixes,
        project_root: cli.project_root,
    };

    let orchestrator = Orchestrator::new(config, registry);
    match orchestrator.run(&options).await {
        Ok(summary) => {
            info!(
                "run {} finished: {}/{} sections drafted, {} fixes applied, {} files published",
                summary.run_id,
                summary.drafts,
                summary.sections,
                summary.fixes_applied,
                summary.published_files
            );
            println!("Report: {}", summary.report_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("pipeline failed: {:#}", e);
            ExitCode::from(2)
        }
    }
}
