//! Stage Orchestrator
//!
//! Runs the stage sequence load-input → prepare-state → classify-subject
//! → generate → review → fix → publish → report, each wrapped in a
//! retry/timeout envelope. Per-stage retries restart the stage from
//! scratch; per-call retries inside the scheduler preserve partial
//! progress. A stage that exhausts its attempts is fatal.

use anyhow::{anyhow, Result};
use chrono::Utc;
use regex::Regex;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use courseforge_core::{AutoApplyMode, Outline, PipelineConfig, SubjectType};
use courseforge_llm::{LlmGateway, LlmRegistry};

use crate::fix::{AutoApplyPolicy, FixApplier, FixProposal};
use crate::publish::{PublishSummary, Publisher};
use crate::report::{render_report, ReportInput};
use crate::scheduler::{Scheduler, SchedulerParams};

const GENERATE_NODE: &str = "generate_and_review_by_chapter";
const FIX_NODE: &str = "propose_and_apply_fixes";
const CLASSIFY_NODE: &str = "classify_subject";

/// Retry/timeout envelope for one stage
#[derive(Debug, Clone)]
pub struct StagePolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub retry_delay: Duration,
}

impl StagePolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            attempts: config.stage_attempts,
            timeout: Duration::from_secs(config.stage_timeout),
            retry_delay: Duration::from_secs_f64(config.stage_retry_delay),
        }
    }
}

/// Run one stage under its envelope. The body is re-invoked from scratch
/// on every attempt; a timeout cancels the stage future but cannot abort
/// LLM calls already on the wire.
pub async fn run_stage<T, F, Fut>(name: &str, policy: &StagePolicy, mut body: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        let started = Instant::now();
        match tokio::time::timeout(policy.timeout, body()).await {
            Ok(Ok(value)) => {
                info!(stage = name, elapsed_ms = started.elapsed().as_millis() as u64, "stage completed");
                return Ok(value);
            }
            Ok(Err(e)) => {
                warn!(stage = name, attempt, error = %e, "stage failed");
                last_error = e.to_string();
            }
            Err(_) => {
                warn!(stage = name, attempt, "stage timed out");
                last_error = format!("timed out after {:?}", policy.timeout);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }
    Err(anyhow!(
        "stage '{}' failed after {} attempts: {}",
        name,
        attempts,
        last_error
    ))
}

/// Per-run inputs from the command line
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub outline_path: PathBuf,
    /// Empty selects every chapter
    pub selected_chapters: Vec<String>,
    pub subject_override: Option<SubjectType>,
    pub language: String,
    pub auto_apply_override: Option<AutoApplyMode>,
    pub skip_content_review: bool,
    pub skip_fixes: bool,
    /// Output paths are resolved relative to this directory
    pub project_root: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            outline_path: PathBuf::from("outline.json"),
            selected_chapters: Vec::new(),
            subject_override: None,
            language: "English".to_string(),
            auto_apply_override: None,
            skip_content_review: false,
            skip_fixes: false,
            project_root: PathBuf::from("."),
        }
    }
}

/// What one pipeline run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub slug: String,
    pub subject_type: SubjectType,
    pub sections: usize,
    pub drafts: usize,
    pub reviews: usize,
    pub generation_failures: usize,
    pub fixes_applied: usize,
    pub published_files: usize,
    pub publish_errors: usize,
    pub report_path: PathBuf,
    pub elapsed: Duration,
}

/// Drives the whole pipeline for one outline
pub struct Orchestrator {
    config: PipelineConfig,
    registry: LlmRegistry,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, registry: LlmRegistry) -> Self {
        Self { config, registry }
    }

    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        let run_started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let policy = StagePolicy::from_config(&self.config);
        info!(run_id = %run_id, outline = ?options.outline_path, "pipeline run starting");

        let outline = run_stage("load-input", &policy, || {
            let path = options.outline_path.clone();
            async move { Outline::load(&path).map_err(Into::into) }
        })
        .await?;
        let slug = outline.meta.topic_slug.clone();

        let output_dir = options.project_root.join(&self.config.output_root).join(&slug);
        let drafts_dir = output_dir.join("drafts");
        let reviews_dir = output_dir.join("reviews");
        let published_dir = options
            .project_root
            .join(&self.config.published_root)
            .join(&slug);

        run_stage("prepare-state", &policy, || {
            let dirs = [drafts_dir.clone(), reviews_dir.clone(), published_dir.clone()];
            async move {
                for dir in &dirs {
                    std::fs::create_dir_all(dir)
                        .map_err(|e| anyhow!("cannot create {:?}: {}", dir, e))?;
                }
                Ok(())
            }
        })
        .await?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_requests));

        let subject_type = run_stage("classify-subject", &policy, || {
            let semaphore = Arc::clone(&semaphore);
            let topic = outline.meta.topic.clone();
            let declared = outline.meta.subject_type;
            let overridden = options.subject_override;
            let classifier = self.registry.resolve(CLASSIFY_NODE, "").ok();
            async move {
                Ok(classify_subject(overridden, declared, classifier, &semaphore, &topic).await)
            }
        })
        .await?;
        info!(subject_type = %subject_type, "subject classified");

        let generate_llm = self.registry.resolve(GENERATE_NODE, "generate")?;
        let review_llm = self.registry.resolve(GENERATE_NODE, "review")?;
        let scheduler = Scheduler::new(
            generate_llm,
            review_llm,
            Arc::clone(&semaphore),
            SchedulerParams {
                subject_type,
                language: options.language.clone(),
                selected_chapters: options.selected_chapters.iter().cloned().collect::<HashSet<_>>(),
                generate_retries: self.config.generate_point_retries,
                generate_timeout: Duration::from_secs(self.config.generate_point_timeout),
                retry_delay: Duration::from_secs_f64(self.config.retry_delay),
                review_retries: self.config.review_point_retries,
                review_timeout: Duration::from_secs(self.config.review_point_timeout),
                review_retry_delay: Duration::from_secs_f64(self.config.review_retry_delay),
                sanitize: self.config.sanitize_mermaid,
                strict_dependencies: self.config.strict_dependencies,
                drafts_dir: Some(drafts_dir),
                reviews_dir: Some(reviews_dir),
            },
        );

        let mut state = run_stage("generate", &policy, || {
            let scheduler = Arc::clone(&scheduler);
            let outline = outline.clone();
            async move { scheduler.generate(&outline).await }
        })
        .await?;

        let skip_review = options.skip_content_review || self.config.skip_content_review;
        if !skip_review {
            state.reviews = run_stage("review", &policy, || {
                let scheduler = Arc::clone(&scheduler);
                let outline = outline.clone();
                let drafts = state.drafts.clone();
                async move { scheduler.review(&outline, &drafts).await }
            })
            .await?;
        }

        let skip_fixes = options.skip_fixes || self.config.skip_fixes || skip_review;
        let mut proposals: Vec<FixProposal> = Vec::new();
        if !skip_fixes {
            let fix_llm = self.registry.resolve(FIX_NODE, "propose")?;
            let fix_policy = AutoApplyPolicy {
                mode: options
                    .auto_apply_override
                    .unwrap_or(self.config.auto_apply_mode),
                threshold_major: self.config.auto_apply_threshold_major,
                allow_uncategorized: self.config.auto_apply_uncategorized,
            };
            let applier = FixApplier::new(
                fix_llm,
                Arc::clone(&semaphore),
                self.config.generate_point_retries,
                Duration::from_secs(self.config.generate_point_timeout),
                Duration::from_secs_f64(self.config.retry_delay),
                self.config.sanitize_mermaid,
            );

            let (drafts, fix_proposals) = run_stage("fix", &policy, || {
                let outline = outline.clone();
                let mut drafts = state.drafts.clone();
                let reviews = state.reviews.clone();
                let applier = applier.clone();
                let fix_policy = fix_policy.clone();
                async move {
                    let proposals = applier
                        .repair(&outline, &mut drafts, &reviews, &fix_policy)
                        .await;
                    Ok((drafts, proposals))
                }
            })
            .await?;
            state.drafts = drafts;
            proposals = fix_proposals;
        }

        let publisher = Publisher::new(
            published_dir,
            self.config.filename_style,
            self.config.sanitize_mermaid,
        );
        let publish_summary = run_stage("publish", &policy, || {
            let outline = outline.clone();
            let drafts = state.drafts.clone();
            let publisher = publisher.clone();
            async move { Ok::<PublishSummary, anyhow::Error>(publisher.publish(&outline, &drafts)) }
        })
        .await?;

        let report_path = options
            .project_root
            .join(format!("pipeline_report_{}.md", slug));
        let auto_apply_mode = options
            .auto_apply_override
            .unwrap_or(self.config.auto_apply_mode);
        run_stage("report", &policy, || {
            let report = render_report(&ReportInput {
                outline: &outline,
                subject_type,
                auto_apply_mode,
                drafts: &state.drafts,
                reviews: &state.reviews,
                generation_failures: &state.failures,
                proposals: &proposals,
                publish: publish_summary,
                generated_at: Utc::now(),
            });
            let path = report_path.clone();
            async move {
                std::fs::write(&path, report)
                    .map_err(|e| anyhow!("cannot write report {:?}: {}", path, e))
            }
        })
        .await?;

        let summary = RunSummary {
            run_id,
            slug,
            subject_type,
            sections: outline.section_count(),
            drafts: state.drafts.len(),
            reviews: state.reviews.len(),
            generation_failures: state.failures.len(),
            fixes_applied: proposals.iter().filter(|p| p.applied).count(),
            published_files: publish_summary.files_written,
            publish_errors: publish_summary.errors,
            report_path,
            elapsed: run_started.elapsed(),
        };
        info!(
            run_id = %summary.run_id,
            drafts = summary.drafts,
            fixes_applied = summary.fixes_applied,
            published = summary.published_files,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "pipeline run finished"
        );
        Ok(summary)
    }
}

/// Subject resolution order: user override, declared `meta.subject_type`,
/// classifier LLM, then the theory default on any failure
async fn classify_subject(
    overridden: Option<SubjectType>,
    declared: Option<SubjectType>,
    classifier: Option<Arc<dyn LlmGateway>>,
    semaphore: &Semaphore,
    topic: &str,
) -> SubjectType {
    if let Some(subject) = overridden {
        return subject;
    }
    if let Some(subject) = declared {
        return subject;
    }
    let Some(gateway) = classifier else {
        warn!("no classifier llm available, defaulting to theory");
        return SubjectType::Theory;
    };

    let prompt = format!(
        "Classify the tutorial subject \"{}\". Is it a body of theory or a \
         concrete tool? Answer with exactly one word: theory or tool.",
        topic
    );
    let response = {
        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return SubjectType::Theory,
        };
        gateway.ainvoke(&prompt).await
    };

    match response {
        Ok(text) => match extract_subject_word(&text) {
            Some(subject) => subject,
            None => {
                warn!("classifier answer {:?} not recognized, defaulting to theory", text.trim());
                SubjectType::Theory
            }
        },
        Err(e) => {
            warn!("subject classification failed: {}, defaulting to theory", e);
            SubjectType::Theory
        }
    }
}

fn extract_subject_word(text: &str) -> Option<SubjectType> {
    let re = Regex::new(r"(?i)\b(theory|tool)\b").ok()?;
    let word = re.find(text)?.as_str();
    SubjectType::from_word(word)
}
