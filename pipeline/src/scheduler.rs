//! Scheduler & Executor
//!
//! Builds the two-level fan-out (chapters in parallel, groups in parallel
//! within a chapter) and the intra-group micro-schedule: strict serial
//! order with accumulated prior context for `pipeline` groups,
//! dependency-aware waves for `toolbox` groups. Every LLM call acquires
//! one permit from a single shared semaphore for the duration of the call,
//! so the whole pipeline never has more than `P` requests outstanding.
//!
//! Drafts and reviews are persisted best-effort as soon as they are
//! produced; the publish stage re-writes the final drafts.

use anyhow::{anyhow, Result};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use courseforge_core::{
    sanitize_markdown, Chapter, Group, Outline, Section, StructureType, SubjectType,
};
use courseforge_llm::{CompletionRequest, LlmGateway};

use crate::prompts::{compose_generation_prompt, SectionContext};
use crate::review::{
    build_review_prompt, parse_verdict, synthesized_failure_verdict, PeerRef, Verdict,
};
use crate::state::{PipelineState, SectionFailure};

/// Scheduler knobs; per-call retry and timeout are separate from the
/// orchestrator's per-stage envelope
#[derive(Debug, Clone)]
pub struct SchedulerParams {
    pub subject_type: SubjectType,
    pub language: String,
    /// Chapter titles to process; empty selects all chapters
    pub selected_chapters: HashSet<String>,
    pub generate_retries: u32,
    pub generate_timeout: Duration,
    pub retry_delay: Duration,
    pub review_retries: u32,
    pub review_timeout: Duration,
    pub review_retry_delay: Duration,
    pub sanitize: bool,
    /// Fail instead of force-releasing a stalled toolbox wave
    pub strict_dependencies: bool,
    /// Best-effort draft persistence directory (`output/<slug>/drafts`)
    pub drafts_dir: Option<PathBuf>,
    /// Best-effort review persistence directory (`output/<slug>/reviews`)
    pub reviews_dir: Option<PathBuf>,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            subject_type: SubjectType::Theory,
            language: "English".to_string(),
            selected_chapters: HashSet::new(),
            generate_retries: 3,
            generate_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_millis(0),
            review_retries: 2,
            review_timeout: Duration::from_secs(180),
            review_retry_delay: Duration::from_millis(0),
            sanitize: true,
            strict_dependencies: false,
            drafts_dir: None,
            reviews_dir: None,
        }
    }
}

/// Chapter-scoped generation and review engine
pub struct Scheduler {
    generate_llm: Arc<dyn LlmGateway>,
    review_llm: Arc<dyn LlmGateway>,
    /// The one semaphore gating every LLM call in the pipeline
    semaphore: Arc<Semaphore>,
    params: SchedulerParams,
}

impl Scheduler {
    pub fn new(
        generate_llm: Arc<dyn LlmGateway>,
        review_llm: Arc<dyn LlmGateway>,
        semaphore: Arc<Semaphore>,
        params: SchedulerParams,
    ) -> Arc<Self> {
        Arc::new(Self {
            generate_llm,
            review_llm,
            semaphore,
            params,
        })
    }

    fn chapter_selected(&self, chapter: &Chapter) -> bool {
        self.params.selected_chapters.is_empty()
            || self.params.selected_chapters.contains(&chapter.title)
    }

    /// Generate drafts for every selected chapter
    pub async fn generate(self: &Arc<Self>, outline: &Outline) -> Result<PipelineState> {
        let mut tasks = Vec::new();
        for (ci, chapter) in outline.chapters.iter().enumerate() {
            if !self.chapter_selected(chapter) {
                debug!("chapter '{}' not selected, skipping", chapter.title);
                continue;
            }
            let overview: Vec<String> = outline.chapters[..ci]
                .iter()
                .map(|c| c.title.clone())
                .collect();
            let previous_sections: Vec<String> = if ci > 0 {
                outline.chapters[ci - 1].section_titles()
            } else {
                Vec::new()
            };

            let this = Arc::clone(self);
            let subject = outline.meta.topic.clone();
            let chapter = chapter.clone();
            tasks.push(tokio::spawn(async move {
                this.run_chapter(subject, chapter, overview, previous_sections)
                    .await
            }));
        }

        let mut state = PipelineState::new();
        for joined in join_all(tasks).await {
            let chapter_state = joined.map_err(|e| anyhow!("chapter task panicked: {}", e))??;
            state.merge(chapter_state);
        }
        info!(
            drafts = state.drafts.len(),
            failures = state.failures.len(),
            "generation finished"
        );
        Ok(state)
    }

    async fn run_chapter(
        self: Arc<Self>,
        subject: String,
        chapter: Chapter,
        overview: Vec<String>,
        previous_sections: Vec<String>,
    ) -> Result<PipelineState> {
        let mut tasks = Vec::new();
        for group in chapter.groups {
            if group.sections.is_empty() {
                debug!("group '{}' has no sections, skipping", group.title);
                continue;
            }
            let this = Arc::clone(&self);
            let subject = subject.clone();
            let chapter_title = chapter.title.clone();
            let overview = overview.clone();
            let previous_sections = previous_sections.clone();
            tasks.push(tokio::spawn(async move {
                this.run_group(subject, chapter_title, group, overview, previous_sections)
                    .await
            }));
        }

        let mut state = PipelineState::new();
        for joined in join_all(tasks).await {
            let group_state = joined.map_err(|e| anyhow!("group task panicked: {}", e))??;
            state.merge(group_state);
        }
        Ok(state)
    }

    async fn run_group(
        self: Arc<Self>,
        subject: String,
        chapter_title: String,
        group: Group,
        overview: Vec<String>,
        previous_sections: Vec<String>,
    ) -> Result<PipelineState> {
        match group.structure_type {
            StructureType::Pipeline => {
                self.run_pipeline_group(subject, chapter_title, group, overview, previous_sections)
                    .await
            }
            StructureType::Toolbox => {
                self.run_toolbox_group(subject, chapter_title, group, overview, previous_sections)
                    .await
            }
        }
    }

    /// Strict serial order; every section observes the concatenation of
    /// all previously produced drafts in this group
    async fn run_pipeline_group(
        &self,
        subject: String,
        chapter_title: String,
        group: Group,
        overview: Vec<String>,
        previous_sections: Vec<String>,
    ) -> Result<PipelineState> {
        let mut state = PipelineState::new();
        let mut group_context = String::new();

        for (si, section) in group.sections.iter().enumerate() {
            let ctx = SectionContext {
                subject: &subject,
                language: &self.params.language,
                chapter_title: &chapter_title,
                group_title: &group.title,
                section,
            };
            let prompt = compose_generation_prompt(
                self.params.subject_type,
                &ctx,
                StructureType::Pipeline,
                si,
                &group_context,
                None,
                &overview,
                &previous_sections,
            );
            let draft = self.produce_section(&mut state, section, prompt).await;
            group_context.push_str(&draft);
        }
        Ok(state)
    }

    /// Dependency waves: roots first, then any section whose immediate
    /// index predecessor has been produced. A stalled schedule (cyclic or
    /// rootless input) is force-released after `2 × |sections|` idle
    /// iterations unless strict dependencies are requested.
    async fn run_toolbox_group(
        &self,
        subject: String,
        chapter_title: String,
        group: Group,
        overview: Vec<String>,
        previous_sections: Vec<String>,
    ) -> Result<PipelineState> {
        let sections = &group.sections;
        let mut state = PipelineState::new();
        let mut produced: HashSet<usize> = HashSet::new();

        let mut wave: Vec<usize> = Vec::new();
        let mut pending: Vec<usize> = Vec::new();
        for (i, section) in sections.iter().enumerate() {
            if section.relation_to_previous.is_root() {
                wave.push(i);
            } else {
                pending.push(i);
            }
        }

        let mut stalls = 0usize;
        let max_stalls = 2 * sections.len().max(1);

        loop {
            if !wave.is_empty() {
                self.run_toolbox_wave(
                    &mut state,
                    &subject,
                    &chapter_title,
                    &group,
                    &wave,
                    &overview,
                    &previous_sections,
                )
                .await;
                produced.extend(wave.drain(..));
            }

            if pending.is_empty() {
                break;
            }

            let ready: Vec<usize> = pending
                .iter()
                .copied()
                .filter(|&i| {
                    let relation = sections[i].relation_to_previous;
                    !relation.is_dependency() || (i > 0 && produced.contains(&(i - 1)))
                })
                .collect();

            if ready.is_empty() {
                stalls += 1;
                if stalls >= max_stalls {
                    let stuck: Vec<&str> =
                        pending.iter().map(|&i| sections[i].id.as_str()).collect();
                    if self.params.strict_dependencies {
                        return Err(anyhow!(
                            "unresolvable dependencies in group '{}': {:?}",
                            group.title,
                            stuck
                        ));
                    }
                    warn!(
                        "group '{}' stalled, force-releasing sections {:?}",
                        group.title, stuck
                    );
                    wave = std::mem::take(&mut pending);
                }
                continue;
            }

            stalls = 0;
            pending.retain(|i| !ready.contains(i));
            wave = ready;
        }
        Ok(state)
    }

    async fn run_toolbox_wave(
        &self,
        state: &mut PipelineState,
        subject: &str,
        chapter_title: &str,
        group: &Group,
        wave: &[usize],
        overview: &[String],
        previous_sections: &[String],
    ) {
        let sections = &group.sections;
        let calls: Vec<_> = wave
            .iter()
            .map(|&i| {
                let section = &sections[i];
                // Parent context is exactly the index predecessor's draft
                let parent = if section.relation_to_previous.is_dependency() && i > 0 {
                    state
                        .drafts
                        .get(&sections[i - 1].id)
                        .filter(|d| !d.is_empty())
                        .map(|d| (d.as_str(), section.relation_to_previous))
                } else {
                    None
                };
                let ctx = SectionContext {
                    subject,
                    language: &self.params.language,
                    chapter_title,
                    group_title: &group.title,
                    section,
                };
                let prompt = compose_generation_prompt(
                    self.params.subject_type,
                    &ctx,
                    StructureType::Toolbox,
                    i,
                    "",
                    parent,
                    overview,
                    previous_sections,
                );
                async move { (i, self.call_generate(prompt).await) }
            })
            .collect();

        let results = join_all(calls).await;
        for (i, outcome) in results {
            self.record_section(state, &sections[i], outcome);
        }
    }

    /// Run one generation call and record the result into state
    async fn produce_section(
        &self,
        state: &mut PipelineState,
        section: &Section,
        prompt: String,
    ) -> String {
        let outcome = self.call_generate(prompt).await;
        self.record_section(state, section, outcome)
    }

    fn record_section(
        &self,
        state: &mut PipelineState,
        section: &Section,
        (text, error): (String, Option<String>),
    ) -> String {
        let text = if self.params.sanitize {
            sanitize_markdown(&text).0
        } else {
            text
        };
        if let Some(reason) = error {
            state.failures.push(SectionFailure {
                section_id: section.id.clone(),
                reason,
            });
        }
        self.persist_draft(&section.id, &text);
        state.drafts.insert(section.id.clone(), text.clone());
        text
    }

    /// One generation call: up to `generate_retries` attempts, each
    /// bounded by the per-call timeout and gated by the global semaphore.
    /// Empty responses are soft failures; on exhaustion the last value is
    /// returned (possibly empty) together with the last error.
    async fn call_generate(&self, prompt: String) -> (String, Option<String>) {
        let attempts = self.params.generate_retries.max(1);
        let request = CompletionRequest::new(prompt);
        let mut last_error: Option<String> = None;

        for attempt in 1..=attempts {
            let outcome = {
                let _permit = match self.semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return (String::new(), Some("semaphore closed".to_string())),
                };
                tokio::time::timeout(
                    self.params.generate_timeout,
                    self.generate_llm.complete(&request),
                )
                .await
            };

            match outcome {
                Ok(Ok(text)) if !text.trim().is_empty() => return (text, None),
                Ok(Ok(_)) => {
                    warn!(attempt, "generate returned an empty response");
                    last_error = Some("empty response".to_string());
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "generate call failed");
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    warn!(attempt, "generate call timed out");
                    last_error = Some(format!(
                        "timed out after {:?}",
                        self.params.generate_timeout
                    ));
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.params.retry_delay).await;
            }
        }
        (String::new(), last_error)
    }

    /// Review every drafted section, group by group, with per-group peer
    /// lists. Runs after all drafts exist; verdicts never abort the run.
    pub async fn review(
        self: &Arc<Self>,
        outline: &Outline,
        drafts: &HashMap<String, String>,
    ) -> Result<HashMap<String, Verdict>> {
        let mut tasks = Vec::new();
        for chapter in &outline.chapters {
            if !self.chapter_selected(chapter) {
                continue;
            }
            for group in &chapter.groups {
                if group.sections.is_empty() {
                    continue;
                }
                let all_peers: Vec<PeerRef> = group
                    .sections
                    .iter()
                    .map(|s| PeerRef {
                        id: s.id.clone(),
                        title: s.title.clone(),
                    })
                    .collect();

                for section in &group.sections {
                    let Some(draft) = drafts.get(&section.id) else {
                        continue;
                    };
                    let peers: Vec<PeerRef> = all_peers
                        .iter()
                        .filter(|p| p.id != section.id)
                        .cloned()
                        .collect();
                    let prompt = build_review_prompt(
                        &outline.meta.topic,
                        &section.id,
                        &section.title,
                        draft,
                        &peers,
                    );
                    let this = Arc::clone(self);
                    let section_id = section.id.clone();
                    tasks.push(tokio::spawn(async move {
                        let verdict = this.call_review(&section_id, prompt).await;
                        (section_id, verdict)
                    }));
                }
            }
        }

        let mut reviews = HashMap::new();
        for joined in join_all(tasks).await {
            let (id, verdict) = joined.map_err(|e| anyhow!("review task panicked: {}", e))?;
            self.persist_review(&id, &verdict);
            reviews.insert(id, verdict);
        }
        info!(reviews = reviews.len(), "review finished");
        Ok(reviews)
    }

    /// One review call; unparsable or failing output after all retries
    /// becomes a synthesized single-major verdict
    async fn call_review(&self, section_id: &str, prompt: String) -> Verdict {
        let attempts = self.params.review_retries.max(1);
        let request = CompletionRequest::new(prompt);
        let mut last_error = "review failure".to_string();

        for attempt in 1..=attempts {
            let outcome = {
                let _permit = match self.semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                tokio::time::timeout(
                    self.params.review_timeout,
                    self.review_llm.complete(&request),
                )
                .await
            };

            match outcome {
                Ok(Ok(raw)) => match parse_verdict(&raw, section_id) {
                    Ok(verdict) => return verdict,
                    Err(e) => {
                        warn!(attempt, section_id, "review output unparsable: {}", e);
                        last_error = e;
                    }
                },
                Ok(Err(e)) => {
                    warn!(attempt, section_id, error = %e, "review call failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(attempt, section_id, "review call timed out");
                    last_error = format!("timed out after {:?}", self.params.review_timeout);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.params.review_retry_delay).await;
            }
        }
        synthesized_failure_verdict(section_id, &last_error)
    }

    fn persist_draft(&self, section_id: &str, text: &str) {
        if let Some(dir) = &self.params.drafts_dir {
            let path = dir.join(format!("{}.md", section_id));
            if let Err(e) =
                std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, text))
            {
                debug!("draft persistence skipped for {}: {}", section_id, e);
            }
        }
    }

    fn persist_review(&self, section_id: &str, verdict: &Verdict) {
        if let Some(dir) = &self.params.reviews_dir {
            let path = dir.join(format!("{}.json", section_id));
            let json = match serde_json::to_string_pretty(verdict) {
                Ok(json) => json,
                Err(e) => {
                    debug!("review serialization failed for {}: {}", section_id, e);
                    return;
                }
            };
            if let Err(e) =
                std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, json))
            {
                debug!("review persistence skipped for {}: {}", section_id, e);
            }
        }
    }
}
