//! Fixer
//!
//! Turns non-ok review verdicts into revision proposals and applies the
//! ones the auto-apply policy clears. Everything else is recorded as
//! pending with the policy's reason so a human can pick it up from the
//! report.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use courseforge_core::{sanitize_markdown, AutoApplyMode, Outline};
use courseforge_llm::{CompletionRequest, LlmGateway};

use crate::review::{extract_json_object, Verdict, UNCATEGORIZED};

/// Outcome of evaluating one verdict against the policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub apply: bool,
    pub reason: String,
}

impl Decision {
    fn yes(reason: &str) -> Self {
        Self {
            apply: true,
            reason: reason.to_string(),
        }
    }

    fn no(reason: &str) -> Self {
        Self {
            apply: false,
            reason: reason.to_string(),
        }
    }
}

/// Gate deciding which proposals are applied without a human in the loop
#[derive(Debug, Clone)]
pub struct AutoApplyPolicy {
    pub mode: AutoApplyMode,
    /// Minimum confidence a major issue needs in aggressive mode
    pub threshold_major: f64,
    /// Whether synthesized (uncategorized) verdicts may be auto-applied
    pub allow_uncategorized: bool,
}

impl Default for AutoApplyPolicy {
    fn default() -> Self {
        Self {
            mode: AutoApplyMode::Safe,
            threshold_major: 0.8,
            allow_uncategorized: false,
        }
    }
}

impl AutoApplyPolicy {
    /// Decide whether a proposal for this verdict may be auto-applied
    pub fn evaluate(&self, verdict: &Verdict) -> Decision {
        if self.mode == AutoApplyMode::Off {
            return Decision::no("auto-apply disabled");
        }
        if !self.allow_uncategorized
            && verdict.issues.iter().any(|i| i.category == UNCATEGORIZED)
        {
            return Decision::no("uncategorized issue present");
        }
        match self.mode {
            AutoApplyMode::Off => unreachable!(),
            AutoApplyMode::All => Decision::yes("all mode"),
            AutoApplyMode::Safe => {
                if verdict.has_major() {
                    Decision::no("safe: major issues present")
                } else {
                    Decision::yes("safe: all minor")
                }
            }
            AutoApplyMode::Aggressive => {
                if !verdict.has_major() {
                    return Decision::yes("safe: all minor");
                }
                let all_confident = verdict
                    .issues
                    .iter()
                    .filter(|i| i.severity == crate::review::Severity::Major)
                    .all(|i| i.confidence >= self.threshold_major);
                if all_confident {
                    Decision::yes("aggressive: major confidence above threshold")
                } else {
                    Decision::no("aggressive: major confidence below threshold")
                }
            }
        }
    }
}

/// Sections split by the policy, both sorted by section id
#[derive(Debug, Clone, Default)]
pub struct FixSelection {
    /// (section id, reason) cleared for auto-apply
    pub auto: Vec<(String, String)>,
    /// (section id, reason) held for human review
    pub pending: Vec<(String, String)>,
}

/// Partition every non-ok verdict by the auto-apply policy
pub fn select_fixes(reviews: &HashMap<String, Verdict>, policy: &AutoApplyPolicy) -> FixSelection {
    let mut selection = FixSelection::default();
    for (id, verdict) in reviews {
        if !verdict.is_non_ok() {
            continue;
        }
        let decision = policy.evaluate(verdict);
        if decision.apply {
            selection.auto.push((id.clone(), decision.reason));
        } else {
            selection.pending.push((id.clone(), decision.reason));
        }
    }
    selection.auto.sort();
    selection.pending.sort();
    selection
}

/// Revision proposal for one section, applied or pending
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FixProposal {
    pub id: String,
    pub title: String,
    pub summary: String,
    /// Full revised markdown; empty when the proposal failed
    #[serde(skip_serializing)]
    pub revised_content: String,
    pub risk: String,
    pub change_categories: Vec<String>,
    pub notes: String,
    pub applied: bool,
    pub iterations: u32,
    pub auto_applied: bool,
    pub auto_reason: String,
}

/// Wire shape the fixer model is asked to produce
#[derive(Debug, Deserialize)]
struct WireProposal {
    revised_content: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    risk: String,
    #[serde(default)]
    change_categories: Vec<String>,
    #[serde(default)]
    notes: String,
}

/// Build the revision prompt for one flagged section
fn build_fix_prompt(
    subject: &str,
    title: &str,
    section_id: &str,
    outline_markdown: &str,
    draft: &str,
    verdict: &Verdict,
) -> String {
    let verdict_json =
        serde_json::to_string_pretty(verdict).unwrap_or_else(|_| "{}".to_string());
    format!(
        "You are revising one section of a tutorial about \"{subject}\".\n\
         Section: \"{title}\" (`{section_id}`)\n\n\
         Course outline for context:\n{outline_markdown}\n\
         Current content:\n\n---\n{draft}\n---\n\n\
         Review findings to address:\n```json\n{verdict_json}\n```\n\n\
         Produce the complete revised section that resolves the findings \
         while preserving everything that was already good. Respond with \
         ONLY a JSON object of this shape:\n\
         {{\"revised_content\": string, \"summary\": string, \"risk\": \
         \"low\"|\"medium\"|\"high\", \"change_categories\": [string], \
         \"notes\": string}}"
    )
}

/// Proposes and applies revisions for flagged sections
#[derive(Clone)]
pub struct FixApplier {
    llm: Arc<dyn LlmGateway>,
    /// Same global semaphore the scheduler uses
    semaphore: Arc<Semaphore>,
    retries: u32,
    timeout: Duration,
    retry_delay: Duration,
    sanitize: bool,
}

impl FixApplier {
    pub fn new(
        llm: Arc<dyn LlmGateway>,
        semaphore: Arc<Semaphore>,
        retries: u32,
        timeout: Duration,
        retry_delay: Duration,
        sanitize: bool,
    ) -> Self {
        Self {
            llm,
            semaphore,
            retries,
            timeout,
            retry_delay,
            sanitize,
        }
    }

    /// Propose and apply revisions for the policy-cleared sections;
    /// record the held-back ones as skipped without calling the model.
    /// Returns all proposal records for the report, sorted by id.
    pub async fn repair(
        &self,
        outline: &Outline,
        drafts: &mut HashMap<String, String>,
        reviews: &HashMap<String, Verdict>,
        policy: &AutoApplyPolicy,
    ) -> Vec<FixProposal> {
        let selection = select_fixes(reviews, policy);
        let outline_markdown = outline.to_markdown();
        let title_for = |id: &str| {
            outline
                .section_title(id)
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string())
        };

        let calls: Vec<_> = selection
            .auto
            .iter()
            .filter_map(|(id, reason)| {
                let draft = drafts.get(id)?;
                let verdict = reviews.get(id)?;
                let title = title_for(id);
                let prompt = build_fix_prompt(
                    &outline.meta.topic,
                    &title,
                    id,
                    &outline_markdown,
                    draft,
                    verdict,
                );
                Some(async move {
                    let proposal = self.propose(id, &title, prompt).await;
                    (id.clone(), reason.clone(), proposal)
                })
            })
            .collect();

        let mut proposals = Vec::new();
        for (id, reason, outcome) in join_all(calls).await {
            let mut proposal = match outcome {
                Some(proposal) => proposal,
                None => FixProposal {
                    id: id.clone(),
                    title: title_for(&id),
                    summary: "automatic proposal failed, needs human review".to_string(),
                    revised_content: String::new(),
                    risk: "unknown".to_string(),
                    change_categories: Vec::new(),
                    notes: String::new(),
                    applied: false,
                    iterations: 1,
                    auto_applied: false,
                    auto_reason: String::new(),
                },
            };
            proposal.auto_reason = reason;

            if !proposal.revised_content.is_empty() {
                let revised = if self.sanitize {
                    sanitize_markdown(&proposal.revised_content).0
                } else {
                    proposal.revised_content.clone()
                };
                drafts.insert(id.clone(), revised);
                proposal.applied = true;
                proposal.auto_applied = true;
                info!(section_id = %id, reason = %proposal.auto_reason, "fix auto-applied");
            }
            proposals.push(proposal);
        }

        // Policy-gated skips are recorded, never sent to the model
        for (id, reason) in &selection.pending {
            proposals.push(FixProposal {
                id: id.clone(),
                title: title_for(id),
                summary: "skipped by policy".to_string(),
                revised_content: String::new(),
                risk: String::new(),
                change_categories: Vec::new(),
                notes: String::new(),
                applied: false,
                iterations: 0,
                auto_applied: false,
                auto_reason: reason.clone(),
            });
        }

        proposals.sort_by(|a, b| a.id.cmp(&b.id));
        proposals
    }

    /// One proposal call with the same retry envelope as generation
    async fn propose(&self, section_id: &str, title: &str, prompt: String) -> Option<FixProposal> {
        let attempts = self.retries.max(1);
        let request = CompletionRequest::new(prompt);

        for attempt in 1..=attempts {
            let outcome = {
                let _permit = self.semaphore.acquire().await.ok()?;
                tokio::time::timeout(self.timeout, self.llm.complete(&request)).await
            };

            match outcome {
                Ok(Ok(raw)) => match parse_proposal(&raw, section_id, title) {
                    Some(proposal) => return Some(proposal),
                    None => warn!(attempt, section_id, "fix proposal unparsable"),
                },
                Ok(Err(e)) => warn!(attempt, section_id, error = %e, "fix call failed"),
                Err(_) => warn!(attempt, section_id, "fix call timed out"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        None
    }
}

fn parse_proposal(raw: &str, section_id: &str, title: &str) -> Option<FixProposal> {
    let json_text = extract_json_object(raw)?;
    let wire: WireProposal = serde_json::from_str(&json_text).ok()?;
    if wire.revised_content.trim().is_empty() {
        return None;
    }
    Some(FixProposal {
        id: section_id.to_string(),
        title: title.to_string(),
        summary: wire.summary,
        revised_content: wire.revised_content,
        risk: if wire.risk.is_empty() {
            "unknown".to_string()
        } else {
            wire.risk
        },
        change_categories: wire.change_categories,
        notes: wire.notes,
        applied: false,
        iterations: 1,
        auto_applied: false,
        auto_reason: String::new(),
    })
}
