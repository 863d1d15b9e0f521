//! Report
//!
//! One markdown report per run: counts, review failures, fix outcomes,
//! and the auto-apply statistics. Ordering is deterministic (sorted by
//! section id) so reports diff cleanly between runs.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use courseforge_core::{AutoApplyMode, Outline, SubjectType};

use crate::fix::FixProposal;
use crate::publish::PublishSummary;
use crate::review::{severity_score, Verdict, FAILURE_SCORE_THRESHOLD};
use crate::state::SectionFailure;

/// Everything the report needs, collected at the end of the run
pub struct ReportInput<'a> {
    pub outline: &'a Outline,
    pub subject_type: SubjectType,
    pub auto_apply_mode: AutoApplyMode,
    pub drafts: &'a HashMap<String, String>,
    pub reviews: &'a HashMap<String, Verdict>,
    pub generation_failures: &'a [SectionFailure],
    pub proposals: &'a [FixProposal],
    pub publish: PublishSummary,
    pub generated_at: DateTime<Utc>,
}

fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

/// Render the full run report as markdown
pub fn render_report(input: &ReportInput) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Pipeline Report: {}\n\n", input.outline.meta.topic));
    out.push_str(&format!(
        "Generated: {}\n",
        input.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("Subject type: {}\n", input.subject_type));
    out.push_str(&format!("Auto-apply mode: {}\n", input.auto_apply_mode));

    let perfect = input.reviews.values().filter(|v| !v.is_non_ok()).count();
    let flagged = input.reviews.len() - perfect;
    out.push_str("\n## Counts\n\n");
    out.push_str(&format!(
        "- Sections in outline: {}\n",
        input.outline.section_count()
    ));
    out.push_str(&format!("- Drafts produced: {}\n", input.drafts.len()));
    out.push_str(&format!("- Reviews: {} ({} ok, {} flagged)\n", input.reviews.len(), perfect, flagged));
    out.push_str(&format!(
        "- Generation failures: {}\n",
        input.generation_failures.len()
    ));
    out.push_str(&format!(
        "- Published files: {} ({} errors)\n",
        input.publish.files_written, input.publish.errors
    ));

    if !input.generation_failures.is_empty() {
        out.push_str("\n## Generation failures\n\n");
        let mut failures: Vec<&SectionFailure> = input.generation_failures.iter().collect();
        failures.sort_by(|a, b| a.section_id.cmp(&b.section_id));
        for failure in failures {
            out.push_str(&format!(
                "- `{}`: {}\n",
                failure.section_id,
                truncate(&failure.reason, 120)
            ));
        }
    }

    // Review failures: sections whose severity score crosses the threshold
    let mut review_failures: Vec<(&String, &Verdict, u32)> = input
        .reviews
        .iter()
        .map(|(id, v)| (id, v, severity_score(v)))
        .filter(|(_, _, score)| *score >= FAILURE_SCORE_THRESHOLD)
        .collect();
    review_failures.sort_by(|a, b| a.0.cmp(b.0));
    if !review_failures.is_empty() {
        out.push_str("\n## Review failures\n\n");
        for (id, verdict, score) in review_failures {
            let title = input.outline.section_title(id).unwrap_or(id);
            out.push_str(&format!("- **{}** (`{}`), score {}\n", title, id, score));
            for issue in &verdict.issues {
                out.push_str(&format!(
                    "  - [{:?}/{}] {}\n",
                    issue.severity,
                    issue.category,
                    truncate(&issue.description, 120)
                ));
            }
        }
    }

    let applied: Vec<&FixProposal> = input.proposals.iter().filter(|p| p.applied).collect();
    let pending: Vec<&FixProposal> = input.proposals.iter().filter(|p| !p.applied).collect();

    if !input.proposals.is_empty() {
        out.push_str("\n## Fix outcomes\n\n");
        for proposal in &applied {
            out.push_str(&format!(
                "- APPLIED `{}`: {} ({})\n",
                proposal.id,
                truncate(&proposal.summary, 120),
                proposal.auto_reason
            ));
        }
        for proposal in &pending {
            out.push_str(&format!(
                "- PENDING `{}`: {} ({})\n",
                proposal.id,
                truncate(&proposal.summary, 120),
                proposal.auto_reason
            ));
        }
    }

    out.push_str("\n## Auto-apply\n\n");
    out.push_str(&format!("- Mode: {}\n", input.auto_apply_mode));
    out.push_str(&format!("- Applied: {}\n", applied.len()));
    out.push_str(&format!("- Pending human review: {}\n", pending.len()));

    out
}
