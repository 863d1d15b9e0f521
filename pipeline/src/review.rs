//! Reviewer
//!
//! Peer-context-aware quality review per section. The verdict shape is
//! validated on parse; unparsable reviewer output degrades to a
//! synthesized single-major verdict so downstream policy treats the
//! section as needing attention instead of aborting the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Issue severity; drives both the failure score and auto-apply gating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Major,
    Minor,
}

/// Categories whose fixes are considered low-risk
pub const SAFE_CATEGORIES: &[&str] = &[
    "formatting",
    "typo",
    "heading",
    "link_fix",
    "reference",
    "style",
    "redundancy",
    "minor_clarity",
    "minor_structure",
    "example_polish",
];

/// Categories whose fixes can change meaning or break things
pub const RISKY_CATEGORIES: &[&str] = &[
    "factual_error",
    "code_bug",
    "algorithm_logic",
    "security",
    "api_breaking_change",
];

/// Category used for synthesized reviewer-instability verdicts
pub const UNCATEGORIZED: &str = "uncategorized";

/// One review issue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub severity: Severity,
    pub category: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
}

/// Structured review outcome for one section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    #[serde(default)]
    pub file_id: String,
    pub is_perfect: bool,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl Verdict {
    /// A verdict with no findings
    pub fn perfect(file_id: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            is_perfect: true,
            issues: Vec::new(),
        }
    }

    /// Whether the section needs attention (any issue, or not perfect)
    pub fn is_non_ok(&self) -> bool {
        !self.is_perfect || !self.issues.is_empty()
    }

    pub fn has_major(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Major)
    }
}

/// Peer reference included in review prompts: every section of the same
/// group except the one under review
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PeerRef {
    pub id: String,
    pub title: String,
}

/// Severity score used only for the failures summary, never for
/// auto-apply decisions: majors count 2, minors 1, perfect is 0
pub fn severity_score(verdict: &Verdict) -> u32 {
    if verdict.is_perfect {
        return 0;
    }
    verdict
        .issues
        .iter()
        .map(|i| match i.severity {
            Severity::Major => 2,
            Severity::Minor => 1,
        })
        .sum()
}

/// A section counts as a failure in the report at or above this score
pub const FAILURE_SCORE_THRESHOLD: u32 = 3;

/// Build the review prompt for one section
pub fn build_review_prompt(
    subject: &str,
    section_id: &str,
    title: &str,
    draft: &str,
    peers: &[PeerRef],
) -> String {
    let peer_list = if peers.is_empty() {
        "(none)".to_string()
    } else {
        peers
            .iter()
            .map(|p| format!("- {} (`{}`)", p.title, p.id))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are reviewing one section of a tutorial about \"{subject}\".\n\
         Section: \"{title}\" (`{section_id}`)\n\
         Sibling sections in the same group:\n{peer_list}\n\n\
         Content to review:\n\n---\n{draft}\n---\n\n\
         Check correctness, clarity, structure, and consistency with the \
         sibling sections. Respond with ONLY a JSON object of this shape:\n\
         {{\"file_id\": \"{section_id}\", \"is_perfect\": bool, \"issues\": \
         [{{\"severity\": \"major\"|\"minor\", \"category\": string, \
         \"confidence\": number, \"description\": string, \
         \"suggestion\": string}}]}}\n\
         Use an empty issues array and is_perfect=true when the content \
         needs no changes."
    )
}

/// Extract the first JSON object from raw LLM output, tolerating code
/// fences and surrounding prose
pub(crate) fn extract_json_object(raw: &str) -> Option<String> {
    // Prefer a fenced block when present
    let candidate = if let Some(start) = raw.find("```json") {
        let rest = &raw[start + 7..];
        match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else {
        raw
    };

    let start = candidate.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in candidate[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(candidate[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse reviewer output into a verdict
pub fn parse_verdict(raw: &str, section_id: &str) -> Result<Verdict, String> {
    if raw.trim().is_empty() {
        return Err("empty reviewer output".to_string());
    }
    let json_text =
        extract_json_object(raw).ok_or_else(|| "no JSON object in reviewer output".to_string())?;
    let value: JsonValue =
        serde_json::from_str(&json_text).map_err(|e| format!("invalid JSON: {}", e))?;
    let mut verdict: Verdict =
        serde_json::from_value(value).map_err(|e| format!("bad verdict shape: {}", e))?;

    if verdict.file_id.is_empty() {
        verdict.file_id = section_id.to_string();
    }
    for issue in &mut verdict.issues {
        issue.confidence = issue.confidence.clamp(0.0, 1.0);
    }
    Ok(verdict)
}

/// Synthesized verdict for a reviewer that never produced a usable
/// answer: one major issue flags the section for human attention
pub fn synthesized_failure_verdict(section_id: &str, error: &str) -> Verdict {
    Verdict {
        file_id: section_id.to_string(),
        is_perfect: false,
        issues: vec![Issue {
            severity: Severity::Major,
            category: UNCATEGORIZED.to_string(),
            confidence: 0.0,
            description: format!("review failed: {}", error),
            suggestion: "stabilize upstream or review model".to_string(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json_verdict() {
        let raw = r#"{"file_id": "s1", "is_perfect": false, "issues": [
            {"severity": "minor", "category": "typo", "confidence": 0.9,
             "description": "misspelled", "suggestion": "fix it"}]}"#;
        let verdict = parse_verdict(raw, "s1").unwrap();
        assert!(!verdict.is_perfect);
        assert_eq!(verdict.issues.len(), 1);
        assert_eq!(verdict.issues[0].severity, Severity::Minor);
    }

    #[test]
    fn test_parse_fenced_verdict_with_prose() {
        let raw = "Here is my review:\n```json\n{\"is_perfect\": true, \"issues\": []}\n```\nDone.";
        let verdict = parse_verdict(raw, "s1").unwrap();
        assert!(verdict.is_perfect);
        // file_id backfilled from the section id
        assert_eq!(verdict.file_id, "s1");
    }

    #[test]
    fn test_parse_prose_fails() {
        let err = parse_verdict("the content is fine", "s1").unwrap_err();
        assert!(err.contains("no JSON object"));
    }

    #[test]
    fn test_confidence_clamped() {
        let raw = r#"{"is_perfect": false, "issues": [
            {"severity": "major", "category": "code_bug", "confidence": 1.7,
             "description": "", "suggestion": ""}]}"#;
        let verdict = parse_verdict(raw, "s1").unwrap();
        assert_eq!(verdict.issues[0].confidence, 1.0);
    }

    #[test]
    fn test_synthesized_verdict_shape() {
        let verdict = synthesized_failure_verdict("s1", "no JSON object in reviewer output");
        assert!(!verdict.is_perfect);
        assert_eq!(verdict.issues.len(), 1);
        assert_eq!(verdict.issues[0].severity, Severity::Major);
        assert_eq!(verdict.issues[0].category, UNCATEGORIZED);
        assert_eq!(verdict.issues[0].confidence, 0.0);
        assert!(verdict.issues[0].description.contains("no JSON object"));
    }

    #[test]
    fn test_severity_score() {
        assert_eq!(severity_score(&Verdict::perfect("s")), 0);

        let verdict = Verdict {
            file_id: "s".to_string(),
            is_perfect: false,
            issues: vec![
                Issue {
                    severity: Severity::Major,
                    category: "code_bug".to_string(),
                    confidence: 0.9,
                    description: String::new(),
                    suggestion: String::new(),
                },
                Issue {
                    severity: Severity::Minor,
                    category: "typo".to_string(),
                    confidence: 0.9,
                    description: String::new(),
                    suggestion: String::new(),
                },
            ],
        };
        assert_eq!(severity_score(&verdict), 3);
        assert!(severity_score(&verdict) >= FAILURE_SCORE_THRESHOLD);
    }

    #[test]
    fn test_category_sets_are_disjoint() {
        for safe in SAFE_CATEGORIES {
            assert!(!RISKY_CATEGORIES.contains(safe));
        }
    }

    #[test]
    fn test_extract_json_object_nested_braces() {
        let raw = r#"prefix {"a": {"b": "}"}, "c": 1} suffix"#;
        let json = extract_json_object(raw).unwrap();
        let value: JsonValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value["c"], 1);
    }

    #[test]
    fn test_review_prompt_lists_peers() {
        let peers = vec![
            PeerRef {
                id: "s2".to_string(),
                title: "Second".to_string(),
            },
        ];
        let prompt = build_review_prompt("Git", "s1", "First", "content", &peers);
        assert!(prompt.contains("Second (`s2`)"));
        assert!(prompt.contains("\"file_id\": \"s1\""));
    }
}
