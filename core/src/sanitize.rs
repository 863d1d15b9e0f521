//! Markdown Sanitizer
//!
//! Diagram-block fix-ups applied before review and before publish.
//! The pass is idempotent: sanitizing already-sanitized markdown is a no-op.
//!
//! Handled cases:
//! - fence openers whose info string is a mermaid variant (`Mermaid`,
//!   `` ``` mermaid ``) are normalized to ` ```mermaid `
//! - closing fences that carry a stray info string are trimmed to ` ``` `
//! - a fence left open at end of input is closed

use serde::Serialize;

/// Issue counts from one sanitization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SanitizeStats {
    /// Mermaid fence openers rewritten to the canonical form
    pub fences_normalized: u32,
    /// Closing fences stripped of stray info strings
    pub stray_closers_trimmed: u32,
    /// Fences still open at end of input that were closed
    pub unclosed_fences_closed: u32,
}

impl SanitizeStats {
    /// Total number of fix-ups applied
    pub fn total(&self) -> u32 {
        self.fences_normalized + self.stray_closers_trimmed + self.unclosed_fences_closed
    }
}

/// Sanitize markdown, returning the fixed text and issue stats
pub fn sanitize_markdown(md: &str) -> (String, SanitizeStats) {
    let mut stats = SanitizeStats::default();
    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;

    for line in md.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("```") {
            if !in_fence {
                in_fence = true;
                let info = rest.trim();
                if info.eq_ignore_ascii_case("mermaid") && rest != "mermaid" {
                    stats.fences_normalized += 1;
                    out.push("```mermaid".to_string());
                } else {
                    out.push(line.to_string());
                }
            } else {
                in_fence = false;
                if !rest.trim().is_empty() {
                    // Closing fences cannot carry info strings
                    stats.stray_closers_trimmed += 1;
                    out.push("```".to_string());
                } else {
                    out.push(line.to_string());
                }
            }
        } else {
            out.push(line.to_string());
        }
    }

    if in_fence {
        stats.unclosed_fences_closed += 1;
        out.push("```".to_string());
    }

    let mut result = out.join("\n");
    if md.ends_with('\n') || stats.unclosed_fences_closed > 0 {
        result.push('\n');
    }
    (result, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_markdown_untouched() {
        let md = "# Title\n\nSome prose.\n\n```rust\nfn main() {}\n```\n";
        let (fixed, stats) = sanitize_markdown(md);
        assert_eq!(fixed, md);
        assert_eq!(stats.total(), 0);
    }

    #[test]
    fn test_mermaid_opener_normalized() {
        let md = "``` Mermaid\ngraph TD;\nA-->B;\n```\n";
        let (fixed, stats) = sanitize_markdown(md);
        assert!(fixed.starts_with("```mermaid\n"));
        assert_eq!(stats.fences_normalized, 1);
    }

    #[test]
    fn test_unclosed_fence_closed() {
        let md = "```mermaid\ngraph TD;\nA-->B;";
        let (fixed, stats) = sanitize_markdown(md);
        assert!(fixed.ends_with("```\n"));
        assert_eq!(stats.unclosed_fences_closed, 1);
    }

    #[test]
    fn test_stray_closer_trimmed() {
        let md = "```mermaid\ngraph TD;\n```text\nafter\n";
        let (fixed, stats) = sanitize_markdown(md);
        assert_eq!(stats.stray_closers_trimmed, 1);
        assert!(fixed.contains("graph TD;\n```\nafter"));
    }

    #[test]
    fn test_idempotent() {
        let cases = [
            "``` Mermaid\ngraph TD;\nA-->B;",
            "```mermaid\ngraph LR;\n```json\ntail\n",
            "plain text only\n",
        ];
        for md in cases {
            let (once, _) = sanitize_markdown(md);
            let (twice, stats) = sanitize_markdown(&once);
            assert_eq!(once, twice, "second pass changed output for {:?}", md);
            assert_eq!(stats.total(), 0, "second pass reported fixes for {:?}", md);
        }
    }
}
