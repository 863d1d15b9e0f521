//! Publisher
//!
//! Writes the final drafts and the learning path to the published output
//! directory. File writes are independent: one failed section is logged
//! and counted, never aborts the rest.

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{error, info};

use courseforge_core::{sanitize_markdown, FilenameStyle, Outline, Section};

fn dotted_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+)*\s+").unwrap())
}

fn ordinal_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+[.)]\s*").unwrap())
}

fn trailing_paren_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\([ -~]*\)\s*$").unwrap())
}

fn section_index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"sec-(\d+)-(\d+)-(\d+)").unwrap())
}

/// Strip outline numbering and annotations from a section title so it can
/// serve as a filename stem. Non-ASCII text (CJK titles included) passes
/// through untouched.
pub fn clean_title(title: &str) -> String {
    let mut cleaned = title.trim().to_string();
    if let Some(m) = dotted_prefix_re().find(&cleaned) {
        cleaned = cleaned[m.end()..].to_string();
    } else if let Some(m) = ordinal_prefix_re().find(&cleaned) {
        cleaned = cleaned[m.end()..].to_string();
    }
    if let Some(m) = trailing_paren_re().find(&cleaned) {
        cleaned = cleaned[..m.start()].to_string();
    }
    // Path separators would split the filename into directories
    cleaned = cleaned.replace(['/', '\\'], "-");
    cleaned.trim().to_string()
}

/// Lowercased, hyphen-joined slug of a cleaned title
fn title_slug(title: &str) -> String {
    let cleaned = clean_title(title);
    let mut slug = String::with_capacity(cleaned.len());
    let mut last_hyphen = true;
    for ch in cleaned.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !last_hyphen {
                slug.push('-');
                last_hyphen = true;
            }
        } else if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
            last_hyphen = false;
        }
        // Punctuation is dropped
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Filename for a published section.
///
/// `Id` style emits `<id>-<clean_title>.md`; `Structured` style rebuilds
/// `sec-<chapter>-<group>-<section>-<title-slug>.md` from the indices
/// embedded in the id, falling back to `<id>.md` when the id carries no
/// recognizable index triple.
pub fn draft_filename(style: FilenameStyle, section: &Section) -> String {
    match style {
        FilenameStyle::Id => {
            let cleaned = clean_title(&section.title);
            if cleaned.is_empty() {
                format!("{}.md", section.id)
            } else {
                format!("{}-{}.md", section.id, cleaned)
            }
        }
        FilenameStyle::Structured => {
            let Some(caps) = section_index_re().captures(&section.id) else {
                return format!("{}.md", section.id);
            };
            let slug = title_slug(&section.title);
            if slug.is_empty() {
                return format!("{}.md", section.id);
            }
            format!("sec-{}-{}-{}-{}.md", &caps[1], &caps[2], &caps[3], slug)
        }
    }
}

/// The learning path document: the whole outline as nested markdown
pub fn render_learning_path(outline: &Outline) -> String {
    format!(
        "# Learning Path: {}\n\n{}",
        outline.meta.topic,
        outline.to_markdown()
    )
}

/// Counts for the report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub files_written: usize,
    pub errors: usize,
}

/// Writes final drafts and the learning path under one directory
#[derive(Clone)]
pub struct Publisher {
    root: PathBuf,
    style: FilenameStyle,
    sanitize: bool,
}

impl Publisher {
    pub fn new(root: impl Into<PathBuf>, style: FilenameStyle, sanitize: bool) -> Self {
        Self {
            root: root.into(),
            style,
            sanitize,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write every drafted section plus `<slug>-learning-path.md`
    pub fn publish(
        &self,
        outline: &Outline,
        drafts: &HashMap<String, String>,
    ) -> PublishSummary {
        let mut summary = PublishSummary::default();
        if let Err(e) = std::fs::create_dir_all(&self.root) {
            error!("cannot create publish directory {:?}: {}", self.root, e);
            summary.errors += 1;
            return summary;
        }

        for chapter in &outline.chapters {
            for group in &chapter.groups {
                for section in &group.sections {
                    let Some(draft) = drafts.get(&section.id) else {
                        continue;
                    };
                    let body = if self.sanitize {
                        sanitize_markdown(draft).0
                    } else {
                        draft.clone()
                    };
                    let path = self.root.join(draft_filename(self.style, section));
                    match std::fs::write(&path, body) {
                        Ok(()) => summary.files_written += 1,
                        Err(e) => {
                            error!("failed to write {:?}: {}", path, e);
                            summary.errors += 1;
                        }
                    }
                }
            }
        }

        let path = self
            .root
            .join(format!("{}-learning-path.md", outline.meta.topic_slug));
        match std::fs::write(&path, render_learning_path(outline)) {
            Ok(()) => summary.files_written += 1,
            Err(e) => {
                error!("failed to write {:?}: {}", path, e);
                summary.errors += 1;
            }
        }

        info!(
            files = summary.files_written,
            errors = summary.errors,
            "publish finished"
        );
        summary
    }
}
