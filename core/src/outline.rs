//! Outline Model
//!
//! Normalizes the reconstructed learning outline into a uniform
//! chapter → group → section structure. Two wire shapes are accepted:
//! the full form (`chapters` with nested `groups`) and the compact form
//! (`reconstructed_outline.groups`, where each "group" is one chapter
//! that receives a synthesized default group).
//!
//! Outline entities are read-only after load.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or normalizing an outline
#[derive(Debug, Error)]
pub enum OutlineError {
    #[error("failed to read outline file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse outline JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("outline has no chapters")]
    NoChapters,

    #[error("outline meta.topic_slug is empty")]
    EmptySlug,
}

/// How a group schedules its sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureType {
    /// Strict sequential generation; each section observes all prior siblings
    Pipeline,
    /// Dependency waves; only `builds_on`/`deep_dive_into` sections observe a parent
    Toolbox,
}

impl Default for StructureType {
    fn default() -> Self {
        StructureType::Toolbox
    }
}

/// Subject classification; selects the prompt family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    #[default]
    Theory,
    Tool,
}

impl SubjectType {
    /// Match a single classifier word, case-insensitively
    pub fn from_word(word: &str) -> Option<Self> {
        match word.trim().to_lowercase().as_str() {
            "theory" => Some(SubjectType::Theory),
            "tool" => Some(SubjectType::Tool),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectType::Theory => write!(f, "theory"),
            SubjectType::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for SubjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubjectType::from_word(s).ok_or_else(|| format!("unknown subject type: {}", s))
    }
}

/// Relation of a section to its immediately preceding sibling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    FirstInSequence,
    BuildsOn,
    DeepDiveInto,
    ToolInToolbox,
    AlternativeTo,
    /// Empty relation field
    #[default]
    None,
    /// Any relation string outside the known set
    Other,
}

impl Relation {
    /// Parse the wire string; empty maps to `None`, unknown to `Other`
    pub fn from_wire(s: &str) -> Self {
        match s.trim() {
            "" => Relation::None,
            "first_in_sequence" => Relation::FirstInSequence,
            "builds_on" => Relation::BuildsOn,
            "deep_dive_into" => Relation::DeepDiveInto,
            "tool_in_toolbox" => Relation::ToolInToolbox,
            "alternative_to" => Relation::AlternativeTo,
            _ => Relation::Other,
        }
    }

    /// Dependency-bearing relations wait for the index predecessor
    pub fn is_dependency(&self) -> bool {
        matches!(self, Relation::BuildsOn | Relation::DeepDiveInto)
    }

    /// Root relations generate in the first toolbox wave
    pub fn is_root(&self) -> bool {
        matches!(
            self,
            Relation::FirstInSequence
                | Relation::ToolInToolbox
                | Relation::AlternativeTo
                | Relation::None
        )
    }
}

/// Outline metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineMeta {
    pub topic: String,
    pub topic_slug: String,
    /// Declared subject type, if the outline generator provided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<SubjectType>,
}

/// Leaf unit of content; corresponds to one published markdown file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    /// Unique across the outline; used as filename stem and cross-reference key
    pub id: String,
    pub title: String,
    /// Single-sentence content objective
    #[serde(default)]
    pub primary_goal: String,
    /// Advisory module tags (code_example, comparison, mermaid diagram, ...)
    #[serde(default)]
    pub suggested_modules: Vec<String>,
    /// Advisory content bullets
    #[serde(default)]
    pub suggested_contents: Vec<String>,
    pub relation_to_previous: Relation,
}

impl Section {
    /// Design object embedded verbatim into tool prompts
    pub fn design_json(&self) -> serde_json::Value {
        serde_json::json!({
            "title": self.title,
            "id": self.id,
            "primary_goal": self.primary_goal,
            "suggested_modules": self.suggested_modules,
            "suggested_contents": self.suggested_contents,
        })
    }
}

/// Ordered sequence of sections sharing a structure type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub title: String,
    pub structure_type: StructureType,
    pub sections: Vec<Section>,
}

/// Ordered sequence of groups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    pub groups: Vec<Group>,
}

impl Chapter {
    /// Titles of every section in the chapter, in declared order
    pub fn section_titles(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|g| g.sections.iter().map(|s| s.title.clone()))
            .collect()
    }
}

/// Normalized outline; read-only after load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outline {
    pub meta: OutlineMeta,
    pub chapters: Vec<Chapter>,
}

impl Outline {
    /// Parse either wire shape and normalize
    pub fn parse(json: &str) -> Result<Self, OutlineError> {
        let wire: WireDocument = serde_json::from_str(json)?;
        Self::from_wire(wire)
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self, OutlineError> {
        let content = std::fs::read_to_string(path).map_err(|source| OutlineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Total number of sections across all chapters
    pub fn section_count(&self) -> usize {
        self.chapters
            .iter()
            .flat_map(|c| c.groups.iter())
            .map(|g| g.sections.len())
            .sum()
    }

    /// Look up a section title by id
    pub fn section_title(&self, section_id: &str) -> Option<&str> {
        self.chapters
            .iter()
            .flat_map(|c| c.groups.iter())
            .flat_map(|g| g.sections.iter())
            .find(|s| s.id == section_id)
            .map(|s| s.title.as_str())
    }

    /// Render the outline as simple markdown headings (learning path, fix context)
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n", self.meta.topic));
        for chapter in &self.chapters {
            out.push_str(&format!("\n## {}\n", chapter.title));
            for group in &chapter.groups {
                out.push_str(&format!("\n### {}\n", group.title));
                for section in &group.sections {
                    out.push_str(&format!("- {} (`{}`)\n", section.title, section.id));
                }
            }
        }
        out
    }

    fn from_wire(wire: WireDocument) -> Result<Self, OutlineError> {
        // Compact form nests everything under `reconstructed_outline`
        let (meta, wire_chapters) = if let Some(compact) = wire.reconstructed_outline {
            let chapters = compact
                .groups
                .into_iter()
                .map(|g| WireChapter {
                    id: g.id,
                    title: g.title,
                    structure_type: g.structure_type,
                    groups: None,
                    sections: Some(g.sections),
                })
                .collect();
            (compact.meta, chapters)
        } else {
            let meta = wire.meta.ok_or(OutlineError::NoChapters)?;
            (meta, wire.chapters.unwrap_or_default())
        };

        if meta.topic_slug.trim().is_empty() {
            return Err(OutlineError::EmptySlug);
        }
        if wire_chapters.is_empty() {
            return Err(OutlineError::NoChapters);
        }

        let slug = meta.topic_slug.clone();
        let chapters = wire_chapters
            .into_iter()
            .enumerate()
            .map(|(ci, wc)| normalize_chapter(&slug, ci, wc))
            .collect();

        Ok(Outline { meta, chapters })
    }
}

fn normalize_chapter(slug: &str, ci: usize, wire: WireChapter) -> Chapter {
    let chapter_structure = wire.structure_type.unwrap_or_default();

    // Chapters that declare sections directly get one synthesized group
    let wire_groups = match (wire.groups, wire.sections) {
        (Some(groups), _) if !groups.is_empty() => groups,
        (_, Some(sections)) => vec![WireGroup {
            id: None,
            title: wire.title.clone(),
            structure_type: Some(chapter_structure),
            sections,
        }],
        _ => Vec::new(),
    };

    let groups = wire_groups
        .into_iter()
        .enumerate()
        .map(|(gi, wg)| {
            let sections = wg
                .sections
                .into_iter()
                .enumerate()
                .map(|(si, ws)| normalize_section(slug, ci, gi, si, ws))
                .collect();
            Group {
                id: wg
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| format!("{}-grp-{}-{}", slug, ci + 1, gi + 1)),
                title: wg.title,
                structure_type: wg.structure_type.unwrap_or_default(),
                sections,
            }
        })
        .collect();

    Chapter {
        id: wire
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("{}-ch-{}", slug, ci + 1)),
        title: wire.title,
        groups,
    }
}

fn normalize_section(slug: &str, ci: usize, gi: usize, si: usize, wire: WireSection) -> Section {
    let id = match wire.id {
        Some(id) if !id.trim().is_empty() => id,
        _ => format!("{}-sec-{}-{}-{}", slug, ci + 1, gi + 1, si + 1),
    };
    Section {
        id,
        title: wire.title,
        primary_goal: wire.primary_goal,
        suggested_modules: wire.suggested_modules,
        suggested_contents: wire.suggested_contents,
        relation_to_previous: Relation::from_wire(&wire.relation_to_previous),
    }
}

// ---------------------------------------------------------------------------
// Wire shapes

#[derive(Debug, Deserialize)]
struct WireDocument {
    meta: Option<OutlineMeta>,
    chapters: Option<Vec<WireChapter>>,
    reconstructed_outline: Option<WireCompact>,
}

#[derive(Debug, Deserialize)]
struct WireCompact {
    meta: OutlineMeta,
    /// Each compact "group" is one chapter
    #[serde(default)]
    groups: Vec<WireCompactChapter>,
}

#[derive(Debug, Deserialize)]
struct WireCompactChapter {
    id: Option<String>,
    title: String,
    structure_type: Option<StructureType>,
    #[serde(default)]
    sections: Vec<WireSection>,
}

#[derive(Debug, Deserialize)]
struct WireChapter {
    id: Option<String>,
    title: String,
    structure_type: Option<StructureType>,
    groups: Option<Vec<WireGroup>>,
    sections: Option<Vec<WireSection>>,
}

#[derive(Debug, Deserialize)]
struct WireGroup {
    id: Option<String>,
    title: String,
    structure_type: Option<StructureType>,
    #[serde(default)]
    sections: Vec<WireSection>,
}

#[derive(Debug, Deserialize)]
struct WireSection {
    id: Option<String>,
    title: String,
    #[serde(default)]
    primary_goal: String,
    #[serde(default)]
    suggested_modules: Vec<String>,
    #[serde(default)]
    suggested_contents: Vec<String>,
    #[serde(default)]
    relation_to_previous: String,
}
