//! CourseForge Core: configuration, outline model, and markdown sanitizer
//!
//! This crate holds the data model shared by the whole pipeline:
//! - `config`: pipeline configuration loading, env overrides, validation
//! - `outline`: the normalized chapter → group → section outline model
//! - `sanitize`: idempotent markdown/mermaid fence fix-ups

pub mod config;
pub mod outline;
pub mod sanitize;

// Re-export main types
pub use config::{AutoApplyMode, FilenameStyle, LlmEntry, PipelineConfig, ProviderKind};
pub use outline::{
    Chapter, Group, Outline, OutlineError, OutlineMeta, Relation, Section, StructureType,
    SubjectType,
};
pub use sanitize::{sanitize_markdown, SanitizeStats};
