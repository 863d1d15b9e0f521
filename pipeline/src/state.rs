//! Scheduler-owned pipeline state
//!
//! The drafts and reviews maps are owned exclusively by the scheduler and
//! handed off between stages; after handoff only the fix stage's explicit
//! substitution mutates a draft.

use serde::Serialize;
use std::collections::HashMap;

use crate::review::Verdict;

/// A section whose generation exhausted all retries
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SectionFailure {
    pub section_id: String,
    pub reason: String,
}

/// Accumulated outputs of the generate and review stages
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    /// section id → markdown draft
    pub drafts: HashMap<String, String>,
    /// section id → review verdict
    pub reviews: HashMap<String, Verdict>,
    /// generation failures (retries exhausted)
    pub failures: Vec<SectionFailure>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the outputs of one chapter/group task into the whole
    pub fn merge(&mut self, other: PipelineState) {
        self.drafts.extend(other.drafts);
        self.reviews.extend(other.reviews);
        self.failures.extend(other.failures);
    }
}
