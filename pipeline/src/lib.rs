//! CourseForge Pipeline: generation, review, repair, publish
//!
//! The chapter-scoped content engine:
//! - `prompts`: deterministic prompt composition (opening / continuation / tool)
//! - `scheduler`: dependency-aware fan-out of generation and review under
//!   one global concurrency semaphore
//! - `review`: peer-aware quality verdicts with deterministic severity scoring
//! - `fix`: policy-gated auto-repair of drafts
//! - `publish`: final markdown files and the learning path
//! - `report`: the aggregate pipeline report
//! - `orchestrator`: the stage sequence with per-stage retry/timeout envelopes

pub mod fix;
pub mod orchestrator;
pub mod prompts;
pub mod publish;
pub mod report;
pub mod review;
pub mod scheduler;
pub mod state;

// Re-export main types
pub use fix::{AutoApplyPolicy, Decision, FixApplier, FixProposal, FixSelection};
pub use orchestrator::{run_stage, Orchestrator, RunOptions, RunSummary, StagePolicy};
pub use review::{severity_score, Issue, Severity, Verdict, FAILURE_SCORE_THRESHOLD};
pub use scheduler::{Scheduler, SchedulerParams};
pub use state::{PipelineState, SectionFailure};
