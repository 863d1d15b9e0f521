//! End-to-end pipeline runs against stub gateways: stage sequencing,
//! published artifacts, and policy-gated fixes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use courseforge_core::{AutoApplyMode, PipelineConfig, SubjectType};
use courseforge_llm::{LlmRegistry, StubGateway};
use courseforge_pipeline::{Orchestrator, RunOptions};

const THEORY_OUTLINE: &str = r#"{
    "meta": {"topic": "Quantum Mechanics", "topic_slug": "q-mech", "subject_type": "theory"},
    "chapters": [{
        "title": "Foundations",
        "groups": [{
            "title": "Core ideas",
            "structure_type": "pipeline",
            "sections": [
                {"id": "q-mech-sec-1-1-1", "title": "Wavefunctions",
                 "primary_goal": "Introduce the role of psi"},
                {"id": "q-mech-sec-1-1-2", "title": "Superposition",
                 "primary_goal": "Explain linear combinations of states",
                 "relation_to_previous": "builds_on"}
            ]
        }]
    }]
}"#;

fn write_outline(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("outline.json");
    std::fs::write(&path, body).unwrap();
    path
}

fn quick_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry_delay = 0.0;
    config.review_retry_delay = 0.0;
    config.stage_retry_delay = 0.0;
    config.stage_timeout = 30;
    config
}

fn options_for(dir: &Path, outline: std::path::PathBuf) -> RunOptions {
    RunOptions {
        outline_path: outline,
        project_root: dir.to_path_buf(),
        ..RunOptions::default()
    }
}

#[tokio::test]
async fn test_theory_pipeline_run_publishes_expected_files() {
    let dir = tempfile::tempdir().unwrap();
    let outline = write_outline(dir.path(), THEORY_OUTLINE);

    let gen = Arc::new(StubGateway::with_responder("gen", |prompt| {
        if prompt.contains("Wavefunctions") {
            "# Wavefunctions\nbody one".to_string()
        } else {
            "# Superposition\nbody two".to_string()
        }
    }));
    let mut registry = LlmRegistry::empty(HashMap::new());
    registry.insert("default", gen.clone());

    let orchestrator = Orchestrator::new(quick_config(), registry);
    let mut options = options_for(dir.path(), outline);
    options.skip_content_review = true;
    options.skip_fixes = true;

    let summary = orchestrator.run(&options).await.unwrap();
    assert_eq!(summary.slug, "q-mech");
    assert_eq!(summary.subject_type, SubjectType::Theory);
    assert_eq!(summary.drafts, 2);
    assert_eq!(summary.reviews, 0);
    // 2 sections + learning path
    assert_eq!(summary.published_files, 3);
    assert_eq!(summary.publish_errors, 0);

    let published = dir.path().join("published/q-mech");
    let first = std::fs::read_to_string(published.join("q-mech-sec-1-1-1-Wavefunctions.md"))
        .unwrap();
    assert!(first.contains("body one"));
    let second = std::fs::read_to_string(published.join("q-mech-sec-1-1-2-Superposition.md"))
        .unwrap();
    assert!(second.contains("body two"));
    let path_doc =
        std::fs::read_to_string(published.join("q-mech-learning-path.md")).unwrap();
    assert!(path_doc.contains("Foundations"));
    assert!(path_doc.contains("q-mech-sec-1-1-2"));

    // Serial pipeline order: the second prompt embeds the first draft
    let calls = gen.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].contains("body one"));

    // Intermediate drafts were persisted along the way
    let draft = std::fs::read_to_string(
        dir.path().join("output/q-mech/drafts/q-mech-sec-1-1-1.md"),
    )
    .unwrap();
    assert!(draft.contains("body one"));

    // Report exists and names the run
    let report = std::fs::read_to_string(summary.report_path).unwrap();
    assert!(report.contains("# Pipeline Report: Quantum Mechanics"));
}

#[tokio::test]
async fn test_safe_auto_apply_substitutes_revised_draft() {
    let dir = tempfile::tempdir().unwrap();
    let outline = write_outline(dir.path(), THEORY_OUTLINE);

    let gen = Arc::new(StubGateway::with_responder("gen", |_| "original body".to_string()));
    let rev = Arc::new(StubGateway::with_responder("rev", |_| {
        r#"{"is_perfect": false, "issues": [
            {"severity": "minor", "category": "typo", "confidence": 0.9,
             "description": "misspelled", "suggestion": "fix"}]}"#
            .to_string()
    }));
    let fix = Arc::new(StubGateway::with_responder("fix", |_| {
        r#"{"revised_content": "REVISED BODY", "summary": "fixed the typo",
            "risk": "low", "change_categories": ["typo"], "notes": ""}"#
            .to_string()
    }));

    let node_llm: HashMap<String, String> = [
        ("generate_and_review_by_chapter.generate", "gen"),
        ("generate_and_review_by_chapter.review", "rev"),
        ("propose_and_apply_fixes", "fix"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let mut registry = LlmRegistry::empty(node_llm);
    registry.insert("gen", gen);
    registry.insert("rev", rev);
    registry.insert("fix", fix.clone());

    let mut config = quick_config();
    config.auto_apply_mode = AutoApplyMode::Safe;

    let orchestrator = Orchestrator::new(config, registry);
    let summary = orchestrator
        .run(&options_for(dir.path(), outline))
        .await
        .unwrap();

    assert_eq!(summary.reviews, 2);
    assert_eq!(summary.fixes_applied, 2);
    assert_eq!(fix.call_count(), 2);

    let published = dir.path().join("published/q-mech");
    let body = std::fs::read_to_string(published.join("q-mech-sec-1-1-1-Wavefunctions.md"))
        .unwrap();
    assert_eq!(body.trim(), "REVISED BODY");

    let report = std::fs::read_to_string(summary.report_path).unwrap();
    assert!(report.contains("safe: all minor"));
    assert!(report.contains("APPLIED"));
    assert!(report.contains("- Applied: 2"));
}

#[tokio::test]
async fn test_aggressive_threshold_miss_leaves_draft_pending() {
    let dir = tempfile::tempdir().unwrap();
    let outline = write_outline(dir.path(), THEORY_OUTLINE);

    let gen = Arc::new(StubGateway::with_responder("gen", |_| "original body".to_string()));
    let rev = Arc::new(StubGateway::with_responder("rev", |_| {
        r#"{"is_perfect": false, "issues": [
            {"severity": "major", "category": "code_bug", "confidence": 0.7,
             "description": "wrong", "suggestion": "rewrite"}]}"#
            .to_string()
    }));
    let fix = Arc::new(StubGateway::with_responder("fix", |_| {
        r#"{"revised_content": "SHOULD NOT APPEAR", "summary": "s"}"#.to_string()
    }));

    let node_llm: HashMap<String, String> = [
        ("generate_and_review_by_chapter.generate", "gen"),
        ("generate_and_review_by_chapter.review", "rev"),
        ("propose_and_apply_fixes", "fix"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let mut registry = LlmRegistry::empty(node_llm);
    registry.insert("gen", gen);
    registry.insert("rev", rev);
    registry.insert("fix", fix.clone());

    let mut config = quick_config();
    config.auto_apply_mode = AutoApplyMode::Aggressive;
    config.auto_apply_threshold_major = 0.8;

    let orchestrator = Orchestrator::new(config, registry);
    let summary = orchestrator
        .run(&options_for(dir.path(), outline))
        .await
        .unwrap();

    // Below-threshold majors never reach the proposer
    assert_eq!(summary.fixes_applied, 0);
    assert_eq!(fix.call_count(), 0);

    let published = dir.path().join("published/q-mech");
    let body = std::fs::read_to_string(published.join("q-mech-sec-1-1-1-Wavefunctions.md"))
        .unwrap();
    assert_eq!(body.trim(), "original body");

    let report = std::fs::read_to_string(summary.report_path).unwrap();
    assert!(report.contains("PENDING"));
    assert!(report.contains("aggressive: major confidence below threshold"));
    assert!(report.contains("- Pending human review: 2"));
}

#[tokio::test]
async fn test_missing_outline_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = LlmRegistry::empty(HashMap::new());
    registry.insert("default", Arc::new(StubGateway::new("gen")));

    let mut config = quick_config();
    config.stage_attempts = 1;
    let orchestrator = Orchestrator::new(config, registry);

    let err = orchestrator
        .run(&options_for(dir.path(), dir.path().join("missing.json")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("load-input"));
}

#[tokio::test]
async fn test_chapter_selection_skips_unselected_files() {
    let dir = tempfile::tempdir().unwrap();
    let outline = write_outline(
        dir.path(),
        r#"{
        "meta": {"topic": "Git", "topic_slug": "git", "subject_type": "tool"},
        "chapters": [
            {"title": "One", "sections": [{"id": "git-sec-1-1-1", "title": "A"}]},
            {"title": "Two", "sections": [{"id": "git-sec-2-1-1", "title": "B"}]},
            {"title": "Three", "sections": [{"id": "git-sec-3-1-1", "title": "C"}]}
        ]
    }"#,
    );

    let mut registry = LlmRegistry::empty(HashMap::new());
    registry.insert("default", Arc::new(StubGateway::new("gen")));

    let orchestrator = Orchestrator::new(quick_config(), registry);
    let mut options = options_for(dir.path(), outline);
    options.selected_chapters = vec!["One".to_string(), "Three".to_string()];
    options.skip_content_review = true;
    options.skip_fixes = true;

    let summary = orchestrator.run(&options).await.unwrap();
    assert_eq!(summary.drafts, 2);

    let published = dir.path().join("published/git");
    assert!(published.join("git-sec-1-1-1-A.md").exists());
    assert!(!published.join("git-sec-2-1-1-B.md").exists());
    assert!(published.join("git-sec-3-1-1-C.md").exists());
}
