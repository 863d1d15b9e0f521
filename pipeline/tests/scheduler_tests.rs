//! Scheduler integration tests: wave ordering, the global concurrency
//! bound, the stall guard, chapter selection, and review degradation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use courseforge_core::Outline;
use courseforge_llm::StubGateway;
use courseforge_pipeline::review::UNCATEGORIZED;
use courseforge_pipeline::{Scheduler, SchedulerParams, Severity};

fn toolbox_outline() -> Outline {
    Outline::parse(
        r#"{
        "meta": {"topic": "Git", "topic_slug": "git"},
        "chapters": [{
            "title": "Everyday commands",
            "groups": [{
                "title": "Working tree",
                "structure_type": "toolbox",
                "sections": [
                    {"id": "t1", "title": "T1", "primary_goal": "g",
                     "relation_to_previous": "first_in_sequence"},
                    {"id": "t2", "title": "T2", "primary_goal": "g",
                     "relation_to_previous": "tool_in_toolbox"},
                    {"id": "t3", "title": "T3", "primary_goal": "g",
                     "relation_to_previous": "deep_dive_into"},
                    {"id": "t4", "title": "T4", "primary_goal": "g",
                     "relation_to_previous": "tool_in_toolbox"}
                ]
            }]
        }]
    }"#,
    )
    .unwrap()
}

/// Responder that tags each draft with the section title found in the
/// embedded design JSON
fn titled_responder(prompt: &str) -> String {
    for title in ["T1", "T2", "T3", "T4"] {
        if prompt.contains(&format!("\"title\": \"{}\"", title)) {
            return format!("DRAFT-{}", title);
        }
    }
    "DRAFT-UNKNOWN".to_string()
}

fn params_tool() -> SchedulerParams {
    SchedulerParams {
        subject_type: courseforge_core::SubjectType::Tool,
        retry_delay: Duration::from_millis(0),
        review_retry_delay: Duration::from_millis(0),
        ..SchedulerParams::default()
    }
}

#[tokio::test]
async fn test_toolbox_waves_roots_then_dependents() {
    let stub = Arc::new(
        StubGateway::with_responder("gen", titled_responder)
            .with_delay(Duration::from_millis(30)),
    );
    let scheduler = Scheduler::new(
        stub.clone(),
        stub.clone(),
        Arc::new(Semaphore::new(8)),
        params_tool(),
    );

    let state = scheduler.generate(&toolbox_outline()).await.unwrap();

    assert_eq!(state.drafts.len(), 4);
    assert!(state.failures.is_empty());

    // Wave 1 is {T1, T2, T4} concurrently; T3 waits for its predecessor
    assert_eq!(stub.max_in_flight(), 3);
    let calls = stub.calls();
    assert_eq!(calls.len(), 4);
    let last = &calls[3];
    assert!(last.contains("\"title\": \"T3\""));
    // Deep dive sees exactly the index predecessor's draft
    assert!(last.contains("DRAFT-T2"));
    assert!(last.contains("Go deeper"));
    // Roots carry no parent context
    for call in &calls[..3] {
        assert!(!call.contains("Parent section content"));
    }
}

#[tokio::test]
async fn test_global_concurrency_bound_respected() {
    let outline = Outline::parse(
        r#"{
        "meta": {"topic": "Git", "topic_slug": "git"},
        "chapters": [{
            "title": "C",
            "groups": [{
                "title": "G",
                "structure_type": "toolbox",
                "sections": [
                    {"id": "a", "title": "A", "relation_to_previous": "tool_in_toolbox"},
                    {"id": "b", "title": "B", "relation_to_previous": "tool_in_toolbox"},
                    {"id": "c", "title": "C", "relation_to_previous": "tool_in_toolbox"},
                    {"id": "d", "title": "D", "relation_to_previous": "tool_in_toolbox"},
                    {"id": "e", "title": "E", "relation_to_previous": "tool_in_toolbox"}
                ]
            }]
        }]
    }"#,
    )
    .unwrap();

    let stub = Arc::new(StubGateway::new("gen").with_delay(Duration::from_millis(20)));
    let scheduler = Scheduler::new(
        stub.clone(),
        stub.clone(),
        Arc::new(Semaphore::new(2)),
        params_tool(),
    );
    scheduler.generate(&outline).await.unwrap();
    assert!(stub.max_in_flight() <= 2);

    // P=1 degenerates to fully sequential execution
    let stub = Arc::new(StubGateway::new("gen").with_delay(Duration::from_millis(5)));
    let scheduler = Scheduler::new(
        stub.clone(),
        stub.clone(),
        Arc::new(Semaphore::new(1)),
        params_tool(),
    );
    let state = scheduler.generate(&outline).await.unwrap();
    assert_eq!(stub.max_in_flight(), 1);
    assert_eq!(state.drafts.len(), 5);
}

fn rootless_outline() -> Outline {
    Outline::parse(
        r#"{
        "meta": {"topic": "Git", "topic_slug": "git"},
        "chapters": [{
            "title": "C",
            "groups": [{
                "title": "G",
                "structure_type": "toolbox",
                "sections": [
                    {"id": "a", "title": "A", "relation_to_previous": "builds_on"},
                    {"id": "b", "title": "B", "relation_to_previous": "builds_on"}
                ]
            }]
        }]
    }"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_stall_guard_force_releases_rootless_group() {
    let stub = Arc::new(StubGateway::new("gen"));
    let scheduler = Scheduler::new(
        stub.clone(),
        stub.clone(),
        Arc::new(Semaphore::new(4)),
        params_tool(),
    );
    let state = scheduler.generate(&rootless_outline()).await.unwrap();

    // Both sections still get drafted after the force release
    assert_eq!(state.drafts.len(), 2);
    assert_eq!(stub.call_count(), 2);
}

#[tokio::test]
async fn test_strict_dependencies_fails_on_rootless_group() {
    let stub = Arc::new(StubGateway::new("gen"));
    let params = SchedulerParams {
        strict_dependencies: true,
        ..params_tool()
    };
    let scheduler = Scheduler::new(stub.clone(), stub.clone(), Arc::new(Semaphore::new(4)), params);
    let err = scheduler.generate(&rootless_outline()).await.unwrap_err();
    assert!(err.to_string().contains("unresolvable dependencies"));
}

#[tokio::test]
async fn test_chapter_selection_limits_output() {
    let outline = Outline::parse(
        r#"{
        "meta": {"topic": "Git", "topic_slug": "git"},
        "chapters": [
            {"title": "One", "sections": [{"id": "s1", "title": "A"}]},
            {"title": "Two", "sections": [{"id": "s2", "title": "B"}]},
            {"title": "Three", "sections": [{"id": "s3", "title": "C"}]}
        ]
    }"#,
    )
    .unwrap();

    let stub = Arc::new(StubGateway::new("gen"));
    let params = SchedulerParams {
        selected_chapters: HashSet::from(["One".to_string(), "Three".to_string()]),
        ..SchedulerParams::default()
    };
    let scheduler = Scheduler::new(stub.clone(), stub.clone(), Arc::new(Semaphore::new(4)), params);
    let state = scheduler.generate(&outline).await.unwrap();

    assert!(state.drafts.contains_key("s1"));
    assert!(!state.drafts.contains_key("s2"));
    assert!(state.drafts.contains_key("s3"));
    assert_eq!(stub.call_count(), 2);
}

#[tokio::test]
async fn test_review_prose_degrades_to_synthesized_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let outline = Outline::parse(
        r#"{
        "meta": {"topic": "Git", "topic_slug": "git"},
        "chapters": [{
            "title": "C",
            "groups": [{
                "title": "G",
                "sections": [
                    {"id": "s1", "title": "First"},
                    {"id": "s2", "title": "Second"}
                ]
            }]
        }]
    }"#,
    )
    .unwrap();

    let gen = Arc::new(StubGateway::new("gen"));
    let rev = Arc::new(StubGateway::with_responder("rev", |_| {
        "the content is fine".to_string()
    }));
    let params = SchedulerParams {
        review_retries: 2,
        reviews_dir: Some(dir.path().to_path_buf()),
        ..SchedulerParams::default()
    };
    let scheduler = Scheduler::new(gen, rev.clone(), Arc::new(Semaphore::new(4)), params);

    let state = scheduler.generate(&outline).await.unwrap();
    let reviews = scheduler.review(&outline, &state.drafts).await.unwrap();

    // 2 attempts per section, both unparsable
    assert_eq!(rev.call_count(), 4);
    let verdict = &reviews["s1"];
    assert!(!verdict.is_perfect);
    assert_eq!(verdict.issues.len(), 1);
    assert_eq!(verdict.issues[0].severity, Severity::Major);
    assert_eq!(verdict.issues[0].category, UNCATEGORIZED);
    assert_eq!(verdict.issues[0].confidence, 0.0);

    // Persisted verdicts parse back to the same object
    let raw = std::fs::read_to_string(dir.path().join("s1.json")).unwrap();
    let parsed: courseforge_pipeline::Verdict = serde_json::from_str(&raw).unwrap();
    assert_eq!(&parsed, verdict);
}

#[tokio::test]
async fn test_review_peers_exclude_self() {
    let outline = Outline::parse(
        r#"{
        "meta": {"topic": "Git", "topic_slug": "git"},
        "chapters": [{
            "title": "C",
            "groups": [{
                "title": "G",
                "sections": [
                    {"id": "s1", "title": "First"},
                    {"id": "s2", "title": "Second"}
                ]
            }]
        }]
    }"#,
    )
    .unwrap();

    let gen = Arc::new(StubGateway::new("gen"));
    let rev = Arc::new(StubGateway::with_responder("rev", |_| {
        r#"{"is_perfect": true, "issues": []}"#.to_string()
    }));
    let scheduler = Scheduler::new(
        gen,
        rev.clone(),
        Arc::new(Semaphore::new(4)),
        SchedulerParams::default(),
    );

    let state = scheduler.generate(&outline).await.unwrap();
    let reviews = scheduler.review(&outline, &state.drafts).await.unwrap();
    assert_eq!(reviews.len(), 2);
    assert!(reviews.values().all(|v| !v.is_non_ok()));

    for call in rev.calls() {
        if call.contains("Section: \"First\"") {
            assert!(call.contains("Second (`s2`)"));
            assert!(!call.contains("First (`s1`)"));
        } else {
            assert!(call.contains("First (`s1`)"));
            assert!(!call.contains("Second (`s2`)"));
        }
    }
}

#[tokio::test]
async fn test_drafts_persisted_as_produced() {
    let dir = tempfile::tempdir().unwrap();
    let outline = Outline::parse(
        r#"{
        "meta": {"topic": "Git", "topic_slug": "git"},
        "chapters": [{
            "title": "C",
            "sections": [{"id": "s1", "title": "First"}]
        }]
    }"#,
    )
    .unwrap();

    let stub = Arc::new(StubGateway::with_responder("gen", |_| "# Body\n".to_string()));
    let params = SchedulerParams {
        drafts_dir: Some(dir.path().to_path_buf()),
        ..SchedulerParams::default()
    };
    let scheduler = Scheduler::new(stub.clone(), stub, Arc::new(Semaphore::new(4)), params);
    let state = scheduler.generate(&outline).await.unwrap();

    let on_disk = std::fs::read_to_string(dir.path().join("s1.md")).unwrap();
    assert_eq!(on_disk, state.drafts["s1"]);
}
