// crates/wikiruntime/tests/runtime_test.rs

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use wikicore::{
    ErrorKind, ErrorMarker, FailureReport, PageCategory, PipelineError, PipelineEvent,
    RepoReference, RunState, Stage, StageContext, StageId, Wiki, WikiPage, WikiPageRef,
};
use wikiruntime::{RunOutcome, RuntimeConfig, StageRegistry, WikiRuntime};

// Minimal stage double: passes through on error, fails on request, and
// produces a one-page wiki at the build stage.
struct StageDouble {
    id: StageId,
    fail_message: Option<&'static str>,
}

impl StageDouble {
    fn new(id: StageId) -> Self {
        Self {
            id,
            fail_message: None,
        }
    }
}

#[async_trait]
impl Stage for StageDouble {
    fn id(&self) -> StageId {
        self.id
    }

    async fn execute(&self, _ctx: &StageContext, state: RunState) -> RunState {
        if state.has_error() {
            if self.id == StageId::HandleErrors {
                let marker = state.error().cloned().expect("marker present");
                return state.with_failure_report(FailureReport::from_marker(&marker));
            }
            return state;
        }
        if let Some(message) = self.fail_message {
            return state.with_error(ErrorMarker::for_stage(self.id, message));
        }
        if self.id == StageId::BuildWiki {
            return state.with_wiki(Wiki {
                structure: vec![WikiPageRef {
                    title: "Home".to_string(),
                    path: "index.md".to_string(),
                }],
                pages: vec![WikiPage {
                    title: "Home".to_string(),
                    path: "index.md".to_string(),
                    content: "# Home\n".to_string(),
                    category: PageCategory::Overview,
                }],
            });
        }
        state
    }
}

fn full_registry(failing: Option<(StageId, &'static str)>) -> StageRegistry {
    let mut registry = StageRegistry::new();
    for id in StageId::ALL {
        let mut stage = StageDouble::new(id);
        if let Some((failing_id, message)) = failing {
            if failing_id == id {
                stage.fail_message = Some(message);
            }
        }
        registry.register(Arc::new(stage));
    }
    registry
}

fn reference() -> RepoReference {
    RepoReference::parse("https://github.com/acme/widget.git")
}

#[tokio::test]
async fn test_runtime_requires_full_registry() {
    let mut registry = StageRegistry::new();
    registry.register(Arc::new(StageDouble::new(StageId::FetchRepository)));

    let err = WikiRuntime::new(registry).unwrap_err();
    assert!(matches!(err, PipelineError::StageNotRegistered(_)));
}

#[tokio::test]
async fn test_run_pipeline_completes_with_wiki() {
    let runtime = WikiRuntime::new(full_registry(None)).unwrap();

    let report = runtime.run_pipeline(reference()).await.unwrap();

    assert_eq!(report.reference, "https://github.com/acme/widget.git");
    assert!(report.outcome.is_completed());
    match report.outcome {
        RunOutcome::Completed { wiki } => {
            assert_eq!(wiki.pages.len(), 1);
            assert_eq!(wiki.pages[0].path, "index.md");
        }
        RunOutcome::Failed { report } => panic!("unexpected failure: {}", report.message),
    }
}

#[tokio::test]
async fn test_run_pipeline_failure_produces_report() {
    let failing = Some((StageId::FetchRepository, "clone failed"));
    let runtime = WikiRuntime::new(full_registry(failing)).unwrap();

    let report = runtime.run_pipeline(reference()).await.unwrap();

    match report.outcome {
        RunOutcome::Failed { report } => {
            assert_eq!(report.stage, StageId::FetchRepository);
            assert_eq!(report.kind, ErrorKind::FetchError);
            assert_eq!(report.message, "clone failed");
            assert!(report.report.contains("# Wiki Generation Failed"));
        }
        RunOutcome::Completed { .. } => panic!("run should have failed"),
    }
}

#[tokio::test]
async fn test_report_serializes_with_status_tag() {
    let runtime = WikiRuntime::new(full_registry(None)).unwrap();
    let report = runtime.run_pipeline(reference()).await.unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["outcome"]["status"], "completed");
    assert_eq!(json["reference"], "https://github.com/acme/widget.git");
    assert!(json["duration_ms"].is_u64());

    let failing = Some((StageId::FetchRepository, "clone failed"));
    let runtime = WikiRuntime::new(full_registry(failing)).unwrap();
    let report = runtime.run_pipeline(reference()).await.unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["outcome"]["status"], "failed");
    assert_eq!(json["outcome"]["report"]["kind"], "FetchError");
}

#[tokio::test]
async fn test_late_failure_is_normalized_to_a_report() {
    // generate_docs has no error edge; its marker reaches the terminal
    // without passing the handler and is normalized by the runtime.
    let failing = Some((StageId::GenerateDocs, "llm unavailable"));
    let runtime = WikiRuntime::new(full_registry(failing)).unwrap();

    let report = runtime.run_pipeline(reference()).await.unwrap();

    match report.outcome {
        RunOutcome::Failed { report } => {
            assert_eq!(report.stage, StageId::GenerateDocs);
            assert_eq!(report.kind, ErrorKind::DocumentationError);
            assert!(report.report.contains("# Wiki Generation Failed"));
        }
        RunOutcome::Completed { .. } => panic!("run should have failed"),
    }
}

#[tokio::test]
async fn test_cancel_stops_runs_at_the_next_boundary() {
    let runtime = WikiRuntime::new(full_registry(None)).unwrap();
    runtime.cancel();

    let report = runtime.run_pipeline(reference()).await.unwrap();

    match report.outcome {
        RunOutcome::Failed { report } => assert_eq!(report.message, "run cancelled"),
        RunOutcome::Completed { .. } => panic!("cancelled run should not complete"),
    }
}

#[tokio::test]
async fn test_cancel_token_is_shared() {
    let runtime = WikiRuntime::new(full_registry(None)).unwrap();
    runtime.cancel_token().cancel();

    let report = runtime.run_pipeline(reference()).await.unwrap();
    assert!(!report.outcome.is_completed());
}

#[tokio::test]
async fn test_run_timeout_expires_at_boundary() {
    let config = RuntimeConfig {
        run_timeout: Some(Duration::ZERO),
        ..RuntimeConfig::default()
    };
    let runtime = WikiRuntime::with_config(full_registry(None), config).unwrap();

    let report = runtime.run_pipeline(reference()).await.unwrap();

    match report.outcome {
        RunOutcome::Failed { report } => assert_eq!(report.message, "run deadline exceeded"),
        RunOutcome::Completed { .. } => panic!("expired run should not complete"),
    }
}

#[tokio::test]
async fn test_subscribe_events_sees_whole_run() {
    let runtime = WikiRuntime::new(full_registry(None)).unwrap();
    let mut receiver = runtime.subscribe_events();

    runtime.run_pipeline(reference()).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { .. })));
    assert!(matches!(events.last(), Some(PipelineEvent::RunCompleted { .. })));
}
