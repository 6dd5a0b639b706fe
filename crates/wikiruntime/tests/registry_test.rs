// crates/wikiruntime/tests/registry_test.rs

use async_trait::async_trait;
use std::sync::Arc;
use wikicore::{PipelineError, PipelineGraph, RunState, Stage, StageContext, StageId};
use wikiruntime::StageRegistry;

struct NoopStage {
    id: StageId,
}

#[async_trait]
impl Stage for NoopStage {
    fn id(&self) -> StageId {
        self.id
    }

    async fn execute(&self, _ctx: &StageContext, state: RunState) -> RunState {
        state
    }
}

fn register(registry: &mut StageRegistry, id: StageId) {
    registry.register(Arc::new(NoopStage { id }));
}

#[tokio::test]
async fn test_register_and_get() {
    let mut registry = StageRegistry::new();
    register(&mut registry, StageId::FetchRepository);

    assert!(registry.contains(StageId::FetchRepository));
    let stage = registry.get(StageId::FetchRepository).unwrap();
    assert_eq!(stage.id(), StageId::FetchRepository);
}

#[tokio::test]
async fn test_get_missing_stage_errors() {
    let registry = StageRegistry::new();

    let err = registry.get(StageId::ParseCode).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StageNotRegistered(StageId::ParseCode)
    ));
}

#[tokio::test]
async fn test_stage_ids_follow_pipeline_order() {
    let mut registry = StageRegistry::new();
    // Registration order should not matter
    register(&mut registry, StageId::BuildWiki);
    register(&mut registry, StageId::FetchRepository);
    register(&mut registry, StageId::AnalyzeCode);

    assert_eq!(
        registry.stage_ids(),
        vec![
            StageId::FetchRepository,
            StageId::AnalyzeCode,
            StageId::BuildWiki,
        ]
    );
}

#[tokio::test]
async fn test_validate_against_standard_graph() {
    let graph = PipelineGraph::standard();

    let mut registry = StageRegistry::new();
    for id in StageId::ALL {
        register(&mut registry, id);
    }
    assert!(registry.validate_against(&graph).is_ok());

    let mut partial = StageRegistry::new();
    for id in StageId::ALL {
        if id != StageId::CreateDiagrams {
            register(&mut partial, id);
        }
    }
    let err = partial.validate_against(&graph).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StageNotRegistered(StageId::CreateDiagrams)
    ));
}

#[tokio::test]
async fn test_register_replaces_existing_entry() {
    let mut registry = StageRegistry::new();
    register(&mut registry, StageId::FetchRepository);
    register(&mut registry, StageId::FetchRepository);

    assert_eq!(registry.stage_ids(), vec![StageId::FetchRepository]);
}
