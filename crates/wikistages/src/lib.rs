//! Standard stage library
//!
//! One file per pipeline stage, plus the collaborator seams they depend
//! on: the fetch backend, per-language parsers and the LLM client.

mod analyze;
mod diagrams;
mod docs;
mod errors;
mod fetch;
mod llm;
mod parse;
mod wiki;

pub use analyze::AnalyzeStage;
pub use diagrams::CreateDiagramsStage;
pub use docs::GenerateDocsStage;
pub use errors::HandleErrorsStage;
pub use fetch::{language_for_path, FetchBackend, FetchConfig, FetchStage, GitFetcher};
pub use llm::{CompletionRequest, LlmClient, LlmConfig, OpenAiCompatClient, RetryingClient};
pub use parse::{parser_for, LanguageParser, ParseStage};
pub use wiki::BuildWikiStage;

use std::sync::Arc;

use wikicore::{ErrorMarker, RunState, StageError, StageId};
use wikiruntime::StageRegistry;

/// Register the seven standard stages with a registry.
pub fn register_all(registry: &mut StageRegistry, fetch: FetchConfig, llm: LlmConfig) {
    let client: Arc<dyn LlmClient> = Arc::new(RetryingClient::new(
        OpenAiCompatClient::new(llm.clone()),
        &llm,
    ));

    registry.register(Arc::new(FetchStage::with_defaults(fetch)));
    registry.register(Arc::new(ParseStage::new()));
    registry.register(Arc::new(AnalyzeStage::new(client.clone())));
    registry.register(Arc::new(GenerateDocsStage::new(client)));
    registry.register(Arc::new(CreateDiagramsStage::new()));
    registry.register(Arc::new(BuildWikiStage::new()));
    registry.register(Arc::new(HandleErrorsStage::new()));
}

/// Convert a stage-internal fault into the state's error marker.
pub(crate) fn fail(state: RunState, stage: StageId, err: StageError) -> RunState {
    let mut marker = ErrorMarker::for_stage(stage, err.to_string());
    if let Some(source) = std::error::Error::source(&err) {
        marker = marker.with_cause(source.to_string());
    }
    state.with_error(marker)
}
