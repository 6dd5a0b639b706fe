use async_trait::async_trait;

use wikicore::{
    ErrorKind, ErrorMarker, FailureReport, RunState, Stage, StageContext, StageId,
};

/// Terminal failure stage: renders the error marker into the failure
/// report. Performs no retries and no recovery.
pub struct HandleErrorsStage;

impl HandleErrorsStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HandleErrorsStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for HandleErrorsStage {
    fn id(&self) -> StageId {
        StageId::HandleErrors
    }

    async fn execute(&self, ctx: &StageContext, state: RunState) -> RunState {
        let marker = match state.error() {
            Some(marker) => marker.clone(),
            // Reachable only through a hand-built graph; report the
            // inconsistency instead of fabricating success.
            None => ErrorMarker::new(
                ErrorKind::BuildError,
                StageId::HandleErrors,
                "error handler invoked without an error marker",
            ),
        };

        ctx.events.warn(format!("{}: {}", marker.kind, marker.message));
        tracing::error!("Pipeline failed at {}: {}", marker.stage, marker.message);

        let report = FailureReport::from_marker(&marker);
        let state = if state.has_error() {
            state
        } else {
            state.with_error(marker)
        };
        state.with_failure_report(report)
    }
}
