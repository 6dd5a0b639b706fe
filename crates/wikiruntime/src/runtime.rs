use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::executor::PipelineExecutor;
use crate::registry::StageRegistry;
use wikicore::{
    ErrorKind, ErrorMarker, EventBus, FailureReport, PipelineError, PipelineEvent, PipelineGraph,
    RepoReference, RunId, RunState, StageId, Wiki,
};

/// Main runtime for wiki-generation runs.
pub struct WikiRuntime {
    graph: Arc<PipelineGraph>,
    registry: Arc<StageRegistry>,
    executor: PipelineExecutor,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
    cancellation: CancellationToken,
}

impl WikiRuntime {
    /// Runtime over the standard routing table with default settings.
    pub fn new(registry: StageRegistry) -> Result<Self, PipelineError> {
        Self::with_config(registry, RuntimeConfig::default())
    }

    /// Runtime over the standard routing table with custom configuration.
    pub fn with_config(
        registry: StageRegistry,
        config: RuntimeConfig,
    ) -> Result<Self, PipelineError> {
        Self::with_graph(Arc::new(PipelineGraph::standard()), registry, config)
    }

    /// Runtime over a custom compiled graph.
    ///
    /// Every stage the graph names must already be registered; a run can
    /// then never hit a missing stage mid-walk.
    pub fn with_graph(
        graph: Arc<PipelineGraph>,
        registry: StageRegistry,
        config: RuntimeConfig,
    ) -> Result<Self, PipelineError> {
        registry.validate_against(&graph)?;
        let executor = PipelineExecutor::new(config.stage_timeout);
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Ok(Self {
            graph,
            registry: Arc::new(registry),
            executor,
            event_bus,
            config,
            cancellation: CancellationToken::new(),
        })
    }

    /// Run the full pipeline for one repository reference.
    ///
    /// Stage failures come back inside the report as `RunOutcome::Failed`;
    /// `Err` is reserved for orchestration faults.
    pub async fn run_pipeline(
        &self,
        reference: RepoReference,
    ) -> Result<PipelineReport, PipelineError> {
        let run_id = RunId::new_v4();
        let location = reference.location.clone();
        let started = Instant::now();
        let deadline = self.config.run_timeout.map(|limit| started + limit);
        let token = self.cancellation.child_token();

        let state = self
            .executor
            .run(
                run_id,
                &self.graph,
                &self.registry,
                &self.event_bus,
                &token,
                deadline,
                RunState::new(reference),
            )
            .await?;

        Ok(PipelineReport {
            run_id,
            reference: location,
            duration_ms: started.elapsed().as_millis() as u64,
            finished_at: Utc::now(),
            outcome: outcome_of(state),
        })
    }

    /// Subscribe to run and stage events.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn graph(&self) -> &Arc<PipelineGraph> {
        &self.graph
    }

    pub fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    /// Token that cancels every in-flight run when triggered.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Cancel every in-flight run. Runs wind down at the next stage
    /// boundary and report failure.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

impl std::fmt::Debug for WikiRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WikiRuntime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Collapse a terminal run state into the caller-facing outcome.
///
/// Stages past code parsing have no error edge, so their failures arrive
/// here as a bare marker without a rendered report. Those go through the
/// same report constructor the error handler uses.
fn outcome_of(state: RunState) -> RunOutcome {
    if let Some(report) = state.failure_report().cloned() {
        return RunOutcome::Failed { report };
    }
    if let Some(marker) = state.error().cloned() {
        tracing::warn!(
            "Run ended with an unhandled {} marker from {}",
            marker.kind,
            marker.stage
        );
        return RunOutcome::Failed {
            report: FailureReport::from_marker(&marker),
        };
    }
    match state.into_wiki() {
        Some(wiki) => RunOutcome::Completed { wiki },
        None => {
            let marker = ErrorMarker::new(
                ErrorKind::BuildError,
                StageId::BuildWiki,
                "run terminated without a wiki or an error marker",
            );
            RunOutcome::Failed {
                report: FailureReport::from_marker(&marker),
            }
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { wiki: Wiki },
    Failed { report: FailureReport },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

/// Caller-facing summary of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub reference: String,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}

/// Configuration for the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on a single stage invocation; `None` leaves stages unbounded.
    pub stage_timeout: Option<Duration>,
    /// Deadline for the whole run, checked at stage boundaries.
    pub run_timeout: Option<Duration>,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stage_timeout: None,
            run_timeout: None,
            event_buffer_size: 1000,
        }
    }
}
