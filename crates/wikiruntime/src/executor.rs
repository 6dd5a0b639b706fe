use std::time::Instant;

use chrono::Utc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::registry::StageRegistry;
use wikicore::{
    ErrorMarker, EventBus, Next, Outcome, PipelineError, PipelineEvent, PipelineGraph, RunId,
    RunState, StageContext, StageId,
};

/// Walks a compiled routing graph for one run, invoking stages strictly
/// in router order.
///
/// Stage failures never surface here: they live in the state's error
/// marker and steer the routing. `Err` means the orchestration itself is
/// broken (unregistered stage, invalid topology), not that a stage failed.
pub struct PipelineExecutor {
    stage_timeout: Option<Duration>,
}

impl PipelineExecutor {
    pub fn new(stage_timeout: Option<Duration>) -> Self {
        Self { stage_timeout }
    }

    /// Execute the graph from its entry stage until a terminal edge.
    pub async fn run(
        &self,
        run_id: RunId,
        graph: &PipelineGraph,
        registry: &StageRegistry,
        event_bus: &EventBus,
        cancellation: &CancellationToken,
        deadline: Option<Instant>,
        initial_state: RunState,
    ) -> Result<RunState, PipelineError> {
        let run_start = Instant::now();

        event_bus.emit(PipelineEvent::RunStarted {
            run_id,
            reference: initial_state.reference().location.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Starting run {} for {}",
            run_id,
            initial_state.reference().location
        );

        let mut state = initial_state;
        let mut current = graph.entry();
        // A run visits each stage at most once; more steps than stages in
        // the graph means the topology is broken.
        let budget = graph.stage_count();
        let mut steps = 0usize;

        let edge_outcome = loop {
            steps += 1;
            if steps > budget {
                return Err(PipelineError::StepBudgetExceeded { steps });
            }

            // Boundary checks before each invocation. Cancellation and a
            // passed deadline become a marker attributed to the stage that
            // was about to run; routing then winds the run down.
            if !state.has_error() {
                if cancellation.is_cancelled() {
                    tracing::warn!("Run {} cancelled before stage {}", run_id, current);
                    state = state.with_error(ErrorMarker::for_stage(current, "run cancelled"));
                } else if deadline.map_or(false, |d| Instant::now() >= d) {
                    tracing::warn!("Run {} passed its deadline before stage {}", run_id, current);
                    state =
                        state.with_error(ErrorMarker::for_stage(current, "run deadline exceeded"));
                }
            }

            state = self
                .invoke(run_id, current, registry, event_bus, cancellation, state)
                .await?;

            match graph.next(current, &state)? {
                Next::Stage(next_stage) => current = next_stage,
                Next::Terminal(outcome) => break outcome,
            }
        };

        let outcome = if state.has_error() {
            Outcome::Failure
        } else {
            edge_outcome
        };
        let duration_ms = run_start.elapsed().as_millis() as u64;

        event_bus.emit(PipelineEvent::RunCompleted {
            run_id,
            outcome,
            duration_ms,
            timestamp: Utc::now(),
        });
        match outcome {
            Outcome::Success => tracing::info!("Run {} completed in {}ms", run_id, duration_ms),
            Outcome::Failure => tracing::warn!("Run {} failed after {}ms", run_id, duration_ms),
        }

        Ok(state)
    }

    /// Invoke one stage, bounded by the per-stage timeout when configured.
    async fn invoke(
        &self,
        run_id: RunId,
        id: StageId,
        registry: &StageRegistry,
        event_bus: &EventBus,
        cancellation: &CancellationToken,
        state: RunState,
    ) -> Result<RunState, PipelineError> {
        let stage = registry.get(id)?;
        let ctx = StageContext::new(event_bus.create_emitter(run_id, id))
            .with_cancellation(cancellation.clone());

        event_bus.emit(PipelineEvent::StageStarted {
            run_id,
            stage: id,
            timestamp: Utc::now(),
        });

        let had_error = state.has_error();
        let start = Instant::now();
        let next_state = match self.stage_timeout {
            Some(limit) => {
                // The timed-out future is dropped, so keep the pre-stage
                // state to attach the marker to.
                let fallback = state.clone();
                match timeout(limit, stage.execute(&ctx, state)).await {
                    Ok(next_state) => next_state,
                    Err(_) => fallback.with_error(ErrorMarker::for_stage(
                        id,
                        format!("stage timed out after {}s", limit.as_secs()),
                    )),
                }
            }
            None => stage.execute(&ctx, state).await,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match next_state.error() {
            Some(marker) if !had_error => {
                tracing::warn!("Stage {} failed: {}", id, marker.message);
                event_bus.emit(PipelineEvent::StageFailed {
                    run_id,
                    stage: id,
                    kind: marker.kind,
                    message: marker.message.clone(),
                    timestamp: Utc::now(),
                });
            }
            _ => {
                tracing::debug!("Stage {} completed in {}ms", id, duration_ms);
                event_bus.emit(PipelineEvent::StageCompleted {
                    run_id,
                    stage: id,
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
        }

        Ok(next_state)
    }
}
