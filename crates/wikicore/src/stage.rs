use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::events::EventEmitter;
use crate::graph::StageId;
use crate::state::RunState;

/// A named unit of pipeline work.
///
/// `execute` consumes the state and returns the successor state; it does not
/// return `Result`. Every internal fault (network, I/O, LLM, parse) must come
/// back as a state with the error marker set, which is what lets the router
/// treat error presence as an inspectable value rather than an in-flight
/// exception. Stages never invoke other stages.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Which node of the routing table this stage implements.
    fn id(&self) -> StageId;

    async fn execute(&self, ctx: &StageContext, state: RunState) -> RunState;
}

impl std::fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

/// Per-invocation context handed to a stage: progress events bound to this
/// run and stage, plus the run's cancellation token.
#[derive(Clone)]
pub struct StageContext {
    pub events: EventEmitter,
    pub cancellation: CancellationToken,
}

impl StageContext {
    pub fn new(events: EventEmitter) -> Self {
        Self {
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
