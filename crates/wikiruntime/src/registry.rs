use std::collections::HashMap;
use std::sync::Arc;

use wikicore::{PipelineError, PipelineGraph, Stage, StageId};

/// Registry of stage implementations keyed by stage id.
///
/// Stages carry configuration but never per-run data, so one instance
/// serves every run.
pub struct StageRegistry {
    stages: HashMap<StageId, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            stages: HashMap::new(),
        }
    }

    /// Register a stage under its own id, replacing any earlier entry.
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        let id = stage.id();
        tracing::info!("Registering stage: {}", id);
        self.stages.insert(id, stage);
    }

    /// Look up a stage implementation.
    pub fn get(&self, id: StageId) -> Result<Arc<dyn Stage>, PipelineError> {
        self.stages
            .get(&id)
            .cloned()
            .ok_or(PipelineError::StageNotRegistered(id))
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.stages.contains_key(&id)
    }

    /// Registered stage ids in pipeline order.
    pub fn stage_ids(&self) -> Vec<StageId> {
        StageId::ALL
            .into_iter()
            .filter(|id| self.contains(*id))
            .collect()
    }

    /// Check that every stage the graph names is registered.
    pub fn validate_against(&self, graph: &PipelineGraph) -> Result<(), PipelineError> {
        for stage in graph.stages() {
            if !self.contains(stage) {
                return Err(PipelineError::StageNotRegistered(stage));
            }
        }
        Ok(())
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
