use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::graph::{Outcome, StageId};

pub type RunId = Uuid;

/// Events emitted while a run walks the stage graph. Intermediate stage
/// output is never exposed; these events are the only window into a run in
/// progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    RunStarted {
        run_id: RunId,
        reference: String,
        timestamp: DateTime<Utc>,
    },
    StageStarted {
        run_id: RunId,
        stage: StageId,
        timestamp: DateTime<Utc>,
    },
    StageCompleted {
        run_id: RunId,
        stage: StageId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StageFailed {
        run_id: RunId,
        stage: StageId,
        kind: ErrorKind,
        message: String,
        timestamp: DateTime<Utc>,
    },
    StageNote {
        run_id: RunId,
        stage: StageId,
        note: StageNote,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        outcome: Outcome,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Progress detail emitted from inside a stage body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "note")]
pub enum StageNote {
    Info { message: String },
    Warning { message: String },
    Progress { done: usize, total: usize },
}

/// Handed to a stage so it can report progress for one run.
#[derive(Clone)]
pub struct EventEmitter {
    run_id: RunId,
    stage: StageId,
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new(run_id: RunId, stage: StageId, sender: broadcast::Sender<PipelineEvent>) -> Self {
        Self {
            run_id,
            stage,
            sender,
        }
    }

    pub fn note(&self, note: StageNote) {
        let _ = self.sender.send(PipelineEvent::StageNote {
            run_id: self.run_id,
            stage: self.stage,
            note,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.note(StageNote::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.note(StageNote::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, done: usize, total: usize) {
        self.note(StageNote::Progress { done, total });
    }
}

/// Broadcast bus shared by all runs of one runtime.
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, run_id: RunId, stage: StageId) -> EventEmitter {
        EventEmitter::new(run_id, stage, self.sender.clone())
    }
}
