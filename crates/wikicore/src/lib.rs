//! Core abstractions for the wiki pipeline
//!
//! This crate provides the fundamental types the runtime and stage library
//! depend on: the run state record, the stage contract, the routing graph,
//! error taxonomy and progress events. No I/O happens here.

mod error;
mod events;
mod graph;
mod stage;
mod state;

pub use error::{
    render_failure_report, ErrorKind, ErrorMarker, FailureReport, PipelineError, StageError,
};
pub use events::{EventBus, EventEmitter, PipelineEvent, RunId, StageNote};
pub use graph::{route, Edge, Next, Outcome, PipelineGraph, StageId};
pub use stage::{Stage, StageContext};
pub use state::{
    Analysis, ComponentInsight, Diagram, DiagramKind, DiagramSet, DirEntry, Documentation,
    EntryKind, PageCategory, ParsedFile, ParsedStructure, RawContent, RepoKind, RepoReference,
    RunState, SourceFile, Symbol, SymbolKind, Wiki, WikiPage, WikiPageRef,
};

/// Result type for graph construction and orchestration faults.
pub type Result<T> = std::result::Result<T, PipelineError>;
