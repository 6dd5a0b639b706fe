use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::graph::StageId;

/// Failure classes a stage can record on the run state.
///
/// One kind per fallible stage; a marker's kind always names the taxonomy
/// entry for its origin stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    FetchError,
    ParseError,
    AnalysisError,
    DocumentationError,
    DiagramError,
    BuildError,
}

impl ErrorKind {
    /// The kind a failure in `stage` is reported under.
    pub fn for_stage(stage: StageId) -> Self {
        match stage {
            StageId::FetchRepository => ErrorKind::FetchError,
            StageId::ParseCode => ErrorKind::ParseError,
            StageId::AnalyzeCode => ErrorKind::AnalysisError,
            StageId::GenerateDocs => ErrorKind::DocumentationError,
            StageId::CreateDiagrams => ErrorKind::DiagramError,
            // Wiki assembly and report normalization are both build concerns.
            StageId::BuildWiki | StageId::HandleErrors => ErrorKind::BuildError,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::FetchError => "FetchError",
            ErrorKind::ParseError => "ParseError",
            ErrorKind::AnalysisError => "AnalysisError",
            ErrorKind::DocumentationError => "DocumentationError",
            ErrorKind::DiagramError => "DiagramError",
            ErrorKind::BuildError => "BuildError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The inspectable sentinel stored on the run state: present iff a stage
/// failed. Routing reads only its presence; the error handler consumes its
/// contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMarker {
    pub kind: ErrorKind,
    pub stage: StageId,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorMarker {
    pub fn new(kind: ErrorKind, stage: StageId, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
            cause: None,
        }
    }

    /// Marker with the kind derived from the origin stage.
    pub fn for_stage(stage: StageId, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::for_stage(stage), stage, message)
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl fmt::Display for ErrorMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}: {}", self.kind, self.stage, self.message)
    }
}

/// Faults raised by stage collaborators (fetch backend, parsers, LLM
/// client). These never escape a stage body: every one is converted into an
/// [`ErrorMarker`] on the run state before the stage returns.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("missing upstream field: {0}")]
    MissingField(&'static str),

    #[error("invalid repository reference: {0}")]
    InvalidReference(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response malformed: {0}")]
    LlmResponse(String),

    #[error("timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Orchestration faults: a mis-built graph or registry. These surface at
/// construction time; the executor never raises one on behalf of a running
/// stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("stage not registered: {0}")]
    StageNotRegistered(StageId),

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("cyclic routing detected")]
    CyclicRouting,

    #[error("step budget exceeded after {steps} steps")]
    StepBudgetExceeded { steps: usize },
}

/// User-facing summary of a failed run: the structured marker fields plus a
/// rendered markdown report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub stage: StageId,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub report: String,
}

impl FailureReport {
    pub fn from_marker(marker: &ErrorMarker) -> Self {
        Self {
            kind: marker.kind,
            stage: marker.stage,
            message: marker.message.clone(),
            cause: marker.cause.clone(),
            report: render_failure_report(marker),
        }
    }
}

/// Markdown rendering shared by the error-handler stage and the runtime's
/// late-error normalization, so the caller sees one report format.
pub fn render_failure_report(marker: &ErrorMarker) -> String {
    let mut report = String::from("# Wiki Generation Failed\n\n## Error\n\n");
    report.push_str(&format!("- **Kind**: {}\n", marker.kind));
    report.push_str(&format!("- **Stage**: {}\n", marker.stage));
    report.push_str(&format!("- **Message**: {}\n", marker.message));
    if let Some(cause) = &marker.cause {
        report.push_str(&format!("- **Cause**: {}\n", cause));
    }
    report
}
