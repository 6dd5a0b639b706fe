use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ErrorKind, ErrorMarker, FailureReport, StageError};
use crate::graph::StageId;

/// Where a run's target repository lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoKind {
    Git,
    Local,
}

/// Identifier/location of the target codebase. Set at entry, immutable for
/// the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoReference {
    pub location: String,
    pub kind: RepoKind,
}

impl RepoReference {
    /// Classify a raw location string: anything that looks like a git URL is
    /// fetched by clone, everything else is treated as a local path.
    pub fn parse(location: impl Into<String>) -> Self {
        let location = location.into();
        let kind = if location.starts_with("http://")
            || location.starts_with("https://")
            || location.starts_with("git://")
            || location.ends_with(".git")
        {
            RepoKind::Git
        } else {
            RepoKind::Local
        };
        Self { location, kind }
    }

    /// Short repository name: final path segment, `.git` stripped.
    pub fn name(&self) -> &str {
        let trimmed = self.location.trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        let last = last.strip_suffix(".git").unwrap_or(last);
        if last.is_empty() {
            "repository"
        } else {
            last
        }
    }
}

/// One fetched file, read into memory by the fetch stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Directory,
    File,
}

/// Node of the repository's directory tree (depth-limited).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DirEntry>,
}

impl DirEntry {
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: None,
            children: Vec::new(),
        }
    }

    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size: Some(size),
            children: Vec::new(),
        }
    }
}

/// Fetched repository materials; the fetch stage's owned field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawContent {
    pub url: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub files: Vec<SourceFile>,
    /// Language name to file count, sorted by count descending.
    pub languages: Vec<(String, usize)>,
    pub structure: DirEntry,
    pub total_files: usize,
    pub total_lines: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Type,
    Constant,
}

/// A top-level symbol extracted from one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFile {
    pub path: String,
    pub language: String,
    pub symbols: Vec<Symbol>,
    pub imports: Vec<String>,
}

/// Structured representation of the code; the parse stage's owned field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedStructure {
    pub files: Vec<ParsedFile>,
}

/// One component the analysis backend identified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInsight {
    pub name: String,
    pub responsibility: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collaborators: Vec<String>,
}

/// Derived understanding of the codebase; the analyze stage's owned field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    pub components: Vec<ComponentInsight>,
    /// Module path to the module paths it imports from.
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub patterns: Vec<String>,
}

/// Generated prose; the document stage's owned field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Documentation {
    pub overview: String,
    pub architecture: String,
    /// Module path to its documentation section.
    pub modules: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagramKind {
    Dependency,
    Structure,
    Overview,
}

/// One diagram as Mermaid source; rendering happens elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagram {
    pub kind: DiagramKind,
    pub title: String,
    pub source: String,
}

/// The diagram stage's owned field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagramSet {
    pub diagrams: Vec<Diagram>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageCategory {
    Overview,
    Architecture,
    Module,
    Diagram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiPage {
    pub title: String,
    pub path: String,
    pub content: String,
    pub category: PageCategory,
}

/// Entry in the wiki's table of contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiPageRef {
    pub title: String,
    pub path: String,
}

/// Final assembled wiki; the build stage's owned field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wiki {
    pub structure: Vec<WikiPageRef>,
    pub pages: Vec<WikiPage>,
}

impl Wiki {
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// The record threaded through every stage of one run.
///
/// Value-like: every update consumes the state and returns a new one, so a
/// stage can never alias-mutate what a progress monitor snapshotted. Fields
/// are private; each stage populates exactly its own field through the
/// matching `with_*` builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    reference: RepoReference,
    raw_content: Option<RawContent>,
    parsed: Option<ParsedStructure>,
    analysis: Option<Analysis>,
    documentation: Option<Documentation>,
    diagrams: Option<DiagramSet>,
    wiki: Option<Wiki>,
    error: Option<ErrorMarker>,
    failure_report: Option<FailureReport>,
}

impl RunState {
    pub fn new(reference: RepoReference) -> Self {
        Self {
            reference,
            raw_content: None,
            parsed: None,
            analysis: None,
            documentation: None,
            diagrams: None,
            wiki: None,
            error: None,
            failure_report: None,
        }
    }

    pub fn reference(&self) -> &RepoReference {
        &self.reference
    }

    pub fn raw_content(&self) -> Option<&RawContent> {
        self.raw_content.as_ref()
    }

    pub fn parsed(&self) -> Option<&ParsedStructure> {
        self.parsed.as_ref()
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    pub fn documentation(&self) -> Option<&Documentation> {
        self.documentation.as_ref()
    }

    pub fn diagrams(&self) -> Option<&DiagramSet> {
        self.diagrams.as_ref()
    }

    pub fn wiki(&self) -> Option<&Wiki> {
        self.wiki.as_ref()
    }

    // Upstream-precondition accessors. The topology guarantees these hold; a
    // violation means a mis-wired graph and surfaces as a structured fault.

    pub fn require_raw_content(&self) -> Result<&RawContent, StageError> {
        self.raw_content()
            .ok_or(StageError::MissingField("raw_content"))
    }

    pub fn require_parsed(&self) -> Result<&ParsedStructure, StageError> {
        self.parsed().ok_or(StageError::MissingField("parsed_structure"))
    }

    pub fn require_analysis(&self) -> Result<&Analysis, StageError> {
        self.analysis()
            .ok_or(StageError::MissingField("analysis_result"))
    }

    pub fn require_documentation(&self) -> Result<&Documentation, StageError> {
        self.documentation()
            .ok_or(StageError::MissingField("documentation"))
    }

    pub fn require_diagrams(&self) -> Result<&DiagramSet, StageError> {
        self.diagrams().ok_or(StageError::MissingField("diagrams"))
    }

    pub fn with_raw_content(mut self, raw: RawContent) -> Self {
        self.raw_content = Some(raw);
        self
    }

    pub fn with_parsed(mut self, parsed: ParsedStructure) -> Self {
        self.parsed = Some(parsed);
        self
    }

    pub fn with_analysis(mut self, analysis: Analysis) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn with_documentation(mut self, documentation: Documentation) -> Self {
        self.documentation = Some(documentation);
        self
    }

    pub fn with_diagrams(mut self, diagrams: DiagramSet) -> Self {
        self.diagrams = Some(diagrams);
        self
    }

    pub fn with_wiki(mut self, wiki: Wiki) -> Self {
        self.wiki = Some(wiki);
        self
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&ErrorMarker> {
        self.error.as_ref()
    }

    /// First error wins: a marker already present is never overwritten.
    pub fn with_error(mut self, marker: ErrorMarker) -> Self {
        if self.error.is_none() {
            self.error = Some(marker);
        }
        self
    }

    pub fn set_error(
        self,
        kind: ErrorKind,
        stage: StageId,
        message: impl Into<String>,
    ) -> Self {
        self.with_error(ErrorMarker::new(kind, stage, message))
    }

    /// Set by the error handler only.
    pub fn with_failure_report(mut self, report: FailureReport) -> Self {
        self.failure_report = Some(report);
        self
    }

    pub fn failure_report(&self) -> Option<&FailureReport> {
        self.failure_report.as_ref()
    }

    /// Termination invariant: completed successfully iff the wiki exists and
    /// no stage recorded an error.
    pub fn completed(&self) -> bool {
        self.wiki.is_some() && self.error.is_none()
    }

    /// Consume the state, yielding the wiki if one was built.
    pub fn into_wiki(self) -> Option<Wiki> {
        self.wiki
    }
}
