use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::state::RunState;
use crate::{PipelineError, Result};

/// The closed set of stage names; routing only ever works over this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    FetchRepository,
    ParseCode,
    AnalyzeCode,
    GenerateDocs,
    CreateDiagrams,
    BuildWiki,
    HandleErrors,
}

impl StageId {
    pub const ALL: [StageId; 7] = [
        StageId::FetchRepository,
        StageId::ParseCode,
        StageId::AnalyzeCode,
        StageId::GenerateDocs,
        StageId::CreateDiagrams,
        StageId::BuildWiki,
        StageId::HandleErrors,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageId::FetchRepository => "fetch_repository",
            StageId::ParseCode => "parse_code",
            StageId::AnalyzeCode => "analyze_code",
            StageId::GenerateDocs => "generate_docs",
            StageId::CreateDiagrams => "create_diagrams",
            StageId::BuildWiki => "build_wiki",
            StageId::HandleErrors => "handle_errors",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a run left the graph: over the success terminal or the error
/// handler's terminal. Both are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Router decision after a stage completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Stage(StageId),
    Terminal(Outcome),
}

/// One outgoing routing edge. Every stage has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Success and failure continue to the same stage.
    Unconditional(StageId),
    /// Error marker present routes to `error`, absent to `ok`.
    OnError { ok: StageId, error: StageId },
    /// Absorbing; the run ends here.
    Terminal(Outcome),
}

/// The standard wiki-pipeline table. Conditional error edges exist after
/// fetch and parse only; the remaining stages route unconditionally.
/// Later-stage failures still set the marker, but the cut to the error
/// handler happens only on these two edges.
fn standard_edge(stage: StageId) -> Edge {
    use StageId::*;
    match stage {
        FetchRepository => Edge::OnError {
            ok: ParseCode,
            error: HandleErrors,
        },
        ParseCode => Edge::OnError {
            ok: AnalyzeCode,
            error: HandleErrors,
        },
        AnalyzeCode => Edge::Unconditional(GenerateDocs),
        GenerateDocs => Edge::Unconditional(CreateDiagrams),
        CreateDiagrams => Edge::Unconditional(BuildWiki),
        BuildWiki => Edge::Terminal(Outcome::Success),
        HandleErrors => Edge::Terminal(Outcome::Failure),
    }
}

fn follow(edge: Edge, has_error: bool) -> Next {
    match edge {
        Edge::Unconditional(next) => Next::Stage(next),
        Edge::OnError { error, .. } if has_error => Next::Stage(error),
        Edge::OnError { ok, .. } => Next::Stage(ok),
        Edge::Terminal(outcome) => Next::Terminal(outcome),
    }
}

/// The router: a pure function of the stage just finished and error
/// presence on the state. Calling it twice with the same pair yields the
/// same decision.
pub fn route(after: StageId, state: &RunState) -> Next {
    follow(standard_edge(after), state.has_error())
}

/// The static stage topology: an entry stage plus one outgoing edge per
/// stage. Compiled (validated) once at process start, then shared read-only
/// across concurrent runs.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    entry: StageId,
    edges: HashMap<StageId, Edge>,
}

impl PipelineGraph {
    /// The wiki pipeline as declared by [`route`]'s table.
    pub fn standard() -> Self {
        let declared = StageId::ALL.iter().map(|&s| (s, standard_edge(s))).collect();
        Self::compile(StageId::FetchRepository, declared)
            .expect("standard routing table is a valid topology")
    }

    /// Validate and build a topology from declared edges.
    ///
    /// Rejects: a stage with no edge or two edges, an edge to an undeclared
    /// stage, stages unreachable from the entry, and any cycle.
    pub fn compile(entry: StageId, declared: Vec<(StageId, Edge)>) -> Result<Self> {
        let mut edges: HashMap<StageId, Edge> = HashMap::new();
        for (stage, edge) in declared {
            if edges.insert(stage, edge).is_some() {
                return Err(PipelineError::InvalidGraph(format!(
                    "duplicate edge for stage {stage}"
                )));
            }
        }
        if !edges.contains_key(&entry) {
            return Err(PipelineError::InvalidGraph(format!(
                "entry stage {entry} has no edge"
            )));
        }

        // Mirror the declared edges into a petgraph DiGraph for cycle and
        // reachability checks.
        let mut graph = DiGraph::<StageId, ()>::new();
        let mut index = HashMap::new();
        for &stage in edges.keys() {
            index.insert(stage, graph.add_node(stage));
        }
        for (&stage, &edge) in &edges {
            let from = index[&stage];
            let targets: Vec<StageId> = match edge {
                Edge::Unconditional(next) => vec![next],
                Edge::OnError { ok, error } => vec![ok, error],
                Edge::Terminal(_) => vec![],
            };
            for target in targets {
                let to = *index.get(&target).ok_or_else(|| {
                    PipelineError::InvalidGraph(format!(
                        "edge from {stage} targets undeclared stage {target}"
                    ))
                })?;
                graph.add_edge(from, to, ());
            }
        }

        if toposort(&graph, None).is_err() {
            return Err(PipelineError::CyclicRouting);
        }

        let mut reachable = 0usize;
        let mut dfs = Dfs::new(&graph, index[&entry]);
        while dfs.next(&graph).is_some() {
            reachable += 1;
        }
        if reachable != edges.len() {
            return Err(PipelineError::InvalidGraph(format!(
                "{} stage(s) unreachable from {entry}",
                edges.len() - reachable
            )));
        }

        tracing::debug!("Compiled routing graph: {} stages, entry {}", edges.len(), entry);
        Ok(Self { entry, edges })
    }

    pub fn entry(&self) -> StageId {
        self.entry
    }

    pub fn edge(&self, stage: StageId) -> Option<Edge> {
        self.edges.get(&stage).copied()
    }

    /// Number of declared stages; the executor's step budget.
    pub fn stage_count(&self) -> usize {
        self.edges.len()
    }

    pub fn stages(&self) -> impl Iterator<Item = StageId> + '_ {
        self.edges.keys().copied()
    }

    /// Route within this topology. Equals [`route`] for the standard graph.
    pub fn next(&self, after: StageId, state: &RunState) -> Result<Next> {
        let edge = self.edge(after).ok_or_else(|| {
            PipelineError::InvalidGraph(format!("no edge declared for stage {after}"))
        })?;
        Ok(follow(edge, state.has_error()))
    }
}
