use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::fail;
use wikicore::{
    ComponentInsight, Diagram, DiagramKind, DiagramSet, DirEntry, EntryKind, RunState, Stage,
    StageContext, StageError, StageId,
};

/// Renders Mermaid sources deterministically from the analysis; no LLM
/// involvement and no image rendering.
pub struct CreateDiagramsStage;

impl CreateDiagramsStage {
    pub fn new() -> Self {
        Self
    }

    fn build(&self, state: &RunState) -> Result<DiagramSet, StageError> {
        let analysis = state.require_analysis()?;
        let mut diagrams = Vec::new();

        diagrams.push(dependency_diagram(&analysis.dependencies));
        if let Some(raw) = state.raw_content() {
            diagrams.push(structure_diagram(&raw.structure));
        }
        diagrams.push(overview_diagram(&analysis.components));

        Ok(DiagramSet { diagrams })
    }
}

impl Default for CreateDiagramsStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for CreateDiagramsStage {
    fn id(&self) -> StageId {
        StageId::CreateDiagrams
    }

    async fn execute(&self, ctx: &StageContext, state: RunState) -> RunState {
        if state.has_error() {
            return state;
        }
        match self.build(&state) {
            Ok(diagrams) => {
                ctx.events
                    .info(format!("Created {} diagrams", diagrams.diagrams.len()));
                state.with_diagrams(diagrams)
            }
            Err(err) => fail(state, StageId::CreateDiagrams, err),
        }
    }
}

fn dependency_diagram(dependencies: &BTreeMap<String, Vec<String>>) -> Diagram {
    let mut source = String::from("graph TD\n");
    for (module, deps) in dependencies {
        if deps.is_empty() {
            source.push_str(&format!("    {}\n", node_id(module)));
        }
        for dep in deps {
            source.push_str(&format!("    {} --> {}\n", node_id(module), node_id(dep)));
        }
    }
    Diagram {
        kind: DiagramKind::Dependency,
        title: "Module Dependencies".to_string(),
        source,
    }
}

fn structure_diagram(root: &DirEntry) -> Diagram {
    let mut source = String::from("graph TD\n");
    let root_id = node_id(&root.name);
    source.push_str(&format!("    {}[\"{}/\"]\n", root_id, root.name));
    push_tree_edges(&mut source, root, &root_id, 0, 2);
    Diagram {
        kind: DiagramKind::Structure,
        title: "Repository Structure".to_string(),
        source,
    }
}

fn push_tree_edges(
    source: &mut String,
    node: &DirEntry,
    node_key: &str,
    depth: usize,
    max_depth: usize,
) {
    if depth >= max_depth {
        return;
    }
    for child in &node.children {
        let child_key = format!("{}_{}", node_key, node_id(&child.name));
        let label = match child.kind {
            EntryKind::Directory => format!("{}/", child.name),
            EntryKind::File => child.name.clone(),
        };
        source.push_str(&format!(
            "    {} --> {}[\"{}\"]\n",
            node_key, child_key, label
        ));
        if child.kind == EntryKind::Directory {
            push_tree_edges(source, child, &child_key, depth + 1, max_depth);
        }
    }
}

fn overview_diagram(components: &[ComponentInsight]) -> Diagram {
    let mut source = String::from("flowchart LR\n");
    if components.is_empty() {
        source.push_str("    system[\"System\"]\n");
    }
    for component in components {
        source.push_str(&format!(
            "    {}[\"{}\"]\n",
            node_id(&component.name),
            component.name
        ));
        for collaborator in &component.collaborators {
            source.push_str(&format!(
                "    {} --> {}\n",
                node_id(&component.name),
                node_id(collaborator)
            ));
        }
    }
    Diagram {
        kind: DiagramKind::Overview,
        title: "Component Overview".to_string(),
        source,
    }
}

/// Mermaid-safe identifier: ascii alphanumerics, never digit-leading.
fn node_id(name: &str) -> String {
    let id: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if id.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        format!("n{}", id)
    } else {
        id
    }
}
