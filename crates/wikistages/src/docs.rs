use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::fail;
use crate::llm::{CompletionRequest, LlmClient};
use wikicore::{Analysis, Documentation, RunState, Stage, StageContext, StageError, StageId};

const DOCS_SYSTEM_PROMPT: &str = "You are a technical writer producing wiki documentation for \
a code repository. Write clear markdown prose. Do not invent APIs that were not mentioned in \
the analysis you are given.";

/// Generates overview, architecture and per-module documentation from the
/// analysis result.
pub struct GenerateDocsStage {
    client: Arc<dyn LlmClient>,
}

impl GenerateDocsStage {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    async fn generate(
        &self,
        ctx: &StageContext,
        state: &RunState,
    ) -> Result<Documentation, StageError> {
        let analysis = state.require_analysis()?;
        let repo_name = state
            .raw_content()
            .map(|raw| raw.name.clone())
            .unwrap_or_else(|| "repository".to_string());

        ctx.events.info(format!(
            "Generating documentation for {} modules",
            analysis.dependencies.len()
        ));

        let overview_request =
            CompletionRequest::new(DOCS_SYSTEM_PROMPT, overview_prompt(&repo_name, analysis));
        let architecture_request =
            CompletionRequest::new(DOCS_SYSTEM_PROMPT, architecture_prompt(analysis));

        let (overview, architecture) = tokio::join!(
            self.client.complete(&overview_request),
            self.client.complete(&architecture_request),
        );
        let overview = overview?;
        let architecture = architecture?;

        let module_names: Vec<&String> = analysis.dependencies.keys().collect();
        let module_requests: Vec<CompletionRequest> = module_names
            .iter()
            .map(|module| {
                CompletionRequest::new(DOCS_SYSTEM_PROMPT, module_prompt(module, analysis))
            })
            .collect();
        let module_bodies = join_all(
            module_requests
                .iter()
                .map(|request| self.client.complete(request)),
        )
        .await;

        let mut modules = BTreeMap::new();
        for (module, body) in module_names.into_iter().zip(module_bodies) {
            modules.insert(module.clone(), body?);
        }

        Ok(Documentation {
            overview,
            architecture,
            modules,
        })
    }
}

#[async_trait]
impl Stage for GenerateDocsStage {
    fn id(&self) -> StageId {
        StageId::GenerateDocs
    }

    async fn execute(&self, ctx: &StageContext, state: RunState) -> RunState {
        if state.has_error() {
            return state;
        }
        match self.generate(ctx, &state).await {
            Ok(documentation) => state.with_documentation(documentation),
            Err(err) => fail(state, StageId::GenerateDocs, err),
        }
    }
}

fn overview_prompt(repo_name: &str, analysis: &Analysis) -> String {
    format!(
        "Write a wiki home page for the repository `{}`. Start with a one-paragraph \
description, then a short section on what the main components do.\n\n\
Analysis summary:\n{}\n\nComponents:\n{}",
        repo_name,
        analysis.summary,
        component_listing(analysis)
    )
}

fn architecture_prompt(analysis: &Analysis) -> String {
    let mut deps = String::new();
    for (module, targets) in &analysis.dependencies {
        deps.push_str(&format!("- {} -> [{}]\n", module, targets.join(", ")));
    }
    format!(
        "Write an architecture page in markdown. Cover the component responsibilities, how \
they collaborate, and the observed design patterns.\n\nSummary:\n{}\n\nComponents:\n{}\n\
Patterns: {}\n\nModule dependencies:\n{}",
        analysis.summary,
        component_listing(analysis),
        analysis.patterns.join(", "),
        deps
    )
}

fn module_prompt(module: &str, analysis: &Analysis) -> String {
    let deps = analysis
        .dependencies
        .get(module)
        .map(|d| d.join(", "))
        .unwrap_or_default();
    let related: Vec<&str> = analysis
        .components
        .iter()
        .filter(|c| c.name.to_lowercase().contains(&module.to_lowercase()))
        .map(|c| c.responsibility.as_str())
        .collect();
    format!(
        "Write a short wiki page for the module `{}`. It depends on: [{}]. Related component \
notes: {}\n\nOverall summary for context:\n{}",
        module,
        deps,
        if related.is_empty() {
            "none".to_string()
        } else {
            related.join("; ")
        },
        analysis.summary
    )
}

fn component_listing(analysis: &Analysis) -> String {
    let mut listing = String::new();
    for component in &analysis.components {
        listing.push_str(&format!(
            "- {}: {} (works with [{}])\n",
            component.name,
            component.responsibility,
            component.collaborators.join(", ")
        ));
    }
    listing
}
