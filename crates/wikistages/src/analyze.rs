use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;

use crate::fail;
use crate::llm::{CompletionRequest, LlmClient};
use wikicore::{
    Analysis, ComponentInsight, ParsedFile, ParsedStructure, RunState, Stage, StageContext,
    StageError, StageId,
};

const ANALYSIS_SYSTEM_PROMPT: &str = "You are an expert code analyst. You summarize code \
precisely and concisely, focusing on architecture, key components and their relationships, \
and recurring design patterns.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are an expert code analyst. Respond with a single \
JSON object and nothing else, shaped as {\"summary\": string, \"components\": [{\"name\": \
string, \"responsibility\": string, \"collaborators\": [string]}], \"patterns\": [string]}. \
Do not wrap the JSON in code fences.";

/// Analyzes the parsed structure: a local dependency map plus LLM-backed
/// chunk summaries synthesized into one result.
pub struct AnalyzeStage {
    client: Arc<dyn LlmClient>,
    chunk_size: usize,
}

impl AnalyzeStage {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            chunk_size: 20,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn analyze(&self, ctx: &StageContext, state: &RunState) -> Result<Analysis, StageError> {
        let parsed = state.require_parsed()?;
        let dependencies = dependency_map(parsed);
        ctx.events.info(format!(
            "Analyzing {} parsed files across {} modules",
            parsed.files.len(),
            dependencies.len()
        ));

        let summaries = self.chunk_summaries(parsed).await?;
        ctx.events
            .info(format!("Summarized {} chunks", summaries.len()));

        let payload = self.synthesize(&summaries, &dependencies).await?;
        Ok(Analysis {
            summary: payload.summary,
            components: payload
                .components
                .into_iter()
                .map(|c| ComponentInsight {
                    name: c.name,
                    responsibility: c.responsibility,
                    collaborators: c.collaborators,
                })
                .collect(),
            dependencies,
            patterns: payload.patterns,
        })
    }

    /// One summary request per chunk of files, all joined before returning.
    async fn chunk_summaries(&self, parsed: &ParsedStructure) -> Result<Vec<String>, StageError> {
        let requests: Vec<CompletionRequest> = parsed
            .files
            .chunks(self.chunk_size)
            .map(|chunk| CompletionRequest::new(ANALYSIS_SYSTEM_PROMPT, chunk_prompt(chunk)))
            .collect();

        let futures = requests
            .iter()
            .map(|request| self.client.complete(request));
        join_all(futures).await.into_iter().collect()
    }

    async fn synthesize(
        &self,
        summaries: &[String],
        dependencies: &BTreeMap<String, Vec<String>>,
    ) -> Result<SynthesisPayload, StageError> {
        let request = CompletionRequest::new(
            SYNTHESIS_SYSTEM_PROMPT,
            synthesis_prompt(summaries, dependencies),
        );
        let response = self.client.complete(&request).await?;
        let body = strip_code_fences(&response);
        serde_json::from_str(body)
            .map_err(|e| StageError::LlmResponse(format!("malformed synthesis JSON: {}", e)))
    }
}

#[async_trait]
impl Stage for AnalyzeStage {
    fn id(&self) -> StageId {
        StageId::AnalyzeCode
    }

    async fn execute(&self, ctx: &StageContext, state: RunState) -> RunState {
        if state.has_error() {
            return state;
        }
        match self.analyze(ctx, &state).await {
            Ok(analysis) => state.with_analysis(analysis),
            Err(err) => fail(state, StageId::AnalyzeCode, err),
        }
    }
}

#[derive(Deserialize)]
struct SynthesisPayload {
    summary: String,
    #[serde(default)]
    components: Vec<ComponentPayload>,
    #[serde(default)]
    patterns: Vec<String>,
}

#[derive(Deserialize)]
struct ComponentPayload {
    name: String,
    #[serde(default)]
    responsibility: String,
    #[serde(default)]
    collaborators: Vec<String>,
}

/// Module dependency edges derived from imports, restricted to modules
/// that exist in the parsed set.
fn dependency_map(parsed: &ParsedStructure) -> BTreeMap<String, Vec<String>> {
    let modules: Vec<String> = parsed.files.iter().map(|f| module_name(&f.path)).collect();
    let known: BTreeSet<&str> = modules.iter().map(|s| s.as_str()).collect();

    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (file, module) in parsed.files.iter().zip(&modules) {
        let entry = map.entry(module.clone()).or_default();
        for import in &file.imports {
            let root = import_root(import);
            if known.contains(root.as_str()) && &root != module {
                entry.push(root);
            }
        }
    }
    for deps in map.values_mut() {
        deps.sort();
        deps.dedup();
    }
    map
}

fn module_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn import_root(import: &str) -> String {
    let trimmed = import.trim_start_matches("./").trim_start_matches("../");
    let root = trimmed.split("::").next().unwrap_or(trimmed);
    let root = root.split('.').next().unwrap_or(root);
    let root = root.split('/').next().unwrap_or(root);
    root.trim().to_string()
}

fn chunk_prompt(chunk: &[ParsedFile]) -> String {
    let mut prompt = String::from(
        "Summarize the role of the following files in a few sentences each. \
For every file you get its path, language, top-level symbols and imports.\n\n",
    );
    for file in chunk {
        let symbols: Vec<&str> = file.symbols.iter().map(|s| s.name.as_str()).collect();
        prompt.push_str(&format!(
            "- {} ({}): symbols [{}], imports [{}]\n",
            file.path,
            file.language,
            symbols.join(", "),
            file.imports.join(", ")
        ));
    }
    prompt
}

fn synthesis_prompt(summaries: &[String], dependencies: &BTreeMap<String, Vec<String>>) -> String {
    let mut prompt = String::from("Synthesize an architecture analysis from these chunk summaries.\n\n");
    for (idx, summary) in summaries.iter().enumerate() {
        prompt.push_str(&format!("## Chunk {}\n{}\n\n", idx + 1, summary));
    }
    prompt.push_str("## Module dependencies\n");
    for (module, deps) in dependencies {
        prompt.push_str(&format!("- {} -> [{}]\n", module, deps.join(", ")));
    }
    prompt
}

/// LLMs habitually wrap JSON in fences even when told not to.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
