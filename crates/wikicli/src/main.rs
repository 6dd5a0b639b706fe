// crates/wikicli/src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wikicore::{Edge, Outcome, PipelineEvent, RepoReference, StageId, StageNote, Wiki};
use wikiruntime::{RunOutcome, RuntimeConfig, StageRegistry, WikiRuntime};
use wikistages::{FetchConfig, LlmConfig};

#[derive(Parser)]
#[command(name = "wikigen")]
#[command(about = "Repository wiki generator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a wiki for a repository
    Generate {
        /// Git URL or local path of the repository
        reference: String,

        /// Directory to write the wiki pages into
        #[arg(short, long, default_value = "wiki")]
        output: PathBuf,

        /// Override the completion model
        #[arg(short, long)]
        model: Option<String>,

        /// Per-stage timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List the registered pipeline stages
    Stages,

    /// Print the stage routing table
    Graph,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            reference,
            output,
            model,
            timeout_secs,
            verbose,
        } => {
            // Initialize logging
            if verbose {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::DEBUG)
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::INFO)
                    .init();
            }

            generate(reference, output, model, timeout_secs).await?;
        }

        Commands::Stages => {
            list_stages();
        }

        Commands::Graph => {
            print_graph();
        }
    }

    Ok(())
}

async fn generate(
    reference: String,
    output: PathBuf,
    model: Option<String>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    println!("🚀 Generating wiki for: {}", reference);

    let reference = RepoReference::parse(reference);

    let mut llm = LlmConfig::default();
    if let Some(model) = model {
        llm.model = model;
    }

    // Create runtime with registered stages
    let mut registry = StageRegistry::new();
    wikistages::register_all(&mut registry, FetchConfig::default(), llm);

    let mut config = RuntimeConfig::default();
    if let Some(secs) = timeout_secs {
        config.stage_timeout = Some(Duration::from_secs(secs));
    }

    let runtime = WikiRuntime::with_config(registry, config)?;

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();

    // Spawn event listener
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PipelineEvent::RunStarted { reference, .. } => {
                    println!("▶️  Run started for {}", reference);
                }
                PipelineEvent::StageStarted { stage, .. } => {
                    println!("  ⚡ Starting stage: {}", stage);
                }
                PipelineEvent::StageCompleted {
                    stage, duration_ms, ..
                } => {
                    println!("  ✅ Stage {} completed in {}ms", stage, duration_ms);
                }
                PipelineEvent::StageFailed { stage, message, .. } => {
                    println!("  ❌ Stage {} failed: {}", stage, message);
                }
                PipelineEvent::StageNote { stage, note, .. } => match note {
                    StageNote::Info { message } => {
                        println!("     ℹ️  [{}] {}", stage, message);
                    }
                    StageNote::Warning { message } => {
                        println!("     ⚠️  [{}] {}", stage, message);
                    }
                    StageNote::Progress { done, total } => {
                        println!("     📊 [{}] {}/{}", stage, done, total);
                    }
                },
                PipelineEvent::RunCompleted {
                    outcome,
                    duration_ms,
                    ..
                } => match outcome {
                    Outcome::Success => {
                        println!("✨ Run completed successfully in {}ms", duration_ms);
                    }
                    Outcome::Failure => {
                        println!("💥 Run failed after {}ms", duration_ms);
                    }
                },
            }
        }
    });

    // Execute the pipeline
    let report = runtime.run_pipeline(reference).await?;

    // Wait for events to finish printing
    tokio::time::sleep(Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("📊 Run Summary:");
    println!("   Run ID: {}", report.run_id);
    println!("   Duration: {}ms", report.duration_ms);

    match report.outcome {
        RunOutcome::Completed { wiki } => {
            let written = write_wiki(&wiki, &output)?;
            println!("   Pages: {}", written);
            println!();
            println!("📚 Wiki written to: {}", output.display());
        }
        RunOutcome::Failed { report } => {
            println!();
            eprintln!("{}", report.report);
            anyhow::bail!("wiki generation failed at {}", report.stage);
        }
    }

    Ok(())
}

/// Write each wiki page under the output directory plus a `structure.json`
/// table of contents, returning the page count.
fn write_wiki(wiki: &Wiki, output: &Path) -> Result<usize> {
    std::fs::create_dir_all(output)?;
    for page in &wiki.pages {
        let target = output.join(&page.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, &page.content)?;
    }
    let toc = serde_json::to_string_pretty(&wiki.structure)?;
    std::fs::write(output.join("structure.json"), toc)?;
    Ok(wiki.pages.len())
}

fn list_stages() {
    println!("📦 Registered Stages:");
    println!();

    let mut registry = StageRegistry::new();
    wikistages::register_all(&mut registry, FetchConfig::default(), LlmConfig::default());

    for stage in registry.stage_ids() {
        println!("  • {}", stage);
    }
}

fn print_graph() {
    println!("🗺️  Standard Routing:");
    println!();

    let graph = wikicore::PipelineGraph::standard();
    for stage in StageId::ALL {
        match graph.edge(stage) {
            Some(Edge::Unconditional(next)) => {
                println!("  {} --> {}", stage, next);
            }
            Some(Edge::OnError { ok, error }) => {
                println!("  {} --ok--> {}", stage, ok);
                println!("  {} --error--> {}", stage, error);
            }
            Some(Edge::Terminal(outcome)) => {
                let label = match outcome {
                    Outcome::Success => "success",
                    Outcome::Failure => "failure",
                };
                println!("  {} --> [{}]", stage, label);
            }
            None => {}
        }
    }
}
