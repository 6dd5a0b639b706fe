//! Pipeline execution runtime
//!
//! This crate drives compiled routing graphs: the stage registry, the
//! sequential executor that walks the graph one stage at a time, and the
//! runtime facade callers use to launch wiki-generation runs.

mod executor;
mod registry;
mod runtime;

pub use executor::PipelineExecutor;
pub use registry::StageRegistry;
pub use runtime::{PipelineReport, RunOutcome, RuntimeConfig, WikiRuntime};
