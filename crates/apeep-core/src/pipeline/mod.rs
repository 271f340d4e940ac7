pub mod config;
mod orchestrator;
mod types;

pub use orchestrator::{input_dir, run_pipeline, run_pipeline_reported};
pub use types::{PipelineStage, ProgressReporter, RunSummary};
