use std::time::Duration;

/// Pipeline processing stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    LoadingEnvironment,
    Priming,
    Processing,
    Writing,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoadingEnvironment => write!(f, "Loading environmental data"),
            Self::Priming => write!(f, "Initialising flat-field"),
            Self::Processing => write!(f, "Processing frames"),
            Self::Writing => write!(f, "Writing output"),
        }
    }
}

/// Counters of a finished run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// Frames completed by the assembler.
    pub frames_assembled: usize,
    /// Frames kept by subsampling and processed.
    pub frames_processed: usize,
    pub particles: usize,
    /// Particles joined to an environmental record.
    pub particles_with_environment: usize,
    pub elapsed: Duration,
}

/// Thread-safe progress reporting for the pipeline.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new pipeline stage has started. `total_items` is the number of
    /// work items in this stage, if known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// One work item within the current stage has completed.
    fn advance(&self, _items_done: usize) {}

    /// A frame has been processed.
    fn frame_done(&self, _name: &str, _particles: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter, used when `run_pipeline` delegates.
pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}
