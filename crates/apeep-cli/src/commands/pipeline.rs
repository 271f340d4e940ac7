use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use apeep_core::io::export::DiskExporter;
use apeep_core::pipeline::config::PipelineConfig;
use apeep_core::pipeline::{input_dir, run_pipeline_reported, PipelineStage, ProgressReporter};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::summary::{print_pipeline_summary, print_run_summary};

const CONFIG_FILE: &str = "config.toml";

#[derive(Args)]
pub struct RunArgs {
    /// Project directory; holds config.toml and receives the outputs
    pub project: PathBuf,
}

/// Drives a spinner from pipeline progress events.
struct SpinnerReporter {
    pb: ProgressBar,
}

impl ProgressReporter for SpinnerReporter {
    fn begin_stage(&self, stage: PipelineStage, _total_items: Option<usize>) {
        self.pb.set_message(stage.to_string());
    }

    fn frame_done(&self, name: &str, particles: usize) {
        self.pb.set_message(format!("{name}: {particles} particles"));
    }

    fn advance(&self, items_done: usize) {
        self.pb.set_position(items_done as u64);
    }
}

pub fn run(args: &RunArgs) -> Result<()> {
    let project = &args.project;
    let config_path = project.join(CONFIG_FILE);

    if !config_path.exists() {
        std::fs::create_dir_all(project)
            .with_context(|| format!("Failed to create project {}", project.display()))?;
        let toml_str = toml::to_string_pretty(&PipelineConfig::default())?;
        std::fs::write(&config_path, toml_str)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        info!(project = %project.display(), "new project created");
        println!(
            "New project created. Edit {} to set the input directory, then run again.",
            config_path.display()
        );
        return Ok(());
    }

    let contents = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config {}", config_path.display()))?;
    let mut config: PipelineConfig = toml::from_str(&contents).context("Invalid pipeline config")?;

    // Write back with every setting spelled out, defaults included.
    let full = toml::to_string_pretty(&config)?;
    if full != contents {
        std::fs::write(&config_path, full)
            .with_context(|| format!("Failed to update {}", config_path.display()))?;
    }

    // No detection backend ships with this binary.
    config.validate(false).context("Invalid pipeline config")?;
    print_pipeline_summary(&config, project, &input_dir(&config, project));

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {pos} frames  {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    let reporter = Arc::new(SpinnerReporter { pb: pb.clone() });

    let mut exporter = DiskExporter::new(project, config.export_options());
    let result = run_pipeline_reported(&config, project, None, &mut exporter, reporter);
    pb.finish_and_clear();

    let summary = result.context("Processing failed")?;
    print_run_summary(&summary);
    Ok(())
}
