use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::assemble::FrameAssembler;
use crate::consts::DOWNSCALE_FACTOR;
use crate::detection::{
    merge_masks, segment_regular, segment_semantic, Detector, SegmentPipeline, ThresholdMethod,
    ThresholdSelector,
};
use crate::error::{ApeepError, Result};
use crate::filters::Enhancer;
use crate::flatfield::FlatFieldTracker;
use crate::frame::{AssembledFrame, LabeledMask, LineBlock};
use crate::io::environ::{load_environment, EnvironmentTable};
use crate::io::export::{FrameOutput, FrameSink};
use crate::measure::{locate_column, measure_particles, ParticleRecord};
use crate::stream::LineStream;

use super::config::PipelineConfig;
use super::types::{NoOpReporter, PipelineStage, ProgressReporter, RunSummary};

/// Resolve the input directory of `config` against `project_dir`.
pub fn input_dir(config: &PipelineConfig, project_dir: &Path) -> PathBuf {
    if config.io.input_dir.is_absolute() {
        config.io.input_dir.clone()
    } else {
        project_dir.join(&config.io.input_dir)
    }
}

/// Per-frame processing after assembly: enhancement, segmentation,
/// measurement and environmental join.
struct FrameProcessor<'a> {
    config: &'a PipelineConfig,
    detector: Option<&'a dyn Detector>,
    environment: &'a EnvironmentTable,
    enhancer: Enhancer,
    selector: ThresholdSelector,
}

struct ProcessedFrame {
    enhanced: Option<Array2<f32>>,
    labels: Option<LabeledMask>,
    particles: Vec<ParticleRecord>,
}

impl<'a> FrameProcessor<'a> {
    fn new(
        config: &'a PipelineConfig,
        detector: Option<&'a dyn Detector>,
        environment: &'a EnvironmentTable,
    ) -> Self {
        let seg = &config.segment;
        Self {
            config,
            detector,
            environment,
            enhancer: Enhancer::new(
                config.enhance.dark_threshold,
                config.enhance.light_threshold,
                DOWNSCALE_FACTOR,
            ),
            selector: ThresholdSelector::new(seg.method, seg.threshold, seg.var_limit),
        }
    }

    fn detector(&self) -> Result<&'a dyn Detector> {
        self.detector.ok_or_else(|| {
            ApeepError::InvalidConfig("semantic segmentation needs a detection backend".into())
        })
    }

    fn segment(&self, image: &Array2<f32>, reference: Option<&Array2<f32>>) -> Result<LabeledMask> {
        let seg = &self.config.segment;
        let threshold = self.selector.select(image, reference);
        let params = if threshold.method == ThresholdMethod::Otsu {
            seg.params().scaled_for_otsu()
        } else {
            seg.params()
        };
        debug!(
            threshold = threshold.value,
            method = %threshold.method,
            dilate = params.dilate,
            min_area = params.area.min,
            "segmenting"
        );

        let semantic = &self.config.semantic;
        let labels = match seg.pipeline {
            SegmentPipeline::Regular => segment_regular(image, threshold.value, &params),
            SegmentPipeline::Semantic => segment_semantic(
                image,
                threshold.value,
                self.detector()?,
                semantic,
                &semantic.params(),
            )?,
            SegmentPipeline::Both => {
                let regular = segment_regular(image, threshold.value, &params);
                let model = segment_semantic(
                    image,
                    threshold.value,
                    self.detector()?,
                    semantic,
                    &semantic.params(),
                )?;
                merge_masks(&regular, &model)
            }
        };
        Ok(labels)
    }

    fn measure(&self, frame: &AssembledFrame, image: &Array2<f32>, labels: &LabeledMask) -> Vec<ParticleRecord> {
        let orientation = self.config.acq.top;
        let scan_per_s = self.config.acq.scan_per_s;
        let tolerance = self.config.environ.tolerance_s;

        measure_particles(image, labels)
            .into_iter()
            .map(|particle| {
                let location = locate_column(
                    &frame.provenance,
                    orientation,
                    particle.region.bbox.1,
                    frame.lines,
                    scan_per_s,
                );
                let environment = self.environment.nearest(location.time, tolerance).cloned();
                ParticleRecord {
                    particle,
                    location,
                    environment,
                }
            })
            .collect()
    }

    fn process(&self, frame: &AssembledFrame) -> Result<ProcessedFrame> {
        let (enhanced, reference) = if self.config.enhance.enabled {
            let (enhanced, small) = self.enhancer.enhance(&frame.data);
            (Some(enhanced), Some(small))
        } else {
            (None, None)
        };
        let image = enhanced.as_ref().unwrap_or(&frame.data);

        if !self.config.segment.enabled {
            return Ok(ProcessedFrame {
                enhanced,
                labels: None,
                particles: Vec::new(),
            });
        }

        let labels = self.segment(image, reference.as_ref())?;
        let particles = if self.config.measure.enabled {
            self.measure(frame, image, &labels)
        } else {
            Vec::new()
        };

        Ok(ProcessedFrame {
            enhanced,
            labels: Some(labels),
            particles,
        })
    }
}

/// Wall-clock time spent on each output frame, from reading its first
/// block to handing it to the sink.
struct FrameTimer {
    started: Instant,
}

impl FrameTimer {
    fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Time since the previous lap, restarting the count.
    fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.started;
        self.started = now;
        elapsed
    }
}

/// Read the first `window_size` lines to initialise the flat-field
/// baseline. The blocks are returned so they can be processed in turn.
fn prime_flat_field(
    stream: &mut LineStream,
    window_size: usize,
    step: usize,
) -> Result<(FlatFieldTracker, Vec<LineBlock>)> {
    let window: Vec<LineBlock> = stream.by_ref().take(window_size / step).collect();
    let lines = window.len() * step;
    if lines < window_size {
        warn!(
            lines,
            window_size, "acquisition shorter than the flat-field window"
        );
    }
    let tracker = FlatFieldTracker::from_window(&window, window_size)?;
    Ok((tracker, window))
}

/// Run the full processing pipeline with a thread-safe progress reporter.
///
/// Lines are read once, from the video files of the input directory, and
/// flat-fielded into output frames; every kept frame is enhanced,
/// segmented and measured, then handed to `sink`. `detector` is required
/// by the semantic and combined segmentation pipelines.
pub fn run_pipeline_reported(
    config: &PipelineConfig,
    project_dir: &Path,
    detector: Option<&dyn Detector>,
    sink: &mut dyn FrameSink,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<RunSummary> {
    let started = Instant::now();
    let mut config = config.clone();
    config.validate(detector.is_some())?;

    let input = input_dir(&config, project_dir);
    let step = config.flat_field.step_size;
    let mut stream = LineStream::open(&input, config.stream_options(step))?;
    info!(
        input = %input.display(),
        width = stream.width(),
        lines_per_frame = stream.lines_per_frame(),
        "reading video files"
    );

    reporter.begin_stage(PipelineStage::LoadingEnvironment, None);
    let environment = load_environment(&input)?;
    if environment.is_empty() {
        warn!(input = %input.display(), "no environmental data found");
    } else {
        info!(
            records = environment.len(),
            columns = environment.columns.len(),
            "environmental data loaded"
        );
    }
    reporter.finish_stage();
    sink.begin(&environment)?;

    let (mut tracker, primed) = if config.flat_field.enabled {
        reporter.begin_stage(PipelineStage::Priming, Some(config.flat_field.window_size / step));
        let (tracker, window) = prime_flat_field(&mut stream, config.flat_field.window_size, step)?;
        reporter.finish_stage();
        (Some(tracker), window)
    } else {
        (None, Vec::new())
    };

    let transect = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut assembler = FrameAssembler::new(
        config.enhance.image_size,
        stream.width(),
        config.acq.top,
        config.acq.scan_per_s,
        transect,
    )?;
    let processor = FrameProcessor::new(&config, detector, &environment);
    let real_time = config.enhance.image_size as f64 / config.acq.scan_per_s;
    let mut summary = RunSummary::default();

    reporter.begin_stage(PipelineStage::Processing, None);
    let mut timer = FrameTimer::start();
    for block in primed.into_iter().chain(stream) {
        let block = match tracker.as_mut() {
            Some(t) => t.process(block),
            None => block,
        };
        let Some(frame) = assembler.push(&block)? else {
            continue;
        };

        let index = summary.frames_assembled;
        summary.frames_assembled += 1;
        if !config.subsample.keeps(index) {
            debug!(frame = frame.name(), "skipped by subsampling");
            timer.lap();
            continue;
        }

        let processed = processor.process(&frame)?;
        sink.write_frame(&FrameOutput {
            provenance: &frame.provenance,
            flat_fielded: &frame.data,
            enhanced: processed.enhanced.as_ref(),
            labels: processed.labels.as_ref(),
            particles: &processed.particles,
        })?;

        let n = processed.particles.len();
        summary.frames_processed += 1;
        summary.particles += n;
        summary.particles_with_environment += processed
            .particles
            .iter()
            .filter(|p| p.environment.is_some())
            .count();

        let elapsed = timer.lap().as_secs_f64();
        info!(
            particles = n,
            "{} done ({:.3}s @ {:.2}x)",
            frame.name(),
            elapsed,
            real_time / elapsed.max(f64::EPSILON)
        );
        reporter.frame_done(frame.name(), n);
        reporter.advance(summary.frames_processed);
    }
    reporter.finish_stage();

    if assembler.filled() > 0 {
        debug!(lines = assembler.filled(), "dropping incomplete final frame");
    }

    reporter.begin_stage(PipelineStage::Writing, None);
    sink.finish()?;
    reporter.finish_stage();

    summary.elapsed = started.elapsed();
    info!(
        frames = summary.frames_processed,
        particles = summary.particles,
        elapsed_s = summary.elapsed.as_secs_f64(),
        "run complete"
    );
    Ok(summary)
}

/// Run the full processing pipeline without progress reporting.
pub fn run_pipeline(
    config: &PipelineConfig,
    project_dir: &Path,
    detector: Option<&dyn Detector>,
    sink: &mut dyn FrameSink,
) -> Result<RunSummary> {
    run_pipeline_reported(config, project_dir, detector, sink, Arc::new(NoOpReporter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_timer_spans_every_block_of_a_frame() {
        let mut timer = FrameTimer::start();
        // Two blocks read before the frame completes.
        std::thread::sleep(Duration::from_millis(15));
        std::thread::sleep(Duration::from_millis(15));
        let first = timer.lap();
        assert!(first >= Duration::from_millis(30), "{first:?}");
        let second = timer.lap();
        assert!(second < first);
    }
}
