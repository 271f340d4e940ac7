use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::assemble::Orientation;
use crate::consts::{
    DEFAULT_DARK_THRESHOLD, DEFAULT_ENVIRON_TOLERANCE_S, DEFAULT_FILE_TIME_FORMAT,
    DEFAULT_IMAGE_SIZE, DEFAULT_LIGHT_THRESHOLD, DEFAULT_SCAN_PER_S, DEFAULT_STEP_SIZE,
    DEFAULT_WINDOW_SIZE,
};
use crate::detection::{SegmentConfig, SemanticConfig};
use crate::error::{ApeepError, Result};
use crate::io::avi::SensorChannel;
use crate::io::export::ExportOptions;
use crate::measure::RegionProperty;
use crate::stream::StreamOptions;

/// Settings of a processing run, stored as `config.toml` in the project.
///
/// Every section has defaults, so a partial file is valid.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub acq: AcqConfig,
    #[serde(default)]
    pub flat_field: FlatFieldConfig,
    #[serde(default)]
    pub enhance: EnhanceConfig,
    #[serde(default)]
    pub segment: SegmentConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub measure: MeasureConfig,
    #[serde(default)]
    pub environ: EnvironConfig,
    #[serde(default)]
    pub subsample: SubsampleConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Directory holding the video and environmental files. Relative
    /// paths are resolved against the project directory.
    pub input_dir: PathBuf,
    /// Extension of the video files.
    pub extension: String,
    /// `chrono` format of the acquisition time in video file names.
    pub time_format: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("raw"),
            extension: "avi".into(),
            time_format: DEFAULT_FILE_TIME_FORMAT.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AcqConfig {
    /// Line rate of the camera, in lines per second.
    pub scan_per_s: f64,
    /// Side the top of the scanned lines points to.
    pub top: Orientation,
    /// Colour channel holding the sensor data.
    pub channel: SensorChannel,
}

impl Default for AcqConfig {
    fn default() -> Self {
        Self {
            scan_per_s: DEFAULT_SCAN_PER_S,
            top: Orientation::default(),
            channel: SensorChannel::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatFieldConfig {
    pub enabled: bool,
    /// Lines in the moving average window.
    pub window_size: usize,
    /// Lines read and processed at once.
    pub step_size: usize,
    pub write_image: bool,
}

impl Default for FlatFieldConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: DEFAULT_WINDOW_SIZE,
            step_size: DEFAULT_STEP_SIZE,
            write_image: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    pub enabled: bool,
    /// Lines in one output frame.
    pub image_size: usize,
    /// Percentile mapped to black.
    pub dark_threshold: f32,
    /// Percentile mapped to white.
    pub light_threshold: f32,
    pub write_image: bool,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            image_size: DEFAULT_IMAGE_SIZE,
            dark_threshold: DEFAULT_DARK_THRESHOLD,
            light_threshold: DEFAULT_LIGHT_THRESHOLD,
            write_image: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureConfig {
    pub enabled: bool,
    /// Properties exported for each particle.
    pub properties: Vec<RegionProperty>,
    pub write_particles: bool,
    /// Pixel size in mm; particle images get a scale bar when set.
    pub px2mm: Option<f64>,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            properties: vec![
                RegionProperty::Area,
                RegionProperty::Bbox,
                RegionProperty::Centroid,
                RegionProperty::Orientation,
                RegionProperty::MajorAxisLength,
                RegionProperty::MinorAxisLength,
                RegionProperty::Eccentricity,
                RegionProperty::EquivalentDiameter,
                RegionProperty::MeanIntensity,
                RegionProperty::MinIntensity,
                RegionProperty::MaxIntensity,
            ],
            write_particles: true,
            px2mm: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironConfig {
    /// Largest time gap, in seconds, between a particle and the
    /// environmental record it is joined to.
    pub tolerance_s: f64,
}

impl Default for EnvironConfig {
    fn default() -> Self {
        Self {
            tolerance_s: DEFAULT_ENVIRON_TOLERANCE_S,
        }
    }
}

/// Keep one completed frame every `interval`, starting at `offset`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsampleConfig {
    pub interval: usize,
    pub offset: usize,
}

impl Default for SubsampleConfig {
    fn default() -> Self {
        Self {
            interval: 1,
            offset: 0,
        }
    }
}

impl SubsampleConfig {
    /// Whether the `index`-th completed frame (0-based) is processed.
    pub fn keeps(&self, index: usize) -> bool {
        index >= self.offset && (index - self.offset) % self.interval.max(1) == 0
    }
}

impl PipelineConfig {
    /// Check the settings before any frame is read.
    ///
    /// `has_detector` tells whether a detection backend is available for
    /// the semantic pipeline. Sizes that are not multiples of the step
    /// size are rounded down, with a warning.
    pub fn validate(&mut self, has_detector: bool) -> Result<()> {
        let invalid = |msg: String| Err(ApeepError::InvalidConfig(msg));

        if !self.acq.scan_per_s.is_finite() || self.acq.scan_per_s <= 0.0 {
            return invalid(format!("acq.scan_per_s must be > 0, got {}", self.acq.scan_per_s));
        }

        let step = self.flat_field.step_size;
        if step == 0 {
            return invalid("flat_field.step_size must be > 0".into());
        }
        self.flat_field.window_size = round_to_step("flat_field.window_size", self.flat_field.window_size, step);
        self.enhance.image_size = round_to_step("enhance.image_size", self.enhance.image_size, step);
        if self.flat_field.window_size == 0 {
            return invalid(format!("flat_field.window_size must be at least {step}"));
        }
        if self.enhance.image_size == 0 {
            return invalid(format!("enhance.image_size must be at least {step}"));
        }

        let (dark, light) = (self.enhance.dark_threshold, self.enhance.light_threshold);
        if !(0.0..=100.0).contains(&dark) || !(0.0..=100.0).contains(&light) || dark > light {
            return invalid(format!(
                "enhance thresholds must satisfy 0 <= dark <= light <= 100, got {dark} and {light}"
            ));
        }

        let seg = &self.segment;
        if !(0.0..=100.0).contains(&seg.threshold) {
            return invalid(format!("segment.threshold must be in [0, 100], got {}", seg.threshold));
        }
        if let Some(max) = seg.max_area {
            if max <= seg.min_area {
                return invalid(format!(
                    "segment.max_area ({max}) must be larger than segment.min_area ({})",
                    seg.min_area
                ));
            }
        }

        if self.uses_detector() {
            if !has_detector {
                return invalid(format!(
                    "segment.pipeline = \"{}\" needs a detection backend, none is available",
                    seg.pipeline
                ));
            }
            let sem = &self.semantic;
            if !(sem.score_threshold > 0.0 && sem.score_threshold < 1.0) {
                return invalid(format!(
                    "semantic.score_threshold must be in ]0, 1[, got {}",
                    sem.score_threshold
                ));
            }
            if sem.max_area <= sem.min_area {
                return invalid(format!(
                    "semantic.max_area ({}) must be larger than semantic.min_area ({})",
                    sem.max_area, sem.min_area
                ));
            }
            if sem.tile_rows == 0 || sem.tile_cols == 0 || sem.tile_size == 0 {
                return invalid("semantic tile grid must not be empty".into());
            }
        }

        if self.subsample.interval == 0 {
            return invalid("subsample.interval must be > 0".into());
        }
        if !(self.environ.tolerance_s >= 0.0) {
            return invalid(format!(
                "environ.tolerance_s must be >= 0, got {}",
                self.environ.tolerance_s
            ));
        }
        if let Some(px2mm) = self.measure.px2mm {
            if !(px2mm > 0.0) {
                return invalid(format!("measure.px2mm must be > 0, got {px2mm}"));
            }
        }
        Ok(())
    }

    /// Whether segmentation runs with the semantic model.
    pub fn uses_detector(&self) -> bool {
        self.segment.enabled && self.segment.pipeline.needs_detector()
    }

    pub fn stream_options(&self, block_size: usize) -> StreamOptions {
        StreamOptions {
            block_size,
            extension: self.io.extension.clone(),
            time_format: self.io.time_format.clone(),
            channel: self.acq.channel,
        }
    }

    /// What the disk exporter writes for these settings.
    pub fn export_options(&self) -> ExportOptions {
        let segment = self.segment.enabled;
        let measure = segment && self.measure.enabled;
        ExportOptions {
            flat_fielded: self.flat_field.write_image,
            enhanced: self.enhance.enabled && self.enhance.write_image,
            segmented: segment && self.segment.write_image,
            masked: segment && self.segment.write_masked_image,
            particles: measure && self.measure.write_particles,
            properties: self.measure.properties.clone(),
            px2mm: self.measure.px2mm,
        }
    }
}

fn round_to_step(name: &str, value: usize, step: usize) -> usize {
    let rounded = value / step * step;
    if rounded != value {
        warn!(
            setting = name,
            value,
            rounded,
            step,
            "not a multiple of the step size, rounded down"
        );
    }
    rounded
}
