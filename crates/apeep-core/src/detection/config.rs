use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_DILATE, DEFAULT_ERODE, DEFAULT_MIN_AREA, DEFAULT_OVERLAP_THRESHOLD,
    DEFAULT_SEGMENT_THRESHOLD, DEFAULT_SEMANTIC_DILATE, DEFAULT_SEMANTIC_ERODE,
    DEFAULT_SEMANTIC_MAX_AREA, DEFAULT_SEMANTIC_MIN_AREA, DEFAULT_SEMANTIC_SCORE,
    DEFAULT_TILE_COLS, DEFAULT_TILE_ROWS, DEFAULT_TILE_SIZE, DEFAULT_VAR_LIMIT,
    OTSU_PARAMETER_SCALE,
};

/// How the grey-level threshold separating particles from water is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMethod {
    /// `threshold` is a grey level in [0, 100].
    Static,
    /// `threshold` is a percentile of the grey levels of the frame.
    Percentile,
    /// Otsu's method; `threshold` is ignored.
    Otsu,
    /// Otsu on clean frames, percentile on noisy ones.
    #[default]
    Auto,
}

impl std::fmt::Display for ThresholdMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Percentile => write!(f, "percentile"),
            Self::Otsu => write!(f, "otsu"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Which segmentation strategies produce the particle mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentPipeline {
    /// Global grey-level threshold only.
    #[default]
    Regular,
    /// Model-assisted tiled detection only.
    Semantic,
    /// Union of both masks.
    Both,
}

impl SegmentPipeline {
    pub fn needs_detector(self) -> bool {
        matches!(self, Self::Semantic | Self::Both)
    }
}

impl std::fmt::Display for SegmentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Regular => write!(f, "regular"),
            Self::Semantic => write!(f, "semantic"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// Components with `min < area <= max` are kept. `max = None` is unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AreaFilter {
    pub min: usize,
    pub max: Option<usize>,
}

impl AreaFilter {
    pub fn new(min: usize, max: Option<usize>) -> Self {
        Self { min, max }
    }

    pub fn accepts(&self, area: usize) -> bool {
        area > self.min && self.max.is_none_or(|max| area <= max)
    }
}

/// Morphology and area parameters of one segmentation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentParams {
    /// Disk radius of the binary dilation.
    pub dilate: usize,
    /// Disk radius of the binary erosion.
    pub erode: usize,
    pub area: AreaFilter,
}

impl SegmentParams {
    /// Parameters to use when Otsu's method picked the threshold: the
    /// morphology radii and the minimum area grow by 4/3.
    pub fn scaled_for_otsu(&self) -> Self {
        let scale = |v: usize| (v as f64 * OTSU_PARAMETER_SCALE).round() as usize;
        Self {
            dilate: scale(self.dilate),
            erode: scale(self.erode),
            area: AreaFilter::new(scale(self.area.min), self.area.max),
        }
    }
}

/// `[segment]` section of the configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub pipeline: SegmentPipeline,
    #[serde(default)]
    pub method: ThresholdMethod,
    /// Grey level (static) or percentile (percentile, auto), in [0, 100].
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Grey-level variance above which `auto` considers a frame noisy.
    #[serde(default = "default_var_limit")]
    pub var_limit: f64,
    #[serde(default = "default_dilate")]
    pub dilate: usize,
    #[serde(default = "default_erode")]
    pub erode: usize,
    #[serde(default = "default_min_area")]
    pub min_area: usize,
    /// No upper bound when absent.
    #[serde(default)]
    pub max_area: Option<usize>,
    /// Write the binary mask of each frame to `segmented/`.
    #[serde(default)]
    pub write_image: bool,
    /// Write each frame with particles highlighted to `masked/`.
    #[serde(default)]
    pub write_masked_image: bool,
}

fn default_true() -> bool {
    true
}
fn default_threshold() -> f32 {
    DEFAULT_SEGMENT_THRESHOLD
}
fn default_var_limit() -> f64 {
    DEFAULT_VAR_LIMIT
}
fn default_dilate() -> usize {
    DEFAULT_DILATE
}
fn default_erode() -> usize {
    DEFAULT_ERODE
}
fn default_min_area() -> usize {
    DEFAULT_MIN_AREA
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pipeline: SegmentPipeline::default(),
            method: ThresholdMethod::default(),
            threshold: DEFAULT_SEGMENT_THRESHOLD,
            var_limit: DEFAULT_VAR_LIMIT,
            dilate: DEFAULT_DILATE,
            erode: DEFAULT_ERODE,
            min_area: DEFAULT_MIN_AREA,
            max_area: None,
            write_image: false,
            write_masked_image: false,
        }
    }
}

impl SegmentConfig {
    pub fn params(&self) -> SegmentParams {
        SegmentParams {
            dilate: self.dilate,
            erode: self.erode,
            area: AreaFilter::new(self.min_area, self.max_area),
        }
    }
}

/// `[semantic]` section of the configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Weights of the detection model, if a backend is available.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Minimum detection score in ]0, 1[.
    #[serde(default = "default_score")]
    pub score_threshold: f32,
    #[serde(default = "default_tile_rows")]
    pub tile_rows: usize,
    #[serde(default = "default_tile_cols")]
    pub tile_cols: usize,
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,
    /// Mask IoU in the tile seam above which two detections are the same.
    #[serde(default = "default_overlap")]
    pub overlap_threshold: f32,
    /// Pixels added around each kept detection box before thresholding.
    #[serde(default = "default_sem_dilate")]
    pub roi_margin: usize,
    #[serde(default = "default_sem_dilate")]
    pub dilate: usize,
    #[serde(default = "default_sem_erode")]
    pub erode: usize,
    #[serde(default = "default_sem_min_area")]
    pub min_area: usize,
    #[serde(default = "default_sem_max_area")]
    pub max_area: usize,
}

fn default_score() -> f32 {
    DEFAULT_SEMANTIC_SCORE
}
fn default_tile_rows() -> usize {
    DEFAULT_TILE_ROWS
}
fn default_tile_cols() -> usize {
    DEFAULT_TILE_COLS
}
fn default_tile_size() -> usize {
    DEFAULT_TILE_SIZE
}
fn default_overlap() -> f32 {
    DEFAULT_OVERLAP_THRESHOLD
}
fn default_sem_dilate() -> usize {
    DEFAULT_SEMANTIC_DILATE
}
fn default_sem_erode() -> usize {
    DEFAULT_SEMANTIC_ERODE
}
fn default_sem_min_area() -> usize {
    DEFAULT_SEMANTIC_MIN_AREA
}
fn default_sem_max_area() -> usize {
    DEFAULT_SEMANTIC_MAX_AREA
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            score_threshold: DEFAULT_SEMANTIC_SCORE,
            tile_rows: DEFAULT_TILE_ROWS,
            tile_cols: DEFAULT_TILE_COLS,
            tile_size: DEFAULT_TILE_SIZE,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            roi_margin: DEFAULT_SEMANTIC_DILATE,
            dilate: DEFAULT_SEMANTIC_DILATE,
            erode: DEFAULT_SEMANTIC_ERODE,
            min_area: DEFAULT_SEMANTIC_MIN_AREA,
            max_area: DEFAULT_SEMANTIC_MAX_AREA,
        }
    }
}

impl SemanticConfig {
    pub fn params(&self) -> SegmentParams {
        SegmentParams {
            dilate: self.dilate,
            erode: self.erode,
            area: AreaFilter::new(self.min_area, Some(self.max_area)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_filter_bounds() {
        let f = AreaFilter::new(10, Some(20));
        assert!(!f.accepts(10));
        assert!(f.accepts(11));
        assert!(f.accepts(20));
        assert!(!f.accepts(21));
        assert!(AreaFilter::new(10, None).accepts(usize::MAX));
    }

    #[test]
    fn test_otsu_scaling_rounds() {
        let p = SegmentParams {
            dilate: 3,
            erode: 2,
            area: AreaFilter::new(150, None),
        };
        let s = p.scaled_for_otsu();
        assert_eq!(s.dilate, 4);
        assert_eq!(s.erode, 3);
        assert_eq!(s.area.min, 200);
    }
}
