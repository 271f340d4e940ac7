use ndarray::Array2;
use tracing::debug;

use crate::frame::LabeledMask;

use super::components::{filter_by_area, label_components};
use super::config::SegmentParams;
use super::morphology::close;

/// Binary mask of the pixels darker than `threshold`.
pub fn binarize(frame: &Array2<f32>, threshold: f32) -> Array2<bool> {
    frame.mapv(|v| v < threshold)
}

/// Global-threshold segmentation.
///
/// Pipeline: binarize (darker than `threshold`) -> disk dilation -> disk
/// erosion -> 8-connected labeling -> area filter. Surviving particles are
/// numbered 1..=n in raster order.
pub fn segment_regular(frame: &Array2<f32>, threshold: f32, params: &SegmentParams) -> LabeledMask {
    let binary = binarize(frame, threshold);
    let closed = close(&binary, params.dilate, params.erode);
    let (labels, stats) = label_components(&closed);
    let (kept, kept_stats) = filter_by_area(&labels, &stats, params.area);
    debug!(
        threshold,
        components = stats.len(),
        particles = kept_stats.len(),
        "regular segmentation"
    );
    kept
}
