use ndarray::{Array2, ArrayView2};
use tracing::debug;

use crate::consts::EPSILON;

use super::histogram::{histogram_stretch, percentiles};

/// Nearest-neighbour decimation by an integer `factor`, without
/// anti-aliasing.
///
/// Output dimensions are `round(dim / factor)` (at least 1); output pixel
/// `i` samples input pixel `i * factor + factor / 2`, clamped to the input.
pub fn downscale(data: ArrayView2<f32>, factor: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    if h == 0 || w == 0 || factor <= 1 {
        return data.to_owned();
    }
    let out_h = ((h as f64 / factor as f64).round() as usize).max(1);
    let out_w = ((w as f64 / factor as f64).round() as usize).max(1);
    let centre = factor / 2;

    Array2::from_shape_fn((out_h, out_w), |(r, c)| {
        let sr = (r * factor + centre).min(h - 1);
        let sc = (c * factor + centre).min(w - 1);
        data[[sr, sc]]
    })
}

/// Contrast enhancement of a flat-fielded frame.
///
/// The `dark` and `light` percentiles (in [0, 100]) of a decimated copy
/// map to 0 and 1; values outside are clipped.
#[derive(Clone, Copy, Debug)]
pub struct Enhancer {
    pub dark: f32,
    pub light: f32,
    pub factor: usize,
}

impl Enhancer {
    pub fn new(dark: f32, light: f32, factor: usize) -> Self {
        Self { dark, light, factor }
    }

    /// Returns the enhanced frame and the decimated copy of the *input*
    /// used to compute the percentiles. A frame whose limits coincide is
    /// only clipped to [0, 1].
    pub fn enhance(&self, frame: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
        let small = downscale(frame.view(), self.factor);
        let Some(limits) = percentiles(&small, &[self.dark, self.light]) else {
            return (frame.clone(), small);
        };
        let (dark, light) = (limits[0], limits[1]);
        debug!(dark, light, "contrast limits");
        if light - dark < EPSILON {
            return (frame.mapv(|v| v.clamp(0.0, 1.0)), small);
        }
        (histogram_stretch(frame, dark, light), small)
    }
}
