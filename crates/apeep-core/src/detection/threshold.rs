use ndarray::{s, Array2, ArrayView2};
use tracing::debug;

use crate::consts::{DOWNSCALE_FACTOR, OTSU_HISTOGRAM_BINS};
use crate::filters::{downscale, percentile};

use super::config::ThresholdMethod;

/// A grey-level threshold together with the method that actually produced
/// it (never [`ThresholdMethod::Auto`]).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Threshold {
    pub value: f32,
    pub method: ThresholdMethod,
}

/// Per-frame threshold selection.
#[derive(Clone, Copy, Debug)]
pub struct ThresholdSelector {
    pub method: ThresholdMethod,
    /// Grey level or percentile in [0, 100].
    pub threshold: f32,
    pub var_limit: f64,
}

impl ThresholdSelector {
    pub fn new(method: ThresholdMethod, threshold: f32, var_limit: f64) -> Self {
        Self {
            method,
            threshold,
            var_limit,
        }
    }

    /// Pick the threshold for `frame`.
    ///
    /// `reference` is a decimated copy of the frame before enhancement;
    /// its central band decides between Otsu and percentile in `auto`
    /// mode. When absent, a decimated copy of `frame` is used instead.
    pub fn select(&self, frame: &Array2<f32>, reference: Option<&Array2<f32>>) -> Threshold {
        if self.method == ThresholdMethod::Static {
            return Threshold {
                value: self.threshold / 100.0,
                method: ThresholdMethod::Static,
            };
        }

        let small = downscale(frame.view(), DOWNSCALE_FACTOR);
        let method = match self.method {
            ThresholdMethod::Auto => {
                let variance = central_variance(reference.unwrap_or(&small));
                if variance > self.var_limit {
                    debug!(variance, "noisy image, switching to percentile thresholding");
                    ThresholdMethod::Percentile
                } else {
                    ThresholdMethod::Otsu
                }
            }
            m => m,
        };

        let value = match method {
            ThresholdMethod::Otsu => otsu_threshold(&small),
            _ => percentile(&small, self.threshold).unwrap_or(0.0),
        };
        Threshold { value, method }
    }
}

/// Variance of the grey levels of the central half (in height) of `data`.
///
/// The band starts at `h / 4` rounded half to even.
pub fn central_variance(data: &Array2<f32>) -> f64 {
    let h = data.nrows();
    let crop = (h as f64 / 4.0).round_ties_even() as usize;
    let band = if crop > 0 && 3 * crop <= h {
        data.slice(s![crop..3 * crop, ..])
    } else {
        data.view()
    };
    compute_mean_stddev(band).1.powi(2)
}

/// Compute mean and standard deviation of pixel values.
pub fn compute_mean_stddev(data: ArrayView2<f32>) -> (f64, f64) {
    let n = data.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let sum: f64 = data.iter().map(|&v| v as f64).sum();
    let mean = sum / n;
    let var: f64 = data.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Otsu's thresholding: find the value that maximizes between-class
/// variance over a histogram spanning [min, max] of the data.
///
/// Returns the centre of the last bin of the darker class. A constant
/// image returns its value.
pub fn otsu_threshold(data: &Array2<f32>) -> f32 {
    let (lo, hi) = data
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return 0.0;
    }
    if hi <= lo {
        return lo;
    }

    let bins = OTSU_HISTOGRAM_BINS;
    let width = (hi - lo) as f64 / bins as f64;
    let mut histogram = vec![0u64; bins];

    for &v in data.iter().filter(|v| v.is_finite()) {
        let bin = (((v - lo) as f64 / width) as usize).min(bins - 1);
        histogram[bin] += 1;
    }

    let total: f64 = histogram.iter().map(|&c| c as f64).sum();
    let mut sum_all: f64 = 0.0;
    for (i, &count) in histogram.iter().enumerate() {
        sum_all += i as f64 * count as f64;
    }

    let mut weight_bg: f64 = 0.0;
    let mut sum_bg: f64 = 0.0;
    let mut best_variance = 0.0_f64;
    let mut best_bin = 0usize;

    for (i, &count) in histogram.iter().enumerate() {
        weight_bg += count as f64;
        sum_bg += i as f64 * count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let between_variance = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);

        if between_variance > best_variance {
            best_variance = between_variance;
            best_bin = i;
        }
    }

    (lo as f64 + (best_bin as f64 + 0.5) * width) as f32
}
