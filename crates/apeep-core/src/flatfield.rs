use ndarray::{Array1, Array2, Zip};
use tracing::debug;

use crate::consts::BASELINE_FLOOR;
use crate::error::{ApeepError, Result};
use crate::frame::LineBlock;

/// Rolling per-column brightness baseline used to flat-field scan lines.
///
/// The baseline is updated once per block with an exponential-decay
/// approximation of the moving average over the last `window_size` lines:
///
/// `baseline += (colsum(block) - baseline * n) / window_size`
///
/// The lines leaving the window are assumed to have the current baseline
/// as their mean, which avoids storing the window. Downstream thresholds
/// are tuned against this estimate, so it is kept as is.
#[derive(Clone, Debug)]
pub struct FlatFieldTracker {
    baseline: Array1<f64>,
    window_size: usize,
}

impl FlatFieldTracker {
    /// Start from an explicit baseline.
    pub fn new(baseline: Array1<f64>, window_size: usize) -> Result<Self> {
        if window_size == 0 {
            return Err(ApeepError::InvalidConfig(
                "flat-field window size must be > 0".into(),
            ));
        }
        Ok(Self {
            baseline,
            window_size,
        })
    }

    /// Initialise the baseline as the column-wise arithmetic mean of the
    /// lines in `window`.
    pub fn from_window(window: &[LineBlock], window_size: usize) -> Result<Self> {
        let first = window.first().ok_or(ApeepError::EmptySequence)?;
        let width = first.width();
        let mut sum = Array1::<f64>::zeros(width);
        let mut lines = 0usize;

        for block in window {
            if block.width() != width {
                return Err(ApeepError::InvalidConfig(format!(
                    "line width changed from {width} to {}",
                    block.width()
                )));
            }
            for row in block.data.rows() {
                Zip::from(&mut sum).and(&row).for_each(|s, &v| *s += v as f64);
            }
            lines += block.height();
        }

        let baseline = sum / lines as f64;
        debug!(
            lines,
            mean = baseline.mean().unwrap_or(0.0),
            "moving average line initialised"
        );
        Self::new(baseline, window_size)
    }

    pub fn baseline(&self) -> &Array1<f64> {
        &self.baseline
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Fold one block into the baseline.
    ///
    /// Column sums accumulate in f64, row by row.
    pub fn update(&mut self, block: &Array2<f32>) {
        let n = block.nrows() as f64;
        let window = self.window_size as f64;

        let mut colsum = Array1::<f64>::zeros(block.ncols());
        for row in block.rows() {
            Zip::from(&mut colsum).and(&row).for_each(|s, &v| *s += v as f64);
        }

        Zip::from(&mut self.baseline)
            .and(&colsum)
            .for_each(|b, &c| *b += (c - *b * n) / window);
    }

    /// Divide every line of `block` by the baseline, column by column.
    ///
    /// Baseline values below [`BASELINE_FLOOR`] are replaced by the floor
    /// in the division so dark columns cannot produce infinities.
    pub fn normalize(&self, block: &Array2<f32>) -> Array2<f32> {
        let mut out = block.clone();
        for mut row in out.rows_mut() {
            Zip::from(&mut row).and(&self.baseline).for_each(|v, &b| {
                *v = (*v as f64 / b.max(BASELINE_FLOOR as f64)) as f32;
            });
        }
        out
    }

    /// Update the baseline with `block`, then flat-field it.
    pub fn process(&mut self, mut block: LineBlock) -> LineBlock {
        self.update(&block.data);
        block.data = self.normalize(&block.data);
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_update_follows_recurrence() {
        let mut tracker = FlatFieldTracker::new(array![0.5, 1.0], 4).unwrap();
        let block = array![[1.0f32, 1.0], [1.0, 1.0]];
        tracker.update(&block);
        // 0.5 + (2 - 0.5 * 2) / 4 = 0.75 ; 1.0 + (2 - 2) / 4 = 1.0
        assert_eq!(tracker.baseline()[0], 0.75);
        assert_eq!(tracker.baseline()[1], 1.0);
    }

    #[test]
    fn test_normalize_guards_zero_baseline() {
        let tracker = FlatFieldTracker::new(array![0.0, 0.5], 4).unwrap();
        let out = tracker.normalize(&array![[0.5f32, 0.25]]);
        assert!(out.iter().all(|v| v.is_finite()));
        assert!((out[[0, 1]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(FlatFieldTracker::new(array![1.0], 0).is_err());
    }
}
