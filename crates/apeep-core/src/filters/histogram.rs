use ndarray::Array2;

use crate::consts::EPSILON;

/// Linear histogram stretch: maps [black_point, white_point] → [0.0, 1.0],
/// clipping values outside that range.
pub fn histogram_stretch(data: &Array2<f32>, black_point: f32, white_point: f32) -> Array2<f32> {
    let range = white_point - black_point;
    let range = if range.abs() < EPSILON { 1.0 } else { range };

    data.mapv(|v| ((v - black_point) / range).clamp(0.0, 1.0))
}

/// Percentiles of `values`, with linear interpolation between closest ranks.
///
/// Each `q` is in [0, 100]. NaN values are ignored. Returns `None` when
/// there is no finite value to rank.
pub fn percentiles<'a, I>(values: I, qs: &[f32]) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a f32>,
{
    let mut sorted: Vec<f32> = values.into_iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f32::total_cmp);

    let last = (sorted.len() - 1) as f64;
    Some(
        qs.iter()
            .map(|&q| {
                let rank = (q.clamp(0.0, 100.0) as f64 / 100.0) * last;
                let lo = rank.floor() as usize;
                let hi = rank.ceil() as usize;
                let frac = rank - lo as f64;
                (sorted[lo] as f64 + (sorted[hi] as f64 - sorted[lo] as f64) * frac) as f32
            })
            .collect(),
    )
}

/// Single percentile, see [`percentiles`].
pub fn percentile<'a, I>(values: I, q: f32) -> Option<f32>
where
    I: IntoIterator<Item = &'a f32>,
{
    percentiles(values, &[q]).and_then(|v| v.first().copied())
}

/// Min-max rescale into [0, 1]. A constant image maps to zeros.
pub fn min_max_stretch(data: &Array2<f32>) -> Array2<f32> {
    let (lo, hi) = data
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return Array2::zeros(data.raw_dim());
    }
    histogram_stretch(data, lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_percentile_interpolates_linearly() {
        let v = [1.0f32, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&v, 0.0), Some(1.0));
        assert_eq!(percentile(&v, 100.0), Some(4.0));
        // rank = 0.5 * 3 = 1.5
        assert_eq!(percentile(&v, 50.0), Some(2.5));
    }

    #[test]
    fn test_percentile_empty() {
        let v: [f32; 0] = [];
        assert_eq!(percentile(&v, 50.0), None);
    }

    #[test]
    fn test_stretch_clips() {
        let a = array![[0.0f32, 0.5, 1.0]];
        let s = histogram_stretch(&a, 0.25, 0.75);
        assert_eq!(s, array![[0.0, 0.5, 1.0]]);
    }
}
