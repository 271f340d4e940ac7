use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_4, PI};

use ndarray::{s, Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::PARALLEL_REGION_THRESHOLD;
use crate::frame::LabeledMask;

/// Measurements of one labeled region, in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionProps {
    pub label: u32,
    pub area: usize,
    /// (min_row, min_col, max_row, max_col), max exclusive.
    pub bbox: (usize, usize, usize, usize),
    /// (row, col)
    pub centroid: (f64, f64),
    /// Centroid relative to the top-left corner of `bbox`.
    pub local_centroid: (f64, f64),
    /// Second-order central moments normalised by the area:
    /// [[cols, -cross], [-cross, rows]].
    pub inertia_tensor: [[f64; 2]; 2],
    pub mean_intensity: f64,
    pub min_intensity: f64,
    pub max_intensity: f64,
    /// Intensity-weighted (row, col) centroid.
    pub weighted_centroid: (f64, f64),
}

impl RegionProps {
    /// Eigenvalues of the inertia tensor, largest first, never negative.
    pub fn inertia_tensor_eigvals(&self) -> (f64, f64) {
        let [[a, b], [_, c]] = self.inertia_tensor;
        let mean = (a + c) / 2.0;
        let spread = (((a - c) / 2.0).powi(2) + b * b).sqrt();
        ((mean + spread).max(0.0), (mean - spread).max(0.0))
    }

    /// Angle between the row axis and the major axis, in [-π/2, π/2].
    pub fn orientation(&self) -> f64 {
        let [[a, b], [_, c]] = self.inertia_tensor;
        if a - c == 0.0 {
            if b < 0.0 {
                -FRAC_PI_4
            } else {
                FRAC_PI_4
            }
        } else {
            0.5 * (-2.0 * b).atan2(c - a)
        }
    }

    pub fn major_axis_length(&self) -> f64 {
        4.0 * self.inertia_tensor_eigvals().0.sqrt()
    }

    pub fn minor_axis_length(&self) -> f64 {
        4.0 * self.inertia_tensor_eigvals().1.sqrt()
    }

    pub fn eccentricity(&self) -> f64 {
        let (l1, l2) = self.inertia_tensor_eigvals();
        if l1 == 0.0 {
            0.0
        } else {
            (1.0 - l2 / l1).sqrt()
        }
    }

    /// Diameter of the disk with the same area.
    pub fn equivalent_diameter(&self) -> f64 {
        (4.0 * self.area as f64 / PI).sqrt()
    }

    /// Fraction of the bounding box covered by the region.
    pub fn extent(&self) -> f64 {
        let (r0, c0, r1, c1) = self.bbox;
        self.area as f64 / ((r1 - r0) * (c1 - c0)) as f64
    }
}

/// Property that can be exported for each particle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionProperty {
    Area,
    Bbox,
    Centroid,
    LocalCentroid,
    Orientation,
    MajorAxisLength,
    MinorAxisLength,
    Eccentricity,
    EquivalentDiameter,
    Extent,
    InertiaTensorEigvals,
    MeanIntensity,
    MinIntensity,
    MaxIntensity,
    WeightedCentroid,
}

impl RegionProperty {
    pub fn name(self) -> &'static str {
        match self {
            Self::Area => "area",
            Self::Bbox => "bbox",
            Self::Centroid => "centroid",
            Self::LocalCentroid => "local_centroid",
            Self::Orientation => "orientation",
            Self::MajorAxisLength => "major_axis_length",
            Self::MinorAxisLength => "minor_axis_length",
            Self::Eccentricity => "eccentricity",
            Self::EquivalentDiameter => "equivalent_diameter",
            Self::Extent => "extent",
            Self::InertiaTensorEigvals => "inertia_tensor_eigvals",
            Self::MeanIntensity => "mean_intensity",
            Self::MinIntensity => "min_intensity",
            Self::MaxIntensity => "max_intensity",
            Self::WeightedCentroid => "weighted_centroid",
        }
    }

    /// Scalar values of the property; vector properties yield several.
    pub fn values(self, p: &RegionProps) -> Vec<f64> {
        match self {
            Self::Area => vec![p.area as f64],
            Self::Bbox => {
                let (r0, c0, r1, c1) = p.bbox;
                vec![r0 as f64, c0 as f64, r1 as f64, c1 as f64]
            }
            Self::Centroid => vec![p.centroid.0, p.centroid.1],
            Self::LocalCentroid => vec![p.local_centroid.0, p.local_centroid.1],
            Self::Orientation => vec![p.orientation()],
            Self::MajorAxisLength => vec![p.major_axis_length()],
            Self::MinorAxisLength => vec![p.minor_axis_length()],
            Self::Eccentricity => vec![p.eccentricity()],
            Self::EquivalentDiameter => vec![p.equivalent_diameter()],
            Self::Extent => vec![p.extent()],
            Self::InertiaTensorEigvals => {
                let (l1, l2) = p.inertia_tensor_eigvals();
                vec![l1, l2]
            }
            Self::MeanIntensity => vec![p.mean_intensity],
            Self::MinIntensity => vec![p.min_intensity],
            Self::MaxIntensity => vec![p.max_intensity],
            Self::WeightedCentroid => vec![p.weighted_centroid.0, p.weighted_centroid.1],
        }
    }

    /// Column names of the property: `name` for scalars, `name_0`,
    /// `name_1`, ... for vectors.
    pub fn columns(self) -> Vec<String> {
        let n = match self {
            Self::Bbox => 4,
            Self::Centroid
            | Self::LocalCentroid
            | Self::InertiaTensorEigvals
            | Self::WeightedCentroid => 2,
            _ => 1,
        };
        if n == 1 {
            vec![self.name().to_string()]
        } else {
            (0..n).map(|i| format!("{}_{i}", self.name())).collect()
        }
    }
}

/// Measure every labeled region of `labels` against `intensity`, in
/// increasing label order.
///
/// Regions are measured in parallel when there are many of them.
pub fn region_props(labels: &LabeledMask, intensity: &Array2<f32>) -> Vec<RegionProps> {
    let mut boxes: BTreeMap<u32, (usize, usize, usize, usize)> = BTreeMap::new();
    for ((row, col), &l) in labels.indexed_iter() {
        if l == 0 {
            continue;
        }
        let b = boxes.entry(l).or_insert((row, col, row + 1, col + 1));
        b.0 = b.0.min(row);
        b.1 = b.1.min(col);
        b.2 = b.2.max(row + 1);
        b.3 = b.3.max(col + 1);
    }
    let boxes: Vec<(u32, (usize, usize, usize, usize))> = boxes.into_iter().collect();

    let measure = |&(label, bbox): &(u32, (usize, usize, usize, usize))| {
        let (r0, c0, r1, c1) = bbox;
        measure_region(
            label,
            bbox,
            labels.slice(s![r0..r1, c0..c1]),
            intensity.slice(s![r0..r1, c0..c1]),
        )
    };

    if boxes.len() >= PARALLEL_REGION_THRESHOLD {
        boxes.par_iter().map(measure).collect()
    } else {
        boxes.iter().map(measure).collect()
    }
}

fn measure_region(
    label: u32,
    bbox: (usize, usize, usize, usize),
    labels: ArrayView2<u32>,
    intensity: ArrayView2<f32>,
) -> RegionProps {
    let (r0, c0, _, _) = bbox;
    let mut area = 0usize;
    let (mut sr, mut sc) = (0.0f64, 0.0f64);
    let (mut sum_i, mut wr, mut wc) = (0.0f64, 0.0f64, 0.0f64);
    let (mut min_i, mut max_i) = (f64::INFINITY, f64::NEG_INFINITY);

    for ((r, c), &l) in labels.indexed_iter() {
        if l != label {
            continue;
        }
        let v = intensity[[r, c]] as f64;
        area += 1;
        sr += r as f64;
        sc += c as f64;
        sum_i += v;
        wr += v * r as f64;
        wc += v * c as f64;
        min_i = min_i.min(v);
        max_i = max_i.max(v);
    }

    let n = area as f64;
    let (lr, lc) = (sr / n, sc / n);

    let (mut mu_rr, mut mu_cc, mut mu_rc) = (0.0f64, 0.0f64, 0.0f64);
    for ((r, c), &l) in labels.indexed_iter() {
        if l != label {
            continue;
        }
        let dr = r as f64 - lr;
        let dc = c as f64 - lc;
        mu_rr += dr * dr;
        mu_cc += dc * dc;
        mu_rc += dr * dc;
    }

    let weighted_centroid = if sum_i != 0.0 {
        (r0 as f64 + wr / sum_i, c0 as f64 + wc / sum_i)
    } else {
        (r0 as f64 + lr, c0 as f64 + lc)
    };

    RegionProps {
        label,
        area,
        bbox,
        centroid: (r0 as f64 + lr, c0 as f64 + lc),
        local_centroid: (lr, lc),
        inertia_tensor: [[mu_cc / n, -mu_rc / n], [-mu_rc / n, mu_rr / n]],
        mean_intensity: sum_i / n,
        min_intensity: min_i,
        max_intensity: max_i,
        weighted_centroid,
    }
}
