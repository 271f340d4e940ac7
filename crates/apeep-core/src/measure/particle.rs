use md5::{Digest, Md5};
use ndarray::{s, Array2, Zip};

use crate::consts::PARTICLE_INTENSITY_SCALE;
use crate::frame::LabeledMask;

use super::properties::RegionProps;

/// Pixels of one particle: the bounding box of its region, scaled by
/// [`PARTICLE_INTENSITY_SCALE`], with every pixel outside the region set
/// to white (1.0).
pub fn particle_image(region: &RegionProps, labels: &LabeledMask, intensity: &Array2<f32>) -> Array2<f32> {
    let (r0, c0, r1, c1) = region.bbox;
    let lab = labels.slice(s![r0..r1, c0..c1]);
    let img = intensity.slice(s![r0..r1, c0..c1]);
    Zip::from(&lab).and(&img).map_collect(|&l, &v| {
        if l == region.label {
            v * PARTICLE_INTENSITY_SCALE
        } else {
            1.0
        }
    })
}

/// Content digest of a particle image, as lowercase hex.
///
/// Covers the image shape and the little-endian bytes of every pixel in
/// row-major order, so two particles share an id exactly when their
/// images are identical.
pub fn particle_id(image: &Array2<f32>) -> String {
    let mut hasher = Md5::new();
    let (h, w) = image.dim();
    hasher.update((h as u64).to_le_bytes());
    hasher.update((w as u64).to_le_bytes());
    for v in image.iter() {
        hasher.update(v.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}
