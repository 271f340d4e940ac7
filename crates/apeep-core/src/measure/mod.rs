pub mod locate;
pub mod particle;
pub mod properties;

use std::collections::HashSet;

use ndarray::Array2;
use tracing::debug;

use crate::frame::LabeledMask;
use crate::io::environ::EnvironmentRecord;

pub use locate::{locate_column, AcquisitionPoint};
pub use particle::{particle_id, particle_image};
pub use properties::{region_props, RegionProperty, RegionProps};

/// One measured particle.
#[derive(Clone, Debug)]
pub struct Particle {
    /// Content digest of `image`.
    pub id: String,
    pub image: Array2<f32>,
    pub region: RegionProps,
}

/// A particle with its acquisition coordinates and, when available, the
/// environmental record closest in time.
#[derive(Clone, Debug)]
pub struct ParticleRecord {
    pub particle: Particle,
    pub location: AcquisitionPoint,
    pub environment: Option<EnvironmentRecord>,
}

/// Extract and measure every particle of `labels`, in label order.
///
/// Particles with identical images share their id; only the first one is
/// kept. An empty mask yields no particle.
pub fn measure_particles(intensity: &Array2<f32>, labels: &LabeledMask) -> Vec<Particle> {
    let regions = region_props(labels, intensity);
    let total = regions.len();
    let mut seen = HashSet::with_capacity(total);
    let particles: Vec<Particle> = regions
        .into_iter()
        .filter_map(|region| {
            let image = particle_image(&region, labels, intensity);
            let id = particle_id(&image);
            seen.insert(id.clone()).then_some(Particle { id, image, region })
        })
        .collect();

    if particles.len() < total {
        debug!(
            regions = total,
            unique = particles.len(),
            "identical particles collapsed"
        );
    }
    particles
}
