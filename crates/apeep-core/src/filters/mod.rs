pub mod enhance;
pub mod histogram;

pub use enhance::{downscale, Enhancer};
pub use histogram::{histogram_stretch, min_max_stretch, percentile, percentiles};
