pub mod components;
pub mod config;
pub mod merge;
pub mod morphology;
pub mod regular;
pub mod semantic;
pub mod threshold;

pub use components::{filter_by_area, label_components, ComponentStats};
pub use config::{
    AreaFilter, SegmentConfig, SegmentParams, SegmentPipeline, SemanticConfig, ThresholdMethod,
};
pub use merge::merge_masks;
pub use regular::segment_regular;
pub use semantic::{segment_semantic, BoundingBox, Detection, Detector, TileGrid};
pub use threshold::{Threshold, ThresholdSelector};
