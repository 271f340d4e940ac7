/// Minimum region count to measure particles with Rayon parallelism.
pub const PARALLEL_REGION_THRESHOLD: usize = 64;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// Smallest baseline value used as a divisor during flat-fielding.
/// One 8-bit grey level; the stored baseline itself is never clamped.
pub const BASELINE_FLOOR: f32 = 1.0 / 255.0;

/// Maximum value of an 8-bit sensor sample.
pub const SENSOR_MAX: f32 = 255.0;

/// Decimation factor of the small copies used for percentiles and thresholds.
pub const DOWNSCALE_FACTOR: usize = 5;

/// Number of histogram bins for Otsu's thresholding.
pub const OTSU_HISTOGRAM_BINS: usize = 256;

/// Scaling of Otsu-driven morphology and area parameters.
pub const OTSU_PARAMETER_SCALE: f64 = 4.0 / 3.0;

/// Intensity factor applied to particle pixels so they never equal the
/// blank (1.0) surrounding them.
pub const PARTICLE_INTENSITY_SCALE: f32 = 0.997;

/// Frame name format, microsecond precision.
pub const FRAME_NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S_%6f";

/// Default format of the acquisition time encoded in video file stems.
pub const DEFAULT_FILE_TIME_FORMAT: &str = "%Y%m%d%H%M%S%.f";

/// Default scan rate of the line-scan camera (lines per second).
pub const DEFAULT_SCAN_PER_S: f64 = 28_000.0;

/// Default flat-field moving average window, in lines.
pub const DEFAULT_WINDOW_SIZE: usize = 10_000;

/// Default number of lines per block.
pub const DEFAULT_STEP_SIZE: usize = 128;

/// Default height (in lines) of an output frame.
pub const DEFAULT_IMAGE_SIZE: usize = 10_240;

/// Default dark / light percentile cut points for contrast enhancement.
pub const DEFAULT_DARK_THRESHOLD: f32 = 0.1;
pub const DEFAULT_LIGHT_THRESHOLD: f32 = 99.9;

/// Default segmentation parameters.
pub const DEFAULT_SEGMENT_THRESHOLD: f32 = 1.3;
pub const DEFAULT_VAR_LIMIT: f64 = 0.0015;
pub const DEFAULT_DILATE: usize = 3;
pub const DEFAULT_ERODE: usize = 3;
pub const DEFAULT_MIN_AREA: usize = 150;

/// Default tile grid of the semantic detector.
pub const DEFAULT_TILE_ROWS: usize = 5;
pub const DEFAULT_TILE_COLS: usize = 6;
pub const DEFAULT_TILE_SIZE: usize = 524;

/// Default mask IoU above which two tile detections are the same particle.
pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.2;

/// Default semantic segmentation parameters.
pub const DEFAULT_SEMANTIC_SCORE: f32 = 0.6;
pub const DEFAULT_SEMANTIC_DILATE: usize = 3;
pub const DEFAULT_SEMANTIC_ERODE: usize = 2;
pub const DEFAULT_SEMANTIC_MIN_AREA: usize = 50;
pub const DEFAULT_SEMANTIC_MAX_AREA: usize = 300;

/// Default tolerance of the nearest-time environmental join, in seconds.
pub const DEFAULT_ENVIRON_TOLERANCE_S: f64 = 1.0;

/// Number of header lines in an ISIIS environmental text file.
pub const ENVIRON_HEADER_LINES: usize = 10;
