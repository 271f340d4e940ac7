#![allow(dead_code)]

use std::path::{Path, PathBuf};

use apeep_core::detection::ThresholdMethod;
use apeep_core::error::Result;
use apeep_core::frame::{ImageProvenance, LabeledMask};
use apeep_core::io::avi_writer::AviWriter;
use apeep_core::io::environ::EnvironmentTable;
use apeep_core::io::export::{FrameOutput, FrameSink};
use apeep_core::measure::ParticleRecord;
use apeep_core::pipeline::config::PipelineConfig;
use chrono::NaiveDateTime;
use ndarray::{s, Array2};

/// Sensor pixels per scan line of the synthetic videos.
pub const WIDTH: usize = 16;
/// Scan lines per source frame of the synthetic videos.
pub const LINES: usize = 32;
/// Grey level of clear water.
pub const WATER: u8 = 200;
/// Grey level of particles.
pub const DARK: u8 = 40;
/// Line rate used by [`small_config`].
pub const SCAN_PER_S: f64 = 1000.0;

pub fn time(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
}

/// Video file name encoding `start` in the default file time format.
pub fn video_name(start: NaiveDateTime) -> String {
    format!("{}.avi", start.format("%Y%m%d%H%M%S%.3f"))
}

pub fn uniform_frame(value: u8) -> Array2<u8> {
    Array2::from_elem((LINES, WIDTH), value)
}

/// Water frame with a dark rectangle over `lines` x `pixels`.
pub fn frame_with_square(
    lines: std::ops::Range<usize>,
    pixels: std::ops::Range<usize>,
) -> Array2<u8> {
    let mut frame = uniform_frame(WATER);
    frame.slice_mut(s![lines, pixels]).fill(DARK);
    frame
}

/// Write an 8-bit AVI file holding `frames`.
pub fn write_avi(path: &Path, frames: &[Array2<u8>]) -> PathBuf {
    let (h, w) = frames[0].dim();
    let mut writer = AviWriter::create(path, w as u32, h as u32, 8).unwrap();
    for frame in frames {
        writer.write_grey_frame(frame).unwrap();
    }
    writer.finalize().unwrap();
    path.to_path_buf()
}

/// Write a video named after its acquisition start into `dir`.
pub fn write_video(dir: &Path, start: NaiveDateTime, frames: &[Array2<u8>]) -> PathBuf {
    write_avi(&dir.join(video_name(start)), frames)
}

/// Write an ISIIS environmental file dated `date` (`mm/dd/yy`).
pub fn write_environ(dir: &Path, name: &str, date: &str, columns: &[&str], rows: &[&[&str]]) -> PathBuf {
    let mut text = String::new();
    text.push_str("ISIIS environmental data\n");
    text.push_str(&format!("Date: {date}\n"));
    for i in 2..10 {
        text.push_str(&format!("header line {i}\n"));
    }
    text.push_str(&columns.join("\t"));
    text.push('\n');
    for row in rows {
        text.push_str(&row.join("\t"));
        text.push('\n');
    }
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

/// Project directory with an empty `raw/` input directory.
pub fn project() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    std::fs::create_dir(&raw).unwrap();
    (dir, raw)
}

/// Settings sized for the synthetic videos: 8-line blocks, a 32-line
/// flat-field window and 32-line output frames.
pub fn small_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.acq.scan_per_s = SCAN_PER_S;
    config.flat_field.step_size = 8;
    config.flat_field.window_size = 32;
    config.enhance.image_size = LINES;
    config
}

/// [`small_config`] with a static threshold and no morphology, so
/// particle outlines are exactly the dark pixels.
pub fn exact_config() -> PipelineConfig {
    let mut config = small_config();
    config.enhance.enabled = false;
    config.segment.method = ThresholdMethod::Static;
    config.segment.threshold = 50.0;
    config.segment.dilate = 0;
    config.segment.erode = 0;
    config.segment.min_area = 10;
    config
}

pub struct CollectedFrame {
    pub provenance: ImageProvenance,
    pub flat_fielded: Array2<f32>,
    pub labels: Option<LabeledMask>,
    pub particles: Vec<ParticleRecord>,
}

/// Keeps everything the pipeline hands over in memory.
#[derive(Default)]
pub struct CollectingSink {
    pub environment_columns: Option<Vec<String>>,
    pub frames: Vec<CollectedFrame>,
    pub finished: bool,
}

impl CollectingSink {
    pub fn particles(&self) -> impl Iterator<Item = &ParticleRecord> {
        self.frames.iter().flat_map(|f| f.particles.iter())
    }
}

impl FrameSink for CollectingSink {
    fn begin(&mut self, environment: &EnvironmentTable) -> Result<()> {
        self.environment_columns = Some(environment.columns.clone());
        Ok(())
    }

    fn write_frame(&mut self, frame: &FrameOutput<'_>) -> Result<()> {
        self.frames.push(CollectedFrame {
            provenance: frame.provenance.clone(),
            flat_fielded: frame.flat_fielded.clone(),
            labels: frame.labels.cloned(),
            particles: frame.particles.to_vec(),
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
