use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use ndarray::Array2;

/// One video file of the acquisition, as seen by the line stream.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// File name, without directory.
    pub name: String,
    /// Acquisition start time, parsed from the file name.
    pub start_time: NaiveDateTime,
    /// Number of scan lines in one source frame (the frame height).
    pub lines_per_frame: usize,
    /// Number of sensor pixels per scan line (the frame width).
    pub width: usize,
    pub frame_count: usize,
}

/// A contiguous run of scan lines.
/// Pixel values are f32, row-major, shape = (lines, sensor pixels).
#[derive(Clone, Debug)]
pub struct LineBlock {
    pub data: Array2<f32>,
    pub source: Arc<SourceFile>,
    /// 0-based frame index, within `source`, of the last line in the block.
    pub frame_index: usize,
    /// 0-based line index, within that frame, of the last line in the block.
    pub line_index: usize,
}

impl LineBlock {
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    /// Location of the last line of the block.
    pub fn last_line(&self) -> LineLocation {
        LineLocation {
            source: Arc::clone(&self.source),
            frame_index: self.frame_index,
            line_index: self.line_index,
        }
    }

    /// Location of the first line of the block.
    ///
    /// Blocks never straddle a source frame boundary when their height
    /// divides the frame height, so the first line shares the frame of
    /// the last one.
    pub fn first_line(&self) -> LineLocation {
        let back = self.height().saturating_sub(1);
        let global = self.frame_index * self.source.lines_per_frame + self.line_index;
        let first = global.saturating_sub(back);
        LineLocation {
            source: Arc::clone(&self.source),
            frame_index: first / self.source.lines_per_frame,
            line_index: first % self.source.lines_per_frame,
        }
    }
}

/// Position of a single scan line in the acquisition.
#[derive(Clone, Debug, PartialEq)]
pub struct LineLocation {
    pub source: Arc<SourceFile>,
    pub frame_index: usize,
    pub line_index: usize,
}

impl LineLocation {
    /// Line count from the start of the source file.
    pub fn line_in_file(&self) -> usize {
        self.frame_index * self.source.lines_per_frame + self.line_index
    }
}

/// Where an output frame comes from.
#[derive(Clone, Debug)]
pub struct ImageProvenance {
    /// Name of the transect (the input directory).
    pub transect: String,
    /// First line of the output frame.
    pub start: LineLocation,
    /// Last line of the output frame.
    pub end: LineLocation,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    /// Canonical frame name, derived from `start_time`.
    pub name: String,
}

impl ImageProvenance {
    /// Whether the frame was assembled from lines of two source files.
    pub fn spans_two_files(&self) -> bool {
        self.start.source.path != self.end.source.path
    }
}

/// A completed, reoriented output frame.
/// Columns run along the scan (time) axis, rows along the sensor.
#[derive(Clone, Debug)]
pub struct AssembledFrame {
    pub data: Array2<f32>,
    pub provenance: ImageProvenance,
    /// Number of scan lines (columns after reorientation) in the frame.
    pub lines: usize,
}

impl AssembledFrame {
    pub fn name(&self) -> &str {
        &self.provenance.name
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

/// Integer label image: 0 = background, each particle a positive label.
pub type LabeledMask = Array2<u32>;
