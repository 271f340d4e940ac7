use chrono::{Duration, NaiveDateTime};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::consts::FRAME_NAME_FORMAT;
use crate::error::{ApeepError, Result};
use crate::frame::{AssembledFrame, ImageProvenance, LineBlock, LineLocation};

/// Side of the instrument the top of the scanned lines points to.
///
/// Output frames are transposed so that scan lines become columns and
/// the motion runs from left to right, then flipped according to this.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Transpose, then flip vertically.
    #[default]
    Right,
    /// Transpose, then flip horizontally.
    Left,
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Right => write!(f, "right"),
            Self::Left => write!(f, "left"),
        }
    }
}

impl Orientation {
    /// Reorient a (lines x sensor) buffer into a (sensor x lines) frame.
    pub fn apply(self, buffer: &Array2<f32>) -> Array2<f32> {
        let transposed = buffer.t();
        match self {
            Self::Right => transposed.slice(s![..;-1, ..]).to_owned(),
            Self::Left => transposed.slice(s![.., ..;-1]).to_owned(),
        }
    }

    /// Offset, from the first line of the frame, of the line shown in
    /// column `col` of a reoriented frame of `lines` columns.
    pub fn line_offset(self, col: usize, lines: usize) -> usize {
        match self {
            Self::Right => col,
            Self::Left => lines - 1 - col,
        }
    }
}

/// Absolute time of a scan line, `global_line` lines after the start of
/// the file starting at `file_start`. Negative lines lie before it.
///
/// Offsets are computed from the line count directly, in nanoseconds, so
/// the time of a line does not depend on how it was reached.
pub fn line_time(file_start: NaiveDateTime, global_line: i64, scan_per_s: f64) -> NaiveDateTime {
    let nanos = (global_line as f64 * 1e9 / scan_per_s).round() as i64;
    file_start + Duration::nanoseconds(nanos)
}

/// Canonical name of a frame starting at `start`.
pub fn frame_name(start: NaiveDateTime) -> String {
    start.format(FRAME_NAME_FORMAT).to_string()
}

/// Reassembles flat-fielded line blocks into fixed-size output frames.
pub struct FrameAssembler {
    buffer: Array2<f32>,
    offset: usize,
    start: Option<LineLocation>,
    orientation: Orientation,
    scan_per_s: f64,
    transect: String,
}

impl FrameAssembler {
    /// `output_size` lines of `width` pixels per frame.
    pub fn new(
        output_size: usize,
        width: usize,
        orientation: Orientation,
        scan_per_s: f64,
        transect: impl Into<String>,
    ) -> Result<Self> {
        if output_size == 0 || width == 0 {
            return Err(ApeepError::InvalidConfig(format!(
                "invalid output frame size {output_size}x{width}"
            )));
        }
        if !scan_per_s.is_finite() || scan_per_s <= 0.0 {
            return Err(ApeepError::InvalidConfig(format!(
                "scan rate must be > 0, got {scan_per_s}"
            )));
        }
        Ok(Self {
            buffer: Array2::zeros((output_size, width)),
            offset: 0,
            start: None,
            orientation,
            scan_per_s,
            transect: transect.into(),
        })
    }

    pub fn output_size(&self) -> usize {
        self.buffer.nrows()
    }

    /// Lines accumulated in the frame in progress.
    pub fn filled(&self) -> usize {
        self.offset
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Append a block; returns the finished frame when the buffer fills.
    pub fn push(&mut self, block: &LineBlock) -> Result<Option<AssembledFrame>> {
        let n = block.height();
        let output_size = self.output_size();
        if block.width() != self.buffer.ncols() {
            return Err(ApeepError::InvalidConfig(format!(
                "block width {} does not match frame width {}",
                block.width(),
                self.buffer.ncols()
            )));
        }
        if self.offset + n > output_size {
            return Err(ApeepError::InvalidConfig(format!(
                "block of {n} lines does not fit the {output_size}-line frame at line {}",
                self.offset
            )));
        }

        if self.offset == 0 {
            self.start = Some(block.first_line());
        }
        self.buffer
            .slice_mut(s![self.offset..self.offset + n, ..])
            .assign(&block.data);
        self.offset += n;

        if self.offset < output_size {
            return Ok(None);
        }
        self.offset = 0;

        let end = block.last_line();
        let start = self.start.take().unwrap_or_else(|| block.first_line());
        let end_line = end.line_in_file() as i64;
        let end_time = line_time(end.source.start_time, end_line, self.scan_per_s);
        let start_time = line_time(
            end.source.start_time,
            end_line - output_size as i64,
            self.scan_per_s,
        );
        let name = frame_name(start_time);

        let provenance = ImageProvenance {
            transect: self.transect.clone(),
            start,
            end,
            start_time,
            end_time,
            name,
        };

        Ok(Some(AssembledFrame {
            data: self.orientation.apply(&self.buffer),
            provenance,
            lines: output_size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_orientation_right_flips_transpose_vertically() {
        let a = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let r = Orientation::Right.apply(&a);
        assert_eq!(r, array![[3.0, 6.0], [2.0, 5.0], [1.0, 4.0]]);
    }

    #[test]
    fn test_orientation_left_flips_transpose_horizontally() {
        let a = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let l = Orientation::Left.apply(&a);
        assert_eq!(l, array![[4.0, 1.0], [5.0, 2.0], [6.0, 3.0]]);
    }

    #[test]
    fn test_line_offset_matches_apply() {
        // Column c of a right-oriented frame holds line c; left reverses.
        assert_eq!(Orientation::Right.line_offset(0, 10), 0);
        assert_eq!(Orientation::Left.line_offset(0, 10), 9);
        assert_eq!(Orientation::Left.line_offset(9, 10), 0);
    }
}
