use chrono::NaiveDateTime;

use crate::assemble::{line_time, Orientation};
use crate::frame::{ImageProvenance, LineLocation};

/// Where and when a column of an output frame was scanned.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionPoint {
    /// Source video file name.
    pub file: String,
    pub frame_index: usize,
    pub line_in_frame: usize,
    pub time: NaiveDateTime,
}

/// Map column `col` of a reoriented frame of `lines` columns back to the
/// scan line it shows.
///
/// A frame holds the lines of at most two files: the tail of the file it
/// started in and the head of the file it ended in. Counting back from the
/// last line, a column belongs to the last file when it lies within the
/// lines read from that file so far, and to the first file otherwise.
pub fn locate_column(
    provenance: &ImageProvenance,
    orientation: Orientation,
    col: usize,
    lines: usize,
    scan_per_s: f64,
) -> AcquisitionPoint {
    let col = col.min(lines.saturating_sub(1));
    let offset = orientation.line_offset(col, lines);
    let from_end = lines - 1 - offset;
    let end = &provenance.end;
    let end_line = end.line_in_file();

    let (location, line) = if !provenance.spans_two_files() || from_end <= end_line {
        (end, end_line as i64 - from_end as i64)
    } else {
        let start = &provenance.start;
        (start, (start.line_in_file() + offset) as i64)
    };
    point(location, line, scan_per_s)
}

fn point(location: &LineLocation, line: i64, scan_per_s: f64) -> AcquisitionPoint {
    let source = &location.source;
    let per_frame = source.lines_per_frame as i64;
    AcquisitionPoint {
        file: source.name.clone(),
        frame_index: line.div_euclid(per_frame) as usize,
        line_in_frame: line.rem_euclid(per_frame) as usize,
        time: line_time(source.start_time, line, scan_per_s),
    }
}
