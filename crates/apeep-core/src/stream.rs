//! Continuous stream of scan lines read from a directory of video files.
//!
//! ISIIS scans lines, producing one continuous stream of pixel lines that
//! the camera cuts into square frames stored in successive video files.
//! [`LineStream`] hides that storage and yields fixed-size blocks of lines,
//! crossing frame and file boundaries without gaps.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consts::{DEFAULT_FILE_TIME_FORMAT, DEFAULT_STEP_SIZE, SENSOR_MAX};
use crate::error::{ApeepError, Result};
use crate::frame::{LineBlock, SourceFile};
use crate::io::avi::{AviReader, SensorChannel};

/// How source files are found, timed and decoded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Number of lines per block.
    pub block_size: usize,
    /// File extension of the video files, without the dot.
    pub extension: String,
    /// `chrono` format of the acquisition time encoded in file stems.
    pub time_format: String,
    pub channel: SensorChannel,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_STEP_SIZE,
            extension: "avi".into(),
            time_format: DEFAULT_FILE_TIME_FORMAT.into(),
            channel: SensorChannel::default(),
        }
    }
}

/// List video files in `dir`, in lexicographic (hence chronological) order.
pub fn list_source_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ApeepError::InputDirMissing(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    if files.is_empty() {
        return Err(ApeepError::NoSourceFiles(dir.to_path_buf()));
    }
    debug!(count = files.len(), dir = %dir.display(), "found video files");
    Ok(files)
}

/// Parse the acquisition start time encoded in a file stem.
pub fn parse_start_time(path: &Path, format: &str) -> Result<NaiveDateTime> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ApeepError::InvalidFileName(path.display().to_string()))?;
    NaiveDateTime::parse_from_str(stem, format)
        .map_err(|e| ApeepError::InvalidFileName(format!("{stem} ({e})")))
}

struct OpenFile {
    reader: AviReader,
    source: Arc<SourceFile>,
    frame: Option<Array2<u8>>,
    frame_index: usize,
    next_frame: usize,
    next_line: usize,
}

impl OpenFile {
    fn open(path: &Path, options: &StreamOptions) -> Result<Self> {
        let start_time = parse_start_time(path, &options.time_format)?;
        let reader = AviReader::open(path)?;
        let source = SourceFile {
            path: path.to_path_buf(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            start_time,
            lines_per_frame: reader.header.height as usize,
            width: reader.header.width as usize,
            frame_count: reader.frame_count(),
        };
        Ok(Self {
            reader,
            source: Arc::new(source),
            frame: None,
            frame_index: 0,
            next_frame: 0,
            next_line: 0,
        })
    }

    /// Make sure a decoded frame with unread lines is available.
    /// Returns `false` once the file is exhausted or unreadable.
    fn ensure_lines(&mut self, channel: SensorChannel) -> bool {
        let height = self.source.lines_per_frame;
        if self.frame.is_some() && self.next_line < height {
            return true;
        }
        if self.next_frame >= self.reader.frame_count() {
            return false;
        }
        match self.reader.read_channel(self.next_frame, channel) {
            Ok(frame) => {
                self.frame = Some(frame);
                self.frame_index = self.next_frame;
                self.next_frame += 1;
                self.next_line = 0;
                true
            }
            Err(e) => {
                warn!(
                    file = %self.source.path.display(),
                    frame = self.next_frame,
                    error = %e,
                    "cannot decode frame, skipping the rest of the file"
                );
                false
            }
        }
    }
}

/// Lazy, single-pass sequence of [`LineBlock`]s over every line of every
/// video file of a directory.
///
/// Blocks are always exactly `block_size` lines high; a trailing partial
/// block at the very end of the acquisition is dropped. Files that cannot
/// be opened or decoded are logged and skipped, so a block may then
/// contain lines of two files; its provenance is that of its last line.
pub struct LineStream {
    files: std::vec::IntoIter<PathBuf>,
    options: StreamOptions,
    current: Option<OpenFile>,
    block: Array2<f32>,
    filled: usize,
    width: usize,
    lines_per_frame: usize,
}

impl LineStream {
    /// List the video files of `dir` and open the first readable one.
    ///
    /// Fails when the directory is missing, holds no video file, none of
    /// them can be read, or `block_size` does not divide the frame height.
    pub fn open(dir: &Path, options: StreamOptions) -> Result<Self> {
        if options.block_size == 0 {
            return Err(ApeepError::InvalidConfig("block size must be > 0".into()));
        }
        let mut files = list_source_files(dir, &options.extension)?.into_iter();

        let first = loop {
            let Some(path) = files.next() else {
                return Err(ApeepError::NoSourceFiles(dir.to_path_buf()));
            };
            match OpenFile::open(&path, &options) {
                Ok(f) => break f,
                Err(e) => warn!(file = %path.display(), error = %e, "skipping video file"),
            }
        };

        let width = first.source.width;
        let lines_per_frame = first.source.lines_per_frame;
        if lines_per_frame % options.block_size != 0 {
            return Err(ApeepError::InvalidConfig(format!(
                "block size {} does not divide the frame height {}",
                options.block_size, lines_per_frame
            )));
        }

        debug!(
            file = %first.source.path.display(),
            width,
            height = lines_per_frame,
            frames = first.source.frame_count,
            "opened first video file"
        );

        Ok(Self {
            files,
            block: Array2::zeros((options.block_size, width)),
            options,
            current: Some(first),
            filled: 0,
            width,
            lines_per_frame,
        })
    }

    /// Number of sensor pixels per line.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of lines in one source frame.
    pub fn lines_per_frame(&self) -> usize {
        self.lines_per_frame
    }

    pub fn block_size(&self) -> usize {
        self.options.block_size
    }

    /// Open the next readable file with the same geometry as the first.
    fn advance_file(&mut self) -> Option<OpenFile> {
        for path in self.files.by_ref() {
            match OpenFile::open(&path, &self.options) {
                Ok(f)
                    if f.source.width == self.width
                        && f.source.lines_per_frame == self.lines_per_frame =>
                {
                    debug!(file = %path.display(), frames = f.source.frame_count, "open video file");
                    return Some(f);
                }
                Ok(f) => warn!(
                    file = %path.display(),
                    width = f.source.width,
                    height = f.source.lines_per_frame,
                    "frame size differs from the first file, skipping"
                ),
                Err(e) => warn!(file = %path.display(), error = %e, "skipping video file"),
            }
        }
        None
    }
}

impl Iterator for LineStream {
    type Item = LineBlock;

    fn next(&mut self) -> Option<LineBlock> {
        let n = self.options.block_size;
        let channel = self.options.channel;

        loop {
            let file = match self.current.as_mut() {
                Some(f) => f,
                None => {
                    self.current = Some(self.advance_file()?);
                    continue;
                }
            };

            if !file.ensure_lines(channel) {
                debug!(file = %file.source.path.display(), "close video file");
                self.current = None;
                if let Some(next) = self.advance_file() {
                    self.current = Some(next);
                    continue;
                }
                if self.filled > 0 {
                    debug!(lines = self.filled, "dropping incomplete final block");
                    self.filled = 0;
                }
                return None;
            }

            let Some(frame) = file.frame.as_ref() else {
                continue;
            };
            let available = self.lines_per_frame - file.next_line;
            let take = available.min(n - self.filled);
            let src = frame.slice(s![file.next_line..file.next_line + take, ..]);
            self.block
                .slice_mut(s![self.filled..self.filled + take, ..])
                .zip_mut_with(&src, |dst, &v| *dst = v as f32 / SENSOR_MAX);
            self.filled += take;
            file.next_line += take;

            if self.filled == n {
                self.filled = 0;
                return Some(LineBlock {
                    data: self.block.clone(),
                    source: Arc::clone(&file.source),
                    frame_index: file.frame_index,
                    line_index: file.next_line - 1,
                });
            }
        }
    }
}
