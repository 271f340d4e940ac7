use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use ndarray::Array2;

use crate::error::{ApeepError, Result};
use crate::io::avi::{AVI_FORM, RIFF_MAGIC};

const MAIN_HEADER_SIZE: u32 = 56;
const STREAM_HEADER_SIZE: u32 = 56;
const BITMAP_INFO_SIZE: u32 = 40;
const PALETTE_SIZE: u32 = 256 * 4;

// Byte offsets of the fields patched by `finalize`.
const RIFF_SIZE_OFFSET: u64 = 4;
const TOTAL_FRAMES_OFFSET: u64 = 48;
const STREAM_LENGTH_OFFSET: u64 = 140;
const STRF_DATA_OFFSET: u64 = 172;

/// Writes an uncompressed, bottom-up DIB AVI file with one video stream.
///
/// Grey frames are replicated into every colour channel, so any sensor
/// channel reads them back unchanged.
pub struct AviWriter {
    writer: BufWriter<File>,
    width: u32,
    height: u32,
    bit_count: u16,
    movi_size_offset: u64,
    movi_bytes: u64,
    frames_written: u32,
}

impl AviWriter {
    /// Create a new AVI file and write its headers.
    /// `bit_count` is 8 (grey palette) or 24 (BGR).
    pub fn create(path: &Path, width: u32, height: u32, bit_count: u16) -> Result<Self> {
        if !matches!(bit_count, 8 | 24) {
            return Err(ApeepError::UnsupportedCodec(format!(
                "{bit_count} bits per pixel"
            )));
        }
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let strf_len = BITMAP_INFO_SIZE + if bit_count == 8 { PALETTE_SIZE } else { 0 };
        let strl_size = 4 + (8 + STREAM_HEADER_SIZE) + (8 + strf_len);
        let hdrl_size = 4 + (8 + MAIN_HEADER_SIZE) + (8 + strl_size);
        let stride = row_stride(width, bit_count);
        let frame_bytes = stride * height;

        writer.write_all(RIFF_MAGIC)?;
        writer.write_all(&0u32.to_le_bytes())?;
        writer.write_all(AVI_FORM)?;

        writer.write_all(b"LIST")?;
        writer.write_all(&hdrl_size.to_le_bytes())?;
        writer.write_all(b"hdrl")?;

        // Main header
        writer.write_all(b"avih")?;
        writer.write_all(&MAIN_HEADER_SIZE.to_le_bytes())?;
        for value in [
            0u32,        // microseconds per frame
            0,           // max bytes per second
            0,           // padding granularity
            0x10,        // flags: has index
            0,           // total frames (patched)
            0,           // initial frames
            1,           // streams
            frame_bytes, // suggested buffer size
            width,
            height,
            0,
            0,
            0,
            0,
        ] {
            writer.write_all(&value.to_le_bytes())?;
        }

        writer.write_all(b"LIST")?;
        writer.write_all(&strl_size.to_le_bytes())?;
        writer.write_all(b"strl")?;

        // Stream header
        writer.write_all(b"strh")?;
        writer.write_all(&STREAM_HEADER_SIZE.to_le_bytes())?;
        writer.write_all(b"vids")?;
        writer.write_all(&0u32.to_le_bytes())?; // handler
        writer.write_all(&0u32.to_le_bytes())?; // flags
        writer.write_all(&0u16.to_le_bytes())?; // priority
        writer.write_all(&0u16.to_le_bytes())?; // language
        for value in [0u32, 1, 14, 0, 0, frame_bytes, u32::MAX, 0] {
            // initial frames, scale, rate, start, length (patched),
            // suggested buffer size, quality, sample size
            writer.write_all(&value.to_le_bytes())?;
        }
        for value in [0i16, 0, width as i16, height as i16] {
            writer.write_all(&value.to_le_bytes())?;
        }

        // Stream format
        writer.write_all(b"strf")?;
        writer.write_all(&strf_len.to_le_bytes())?;
        writer.write_all(&BITMAP_INFO_SIZE.to_le_bytes())?;
        writer.write_all(&(width as i32).to_le_bytes())?;
        writer.write_all(&(height as i32).to_le_bytes())?;
        writer.write_all(&1u16.to_le_bytes())?; // planes
        writer.write_all(&bit_count.to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?; // BI_RGB
        writer.write_all(&frame_bytes.to_le_bytes())?;
        for _ in 0..4 {
            writer.write_all(&0u32.to_le_bytes())?;
        }
        if bit_count == 8 {
            for level in 0..=255u8 {
                writer.write_all(&[level, level, level, 0])?;
            }
        }

        let movi_size_offset = STRF_DATA_OFFSET + strf_len as u64 + 4;
        writer.write_all(b"LIST")?;
        writer.write_all(&0u32.to_le_bytes())?;
        writer.write_all(b"movi")?;
        debug_assert_eq!(writer.stream_position()?, movi_size_offset + 8);

        Ok(Self {
            writer,
            width,
            height,
            bit_count,
            movi_size_offset,
            movi_bytes: 4,
            frames_written: 0,
        })
    }

    /// Write one grey frame, rows top first.
    pub fn write_grey_frame(&mut self, frame: &Array2<u8>) -> Result<()> {
        let (h, w) = frame.dim();
        if h != self.height as usize || w != self.width as usize {
            return Err(ApeepError::InvalidVideo(format!(
                "frame is {w}x{h}, file is {}x{}",
                self.width, self.height
            )));
        }

        let stride = row_stride(self.width, self.bit_count) as usize;
        let bytes_per_pixel = (self.bit_count / 8) as usize;
        let mut raw = vec![0u8; stride * h];
        for row in 0..h {
            // Bottom-up DIB: the last image row comes first.
            let dst = &mut raw[(h - 1 - row) * stride..];
            for col in 0..w {
                let v = frame[[row, col]];
                for b in 0..bytes_per_pixel {
                    dst[col * bytes_per_pixel + b] = v;
                }
            }
        }
        self.write_raw_frame(&raw)
    }

    /// Write a single raw DIB frame chunk.
    pub fn write_raw_frame(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(b"00db")?;
        self.writer.write_all(&(data.len() as u32).to_le_bytes())?;
        self.writer.write_all(data)?;
        if data.len() % 2 == 1 {
            self.writer.write_all(&[0])?;
        }
        self.movi_bytes += 8 + data.len() as u64 + (data.len() as u64 % 2);
        self.frames_written += 1;
        Ok(())
    }

    /// Patch chunk sizes and frame counts, then flush.
    pub fn finalize(mut self) -> Result<()> {
        let end = self.writer.stream_position()?;
        let riff_size = (end - 8) as u32;

        self.writer.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
        self.writer.write_all(&riff_size.to_le_bytes())?;
        self.writer.seek(SeekFrom::Start(TOTAL_FRAMES_OFFSET))?;
        self.writer.write_all(&self.frames_written.to_le_bytes())?;
        self.writer.seek(SeekFrom::Start(STREAM_LENGTH_OFFSET))?;
        self.writer.write_all(&self.frames_written.to_le_bytes())?;
        self.writer.seek(SeekFrom::Start(self.movi_size_offset))?;
        self.writer.write_all(&(self.movi_bytes as u32).to_le_bytes())?;
        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;
        Ok(())
    }
}

fn row_stride(width: u32, bit_count: u16) -> u32 {
    (width * bit_count as u32).div_ceil(32) * 4
}
