use std::fs::File;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use image::ImageFormat;
use memmap2::Mmap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ApeepError, Result};

pub const RIFF_MAGIC: &[u8; 4] = b"RIFF";
pub const AVI_FORM: &[u8; 4] = b"AVI ";
pub const AVIX_FORM: &[u8; 4] = b"AVIX";
const CHUNK_HEADER_SIZE: usize = 8;
const BI_RGB: u32 = 0;

/// Payloads that can be decoded, for error messages.
pub const SUPPORTED_CODECS: &str = "uncompressed DIB (8, 24, 32 bpp), MJPEG";

/// Colour channel carrying the sensor data.
///
/// ISIIS cameras write a single grey channel into an otherwise
/// non-standard colour encoding, so the data is extracted from one
/// channel instead of being converted to luminance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorChannel {
    #[default]
    Red,
    Green,
    Blue,
}

impl SensorChannel {
    /// Byte offset of the channel inside a BGR(A) DIB pixel.
    fn dib_offset(self) -> usize {
        match self {
            Self::Blue => 0,
            Self::Green => 1,
            Self::Red => 2,
        }
    }

    /// Index of the channel inside an RGB pixel.
    fn rgb_index(self) -> usize {
        match self {
            Self::Red => 0,
            Self::Green => 1,
            Self::Blue => 2,
        }
    }
}

/// Payload encoding of the video frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Codec {
    /// Raw DIB rows, 4-byte aligned.
    Uncompressed,
    /// Motion-JPEG: one JPEG image per frame.
    Mjpeg,
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uncompressed => write!(f, "uncompressed"),
            Self::Mjpeg => write!(f, "MJPEG"),
        }
    }
}

/// Video stream description, from the `avih`, `strh` and `strf` chunks.
#[derive(Clone, Debug)]
pub struct AviHeader {
    pub width: u32,
    pub height: u32,
    pub bit_count: u16,
    pub codec: Codec,
    /// DIB rows are stored top row first (negative `biHeight`).
    pub top_down: bool,
    /// Frame count declared by the main header.
    pub declared_frames: u32,
    pub micro_sec_per_frame: u32,
}

impl AviHeader {
    /// Bytes per DIB row, including the padding to a 4-byte boundary.
    pub fn row_stride(&self) -> usize {
        (self.width as usize * self.bit_count as usize).div_ceil(32) * 4
    }

    /// Minimum byte size of an uncompressed frame.
    pub fn frame_byte_size(&self) -> usize {
        self.row_stride() * self.height as usize
    }
}

#[derive(Clone, Copy, Debug)]
struct FrameChunk {
    offset: usize,
    len: usize,
}

/// Memory-mapped AVI file reader.
pub struct AviReader {
    mmap: Mmap,
    pub header: AviHeader,
    frames: Vec<FrameChunk>,
    truncated: bool,
}

impl AviReader {
    /// Open an AVI file, parse its headers and index its video frames.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < 12 || &mmap[0..4] != RIFF_MAGIC || &mmap[8..12] != AVI_FORM {
            return Err(ApeepError::InvalidVideo(format!(
                "{}: missing RIFF/AVI signature",
                path.display()
            )));
        }

        let mut state = ParseState::default();
        parse_riff_sequence(&mmap, &mut state)?;

        let header = state.finish(path)?;
        if state.truncated {
            warn!(
                file = %path.display(),
                frames = state.frames.len(),
                declared = header.declared_frames,
                "AVI file is truncated"
            );
        }

        Ok(Self {
            mmap,
            header,
            frames: state.frames,
            truncated: state.truncated,
        })
    }

    /// Number of complete video frames found in the file.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Whether a chunk ran past the end of the file.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Decode one frame and return the sensor channel as 8-bit rows,
    /// top row first.
    pub fn read_channel(&self, index: usize, channel: SensorChannel) -> Result<Array2<u8>> {
        let chunk = self.frames.get(index).ok_or_else(|| {
            ApeepError::InvalidVideo(format!(
                "frame index {index} out of range (total: {})",
                self.frames.len()
            ))
        })?;
        let raw = &self.mmap[chunk.offset..chunk.offset + chunk.len];

        match self.header.codec {
            Codec::Uncompressed => decode_dib(raw, &self.header, channel),
            Codec::Mjpeg => decode_jpeg(raw, &self.header, channel),
        }
    }

    /// Iterator over the sensor channel of all frames.
    pub fn frames(&self, channel: SensorChannel) -> impl Iterator<Item = Result<Array2<u8>>> + '_ {
        (0..self.frame_count()).map(move |i| self.read_channel(i, channel))
    }
}

#[derive(Default)]
struct ParseState {
    width: u32,
    height: i32,
    bit_count: u16,
    compression: u32,
    declared_frames: u32,
    micro_sec_per_frame: u32,
    stream_count: usize,
    video_stream: Option<usize>,
    current_is_video: bool,
    has_format: bool,
    frames: Vec<FrameChunk>,
    empty_frames: usize,
    truncated: bool,
}

impl ParseState {
    fn finish(&self, path: &Path) -> Result<AviHeader> {
        if self.video_stream.is_none() || !self.has_format {
            return Err(ApeepError::InvalidVideo(format!(
                "{}: no video stream",
                path.display()
            )));
        }
        let height = self.height.unsigned_abs();
        if self.width == 0 || height == 0 {
            return Err(ApeepError::InvalidVideo(format!(
                "{}: invalid dimensions {}x{}",
                path.display(),
                self.width,
                height
            )));
        }

        let codec = codec_from_compression(self.compression)?;
        if codec == Codec::Uncompressed && !matches!(self.bit_count, 8 | 24 | 32) {
            return Err(ApeepError::UnsupportedCodec(format!(
                "{} bits per pixel (supported: {SUPPORTED_CODECS})",
                self.bit_count
            )));
        }
        if self.empty_frames > 0 {
            debug!(
                file = %path.display(),
                empty = self.empty_frames,
                "skipped empty (dropped) video frames"
            );
        }

        Ok(AviHeader {
            width: self.width,
            height,
            bit_count: self.bit_count,
            codec,
            top_down: self.height < 0,
            declared_frames: self.declared_frames,
            micro_sec_per_frame: self.micro_sec_per_frame,
        })
    }
}

fn codec_from_compression(compression: u32) -> Result<Codec> {
    if compression == BI_RGB {
        return Ok(Codec::Uncompressed);
    }
    let fourcc = compression.to_le_bytes();
    match &fourcc {
        b"Y800" | b"Y8  " | b"GREY" | b"DIB " | b"RGB " => Ok(Codec::Uncompressed),
        b"MJPG" | b"mjpg" => Ok(Codec::Mjpeg),
        _ => Err(ApeepError::UnsupportedCodec(format!(
            "{} (supported: {SUPPORTED_CODECS})",
            String::from_utf8_lossy(&fourcc)
        ))),
    }
}

/// Walk the top-level `RIFF` chunks (`AVI ` then any OpenDML `AVIX`).
fn parse_riff_sequence(buf: &[u8], state: &mut ParseState) -> Result<()> {
    let mut pos = 0;
    while pos + CHUNK_HEADER_SIZE + 4 <= buf.len() {
        if &buf[pos..pos + 4] != RIFF_MAGIC {
            break;
        }
        let size = LittleEndian::read_u32(&buf[pos + 4..pos + 8]) as usize;
        let form = &buf[pos + 8..pos + 12];
        let data_end = pos + CHUNK_HEADER_SIZE + size;
        if data_end > buf.len() {
            state.truncated = true;
        }
        if form == AVI_FORM || form == AVIX_FORM {
            walk_chunks(buf, pos + 12, data_end.min(buf.len()), state)?;
        }
        if state.truncated {
            break;
        }
        pos = data_end + (size & 1);
    }
    Ok(())
}

fn walk_chunks(buf: &[u8], start: usize, end: usize, state: &mut ParseState) -> Result<()> {
    let mut pos = start;
    while pos + CHUNK_HEADER_SIZE <= end {
        let id: [u8; 4] = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
        let size = LittleEndian::read_u32(&buf[pos + 4..pos + 8]) as usize;
        let data_start = pos + CHUNK_HEADER_SIZE;
        let data_end = data_start + size;

        if data_end > end {
            // The last chunk runs past the end of the file: keep what was
            // indexed so far and stop.
            state.truncated = true;
            if &id == b"LIST" && data_start + 4 <= end {
                walk_chunks(buf, data_start + 4, end, state)?;
            }
            return Ok(());
        }

        let data = &buf[data_start..data_end];
        match &id {
            b"LIST" if size >= 4 => {
                let list_type = &data[0..4];
                if list_type == b"strl" {
                    state.current_is_video = false;
                }
                walk_chunks(buf, data_start + 4, data_end, state)?;
                if list_type == b"strl" {
                    state.stream_count += 1;
                }
            }
            b"avih" => parse_main_header(data, state),
            b"strh" => parse_stream_header(data, state),
            b"strf" => {
                if state.current_is_video && !state.has_format {
                    parse_bitmap_info(data, state)?;
                }
            }
            _ => {
                if is_video_chunk(&id, state.video_stream) {
                    if size == 0 {
                        state.empty_frames += 1;
                    } else {
                        state.frames.push(FrameChunk {
                            offset: data_start,
                            len: size,
                        });
                    }
                }
            }
        }

        pos = data_end + (size & 1);
    }
    Ok(())
}

fn parse_main_header(data: &[u8], state: &mut ParseState) {
    if data.len() >= 20 {
        state.micro_sec_per_frame = LittleEndian::read_u32(&data[0..4]);
        state.declared_frames = LittleEndian::read_u32(&data[16..20]);
    }
}

fn parse_stream_header(data: &[u8], state: &mut ParseState) {
    if data.len() >= 4 && &data[0..4] == b"vids" && state.video_stream.is_none() {
        state.video_stream = Some(state.stream_count);
        state.current_is_video = true;
    }
}

fn parse_bitmap_info(data: &[u8], state: &mut ParseState) -> Result<()> {
    if data.len() < 20 {
        return Err(ApeepError::InvalidVideo(
            "stream format chunk too small for BITMAPINFOHEADER".into(),
        ));
    }
    state.width = LittleEndian::read_i32(&data[4..8]).unsigned_abs();
    state.height = LittleEndian::read_i32(&data[8..12]);
    state.bit_count = LittleEndian::read_u16(&data[14..16]);
    state.compression = LittleEndian::read_u32(&data[16..20]);
    state.has_format = true;
    Ok(())
}

/// Frame chunks are named `NNdb` (DIB) or `NNdc` (compressed) where `NN`
/// is the two-digit stream number.
fn is_video_chunk(id: &[u8; 4], video_stream: Option<usize>) -> bool {
    let Some(stream) = video_stream else {
        return false;
    };
    if !(&id[2..4] == b"db" || &id[2..4] == b"dc") {
        return false;
    }
    let expected = format!("{stream:02}");
    &id[0..2] == expected.as_bytes()
}

fn decode_dib(raw: &[u8], header: &AviHeader, channel: SensorChannel) -> Result<Array2<u8>> {
    let width = header.width as usize;
    let height = header.height as usize;
    let stride = header.row_stride();
    if raw.len() < stride * height {
        return Err(ApeepError::InvalidVideo(format!(
            "frame chunk has {} bytes, expected {}",
            raw.len(),
            stride * height
        )));
    }

    let bytes_per_pixel = (header.bit_count / 8) as usize;
    let offset = if bytes_per_pixel == 1 {
        0
    } else {
        channel.dib_offset()
    };

    let mut data = Array2::<u8>::zeros((height, width));
    for row in 0..height {
        let src_row = if header.top_down { row } else { height - 1 - row };
        let line = &raw[src_row * stride..src_row * stride + width * bytes_per_pixel];
        for (col, px) in line.chunks_exact(bytes_per_pixel).enumerate() {
            data[[row, col]] = px[offset];
        }
    }
    Ok(data)
}

fn decode_jpeg(raw: &[u8], header: &AviHeader, channel: SensorChannel) -> Result<Array2<u8>> {
    let img = image::load_from_memory_with_format(raw, ImageFormat::Jpeg)?.to_rgb8();
    let (w, h) = img.dimensions();
    if w != header.width || h != header.height {
        return Err(ApeepError::InvalidVideo(format!(
            "JPEG frame is {w}x{h}, stream declares {}x{}",
            header.width, header.height
        )));
    }

    let index = channel.rgb_index();
    let mut data = Array2::<u8>::zeros((h as usize, w as usize));
    for (x, y, px) in img.enumerate_pixels() {
        data[[y as usize, x as usize]] = px.0[index];
    }
    Ok(data)
}
