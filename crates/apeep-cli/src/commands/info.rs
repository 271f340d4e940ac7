use std::path::PathBuf;

use anyhow::{Context, Result};
use apeep_core::consts::DEFAULT_FILE_TIME_FORMAT;
use apeep_core::io::avi::{AviReader, SUPPORTED_CODECS};
use apeep_core::stream::{list_source_files, parse_start_time};
use clap::Args;

#[derive(Args)]
pub struct InfoArgs {
    /// Directory holding the video files
    pub dir: PathBuf,

    /// Extension of the video files
    #[arg(long, default_value = "avi")]
    pub extension: String,

    /// Format of the acquisition time in file names
    #[arg(long, default_value = DEFAULT_FILE_TIME_FORMAT)]
    pub time_format: String,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let files = list_source_files(&args.dir, &args.extension)
        .with_context(|| format!("Failed to list {}", args.dir.display()))?;

    println!("Directory:   {}", args.dir.display());
    println!("Files:       {}", files.len());
    println!("Codecs:      {SUPPORTED_CODECS}");
    println!();

    let mut total_frames = 0usize;
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let start = parse_start_time(path, &args.time_format)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
            .unwrap_or_else(|_| "unparsable name".into());

        match AviReader::open(path) {
            Ok(reader) => {
                let h = &reader.header;
                total_frames += reader.frame_count();
                println!(
                    "{name}  {}x{}  {} bpp  {}  {} frames{}  start {start}",
                    h.width,
                    h.height,
                    h.bit_count,
                    h.codec,
                    reader.frame_count(),
                    if reader.is_truncated() { " (truncated)" } else { "" },
                );
            }
            Err(e) => println!("{name}  unreadable: {e}"),
        }
    }

    println!();
    println!("Total:       {total_frames} frames");
    Ok(())
}
