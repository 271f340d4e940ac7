use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApeepError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input directory {0} does not exist")]
    InputDirMissing(PathBuf),

    #[error("No video files found in {0}")]
    NoSourceFiles(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Unsupported video codec: {0}")]
    UnsupportedCodec(String),

    #[error("Cannot parse acquisition time from file name: {0}")]
    InvalidFileName(String),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Empty line sequence")]
    EmptySequence,

    #[error("Detection backend error: {0}")]
    Detector(String),

    #[error("Environmental data error: {0}")]
    Environment(String),
}

impl ApeepError {
    /// Whether the error should abort the run rather than skip one source file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InputDirMissing(_) | Self::NoSourceFiles(_) | Self::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ApeepError>;
