use std::path::PathBuf;

use thiserror::Error;

use crate::capture::PixelFormat;

/// Malformed frame geometry or layout; the frame is dropped, scanning goes on
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid frame geometry {width}x{height} for {format:?}")]
    InvalidGeometry {
        width: u32,
        height: u32,
        format: PixelFormat,
    },

    #[error("{format:?} frame needs {expected} planes, got {actual}")]
    PlaneCount {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("plane {plane} too short: row {row} needs {needed} bytes, buffer has {available}")]
    PlaneTooShort {
        plane: usize,
        row: usize,
        needed: usize,
        available: usize,
    },

    #[error("plane {plane} rows overlap: stride {row_stride} is shorter than a {span} byte row")]
    RowStride {
        plane: usize,
        row_stride: usize,
        span: usize,
    },
}

/// Failures reported by a [`Detector`](crate::detect::Detector)
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("model asset missing: {}", .0.display())]
    MissingModel(PathBuf),

    #[error("detector initialization failed: {0}")]
    Initialization(String),

    #[error("detector not initialized")]
    NotInitialized,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level error type
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("decode scheduler is shut down")]
    ShutDown,
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
