pub mod capture;
pub mod controller;
pub mod detect;
pub mod error;
pub mod geometry;
pub mod pipeline;

use std::path::{Path, PathBuf};

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use controller::{ScanController, ScanListener, ScanState, ViewState};
pub use error::{Result, ScanError};

/// Prefix for environment overrides, e.g. `CODESCAN__CAPTURE__FPS=15`
pub const ENV_PREFIX: &str = "CODESCAN";

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub scanner: ScannerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Device node; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// Frames the consumer may hold at once
    pub max_images: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Read-only directory the model files ship in
    pub asset_dir: PathBuf,
    /// Writable directory the detector loads them from
    pub model_dir: PathBuf,
    pub model_files: Vec<String>,
    /// Side of the square metering region around a tap, in view pixels
    pub focus_tap_size: f32,
    pub max_digital_zoom: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: String::new(),
                width: 1280,
                height: 720,
                fps: 30,
                format: PixelFormat::Yuyv422,
                buffer_count: 4,
                max_images: 2,
            },
            scanner: ScannerConfig {
                asset_dir: PathBuf::from("assets/models"),
                model_dir: std::env::temp_dir().join("codescan").join("models"),
                model_files: Vec::new(),
                focus_tap_size: 100.0,
                max_digital_zoom: 4.0,
            },
            logging: LoggingConfig {
                filter: "codescan=debug".into(),
            },
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `CODESCAN__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            debug!(path = %path.display(), "loading config file");
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        let loaded: Config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.width == 0 || capture.height == 0 {
            return Err(ScanError::InvalidConfig(format!(
                "capture size {}x{} must be non-zero",
                capture.width, capture.height
            )));
        }
        if capture.fps == 0 {
            return Err(ScanError::InvalidConfig("capture fps must be non-zero".into()));
        }
        if capture.buffer_count == 0 || capture.max_images == 0 {
            return Err(ScanError::InvalidConfig(
                "buffer_count and max_images must be at least 1".into(),
            ));
        }
        if !(self.scanner.focus_tap_size > 0.0) {
            return Err(ScanError::InvalidConfig("focus_tap_size must be positive".into()));
        }
        if !(self.scanner.max_digital_zoom >= 1.0) {
            return Err(ScanError::InvalidConfig("max_digital_zoom must be at least 1".into()));
        }
        Ok(())
    }
}
