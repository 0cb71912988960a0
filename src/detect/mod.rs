//! Detector boundary: anything that turns a packed image into decoded codes

pub mod assets;
pub mod qr;
pub mod still;

use std::fmt;
use std::path::PathBuf;

use crate::capture::PackedImage;
use crate::error::DetectorError;
use crate::geometry::Rect;

pub use assets::ModelAssets;
pub use qr::QrDetector;
pub use still::StillImageDecoder;

/// One decoded code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodeResult {
    pub text: String,
    /// Bounds in the coordinate space of the frame that produced it
    pub rect: Rect,
}

impl DecodeResult {
    pub fn new(text: impl Into<String>, rect: Rect) -> Self {
        Self {
            text: text.into(),
            rect,
        }
    }
}

impl fmt::Display for DecodeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(text: {}, rect: [{}, {}, {}, {}])",
            self.text, self.rect.left, self.rect.top, self.rect.right, self.rect.bottom
        )
    }
}

/// Stateful code detector.
///
/// A detector is only ever driven from one thread at a time and need not be
/// reentrant. Calling [`Detector::decode`] before a successful
/// [`Detector::initialize`] must return an empty list, not fail.
pub trait Detector: Send {
    fn initialize(&mut self, model_paths: &[PathBuf]) -> Result<(), DetectorError>;

    fn is_initialized(&self) -> bool;

    /// Results in the detector's natural order
    fn decode(&mut self, image: &PackedImage) -> Result<Vec<DecodeResult>, DetectorError>;

    fn release(&mut self);
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn initialize(&mut self, model_paths: &[PathBuf]) -> Result<(), DetectorError> {
        (**self).initialize(model_paths)
    }

    fn is_initialized(&self) -> bool {
        (**self).is_initialized()
    }

    fn decode(&mut self, image: &PackedImage) -> Result<Vec<DecodeResult>, DetectorError> {
        (**self).decode(image)
    }

    fn release(&mut self) {
        (**self).release()
    }
}
