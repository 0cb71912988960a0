//! QR detection on the luma plane with rqrr

use std::path::PathBuf;

use rqrr::PreparedImage;
use tracing::{debug, info, instrument};

use super::{DecodeResult, Detector};
use crate::capture::PackedImage;
use crate::error::DetectorError;
use crate::geometry::Rect;

/// Built-in [`Detector`] backed by `rqrr`.
///
/// rqrr needs no model files; `initialize` still checks that any paths it
/// is given exist so configuration mistakes surface the same way they
/// would with a model-based detector.
#[derive(Debug, Default)]
pub struct QrDetector {
    initialized: bool,
}

impl QrDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

fn bounds_rect(bounds: &[rqrr::Point; 4]) -> Rect {
    let left = bounds.iter().map(|p| p.x).min().unwrap_or(0);
    let top = bounds.iter().map(|p| p.y).min().unwrap_or(0);
    let right = bounds.iter().map(|p| p.x).max().unwrap_or(0);
    let bottom = bounds.iter().map(|p| p.y).max().unwrap_or(0);
    Rect::new(left, top, right, bottom)
}

impl Detector for QrDetector {
    fn initialize(&mut self, model_paths: &[PathBuf]) -> Result<(), DetectorError> {
        if self.initialized {
            return Ok(());
        }
        if let Some(missing) = model_paths.iter().find(|p| !p.exists()) {
            return Err(DetectorError::MissingModel(missing.clone()));
        }
        self.initialized = true;
        info!(models = model_paths.len(), "qr detector ready");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[instrument(skip(self, image), fields(w = image.width, h = image.height))]
    fn decode(&mut self, image: &PackedImage) -> Result<Vec<DecodeResult>, DetectorError> {
        if !self.initialized {
            return Ok(Vec::new());
        }
        let (w, h) = (image.width as usize, image.height as usize);
        let luma = image.luma();
        if luma.len() < w * h {
            return Err(DetectorError::Decode(format!(
                "luma plane has {} bytes, {}x{} needs {}",
                luma.len(),
                w,
                h,
                w * h
            )));
        }

        let mut prepared = PreparedImage::prepare_from_greyscale(w, h, |x, y| luma[y * w + x]);
        let grids = prepared.detect_grids();
        let mut results = Vec::with_capacity(grids.len());
        for grid in grids {
            match grid.decode() {
                Ok((_, content)) => results.push(DecodeResult::new(content, bounds_rect(&grid.bounds))),
                Err(e) => debug!("grid found but not decodable: {}", e),
            }
        }
        Ok(results)
    }

    fn release(&mut self) {
        if self.initialized {
            debug!("qr detector released");
        }
        self.initialized = false;
    }
}
