//! Decoding of still images outside the live pipeline

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;
use tracing::{info, instrument, warn};

use super::{DecodeResult, Detector};
use crate::capture::PackedImage;
use crate::error::Result;

/// Runs a detector over image files or RGBA buffers, one at a time
pub struct StillImageDecoder<D: Detector> {
    detector: D,
}

impl<D: Detector> StillImageDecoder<D> {
    pub fn new(detector: D) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    /// Loads and decodes one file, surfacing I/O and format errors
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn try_decode_path(&mut self, path: &Path) -> Result<Vec<DecodeResult>> {
        let start = Instant::now();
        let rgba = image::open(path)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        info!(width, height, load_ms = start.elapsed().as_millis() as u64, "loaded image");
        let image = PackedImage::rgba(Bytes::from(rgba.into_raw()), width, height);
        Ok(self.detector.decode(&image)?)
    }

    /// Like [`Self::try_decode_path`], but any failure is logged and
    /// reported as "nothing found". An empty path decodes to nothing.
    pub fn decode_path(&mut self, path: &Path) -> Vec<DecodeResult> {
        if path.as_os_str().is_empty() {
            return Vec::new();
        }
        match self.try_decode_path(path) {
            Ok(results) => results,
            Err(e) => {
                warn!("decode of {} failed: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    pub fn decode_rgba(&mut self, rgba: Bytes, width: u32, height: u32) -> Vec<DecodeResult> {
        let image = PackedImage::rgba(rgba, width, height);
        self.detector.decode(&image).unwrap_or_else(|e| {
            warn!("decode of {}x{} buffer failed: {}", width, height, e);
            Vec::new()
        })
    }

    /// Decodes each distinct path once, in first-seen order
    pub fn decode_batch(&mut self, paths: &[PathBuf]) -> Vec<(PathBuf, Vec<DecodeResult>)> {
        let mut seen = HashSet::new();
        paths
            .iter()
            .filter(|p| seen.insert(p.as_path()))
            .map(|p| (p.clone(), self.decode_path(p)))
            .collect()
    }

    pub fn into_inner(self) -> D {
        self.detector
    }
}
