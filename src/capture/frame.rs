use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Pixel formats a frame can arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4 bytes per pixel, R G B A
    Rgb32,
    /// Y, U and V planes, chroma subsampled 2x2, any row/pixel stride
    Yuv420Planar,
    /// Y plane followed by interleaved V/U pairs (NV21 order)
    Yuv420SemiPlanar,
    /// Packed 4:2:2, `Y0 U Y1 V`
    Yuyv422,
}

impl PixelFormat {
    pub fn plane_count(self) -> usize {
        match self {
            Self::Rgb32 | Self::Yuyv422 => 1,
            Self::Yuv420SemiPlanar => 2,
            Self::Yuv420Planar => 3,
        }
    }
}

/// Where one plane lives inside the frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset: usize,
    /// Bytes between the starts of consecutive rows
    pub row_stride: usize,
    /// Bytes between consecutive samples within a row
    pub pixel_stride: usize,
}

impl PlaneLayout {
    pub const fn new(offset: usize, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            offset,
            row_stride,
            pixel_stride,
        }
    }

    /// Position of sample `col` in row `row`
    pub fn index(&self, row: usize, col: usize) -> usize {
        self.offset + row * self.row_stride + col * self.pixel_stride
    }

    /// [`Self::index`], or `None` when the position does not fit in `usize`
    pub fn checked_index(&self, row: usize, col: usize) -> Option<usize> {
        row.checked_mul(self.row_stride)?
            .checked_add(col.checked_mul(self.pixel_stride)?)?
            .checked_add(self.offset)
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Returns a frame buffer to whoever lent it
pub trait FrameRelease: Send + Sync {
    fn release(&self, meta: &FrameMetadata);
}

/// One captured image.
///
/// A frame is owned by exactly one component at a time and gives its
/// buffer back exactly once: either through [`Frame::release`] or, if the
/// holder forgets, when it is dropped.
pub struct Frame {
    pub data: Bytes,
    pub planes: Vec<PlaneLayout>,
    pub meta: Arc<FrameMetadata>,
    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
    releaser: Option<Arc<dyn FrameRelease>>,
}

impl Frame {
    pub fn new(data: Bytes, planes: Vec<PlaneLayout>, meta: FrameMetadata) -> Self {
        Self {
            data,
            planes,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
            releaser: None,
        }
    }

    /// Tightly packed NV21 buffer
    pub fn nv21(data: Bytes, width: u32, height: u32, sequence: u64) -> Self {
        let (w, h) = (width as usize, height as usize);
        Self::new(
            data,
            vec![PlaneLayout::new(0, w, 1), PlaneLayout::new(w * h, w, 2)],
            FrameMetadata::new(sequence, width, height, PixelFormat::Yuv420SemiPlanar),
        )
    }

    /// RGBA buffer with the given row stride in bytes
    pub fn rgb32(data: Bytes, width: u32, height: u32, row_stride: usize, sequence: u64) -> Self {
        Self::new(
            data,
            vec![PlaneLayout::new(0, row_stride, 4)],
            FrameMetadata::new(sequence, width, height, PixelFormat::Rgb32),
        )
    }

    pub fn with_releaser(mut self, releaser: Arc<dyn FrameRelease>) -> Self {
        self.releaser = Some(releaser);
        self
    }

    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Hands the buffer back to its source. Consumes the frame, so a
    /// second release cannot be expressed.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some(releaser) = self.releaser.take() {
            trace!(sequence = self.meta.sequence, "frame released");
            releaser.release(&self.meta);
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("len", &self.data.len())
            .finish()
    }
}

impl FrameMetadata {
    pub fn new(sequence: u64, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            sequence,
            width,
            height,
            format,
            device_timestamp: None,
        }
    }
}
