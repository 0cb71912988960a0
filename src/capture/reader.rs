//! Bounded latest-frame reader: the buffer pool between a camera driver
//! thread and the decode pipeline

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use tracing::{debug, trace, warn};

use super::frame::{Frame, FrameMetadata, FrameRelease, PixelFormat, PlaneLayout};
use super::source::{FrameCallback, FrameSource};
use crate::geometry::Rect;

/// Snapshot of reader counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub published: u64,
    pub acquired: u64,
    pub released: u64,
    /// Overwritten before anyone acquired them, or published while disabled
    pub dropped: u64,
    /// Acquire attempts refused because every buffer was still held
    pub starved: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    dropped: AtomicU64,
    starved: AtomicU64,
}

struct RawImage {
    data: Bytes,
    planes: Vec<PlaneLayout>,
    meta: FrameMetadata,
    timestamp: Instant,
}

struct ReaderState {
    enabled: bool,
    latest: Option<RawImage>,
    outstanding: usize,
    sequence: u64,
    callback: Option<FrameCallback>,
    crop_region: Option<Rect>,
}

struct Shared {
    state: Mutex<ReaderState>,
    counters: CachePadded<Counters>,
    max_images: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FrameRelease for Shared {
    fn release(&self, meta: &FrameMetadata) {
        let mut state = self.lock();
        if state.outstanding == 0 {
            warn!(sequence = meta.sequence, "release without a matching acquire");
        } else {
            state.outstanding -= 1;
        }
        self.counters.released.fetch_add(1, Ordering::Relaxed);
        trace!(sequence = meta.sequence, outstanding = state.outstanding, "buffer returned");
    }
}

/// In-memory [`FrameSource`] with at most `max_images` frames out at once.
///
/// A producer calls [`FrameReader::publish`]; the newest unconsumed image
/// wins. Frames handed out carry a release hook that returns their buffer
/// to the reader.
#[derive(Clone)]
pub struct FrameReader {
    shared: Arc<Shared>,
}

impl FrameReader {
    pub fn new(max_images: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ReaderState {
                    enabled: false,
                    latest: None,
                    outstanding: 0,
                    sequence: 0,
                    callback: None,
                    crop_region: None,
                }),
                counters: CachePadded::new(Counters::default()),
                max_images: max_images.max(1),
            }),
        }
    }

    /// Producer side: offers a new image. Returns its sequence number, or
    /// `None` if the reader is disabled.
    pub fn publish(
        &self,
        data: Bytes,
        planes: Vec<PlaneLayout>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Option<u64> {
        let counters = &self.shared.counters;
        let (sequence, delivery) = {
            let mut state = self.shared.lock();
            if !state.enabled {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            state.sequence += 1;
            let sequence = state.sequence;
            let raw = RawImage {
                data,
                planes,
                meta: FrameMetadata::new(sequence, width, height, format),
                timestamp: Instant::now(),
            };
            if state.latest.replace(raw).is_some() {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            counters.published.fetch_add(1, Ordering::Relaxed);

            let delivery = match state.callback.clone() {
                Some(callback) => self.take_latest(&mut state).map(|frame| (callback, frame)),
                None => None,
            };
            (sequence, delivery)
        };

        // callback runs outside the lock: it may release frames
        if let Some((callback, frame)) = delivery {
            callback(frame);
        }
        Some(sequence)
    }

    /// Publishes a tightly packed NV21 image
    pub fn publish_nv21(&self, data: Bytes, width: u32, height: u32) -> Option<u64> {
        let (w, h) = (width as usize, height as usize);
        self.publish(
            data,
            vec![PlaneLayout::new(0, w, 1), PlaneLayout::new(w * h, w, 2)],
            width,
            height,
            PixelFormat::Yuv420SemiPlanar,
        )
    }

    fn take_latest(&self, state: &mut ReaderState) -> Option<Frame> {
        if state.latest.is_none() {
            return None;
        }
        if state.outstanding >= self.shared.max_images {
            self.shared.counters.starved.fetch_add(1, Ordering::Relaxed);
            debug!(outstanding = state.outstanding, "all buffers held, frame stays queued");
            return None;
        }
        let raw = state.latest.take()?;
        state.outstanding += 1;
        self.shared.counters.acquired.fetch_add(1, Ordering::Relaxed);
        let releaser: Arc<dyn FrameRelease> = self.shared.clone();
        Some(
            Frame::new(raw.data, raw.planes, raw.meta)
                .with_timestamp(raw.timestamp)
                .with_releaser(releaser),
        )
    }

    /// Frames currently held by consumers
    pub fn outstanding(&self) -> usize {
        self.shared.lock().outstanding
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.lock().enabled
    }

    pub fn crop_region(&self) -> Option<Rect> {
        self.shared.lock().crop_region
    }

    pub fn stats(&self) -> ReaderStats {
        let c = &self.shared.counters;
        ReaderStats {
            published: c.published.load(Ordering::Relaxed),
            acquired: c.acquired.load(Ordering::Relaxed),
            released: c.released.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            starved: c.starved.load(Ordering::Relaxed),
        }
    }
}

impl FrameSource for FrameReader {
    fn set_frame_callback(&self, callback: Option<FrameCallback>) {
        self.shared.lock().callback = callback;
    }

    fn acquire_latest(&self) -> Option<Frame> {
        let mut state = self.shared.lock();
        if !state.enabled {
            return None;
        }
        self.take_latest(&mut state)
    }

    fn enable(&self) {
        debug!("frame reader enabled");
        self.shared.lock().enabled = true;
    }

    fn disable(&self) {
        let mut state = self.shared.lock();
        state.enabled = false;
        if state.latest.take().is_some() {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        debug!(outstanding = state.outstanding, "frame reader disabled");
    }

    fn set_crop_region(&self, region: Rect) {
        self.shared.lock().crop_region = Some(region);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nv21(reader: &FrameReader) -> Option<u64> {
        reader.publish_nv21(Bytes::from(vec![0u8; 6]), 2, 2)
    }

    #[test]
    fn test_disabled_reader_drops_publishes() {
        let reader = FrameReader::new(1);
        assert_eq!(nv21(&reader), None);
        assert!(reader.acquire_latest().is_none());
        assert_eq!(reader.stats().dropped, 1);
    }

    #[test]
    fn test_latest_wins() {
        let reader = FrameReader::new(2);
        reader.enable();
        nv21(&reader);
        nv21(&reader);
        let third = nv21(&reader).unwrap();
        let frame = reader.acquire_latest().unwrap();
        assert_eq!(frame.sequence(), third);
        assert_eq!(reader.stats().dropped, 2);
        assert!(reader.acquire_latest().is_none());
    }

    #[test]
    fn test_buffers_are_bounded() {
        let reader = FrameReader::new(1);
        reader.enable();
        nv21(&reader);
        let held = reader.acquire_latest().unwrap();
        nv21(&reader);
        assert!(reader.acquire_latest().is_none());
        assert_eq!(reader.stats().starved, 1);

        held.release();
        assert_eq!(reader.outstanding(), 0);
        let next = reader.acquire_latest().unwrap();
        assert_eq!(next.sequence(), 2);
    }
}
