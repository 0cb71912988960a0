//! One-frame pending slot for the decode pipeline

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use ringbuf::{traits::*, HeapRb};

use crate::capture::Frame;

/// Holds the newest frame waiting for the decoder.
///
/// Backed by a ring of capacity one: storing a frame displaces the previous
/// one, which is handed back to the caller for release.
pub struct PendingSlot {
    ring: HeapRb<Frame>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_stored: AtomicU64,
    frames_taken: AtomicU64,
    frames_displaced: AtomicU64,
}

/// Snapshot of slot counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub stored: u64,
    pub taken: u64,
    pub displaced: u64,
}

impl Default for PendingSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingSlot {
    pub fn new() -> Self {
        Self {
            ring: HeapRb::new(1),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Stores `frame`, returning the frame it displaced
    pub fn replace(&mut self, frame: Frame) -> Option<Frame> {
        let displaced = self.ring.push_overwrite(frame);
        self.stats.frames_stored.fetch_add(1, Ordering::Relaxed);
        if displaced.is_some() {
            self.stats.frames_displaced.fetch_add(1, Ordering::Relaxed);
        }
        displaced
    }

    pub fn take(&mut self) -> Option<Frame> {
        let frame = self.ring.try_pop()?;
        self.stats.frames_taken.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    pub fn is_occupied(&self) -> bool {
        !self.ring.is_empty()
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            stored: self.stats.frames_stored.load(Ordering::Relaxed),
            taken: self.stats.frames_taken.load(Ordering::Relaxed),
            displaced: self.stats.frames_displaced.load(Ordering::Relaxed),
        }
    }
}
