//! Test doubles shared by the integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use codescan::capture::{Frame, FrameMetadata, FrameRelease, PackedImage};
use codescan::detect::{DecodeResult, Detector};
use codescan::error::DetectorError;
use codescan::geometry::Rect;

pub const WAIT: Duration = Duration::from_secs(5);

/// Counts releases per frame sequence
#[derive(Default)]
pub struct CountingReleaser {
    counts: Mutex<HashMap<u64, usize>>,
}

impl CountingReleaser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self, sequence: u64) -> usize {
        self.counts.lock().unwrap().get(&sequence).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().unwrap().values().sum()
    }

    /// Panics unless every sequence in `sequences` was released exactly once
    pub fn assert_each_released_once(&self, sequences: impl IntoIterator<Item = u64>) {
        for seq in sequences {
            assert_eq!(self.count(seq), 1, "frame {seq} release count");
        }
    }
}

impl FrameRelease for CountingReleaser {
    fn release(&self, meta: &FrameMetadata) {
        *self.counts.lock().unwrap().entry(meta.sequence).or_default() += 1;
    }
}

/// 4x4 tight NV21 frame whose first luma byte carries the sequence number
pub fn tagged_frame(sequence: u64, releaser: &Arc<CountingReleaser>) -> Frame {
    let mut data = vec![0u8; 4 * 4 * 3 / 2];
    data[0] = sequence as u8;
    let releaser: Arc<dyn FrameRelease> = releaser.clone();
    Frame::nv21(Bytes::from(data), 4, 4, sequence).with_releaser(releaser)
}

/// Frame the converter rejects (odd dimensions)
pub fn broken_frame(sequence: u64, releaser: &Arc<CountingReleaser>) -> Frame {
    let releaser: Arc<dyn FrameRelease> = releaser.clone();
    Frame::nv21(Bytes::from(vec![0u8; 16]), 3, 3, sequence).with_releaser(releaser)
}

/// What the scripted detector saw
#[derive(Default)]
pub struct DetectorStats {
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub decodes: AtomicUsize,
    pub initialized: AtomicBool,
    pub released: AtomicBool,
    pub released_while_active: AtomicBool,
    pub decoded_before_init: AtomicBool,
    /// Tag byte of every decoded image, in order
    pub tags: Mutex<Vec<u8>>,
}

impl DetectorStats {
    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn tags(&self) -> Vec<u8> {
        self.tags.lock().unwrap().clone()
    }
}

/// Detector double with scripted results, optional delays, failures and a
/// gate that holds each decode until the test lets it through
pub struct ScriptedDetector {
    stats: Arc<DetectorStats>,
    script: VecDeque<Vec<DecodeResult>>,
    decode_delay: Duration,
    init_delay: Duration,
    fail_init: bool,
    panic_on_call: Option<usize>,
    gate: Option<flume::Receiver<()>>,
    started: Option<flume::Sender<u8>>,
    initialized: bool,
}

impl ScriptedDetector {
    pub fn new() -> (Self, Arc<DetectorStats>) {
        let stats = Arc::new(DetectorStats::default());
        (
            Self {
                stats: stats.clone(),
                script: VecDeque::new(),
                decode_delay: Duration::ZERO,
                init_delay: Duration::ZERO,
                fail_init: false,
                panic_on_call: None,
                gate: None,
                started: None,
                initialized: false,
            },
            stats,
        )
    }

    /// Results for successive decode calls; later calls find nothing
    pub fn with_script(mut self, script: impl IntoIterator<Item = Vec<DecodeResult>>) -> Self {
        self.script = script.into_iter().collect();
        self
    }

    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Panics on the given 1-based decode call
    pub fn panicking_on(mut self, call: usize) -> Self {
        self.panic_on_call = Some(call);
        self
    }

    /// Each decode reports its tag on the returned receiver, then waits for
    /// one permit on the returned sender
    pub fn gated(mut self) -> (Self, flume::Sender<()>, flume::Receiver<u8>) {
        let (gate_tx, gate_rx) = flume::unbounded();
        let (started_tx, started_rx) = flume::unbounded();
        self.gate = Some(gate_rx);
        self.started = Some(started_tx);
        (self, gate_tx, started_rx)
    }
}

pub fn hit(text: &str) -> Vec<DecodeResult> {
    vec![DecodeResult::new(text, Rect::new(0, 0, 2, 2))]
}

impl Detector for ScriptedDetector {
    fn initialize(&mut self, _model_paths: &[PathBuf]) -> Result<(), DetectorError> {
        std::thread::sleep(self.init_delay);
        if self.fail_init {
            return Err(DetectorError::Initialization("scripted failure".into()));
        }
        self.initialized = true;
        self.stats.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn decode(&mut self, image: &PackedImage) -> Result<Vec<DecodeResult>, DetectorError> {
        if !self.initialized {
            self.stats.decoded_before_init.store(true, Ordering::SeqCst);
            return Ok(Vec::new());
        }
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);
        let call = self.stats.decodes.fetch_add(1, Ordering::SeqCst) + 1;
        let tag = image.data[0];
        self.stats.tags.lock().unwrap().push(tag);

        if let Some(started) = &self.started {
            let _ = started.send(tag);
        }
        if let Some(gate) = &self.gate {
            let _ = gate.recv_timeout(WAIT);
        }
        std::thread::sleep(self.decode_delay);

        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        if self.panic_on_call == Some(call) {
            panic!("scripted detector panic");
        }
        Ok(self.script.pop_front().unwrap_or_default())
    }

    fn release(&mut self) {
        if self.stats.active.load(Ordering::SeqCst) > 0 {
            self.stats.released_while_active.store(true, Ordering::SeqCst);
        }
        self.initialized = false;
        self.stats.released.store(true, Ordering::SeqCst);
    }
}

/// Polls `condition` until it holds or `WAIT` elapses
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
