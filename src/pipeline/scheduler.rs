//! Single-flight decode scheduling.
//!
//! One worker thread owns the detector. At most one decode job exists at
//! any time; frames arriving meanwhile go to a one-frame pending slot where
//! the newest frame wins. A job that finds codes pauses the scheduler until
//! [`DecodeScheduler::resume`]; a job that finds nothing immediately starts
//! on the pending frame, or asks the source for a fresh one.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use flume::{Receiver, Sender};
use tracing::{debug, error, info, instrument, warn};

use super::slot::{PendingSlot, SlotStats};
use crate::capture::{convert, Frame, FrameSource};
use crate::detect::{DecodeResult, Detector};
use crate::error::Result;
use crate::geometry::Size;

/// Messages from the worker to the consumer context
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// Outcome of `initialize`
    DetectorReady { ok: bool },
    /// A job found codes; the scheduler is now paused
    Results {
        job: u64,
        sequence: u64,
        frame_size: Size,
        results: Vec<DecodeResult>,
    },
}

struct DecodeJob {
    id: u64,
    frame: Frame,
}

enum Command {
    Initialize(Vec<PathBuf>),
    Decode(DecodeJob),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Accepting frames; a job runs whenever one is available
    Armed,
    /// A job produced results; waiting for `resume`
    Paused,
    ShutDown,
}

struct SchedulerState {
    phase: Phase,
    in_flight: bool,
    pending: PendingSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    Uninitialized,
    Ready,
    Failed,
}

struct Shared {
    state: Mutex<SchedulerState>,
    commands: Sender<Command>,
    events: Sender<SchedulerEvent>,
    source: Option<Arc<dyn FrameSource>>,
    next_job: AtomicU64,
    decoded: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hands `frame` to the worker. Caller holds the lock and has checked
    /// that no job is in flight.
    fn start_job(&self, state: &mut SchedulerState, frame: Frame) {
        let id = self.next_job.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(job = id, sequence = frame.sequence(), "starting decode job");
        state.in_flight = true;
        if let Err(flume::SendError(command)) = self.commands.send(Command::Decode(DecodeJob { id, frame })) {
            state.in_flight = false;
            warn!(job = id, "decode worker is gone, dropping frame");
            drop(command);
        }
    }

    /// Next frame to decode: the pending one, else a fresh one from the source
    fn next_frame(&self, state: &mut SchedulerState) -> Option<Frame> {
        state
            .pending
            .take()
            .or_else(|| self.source.as_ref().and_then(|s| s.acquire_latest()))
    }

    /// Starts a job if the scheduler is armed, idle and has a frame
    fn pump(&self, state: &mut SchedulerState) {
        if state.phase != Phase::Armed || state.in_flight {
            return;
        }
        if let Some(frame) = self.next_frame(state) {
            self.start_job(state, frame);
        }
    }

    fn complete(&self, job: u64, sequence: u64, frame_size: Size, results: Vec<DecodeResult>) {
        let stale = {
            let mut state = self.lock();
            state.in_flight = false;
            match state.phase {
                Phase::ShutDown => {
                    debug!(job, "job finished after shutdown, results discarded");
                    return;
                }
                _ if !results.is_empty() => {
                    info!(job, count = results.len(), "codes found, pausing");
                    state.phase = Phase::Paused;
                    let _ = self.events.send(SchedulerEvent::Results {
                        job,
                        sequence,
                        frame_size,
                        results,
                    });
                    state.pending.take()
                }
                _ => {
                    self.pump(&mut state);
                    None
                }
            }
        };
        if let Some(frame) = stale {
            debug!(sequence = frame.sequence(), "releasing frame that went stale during decode");
            frame.release();
        }
    }
}

/// Owns the decode worker and the pending slot
pub struct DecodeScheduler {
    shared: Arc<Shared>,
    events: Receiver<SchedulerEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl DecodeScheduler {
    /// Spawns the worker thread, which takes ownership of `detector`.
    ///
    /// With a `source`, the scheduler pulls fresh frames itself whenever a
    /// job ends empty-handed and nothing is pending.
    pub fn new<D>(detector: D, source: Option<Arc<dyn FrameSource>>) -> Result<Self>
    where
        D: Detector + 'static,
    {
        let (command_tx, command_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                phase: Phase::Armed,
                in_flight: false,
                pending: PendingSlot::new(),
            }),
            commands: command_tx,
            events: event_tx,
            source,
            next_job: AtomicU64::new(0),
            decoded: AtomicU64::new(0),
        });

        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("decode-worker".into())
                .spawn(move || worker_loop(detector, command_rx, shared))?
        };
        let worker_id = worker.thread().id();

        Ok(Self {
            shared,
            events: event_rx,
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    /// Queues detector initialization on the worker. Jobs submitted before
    /// it finishes wait behind it on the worker thread only.
    pub fn initialize(&self, model_paths: Vec<PathBuf>) {
        if self.shared.commands.send(Command::Initialize(model_paths)).is_err() {
            warn!("decode worker is gone, initialization not queued");
        }
    }

    /// Receiver for worker events; drain it on the consumer context
    pub fn events(&self) -> Receiver<SchedulerEvent> {
        self.events.clone()
    }

    /// Offers a frame. Never blocks on decoding.
    ///
    /// Starts a job if none is running, otherwise parks the frame in the
    /// pending slot and releases whatever it displaces. After shutdown the
    /// frame is released straight away.
    pub fn submit(&self, frame: Frame) {
        let displaced = {
            let mut state = self.shared.lock();
            match state.phase {
                Phase::ShutDown => Some(frame),
                Phase::Armed if !state.in_flight => {
                    self.shared.start_job(&mut state, frame);
                    None
                }
                _ => state.pending.replace(frame),
            }
        };
        if let Some(frame) = displaced {
            debug!(sequence = frame.sequence(), "frame dropped");
            metrics::counter!("codescan_frames_dropped").increment(1);
            frame.release();
        }
    }

    /// Re-arms after a pause and starts on the pending frame, or a fresh
    /// one from the source. Also kicks an armed, idle scheduler.
    pub fn resume(&self) {
        let mut state = self.shared.lock();
        match state.phase {
            Phase::ShutDown => {}
            Phase::Paused | Phase::Armed => {
                state.phase = Phase::Armed;
                self.shared.pump(&mut state);
            }
        }
    }

    /// Releases the pending frame, if any
    pub fn clear_pending(&self) {
        let frame = self.shared.lock().pending.take();
        if let Some(frame) = frame {
            debug!(sequence = frame.sequence(), "pending frame cleared");
            frame.release();
        }
    }

    /// Stops accepting frames and releases the detector once the in-flight
    /// job, if any, has finished. Blocks until the worker has exited.
    pub fn shutdown(&self) {
        let pending = {
            let mut state = self.shared.lock();
            if state.phase == Phase::ShutDown {
                return;
            }
            state.phase = Phase::ShutDown;
            let _ = self.shared.commands.send(Command::Shutdown);
            state.pending.take()
        };
        if let Some(frame) = pending {
            frame.release();
        }

        if thread::current().id() == self.worker_id {
            return;
        }
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("decode worker panicked");
            }
        }
        info!("decode scheduler shut down");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().phase == Phase::Paused
    }

    pub fn is_busy(&self) -> bool {
        self.shared.lock().in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.shared.lock().pending.is_occupied()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().phase == Phase::ShutDown
    }

    pub fn pending_stats(&self) -> SlotStats {
        self.shared.lock().pending.stats()
    }

    /// Jobs started so far
    pub fn jobs_started(&self) -> u64 {
        self.shared.next_job.load(Ordering::Relaxed)
    }

    /// Jobs the worker ran, as opposed to frames dropped because the
    /// detector failed to initialize
    pub fn frames_decoded(&self) -> u64 {
        self.shared.decoded.load(Ordering::Relaxed)
    }
}

impl Drop for DecodeScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<D: Detector>(mut detector: D, commands: Receiver<Command>, shared: Arc<Shared>) {
    let mut detector_state = DetectorState::Uninitialized;

    for command in commands.iter() {
        match command {
            Command::Initialize(paths) => {
                let ok = match detector.initialize(&paths) {
                    Ok(()) => true,
                    Err(e) => {
                        error!("detector initialization failed, decoding disabled: {}", e);
                        false
                    }
                };
                detector_state = if ok { DetectorState::Ready } else { DetectorState::Failed };
                info!(ok, "detector initialized");
                let _ = shared.events.send(SchedulerEvent::DetectorReady { ok });
            }
            Command::Decode(job) => {
                let (id, sequence) = (job.id, job.frame.sequence());
                let frame_size = Size::new(job.frame.width(), job.frame.height());
                let results = if detector_state == DetectorState::Failed {
                    warn!(job = id, "detector unavailable, frame dropped");
                    metrics::counter!("codescan_frames_dropped").increment(1);
                    job.frame.release();
                    Vec::new()
                } else {
                    let results = run_job(&mut detector, job);
                    shared.decoded.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("codescan_frames_decoded").increment(1);
                    results
                };
                shared.complete(id, sequence, frame_size, results);
            }
            Command::Shutdown => break,
        }
    }

    detector.release();
    debug!("decode worker exiting");
}

/// Converts, decodes and releases one frame. Every failure, a panic in the
/// converter or the detector included, becomes "no codes".
#[instrument(skip_all, fields(job = job.id, seq = job.frame.sequence()))]
fn run_job<D: Detector>(detector: &mut D, job: DecodeJob) -> Vec<DecodeResult> {
    // an unwinding frame is released by its Drop
    match catch_unwind(AssertUnwindSafe(|| decode_frame(detector, job.frame))) {
        Ok(results) => results,
        Err(_) => {
            error!("decode job panicked, frame dropped");
            metrics::counter!("codescan_decode_failures").increment(1);
            Vec::new()
        }
    }
}

fn decode_frame<D: Detector>(detector: &mut D, frame: Frame) -> Vec<DecodeResult> {
    let start = Instant::now();

    let converted = match convert(&frame) {
        Ok(converted) => converted,
        Err(e) => {
            warn!("conversion failed, frame dropped: {}", e);
            frame.release();
            return Vec::new();
        }
    };
    metrics::histogram!("codescan_convert_time_us").record(start.elapsed().as_micros() as f64);

    // copies no longer need the camera buffer; aliases keep it until decoded
    let held = if converted.aliases_frame {
        Some(frame)
    } else {
        frame.release();
        None
    };

    let decode_start = Instant::now();
    let outcome = detector.decode(&converted.image);
    if let Some(frame) = held {
        frame.release();
    }
    let decode_us = decode_start.elapsed().as_micros() as u64;
    metrics::histogram!("codescan_decode_time_us").record(decode_us as f64);

    match outcome {
        Ok(results) => {
            debug!(count = results.len(), decode_us, total_us = start.elapsed().as_micros() as u64, "decoded");
            results
        }
        Err(e) => {
            warn!("decode failed: {}", e);
            metrics::counter!("codescan_decode_failures").increment(1);
            Vec::new()
        }
    }
}
