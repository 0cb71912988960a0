//! Scan session state machine tying the frame source, the decode scheduler
//! and the coordinate mapper together

use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use flume::Receiver;
use tracing::{debug, error, info, warn};

use crate::capture::{Frame, FrameCallback, FrameSource};
use crate::detect::{DecodeResult, Detector, ModelAssets};
use crate::error::{Result, ScanError};
use crate::geometry::{
    apply_zoom, compute_focus_region, compute_preview_transform, map_to_view, tap_rect, CameraGeometry,
    PointF, PreviewTransform, Rect, RectF,
};
use crate::pipeline::{DecodeScheduler, SchedulerEvent};
use crate::ScannerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    /// Results are on screen; frames are ignored until `resume` or `stop`
    AwaitingUserDecision,
}

/// UI side of the controller. Called on whichever thread drains events.
pub trait ScanListener: Send + Sync {
    fn on_result(&self, results: &[DecodeResult]);

    /// View-space highlight rectangles; empty clears the overlay
    fn on_overlay_update(&self, rects: &[RectF]);

    fn on_focus_region_computed(&self, _region: Rect) {}
}

/// Geometry snapshot. Replaced wholesale, never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub geometry: CameraGeometry,
    pub transform: PreviewTransform,
    pub zoom: f32,
}

impl ViewState {
    fn new(geometry: CameraGeometry, zoom: f32) -> Self {
        Self {
            geometry,
            transform: compute_preview_transform(&geometry),
            zoom,
        }
    }
}

pub struct ScanController {
    scheduler: Arc<DecodeScheduler>,
    source: Arc<dyn FrameSource>,
    listener: Arc<dyn ScanListener>,
    events: Receiver<SchedulerEvent>,
    state: Mutex<ScanState>,
    view: ArcSwap<ViewState>,
    focus_tap_size: f32,
    max_digital_zoom: f32,
}

impl ScanController {
    /// Builds the scheduler around `detector` and queues model installation
    /// plus detector initialization on its worker. Scanning starts with
    /// [`Self::start`].
    pub fn new<D>(
        detector: D,
        source: Arc<dyn FrameSource>,
        listener: Arc<dyn ScanListener>,
        geometry: CameraGeometry,
        config: &ScannerConfig,
    ) -> Result<Self>
    where
        D: Detector + 'static,
    {
        let scheduler = Arc::new(DecodeScheduler::new(detector, Some(source.clone()))?);
        let events = scheduler.events();

        let assets = ModelAssets::new(
            config.asset_dir.clone(),
            config.model_dir.clone(),
            config.model_files.iter().cloned(),
        );
        let model_paths = match assets.install() {
            Ok(paths) => paths,
            Err(e) => {
                // initialization will report the failure through an event
                error!("model install failed: {}", e);
                assets.model_paths()
            }
        };
        scheduler.initialize(model_paths);

        Ok(Self {
            scheduler,
            source,
            listener,
            events,
            state: Mutex::new(ScanState::Idle),
            view: ArcSwap::from_pointee(ViewState::new(geometry, 1.0)),
            focus_tap_size: config.focus_tap_size,
            max_digital_zoom: config.max_digital_zoom,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ScanState {
        *self.lock_state()
    }

    pub fn scheduler(&self) -> &DecodeScheduler {
        &self.scheduler
    }

    pub fn view(&self) -> Arc<ViewState> {
        self.view.load_full()
    }

    /// Idle -> Scanning: hooks the scheduler to the source and enables it
    pub fn start(&self) -> Result<()> {
        if self.scheduler.is_shut_down() {
            return Err(ScanError::ShutDown);
        }
        let mut state = self.lock_state();
        if *state != ScanState::Idle {
            debug!(state = ?*state, "start ignored");
            return Ok(());
        }

        let scheduler = Arc::downgrade(&self.scheduler);
        let callback: FrameCallback = Arc::new(move |frame: Frame| match scheduler.upgrade() {
            Some(scheduler) => scheduler.submit(frame),
            None => frame.release(),
        });
        self.source.set_frame_callback(Some(callback));
        self.source.enable();
        *state = ScanState::Scanning;
        drop(state);

        self.discard_queued_results();
        self.scheduler.resume();
        info!("scanning started");
        Ok(())
    }

    /// Drops results still queued from before the last `stop`
    fn discard_queued_results(&self) {
        for event in self.events.try_iter() {
            match event {
                SchedulerEvent::Results { sequence, .. } => {
                    debug!(sequence, "result from a previous session discarded")
                }
                ready => {
                    self.handle_event(ready);
                }
            }
        }
    }

    /// Any state -> Idle: disables the source and drops the pending frame.
    /// A job already running finishes on its own.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), ScanState::Idle);
        self.source.disable();
        self.source.set_frame_callback(None);
        self.scheduler.clear_pending();
        if previous == ScanState::AwaitingUserDecision {
            self.listener.on_overlay_update(&[]);
        }
        if previous != ScanState::Idle {
            info!("scanning stopped");
        }
    }

    /// AwaitingUserDecision -> Scanning: clears the overlay and re-arms the
    /// scheduler
    pub fn resume(&self) {
        {
            let mut state = self.lock_state();
            if *state != ScanState::AwaitingUserDecision {
                debug!(state = ?*state, "resume ignored");
                return;
            }
            *state = ScanState::Scanning;
        }
        self.listener.on_overlay_update(&[]);
        self.scheduler.resume();
    }

    /// Applies one scheduler event. Returns the state afterwards.
    pub fn handle_event(&self, event: SchedulerEvent) -> ScanState {
        match event {
            SchedulerEvent::DetectorReady { ok: true } => debug!("detector ready"),
            SchedulerEvent::DetectorReady { ok: false } => {
                warn!("detector failed to initialize, frames will be dropped")
            }
            SchedulerEvent::Results {
                sequence, results, ..
            } => {
                let mut state = self.lock_state();
                if *state != ScanState::Scanning {
                    debug!(sequence, state = ?*state, "results arrived while not scanning, discarded");
                    return *state;
                }
                // the job that paused for these results was superseded by a restart
                if !self.scheduler.is_paused() {
                    debug!(sequence, "results from before the last start, discarded");
                    return *state;
                }
                *state = ScanState::AwaitingUserDecision;
                drop(state);

                self.scheduler.clear_pending();
                let transform = self.view.load().transform;
                let rects: Vec<RectF> = results
                    .iter()
                    .map(|r| map_to_view(&r.rect.to_f32(), &transform))
                    .filter(|r| !r.is_empty())
                    .collect();
                info!(sequence, count = results.len(), "scan result");
                self.listener.on_result(&results);
                self.listener.on_overlay_update(&rects);
            }
        }
        self.state()
    }

    /// Handles every event already queued, without waiting
    pub fn poll_events(&self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Waits for the next event and handles it. `None` once the scheduler
    /// has gone away.
    pub async fn next_event(&self) -> Option<SchedulerEvent> {
        let event = self.events.recv_async().await.ok()?;
        self.handle_event(event.clone());
        Some(event)
    }

    /// Replaces the camera/surface geometry, keeping the current zoom
    pub fn update_geometry(&self, geometry: CameraGeometry) -> Arc<ViewState> {
        let zoom = self.view.load().zoom;
        let view = Arc::new(ViewState::new(geometry, 1.0));
        self.view.store(view);
        if zoom > 1.0 {
            self.zoom_to(zoom);
        }
        self.view.load_full()
    }

    /// Tap-to-focus: the metering region in sensor space for a view tap
    pub fn focus_at(&self, point: PointF) -> Option<Rect> {
        let view = self.view.load();
        let tap = tap_rect(point, self.focus_tap_size, view.geometry.view_size);
        let region = compute_focus_region(&tap, &view.geometry, &view.transform)?;
        self.listener.on_focus_region_computed(region);
        Some(region)
    }

    /// Clamps `ratio` to what the sensor allows and forwards the crop.
    /// Returns the ratio actually applied.
    pub fn zoom_to(&self, ratio: f32) -> f32 {
        let current = self.view.load();
        let zoom = apply_zoom(ratio, self.max_digital_zoom, &current.geometry);
        let geometry = current.geometry.with_crop_region(zoom.crop_region);
        self.view.store(Arc::new(ViewState {
            geometry,
            transform: current.transform,
            zoom: zoom.ratio,
        }));
        self.source.set_crop_region(zoom.crop_region);
        zoom.ratio
    }

    /// Pinch zoom: scales the current ratio
    pub fn zoom_by(&self, scale: f32) -> f32 {
        let current = self.view.load().zoom;
        self.zoom_to(current * scale)
    }

    /// Switches between front and back camera. Zoom resets.
    pub fn switch_facing(&self, front_facing: bool) -> Arc<ViewState> {
        let geometry = self.view.load().geometry;
        let geometry = geometry
            .with_front_facing(front_facing)
            .with_crop_region(geometry.active_region);
        let view = Arc::new(ViewState::new(geometry, 1.0));
        self.view.store(view.clone());
        self.source.set_crop_region(geometry.active_region);
        info!(front_facing, "camera facing switched");
        view
    }

    /// Stops scanning and tears down the scheduler. The detector is
    /// released after any in-flight job completes.
    pub fn shutdown(&self) {
        self.stop();
        self.scheduler.shutdown();
    }
}

impl Drop for ScanController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
