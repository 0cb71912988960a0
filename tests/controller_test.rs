mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use codescan::capture::{FrameReader, FrameSource};
use codescan::detect::{DecodeResult, QrDetector};
use codescan::geometry::{compute_crop_region, CameraGeometry, PointF, Rect, RectF, Size};
use codescan::pipeline::SchedulerEvent;
use codescan::{Config, ScanController, ScanError, ScanListener, ScanState, ScannerConfig};
use common::*;

#[derive(Default)]
struct RecordingListener {
    results: Mutex<Vec<Vec<String>>>,
    overlays: Mutex<Vec<Vec<RectF>>>,
    focus: Mutex<Vec<Rect>>,
}

impl ScanListener for RecordingListener {
    fn on_result(&self, results: &[DecodeResult]) {
        let texts = results.iter().map(|r| r.text.clone()).collect();
        self.results.lock().unwrap().push(texts);
    }

    fn on_overlay_update(&self, rects: &[RectF]) {
        self.overlays.lock().unwrap().push(rects.to_vec());
    }

    fn on_focus_region_computed(&self, region: Rect) {
        self.focus.lock().unwrap().push(region);
    }
}

fn scanner_config() -> ScannerConfig {
    Config::default().scanner
}

fn publish_tagged(reader: &FrameReader, tag: u8) {
    let mut data = vec![0u8; 24];
    data[0] = tag;
    reader.publish_nv21(Bytes::from(data), 4, 4);
}

async fn drive_until(controller: &ScanController, want: ScanState) {
    tokio::time::timeout(WAIT, async {
        while controller.state() != want {
            if controller.next_event().await.is_none() {
                break;
            }
        }
    })
    .await
    .expect("controller did not reach the expected state");
    assert_eq!(controller.state(), want);
}

struct Harness {
    reader: FrameReader,
    listener: Arc<RecordingListener>,
    controller: ScanController,
}

fn harness(script: Vec<Vec<DecodeResult>>, geometry: CameraGeometry) -> Harness {
    let reader = FrameReader::new(2);
    let source: Arc<dyn FrameSource> = Arc::new(reader.clone());
    let listener = Arc::new(RecordingListener::default());
    let (detector, _stats) = ScriptedDetector::new();
    let controller = ScanController::new(
        detector.with_script(script),
        source,
        listener.clone(),
        geometry,
        &scanner_config(),
    )
    .unwrap();
    Harness {
        reader,
        listener,
        controller,
    }
}

#[tokio::test]
async fn test_result_awaits_decision_then_resumes() {
    let geometry = CameraGeometry::new(Size::new(4, 4), Size::new(8, 8));
    let h = harness(vec![hit("hello")], geometry);
    assert_eq!(h.controller.state(), ScanState::Idle);

    h.controller.start().unwrap();
    assert_eq!(h.controller.state(), ScanState::Scanning);
    publish_tagged(&h.reader, 1);
    drive_until(&h.controller, ScanState::AwaitingUserDecision).await;

    assert_eq!(*h.listener.results.lock().unwrap(), vec![vec!["hello".to_string()]]);
    let overlays = h.listener.overlays.lock().unwrap().clone();
    assert_eq!(overlays.len(), 1);
    assert!(overlays[0][0].approx_eq(&RectF::new(0.0, 0.0, 4.0, 4.0), 1e-3));

    // frames keep arriving but wait for the decision
    publish_tagged(&h.reader, 2);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.controller.scheduler().is_paused());

    h.controller.resume();
    assert_eq!(h.controller.state(), ScanState::Scanning);
    assert_eq!(h.listener.overlays.lock().unwrap().last().unwrap(), &Vec::<RectF>::new());
    assert!(wait_until(|| !h.controller.scheduler().is_busy() && h.reader.outstanding() == 0));
    assert_eq!(h.controller.state(), ScanState::Scanning);
}

#[tokio::test]
async fn test_stop_disables_source_and_start_rearms() {
    let geometry = CameraGeometry::new(Size::new(4, 4), Size::new(4, 4));
    let h = harness(vec![Vec::new(), hit("again")], geometry);

    h.controller.start().unwrap();
    assert!(h.reader.is_enabled());
    h.controller.stop();
    assert_eq!(h.controller.state(), ScanState::Idle);
    assert!(!h.reader.is_enabled());
    assert_eq!(h.reader.publish_nv21(Bytes::from(vec![0u8; 24]), 4, 4), None);

    h.controller.start().unwrap();
    publish_tagged(&h.reader, 1);
    publish_tagged(&h.reader, 2);
    drive_until(&h.controller, ScanState::AwaitingUserDecision).await;
    assert_eq!(h.listener.results.lock().unwrap().len(), 1);

    h.controller.stop();
    assert_eq!(h.controller.state(), ScanState::Idle);
    assert!(wait_until(|| h.reader.outstanding() == 0));
}

#[tokio::test]
async fn test_result_queued_before_stop_is_not_shown_after_restart() {
    let geometry = CameraGeometry::new(Size::new(4, 4), Size::new(4, 4));
    let h = harness(vec![hit("old"), hit("new")], geometry);
    h.controller.start().unwrap();
    publish_tagged(&h.reader, 1);
    // the result is queued but nobody drains it before the restart
    assert!(wait_until(|| h.controller.scheduler().is_paused()));

    h.controller.stop();
    h.controller.start().unwrap();
    h.controller.poll_events();
    assert_eq!(h.controller.state(), ScanState::Scanning);
    assert!(!h.controller.scheduler().is_paused());
    assert!(h.listener.results.lock().unwrap().is_empty());

    publish_tagged(&h.reader, 2);
    drive_until(&h.controller, ScanState::AwaitingUserDecision).await;
    assert_eq!(*h.listener.results.lock().unwrap(), vec![vec!["new".to_string()]]);
    assert!(h.controller.scheduler().is_paused());
}

#[tokio::test]
async fn test_poll_events_drains_without_waiting() {
    let geometry = CameraGeometry::new(Size::new(4, 4), Size::new(4, 4));
    let h = harness(vec![hit("polled")], geometry);
    h.controller.start().unwrap();
    publish_tagged(&h.reader, 1);

    assert!(wait_until(|| {
        h.controller.poll_events();
        h.controller.state() == ScanState::AwaitingUserDecision
    }));
    assert_eq!(h.controller.poll_events(), 0);
}

#[tokio::test]
async fn test_focus_and_zoom_use_current_geometry() {
    let geometry = CameraGeometry::new(Size::new(640, 480), Size::new(640, 480))
        .with_active_region(Rect::new(0, 0, 4000, 3000));
    let h = harness(Vec::new(), geometry);

    let region = h.controller.focus_at(PointF::new(320.0, 240.0)).unwrap();
    assert_eq!(h.listener.focus.lock().unwrap().as_slice(), &[region]);
    // tap of 100 around the centre, shifted into the 4000x3000 array
    assert!((region.left - (270 + 1680)).abs() <= 1);
    assert!((region.top - (190 + 1260)).abs() <= 1);

    let max = scanner_config().max_digital_zoom;
    assert_eq!(h.controller.zoom_to(10.0), max);
    assert_eq!(
        h.reader.crop_region(),
        Some(compute_crop_region(max, Rect::new(0, 0, 4000, 3000)))
    );
    assert_eq!(h.controller.zoom_by(0.5), max / 2.0);
    assert_eq!(h.controller.view().zoom, max / 2.0);
    assert_eq!(h.controller.zoom_to(0.25), 1.0);
}

#[tokio::test]
async fn test_switch_facing_recomputes_transform() {
    let geometry = CameraGeometry::new(Size::new(400, 400), Size::new(400, 400));
    let h = harness(Vec::new(), geometry);
    h.controller.zoom_to(2.0);

    let view = h.controller.switch_facing(true);
    assert!(view.geometry.front_facing);
    assert!(view.transform.is_mirrored());
    assert_eq!(view.zoom, 1.0);
    assert_eq!(h.controller.view().geometry, view.geometry);

    let view = h.controller.update_geometry(geometry.with_rotations(
        codescan::geometry::Rotation::Deg90,
        codescan::geometry::Rotation::Deg0,
    ));
    assert_eq!(view.transform.rotation(), codescan::geometry::Rotation::Deg90);
}

#[tokio::test]
async fn test_missing_models_fail_initialization_but_not_the_session() {
    let reader = FrameReader::new(2);
    let source: Arc<dyn FrameSource> = Arc::new(reader.clone());
    let mut config = scanner_config();
    config.asset_dir = std::env::temp_dir().join(format!("codescan-nope-{}", std::process::id()));
    config.model_files = vec!["detect.bin".into()];

    let controller = ScanController::new(
        QrDetector::new(),
        source,
        Arc::new(RecordingListener::default()),
        CameraGeometry::new(Size::new(4, 4), Size::new(4, 4)),
        &config,
    )
    .unwrap();
    controller.start().unwrap();

    let event = tokio::time::timeout(WAIT, controller.next_event()).await.unwrap();
    assert_eq!(event, Some(SchedulerEvent::DetectorReady { ok: false }));

    publish_tagged(&reader, 1);
    assert!(wait_until(|| reader.outstanding() == 0 && reader.stats().released == 1));
    assert_eq!(controller.state(), ScanState::Scanning);
}

#[tokio::test]
async fn test_start_after_shutdown_fails() {
    let h = harness(Vec::new(), CameraGeometry::new(Size::new(4, 4), Size::new(4, 4)));
    h.controller.start().unwrap();
    h.controller.shutdown();
    assert!(!h.reader.is_enabled());
    assert!(matches!(h.controller.start(), Err(ScanError::ShutDown)));
}
