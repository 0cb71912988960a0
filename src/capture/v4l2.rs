//! V4L2 frame source: mmap streaming on a dedicated capture thread

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use tracing::{error, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{Frame, PixelFormat, PlaneLayout};
use super::reader::FrameReader;
use super::source::{FrameCallback, FrameSource};
use crate::error::{Result, ScanError};
use crate::geometry::Rect;
use crate::CaptureConfig;

/// Detected capture device info
#[derive(Debug, Clone)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

/// Finds the first capture device offering NV12 or YUYV
pub fn auto_detect_device() -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        if let Ok(formats) = dev.enum_formats() {
            for fmt in formats {
                if fmt.fourcc == FourCC::new(b"NV12") {
                    info!("Found NV12 device: {} - {}", path, caps.card);
                    return Ok(FoundDevice {
                        path,
                        format: PixelFormat::Yuv420Planar,
                    });
                } else if fmt.fourcc == FourCC::new(b"YUYV") {
                    info!("Found YUYV device: {} - {}", path, caps.card);
                    return Ok(FoundDevice {
                        path,
                        format: PixelFormat::Yuyv422,
                    });
                }
            }
        }
    }

    Err(ScanError::Capture("No suitable capture device found".into()))
}

/// Plane layout for a negotiated V4L2 format
fn planes_for(format: PixelFormat, stride: usize, height: usize) -> Vec<PlaneLayout> {
    match format {
        // NV12: Y then interleaved U/V, described as planar with pixel stride 2
        PixelFormat::Yuv420Planar => vec![
            PlaneLayout::new(0, stride, 1),
            PlaneLayout::new(stride * height, stride, 2),
            PlaneLayout::new(stride * height + 1, stride, 2),
        ],
        _ => vec![PlaneLayout::new(0, stride, 2)],
    }
}

/// Live camera exposed as a [`FrameSource`]
pub struct V4l2Source {
    reader: FrameReader,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl V4l2Source {
    /// Opens the device and starts the capture thread
    #[instrument(skip(config), fields(device = %config.device))]
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let reader = FrameReader::new(config.max_images);
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = flume::bounded::<Result<()>>(1);

        let thread = {
            let config = config.clone();
            let reader = reader.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name("v4l2-capture".into())
                .spawn(move || {
                    if let Err(e) = capture_loop(&config, &reader, &running, &ready_tx) {
                        error!("Capture thread stopped: {}", e);
                        let _ = ready_tx.send(Err(e));
                    }
                })?
        };

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ScanError::Capture("capture thread did not start".into())),
        }

        Ok(Self {
            reader,
            running,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn reader(&self) -> &FrameReader {
        &self.reader
    }
}

fn capture_loop(
    config: &CaptureConfig,
    reader: &FrameReader,
    running: &AtomicBool,
    ready: &flume::Sender<Result<()>>,
) -> Result<()> {
    let device = Device::with_path(&config.device)?;

    let caps = device.query_caps()?;
    info!("Device: {} ({})", caps.card, caps.driver);
    if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
        return Err(ScanError::Capture("Device doesn't support video capture".into()));
    }

    let mut fmt = device.format()?;
    fmt.width = config.width;
    fmt.height = config.height;
    fmt.fourcc = match config.format {
        PixelFormat::Yuv420Planar => FourCC::new(b"NV12"),
        PixelFormat::Yuyv422 => FourCC::new(b"YUYV"),
        other => {
            return Err(ScanError::Capture(format!(
                "Unsupported capture format {other:?}"
            )))
        }
    };
    let fmt = device.set_format(&fmt)?;
    if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
        warn!("Could not set {} fps: {}", config.fps, e);
    }

    let (width, height) = (fmt.width, fmt.height);
    let min_stride = match config.format {
        PixelFormat::Yuyv422 => width as usize * 2,
        _ => width as usize,
    };
    let stride = (fmt.stride as usize).max(min_stride);
    let planes = planes_for(config.format, stride, height as usize);

    let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)?;
    info!(
        "Capture stream started: {}x{} stride {}, {} buffers",
        width, height, stride, config.buffer_count
    );
    let _ = ready.send(Ok(()));

    while running.load(Ordering::Acquire) {
        let (buf, _meta) = stream.next()?;
        let data = Bytes::copy_from_slice(buf);
        reader.publish(data, planes.clone(), width, height, config.format);
    }
    info!("Capture thread exiting");
    Ok(())
}

impl FrameSource for V4l2Source {
    fn set_frame_callback(&self, callback: Option<FrameCallback>) {
        self.reader.set_frame_callback(callback);
    }

    fn acquire_latest(&self) -> Option<Frame> {
        self.reader.acquire_latest()
    }

    fn enable(&self) {
        self.reader.enable();
    }

    fn disable(&self) {
        self.reader.disable();
    }

    fn set_crop_region(&self, region: Rect) {
        // V4L2 has no generic crop-for-zoom control; remembered for callers
        self.reader.set_crop_region(region);
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
