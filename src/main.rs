//! codescan: decode QR codes from image files or a live V4L2 camera
//!
//! Usage: `codescan [--config FILE] [--camera] [IMAGE...]`

use std::path::PathBuf;

use codescan::detect::{Detector, QrDetector, StillImageDecoder};
use codescan::Config;
use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    camera: bool,
    images: Vec<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().ok_or_else(|| eyre!("--config needs a file argument"))?;
                args.config = Some(path.into());
            }
            "--camera" => args.camera = true,
            flag if flag.starts_with("--") => return Err(eyre!("unknown option {flag}")),
            image => args.images.push(image.into()),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = parse_args()?;
    let config = Config::load(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("codescan launching...");

    if !args.images.is_empty() {
        let mut decoder = StillImageDecoder::new(QrDetector::new());
        decoder.detector_mut().initialize(&[])?;
        for (path, results) in decoder.decode_batch(&args.images) {
            if results.is_empty() {
                println!("{}: no codes", path.display());
            }
            for result in results {
                println!("{}: {}", path.display(), result);
            }
        }
    }

    if args.camera {
        camera::run(config).await?;
    } else if args.images.is_empty() {
        return Err(eyre!("nothing to do: pass image files or --camera"));
    }

    info!("codescan shutting down");
    Ok(())
}

#[cfg(feature = "v4l2")]
mod camera {
    use std::sync::Arc;

    use codescan::capture::{v4l2, FrameSource, V4l2Source};
    use codescan::detect::{DecodeResult, QrDetector};
    use codescan::geometry::{CameraGeometry, RectF, Size};
    use codescan::{Config, ScanController, ScanListener, ScanState};
    use color_eyre::Result;
    use tracing::info;

    struct ConsoleListener;

    impl ScanListener for ConsoleListener {
        fn on_result(&self, results: &[DecodeResult]) {
            for result in results {
                println!("{}", result);
            }
        }

        fn on_overlay_update(&self, rects: &[RectF]) {
            if !rects.is_empty() {
                info!(?rects, "overlay");
            }
        }
    }

    /// Live scan until Ctrl-C, resuming after every result
    pub async fn run(mut config: Config) -> Result<()> {
        if config.capture.device.is_empty() {
            let found = v4l2::auto_detect_device()?;
            config.capture.device = found.path;
            config.capture.format = found.format;
        }
        info!("Using capture device: {}", config.capture.device);

        let source: Arc<dyn FrameSource> = Arc::new(V4l2Source::open(&config.capture)?);
        let size = Size::new(config.capture.width, config.capture.height);
        let controller = ScanController::new(
            QrDetector::new(),
            source,
            Arc::new(ConsoleListener),
            CameraGeometry::new(size, size),
            &config.scanner,
        )?;
        controller.start()?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = controller.next_event() => {
                    if event.is_none() {
                        break;
                    }
                    if controller.state() == ScanState::AwaitingUserDecision {
                        controller.resume();
                    }
                }
            }
        }

        controller.shutdown();
        Ok(())
    }
}

#[cfg(not(feature = "v4l2"))]
mod camera {
    use codescan::Config;
    use color_eyre::{eyre::eyre, Result};

    pub async fn run(_config: Config) -> Result<()> {
        Err(eyre!("camera support not compiled in; rebuild with --features v4l2"))
    }
}
