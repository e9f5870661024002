use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arcnet::capture::{BackgroundCapture, DeviceRequest, WebcamBackend};
use arcnet::config::{PreviewMode, SessionConfig};
use arcnet::detection::ColorRange;
use arcnet::server::{run_server, AppState};
use arcnet::session::Session;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Capture resolution width
    #[arg(long, default_value_t = 640)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 480)]
    capture_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// JPEG quality of the streamed frames (1-100)
    #[arg(long, default_value_t = 85)]
    jpeg_quality: u8,

    /// Number of frames combined into the background plate
    #[arg(long, default_value_t = 30)]
    background_frames: usize,

    /// Delay before sampling the background, so the user can step out of frame
    #[arg(long, default_value_t = 2000)]
    settle_ms: u64,

    /// How long a stop request waits for the camera to be released
    #[arg(long, default_value_t = 5000)]
    stop_timeout_ms: u64,

    /// Address to serve the control page and video feed on
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    bind: SocketAddr,

    /// Cloak color range as "h,s,v:h,s,v" (OpenCV HSV scale, hue 0-180).
    /// Repeat for several ranges. Defaults to red.
    #[arg(long = "range", value_name = "LOWER:UPPER")]
    ranges: Vec<ColorRange>,

    /// Mirror the camera image horizontally
    #[arg(long)]
    mirror: bool,

    /// Stream the detection mask instead of the cloak effect
    #[arg(long)]
    show_mask: bool,

    /// Also write frames to this v4l2loopback device (e.g. /dev/video10)
    #[arg(long)]
    loopback: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            device: DeviceRequest {
                index: self.input_device,
                width: self.capture_width,
                height: self.capture_height,
            },
            background: BackgroundCapture {
                frames: self.background_frames.max(1),
                settle: Duration::from_millis(self.settle_ms),
                ..BackgroundCapture::default()
            },
            target_fps: self.fps,
            jpeg_quality: self.jpeg_quality,
            mirror: self.mirror,
            preview: if self.show_mask {
                PreviewMode::Mask
            } else {
                PreviewMode::Composite
            },
            loopback: self.loopback.clone(),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            ..SessionConfig::default()
        }
    }

    fn default_ranges(&self) -> Vec<ColorRange> {
        if self.ranges.is_empty() {
            ColorRange::red().to_vec()
        } else {
            self.ranges.clone()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let ranges = args.default_ranges();

    tracing::info!("ARCNet starting");
    tracing::info!(
        "Camera {}: {}x{}",
        args.input_device,
        args.capture_width,
        args.capture_height
    );
    tracing::info!("Target FPS: {}", args.fps);
    for range in &ranges {
        tracing::info!("Cloak range: {}", range);
    }
    if let Some(path) = &args.loopback {
        tracing::info!("Loopback output: {}", path.display());
    }

    let session = Session::new(Arc::new(WebcamBackend), args.session_config());
    let state = AppState::new(session.clone(), ranges);

    run_server(args.bind, state, shutdown_signal(session))
        .await
        .with_context(|| format!("Failed to serve on {}", args.bind))?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C once the session has released the camera. Stopping
/// first ends open video feeds, which graceful shutdown would otherwise
/// wait on forever.
async fn shutdown_signal(session: Session) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for Ctrl+C: {}", err);
        std::future::pending::<()>().await
    }
    tracing::info!("Ctrl+C received, shutting down");

    match tokio::task::spawn_blocking(move || session.stop()).await {
        Ok(outcome) => tracing::debug!("Session stop: {:?}", outcome),
        Err(err) => tracing::error!("Failed to stop session: {}", err),
    }
}
