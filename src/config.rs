use std::path::PathBuf;
use std::time::Duration;

use crate::capture::{BackgroundCapture, DeviceRequest};
use crate::detection::MaskRefinement;

/// What the session publishes to the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviewMode {
    /// The cloak effect itself.
    #[default]
    Composite,
    /// The combined detection mask, for tuning color ranges.
    Mask,
}

/// Retry policy when the camera has to be reopened mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconnect {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for Reconnect {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub device: DeviceRequest,
    pub background: BackgroundCapture,
    pub refinement: MaskRefinement,
    pub reconnect: Reconnect,
    pub target_fps: u32,
    pub jpeg_quality: u8,
    pub mirror: bool,
    pub preview: PreviewMode,
    pub loopback: Option<PathBuf>,
    /// How long `start` waits for the camera to open.
    pub open_timeout: Duration,
    /// How long `stop` waits for the loop to release the camera.
    pub stop_timeout: Duration,
    /// Log stage timings every this many frames; 0 disables.
    pub stats_interval: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: DeviceRequest::default(),
            background: BackgroundCapture::default(),
            refinement: MaskRefinement::default(),
            reconnect: Reconnect::default(),
            target_fps: 30,
            jpeg_quality: 85,
            mirror: false,
            preview: PreviewMode::Composite,
            loopback: None,
            open_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            stats_interval: 30,
        }
    }
}

impl SessionConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}
