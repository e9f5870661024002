mod background;
mod device;
mod webcam;

#[cfg(test)]
pub(crate) mod testing;

pub use background::{median_frame, BackgroundCapture};
pub use device::Device;
pub use webcam::{WebcamBackend, WebcamCapture};

use image::RgbImage;

use crate::error::Result;

/// A captured color frame. Dimensions are fixed for one open device.
pub type Frame = RgbImage;

/// What to ask the camera for. The device may ignore the resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRequest {
    pub index: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for DeviceRequest {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
        }
    }
}

/// An open camera yielding frames on demand.
pub trait CaptureSource {
    /// Block until one frame is available.
    fn capture_frame(&mut self) -> Result<Frame>;

    /// Resolution the device actually delivers.
    fn resolution(&self) -> (u32, u32);

    /// Release the device. Safe to call more than once; never fails.
    fn close(&mut self);
}

/// Opens capture sources. Shared across threads; the sources it returns
/// stay on the thread that opened them.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, request: &DeviceRequest) -> Result<Box<dyn CaptureSource>>;
}
