use std::sync::Arc;

use image::imageops;

use super::{CaptureBackend, CaptureSource, DeviceRequest, Frame};
use crate::error::{CloakError, Result};

/// Owns the currently open capture source and releases it on drop, so the
/// camera is freed on every exit path of the processing loop.
pub struct Device {
    backend: Arc<dyn CaptureBackend>,
    request: DeviceRequest,
    mirror: bool,
    source: Option<Box<dyn CaptureSource>>,
}

impl Device {
    pub fn open(backend: Arc<dyn CaptureBackend>, request: DeviceRequest, mirror: bool) -> Result<Self> {
        let source = backend.open(&request)?;
        Ok(Self {
            backend,
            request,
            mirror,
            source: Some(source),
        })
    }

    pub fn request(&self) -> &DeviceRequest {
        &self.request
    }

    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.source.as_ref().map(|s| s.resolution())
    }

    /// Read one frame, flipped horizontally in mirror mode.
    pub fn read(&mut self) -> Result<Frame> {
        let source = self.source.as_mut().ok_or_else(|| {
            CloakError::CaptureFailure(format!("camera {} is not open", self.request.index))
        })?;

        let mut frame = source.capture_frame()?;
        if frame.width() == 0 || frame.height() == 0 {
            return Err(CloakError::CaptureFailure("camera returned an empty frame".into()));
        }
        if self.mirror {
            imageops::flip_horizontal_in_place(&mut frame);
        }
        Ok(frame)
    }

    /// Close the current source and open a fresh one. On failure the device
    /// stays closed and the caller may try again.
    pub fn reopen(&mut self) -> Result<()> {
        self.close();
        let source = self.backend.open(&self.request)?;
        self.source = Some(source);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::ScriptedBackend;
    use image::Rgb;

    #[test]
    fn mirror_flips_frames() {
        let backend = ScriptedBackend::solid([10, 20, 30]);
        backend.set_pattern(|x, _| if x == 0 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 0]) });

        let mut plain = Device::open(backend.clone(), DeviceRequest::default(), false).unwrap();
        let mut mirrored = Device::open(backend.clone(), DeviceRequest::default(), true).unwrap();

        let a = plain.read().unwrap();
        let b = mirrored.read().unwrap();
        let last = a.width() - 1;
        assert_eq!(a.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(b.get_pixel(last, 0), &Rgb([255, 0, 0]));
        assert_eq!(b.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn reopen_and_drop_release_sources() {
        let backend = ScriptedBackend::solid([1, 2, 3]);
        {
            let mut device = Device::open(backend.clone(), DeviceRequest::default(), false).unwrap();
            device.reopen().unwrap();
            device.close();
            device.close();
            assert!(!device.is_open());
            assert!(device.read().is_err());
            device.reopen().unwrap();
        }
        assert_eq!(backend.opens(), 3);
        assert_eq!(backend.live_sources(), 0);
    }

    #[test]
    fn failed_open_is_reported() {
        let backend = ScriptedBackend::solid([1, 2, 3]);
        backend.fail_opens(1);
        let err = Device::open(backend.clone(), DeviceRequest::default(), false).err().unwrap();
        assert!(matches!(err, CloakError::DeviceUnavailable { .. }));
    }
}
