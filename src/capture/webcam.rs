use super::{CaptureBackend, CaptureSource, DeviceRequest, Frame};
use crate::error::{CloakError, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

/// Opens local webcams through nokhwa.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebcamBackend;

impl CaptureBackend for WebcamBackend {
    fn open(&self, request: &DeviceRequest) -> Result<Box<dyn CaptureSource>> {
        Ok(Box::new(WebcamCapture::new(request)?))
    }
}

pub struct WebcamCapture {
    camera: Camera,
    device: u32,
    width: u32,
    height: u32,
    streaming: bool,
}

impl WebcamCapture {
    pub fn new(request: &DeviceRequest) -> Result<Self> {
        tracing::info!(
            "Opening webcam {} at {}x{}",
            request.index,
            request.width,
            request.height
        );

        let index = CameraIndex::Index(request.index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(request.width, request.height),
        ));

        // Not every driver can honour the requested size; fall back to
        // whatever the camera offers.
        let mut camera = match Camera::new(index.clone(), requested) {
            Ok(camera) => camera,
            Err(err) => {
                tracing::warn!(
                    "Webcam {} rejected {}x{} ({}), using its default format",
                    request.index,
                    request.width,
                    request.height,
                    err
                );
                let fallback =
                    RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
                Camera::new(index, fallback)
                    .map_err(|e| CloakError::device_unavailable(request.index, e))?
            }
        };

        camera
            .open_stream()
            .map_err(|e| CloakError::device_unavailable(request.index, e))?;

        let resolution = camera.resolution();
        tracing::info!(
            "Webcam {} streaming at {}x{}",
            request.index,
            resolution.width(),
            resolution.height()
        );

        Ok(Self {
            camera,
            device: request.index,
            width: resolution.width(),
            height: resolution.height(),
            streaming: true,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<Frame> {
        if !self.streaming {
            return Err(CloakError::CaptureFailure(format!(
                "webcam {} is closed",
                self.device
            )));
        }

        let frame = self
            .camera
            .frame()
            .map_err(|e| CloakError::CaptureFailure(e.to_string()))?;

        frame
            .decode_image::<RgbFormat>()
            .map_err(|e| CloakError::CaptureFailure(format!("decode: {e}")))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        if !self.streaming {
            return;
        }
        self.streaming = false;
        if let Err(err) = self.camera.stop_stream() {
            tracing::debug!("Ignoring error while releasing webcam {}: {}", self.device, err);
        }
        tracing::info!("Webcam {} released", self.device);
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        self.close();
    }
}
