mod mjpeg;

pub use mjpeg::{frame_chunk, BOUNDARY, CONTENT_TYPE};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

use crate::error::{CloakError, Result};

/// One published output frame in compressed form.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub jpeg: Bytes,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
}

/// JPEG encoder/decoder for output frames.
#[derive(Debug, Clone, Copy)]
pub struct JpegCodec {
    quality: u8,
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self { quality: 85 }
    }
}

impl JpegCodec {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &RgbImage) -> Result<Bytes> {
        let _span = tracing::debug_span!("encode").entered();

        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(CloakError::EncodeFailure(format!(
                "cannot encode empty {width}x{height} frame"
            )));
        }

        let mut buf = Vec::with_capacity((width * height / 4) as usize);
        JpegEncoder::new_with_quality(&mut buf, self.quality)
            .encode_image(frame)
            .map_err(|e| CloakError::EncodeFailure(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    pub fn decode(&self, jpeg: &[u8]) -> Result<RgbImage> {
        image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
            .map(|img| img.to_rgb8())
            .map_err(|e| CloakError::DecodeFailure(e.to_string()))
    }
}
