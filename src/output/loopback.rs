use std::fs::File;
use std::io::Write;
use std::path::Path;

use image::{imageops, Rgb};

use super::OutputSink;
use crate::capture::Frame;
use crate::error::{CloakError, Result};

/// Writes frames as packed YUYV to a v4l2loopback device, so the cloak
/// output shows up as a virtual webcam.
pub struct LoopbackOutput<W: Write = File> {
    writer: W,
    width: u32,
    height: u32,
}

impl LoopbackOutput<File> {
    pub fn open<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // v4l2loopback accepts raw frames written straight to the node
        let file = File::options().write(true).open(path).map_err(|e| {
            CloakError::OutputFailure(format!("cannot open {}: {e}", path.display()))
        })?;

        Ok(Self::new(file, width, height))
    }
}

impl<W: Write> LoopbackOutput<W> {
    pub fn new(writer: W, width: u32, height: u32) -> Self {
        Self {
            writer,
            width,
            height,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputSink for LoopbackOutput<W> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let _span = tracing::debug_span!("loopback_write").entered();

        let scaled;
        let frame = if frame.dimensions() != (self.width, self.height) {
            scaled = imageops::resize(frame, self.width, self.height, imageops::FilterType::Triangle);
            &scaled
        } else {
            frame
        };

        self.writer
            .write_all(&to_yuyv(frame))
            .map_err(|e| CloakError::OutputFailure(format!("loopback write: {e}")))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Pack RGB into YUYV 4:2:2: each horizontal pixel pair shares averaged
/// chroma. An odd trailing column is paired with itself.
fn to_yuyv(frame: &Frame) -> Vec<u8> {
    let (width, height) = frame.dimensions();
    let pairs = width.div_ceil(2);
    let mut out = Vec::with_capacity((pairs * 4 * height) as usize);

    for y in 0..height {
        for pair in 0..pairs {
            let x = pair * 2;
            let left = frame.get_pixel(x, y);
            let right = if x + 1 < width { frame.get_pixel(x + 1, y) } else { left };

            let (y0, u0, v0) = yuv(left);
            let (y1, u1, v1) = yuv(right);
            out.extend_from_slice(&[
                y0,
                ((u0 as u16 + u1 as u16) / 2) as u8,
                y1,
                ((v0 as u16 + v1 as u16) / 2) as u8,
            ]);
        }
    }
    out
}

/// BT.601 full-range RGB to YUV.
fn yuv(&Rgb([r, g, b]): &Rgb<u8>) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let v = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (
        y.round().clamp(0.0, 255.0) as u8,
        u.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
    )
}
