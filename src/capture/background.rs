use std::time::Duration;

use image::RgbImage;

use super::{Device, Frame};
use crate::error::{CloakError, Result};

/// How the reference background is sampled at the start of a session.
///
/// The background is the per-pixel median of `frames` consecutive reads,
/// which drops anything that only passes through the scene briefly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundCapture {
    pub frames: usize,
    pub settle: Duration,
    pub max_failed_reads: usize,
}

impl Default for BackgroundCapture {
    fn default() -> Self {
        Self {
            frames: 30,
            settle: Duration::from_secs(2),
            max_failed_reads: 30,
        }
    }
}

impl BackgroundCapture {
    /// Sample the background from `device`.
    ///
    /// `wait` blocks for up to the given duration and returns `true` once a
    /// stop has been requested, in which case `Ok(None)` is returned.
    pub fn capture(
        &self,
        device: &mut Device,
        mut wait: impl FnMut(Duration) -> bool,
    ) -> Result<Option<Frame>> {
        tracing::info!(
            "Capturing background from {} frames, stay out of view",
            self.frames
        );
        if wait(self.settle) {
            return Ok(None);
        }

        let wanted = self.frames.max(1);
        let mut frames: Vec<Frame> = Vec::with_capacity(wanted);
        let mut failed = 0usize;

        while frames.len() < wanted {
            if wait(Duration::ZERO) {
                return Ok(None);
            }

            match device.read() {
                Ok(frame) => {
                    if let Some(first) = frames.first() {
                        if first.dimensions() != frame.dimensions() {
                            tracing::warn!(
                                "Background frame size changed from {:?} to {:?}, skipping",
                                first.dimensions(),
                                frame.dimensions()
                            );
                            failed += 1;
                        } else {
                            frames.push(frame);
                        }
                    } else {
                        frames.push(frame);
                    }
                }
                Err(err) => {
                    tracing::warn!("Background read failed: {}", err);
                    failed += 1;
                }
            }

            if failed > self.max_failed_reads {
                return Err(CloakError::CaptureFailure(format!(
                    "gave up on background after {failed} failed reads"
                )));
            }
        }

        let background = median_frame(&frames)?;
        tracing::info!(
            "Background captured at {}x{}",
            background.width(),
            background.height()
        );
        Ok(Some(background))
    }
}

/// Per-pixel, per-channel median of equally sized frames.
pub fn median_frame(frames: &[Frame]) -> Result<Frame> {
    let _span = tracing::debug_span!("median_background", frames = frames.len()).entered();

    let first = frames
        .first()
        .ok_or_else(|| CloakError::CaptureFailure("no frames to build a background from".into()))?;
    let (width, height) = first.dimensions();
    if let Some(odd) = frames.iter().find(|f| f.dimensions() != (width, height)) {
        return Err(CloakError::DimensionMismatch {
            expected: (width, height),
            actual: odd.dimensions(),
        });
    }
    if frames.len() == 1 {
        return Ok(first.clone());
    }

    let mid = frames.len() / 2;
    let mut samples = vec![0u8; frames.len()];
    let data: Vec<u8> = (0..first.as_raw().len())
        .map(|i| {
            for (slot, frame) in samples.iter_mut().zip(frames) {
                *slot = frame.as_raw()[i];
            }
            *samples.select_nth_unstable(mid).1
        })
        .collect();

    RgbImage::from_raw(width, height, data)
        .ok_or_else(|| CloakError::CaptureFailure("median buffer has the wrong size".into()))
}
