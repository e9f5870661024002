mod color;
mod refine;

pub use color::{ColorRange, Hsv, HUE_LIMIT};
pub use refine::MaskRefinement;

use image::{GrayImage, Luma, RgbImage};

use crate::error::{CloakError, Result};

/// Single-channel cloak mask: 255 marks cloak pixels, 0 everything else.
/// Dimensions always match the frame it was derived from.
pub type Mask = GrayImage;

/// Color-threshold detector producing cleaned cloak masks.
///
/// Stateless: the same frame and range always give the same mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detector {
    refinement: MaskRefinement,
}

impl Detector {
    pub fn new(refinement: MaskRefinement) -> Self {
        Self { refinement }
    }

    /// Detect one color range in `frame`.
    pub fn detect(&self, frame: &RgbImage, range: &ColorRange) -> Mask {
        let hsv = HsvFrame::from_rgb(frame);
        self.refinement.apply(&hsv.threshold(range))
    }

    /// Detect every range and union the results, converting to HSV only once.
    pub fn detect_all(&self, frame: &RgbImage, ranges: &[ColorRange]) -> Result<Mask> {
        let _span = tracing::debug_span!("detect", ranges = ranges.len()).entered();

        let hsv = HsvFrame::from_rgb(frame);
        let masks: Vec<Mask> = ranges
            .iter()
            .map(|range| self.refinement.apply(&hsv.threshold(range)))
            .collect();
        union(&masks)
    }
}

/// Frame converted to HSV, kept so several ranges can be thresholded
/// against one conversion.
pub struct HsvFrame {
    width: u32,
    height: u32,
    pixels: Vec<Hsv>,
}

impl HsvFrame {
    pub fn from_rgb(frame: &RgbImage) -> Self {
        let (width, height) = frame.dimensions();
        let pixels = frame.pixels().map(|p| Hsv::from_rgb(p.0)).collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Raw in-range mask, no clean-up.
    pub fn threshold(&self, range: &ColorRange) -> Mask {
        let data = self
            .pixels
            .iter()
            .map(|&px| if range.contains(px) { 255 } else { 0 })
            .collect();
        // length is width * height by construction
        GrayImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

/// Combine masks by saturating per-pixel addition, so a pixel is cloak if
/// any input flags it.
pub fn union(masks: &[Mask]) -> Result<Mask> {
    let (first, rest) = masks
        .split_first()
        .ok_or_else(|| CloakError::InvalidRange("no color ranges to detect".into()))?;

    let mut combined = first.clone();
    for mask in rest {
        if mask.dimensions() != combined.dimensions() {
            return Err(CloakError::DimensionMismatch {
                expected: combined.dimensions(),
                actual: mask.dimensions(),
            });
        }
        for (acc, px) in combined.pixels_mut().zip(mask.pixels()) {
            *acc = Luma([acc[0].saturating_add(px[0])]);
        }
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    fn green() -> ColorRange {
        ColorRange::new([50, 100, 50], [70, 255, 255]).unwrap()
    }

    #[test]
    fn frame_inside_range_is_fully_masked() {
        let frame = solid(48, 36, [0, 220, 0]);
        let mask = Detector::default().detect(&frame, &green());
        assert_eq!(mask.dimensions(), (48, 36));
        assert!(mask.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn range_matching_nothing_gives_empty_mask() {
        let frame = solid(48, 36, [0, 0, 220]);
        let mask = Detector::default().detect(&frame, &green());
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn detection_is_deterministic() {
        let mut frame = solid(40, 30, [30, 30, 30]);
        for y in 5..25 {
            for x in 8..30 {
                frame.put_pixel(x, y, Rgb([10, 200, 20]));
            }
        }
        frame.put_pixel(2, 2, Rgb([0, 255, 0]));

        let detector = Detector::default();
        assert_eq!(detector.detect(&frame, &green()), detector.detect(&frame, &green()));
    }

    #[test]
    fn red_ranges_cover_both_sides_of_hue_wrap() {
        let mut frame = solid(60, 30, [200, 0, 0]);
        for y in 0..30 {
            for x in 30..60 {
                frame.put_pixel(x, y, Rgb([220, 0, 40]));
            }
        }
        let ranges = ColorRange::red();
        let detector = Detector::default();

        let low = detector.detect(&frame, &ranges[0]);
        let high = detector.detect(&frame, &ranges[1]);
        assert_eq!(low.get_pixel(5, 15)[0], 255);
        assert_eq!(low.get_pixel(55, 15)[0], 0);
        assert_eq!(high.get_pixel(55, 15)[0], 255);
        assert_eq!(high.get_pixel(5, 15)[0], 0);

        let all = detector.detect_all(&frame, &ranges).unwrap();
        assert!(all.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn union_is_monotonic_and_saturates() {
        let mut a = GrayImage::new(4, 4);
        let mut b = GrayImage::new(4, 4);
        a.put_pixel(0, 0, Luma([255]));
        b.put_pixel(3, 3, Luma([255]));
        b.put_pixel(0, 0, Luma([255]));
        let c = GrayImage::from_pixel(4, 4, Luma([0]));

        let combined = union(&[a.clone(), b.clone(), c]).unwrap();
        for (x, y, px) in combined.enumerate_pixels() {
            let flagged = a.get_pixel(x, y)[0] > 0 || b.get_pixel(x, y)[0] > 0;
            assert_eq!(px[0], if flagged { 255 } else { 0 }, "pixel ({x},{y})");
        }
    }

    #[test]
    fn union_rejects_empty_and_mismatched_inputs() {
        assert!(union(&[]).is_err());
        let err = union(&[GrayImage::new(4, 4), GrayImage::new(5, 4)]).unwrap_err();
        assert!(matches!(err, CloakError::DimensionMismatch { .. }));
    }
}
