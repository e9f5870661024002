use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{dilate, open};

/// Noise clean-up applied to a raw threshold mask.
///
/// Blur → binarise → opening → dilation. The morphology radii are L∞
/// distances, so a radius of 2 is a 5×5 square structuring element.
///
/// Binarising at the midpoint keeps a blurred edge where the raw edge was,
/// so the blur only smooths the outline. A threshold of 1 would grow every
/// blob by the blur radius and turn a single noisy pixel into a patch
/// large enough to survive the opening.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskRefinement {
    pub blur_sigma: f32,
    pub binarize_at: u8,
    pub open_radius: u8,
    pub dilate_radius: u8,
}

impl Default for MaskRefinement {
    fn default() -> Self {
        // sigma of a 7x7 gaussian kernel
        Self {
            blur_sigma: 1.4,
            binarize_at: 128,
            open_radius: 2,
            dilate_radius: 2,
        }
    }
}

impl MaskRefinement {
    /// Refine `raw`, returning a mask whose cells are strictly 0 or 255.
    pub fn apply(&self, raw: &GrayImage) -> GrayImage {
        let _span = tracing::debug_span!("refine_mask").entered();

        let mut mask = if self.blur_sigma > 0.0 {
            gaussian_blur_f32(raw, self.blur_sigma)
        } else {
            raw.clone()
        };

        for p in mask.pixels_mut() {
            p[0] = if p[0] >= self.binarize_at { 255 } else { 0 };
        }

        if self.open_radius > 0 {
            mask = open(&mask, Norm::LInf, self.open_radius);
        }
        if self.dilate_radius > 0 {
            mask = dilate(&mask, Norm::LInf, self.dilate_radius);
        }
        mask
    }
}
