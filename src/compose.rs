//! Background substitution.
//!
//! The output takes frame pixels wherever the mask is clear and background
//! pixels wherever it is set. Neither input is modified.

use std::borrow::Cow;

use image::{imageops, DynamicImage, RgbImage};

use crate::detection::Mask;
use crate::error::{CloakError, Result};

/// Replace the masked region of `frame` with `background`.
///
/// A background of a different size is scaled to the frame first
/// (nearest-neighbour). Any non-zero mask cell counts as cloak.
pub fn compose(frame: &RgbImage, background: &RgbImage, mask: &Mask) -> Result<RgbImage> {
    let _span = tracing::debug_span!("compose").entered();

    let dims = frame.dimensions();
    if mask.dimensions() != dims {
        return Err(CloakError::DimensionMismatch {
            expected: dims,
            actual: mask.dimensions(),
        });
    }

    let background = fit_background(background, dims);

    let mut output = RgbImage::new(dims.0, dims.1);
    for (((out, fg), bg), m) in output
        .pixels_mut()
        .zip(frame.pixels())
        .zip(background.pixels())
        .zip(mask.pixels())
    {
        *out = if m[0] == 0 { *fg } else { *bg };
    }
    Ok(output)
}

/// Reduce an arbitrary mask image to the single-channel selector `compose`
/// expects. Single-channel masks pass through unchanged; anything else is
/// converted to luma.
pub fn to_selector(mask: &DynamicImage) -> Mask {
    match mask {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => other.to_luma8(),
    }
}

fn fit_background(background: &RgbImage, (width, height): (u32, u32)) -> Cow<'_, RgbImage> {
    if background.dimensions() == (width, height) {
        Cow::Borrowed(background)
    } else {
        tracing::debug!(
            "Resizing background {:?} to {}x{}",
            background.dimensions(),
            width,
            height
        );
        Cow::Owned(imageops::resize(
            background,
            width,
            height,
            imageops::FilterType::Nearest,
        ))
    }
}
