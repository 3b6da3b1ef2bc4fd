use image::{imageops::FilterType, GrayImage, RgbImage};

use crate::models::error::AppError;
use crate::models::imaging::{FinalImage, InpaintMask, PaddingOffsets, ResultImage};
use crate::services::normalize::restore;

/// Maps generator output back onto the caller's photograph. Only the masked
/// region is replaced; the mask edge is feathered so the seam blends.
#[derive(Debug, Clone)]
pub struct Compositor {
    pub feather_sigma: f32,
}

impl Compositor {
    pub fn new(feather_sigma: f32) -> Self {
        Self { feather_sigma }
    }

    pub fn composite(
        &self,
        result: &ResultImage,
        original: &RgbImage,
        offsets: &PaddingOffsets,
        mask: &InpaintMask,
    ) -> Result<FinalImage, AppError> {
        if result.dimensions() != mask.dimensions() {
            return Err(AppError::Internal(format!(
                "result {:?} and mask {:?} differ in size",
                result.dimensions(),
                mask.dimensions()
            )));
        }
        let size = original.dimensions();
        let restored = restore(result, offsets, size, FilterType::Lanczos3)?;
        let alpha = self.feather(restore(&mask.pixels, offsets, size, FilterType::Triangle)?);
        Ok(blend(original, &restored, &alpha))
    }

    fn feather(&self, mask: GrayImage) -> GrayImage {
        if !(self.feather_sigma.is_finite() && self.feather_sigma > 0.0) {
            return mask;
        }
        imageproc::filter::gaussian_blur_f32(&mask, self.feather_sigma)
    }
}

// ---------------------------------------------------------------------------
// Image blending
// ---------------------------------------------------------------------------

fn blend(original: &RgbImage, generated: &RgbImage, alpha: &GrayImage) -> RgbImage {
    let mut out = original.clone();
    for ((op, np), a) in out.pixels_mut().zip(generated.pixels()).zip(alpha.pixels()) {
        match a[0] {
            0 => {}
            255 => *op = *np,
            a => {
                let t = a as f32 / 255.0;
                for c in 0..3 {
                    let blended = op[c] as f32 * (1.0 - t) + np[c] as f32 * t;
                    op[c] = blended.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
    out
}
