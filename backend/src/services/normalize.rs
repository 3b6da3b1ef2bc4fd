use image::{imageops, imageops::FilterType, ImageBuffer, Pixel, Rgb, RgbImage};

use crate::models::error::AppError;
use crate::models::imaging::{NormalizedImage, PaddingOffsets, RawImage};

pub const PAD_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Round up to the next multiple of 8.
pub fn align8(v: u32) -> u32 {
    v.div_ceil(8) * 8
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    max_edge: u32,
}

impl Normalizer {
    pub fn new(max_edge: u32) -> Self {
        Self {
            max_edge: max_edge.max(8),
        }
    }

    /// Letterbox a photo onto the smallest multiple-of-8 canvas that holds
    /// it. Photos whose longer side exceeds `max_edge` are scaled down first.
    pub fn normalize(&self, image: &RawImage) -> Result<NormalizedImage, AppError> {
        let (w, h) = non_empty(image)?;
        let long = w.max(h);
        let content = if long > self.max_edge {
            let scale = self.max_edge as f64 / long as f64;
            (scaled(w, scale, self.max_edge), scaled(h, scale, self.max_edge))
        } else {
            (w, h)
        };
        let canvas = (align8(content.0), align8(content.1));
        Ok(letterbox(image, content, canvas))
    }

    /// Letterbox a photo onto an existing canvas, scaling it to fit.
    pub fn normalize_to(
        &self,
        image: &RawImage,
        canvas: (u32, u32),
    ) -> Result<NormalizedImage, AppError> {
        let (w, h) = non_empty(image)?;
        if canvas.0 == 0 || canvas.1 == 0 || canvas.0 % 8 != 0 || canvas.1 % 8 != 0 {
            return Err(AppError::Internal(format!(
                "canvas {}x{} is not a multiple of 8",
                canvas.0, canvas.1
            )));
        }
        let scale = (canvas.0 as f64 / w as f64).min(canvas.1 as f64 / h as f64);
        let content = (scaled(w, scale, canvas.0), scaled(h, scale, canvas.1));
        Ok(letterbox(image, content, canvas))
    }
}

fn non_empty(image: &RawImage) -> Result<(u32, u32), AppError> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(AppError::InvalidImage(format!("image has zero area ({}x{})", w, h)));
    }
    Ok((w, h))
}

fn scaled(v: u32, scale: f64, limit: u32) -> u32 {
    ((v as f64 * scale).round() as u32).clamp(1, limit)
}

fn letterbox(image: &RawImage, content: (u32, u32), canvas: (u32, u32)) -> NormalizedImage {
    let resized = if content == image.dimensions() {
        image.pixels.clone()
    } else {
        imageops::resize(&image.pixels, content.0, content.1, FilterType::Lanczos3)
    };

    let left = (canvas.0 - content.0) / 2;
    let top = (canvas.1 - content.1) / 2;
    let mut pixels = RgbImage::from_pixel(canvas.0, canvas.1, PAD_COLOR);
    imageops::replace(&mut pixels, &resized, left as i64, top as i64);

    NormalizedImage {
        pixels,
        original: image.dimensions(),
        offsets: PaddingOffsets {
            left,
            top,
            content_width: content.0,
            content_height: content.1,
        },
    }
}

/// Inverse of the letterbox: crop the content rect and resize it back to the
/// original photo size.
pub fn restore<P>(
    canvas: &ImageBuffer<P, Vec<P::Subpixel>>,
    offsets: &PaddingOffsets,
    original: (u32, u32),
    filter: FilterType,
) -> Result<ImageBuffer<P, Vec<P::Subpixel>>, AppError>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    if !offsets.fits(canvas.dimensions()) || original.0 == 0 || original.1 == 0 {
        return Err(AppError::Internal(format!(
            "malformed padding offsets {:?} for canvas {:?}",
            offsets,
            canvas.dimensions()
        )));
    }
    let content = imageops::crop_imm(
        canvas,
        offsets.left,
        offsets.top,
        offsets.content_width,
        offsets.content_height,
    )
    .to_image();
    if content.dimensions() == original {
        return Ok(content);
    }
    Ok(imageops::resize(&content, original.0, original.1, filter))
}
