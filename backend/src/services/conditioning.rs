use image::{GrayImage, Rgb, RgbImage};
use ndarray::Array4;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::models::error::AppError;
use crate::models::imaging::{InpaintMask, NormalizedImage};
use crate::models::perception::PerceptionBundle;
use crate::models::tryon::GarmentCategory;

/// Fill for the region the generator is asked to repaint.
pub const MASK_FILL: Rgb<u8> = Rgb([128, 128, 128]);

/// Spatial downscale between the canvas and the generator's latent grid.
pub const LATENT_SCALE: u32 = 8;
pub const LATENT_CHANNELS: usize = 4;

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub steps: u32,
    pub guidance_scale: f32,
}

/// Everything the generator consumes for one request. Built once, read once.
#[derive(Debug, Clone)]
pub struct ConditioningBundle {
    pub person: RgbImage,
    pub garment: RgbImage,
    pub masked_person: RgbImage,
    pub mask: GrayImage,
    pub densepose: RgbImage,
    pub skeleton: RgbImage,
    pub category: GarmentCategory,
    pub seed: u64,
    pub steps: u32,
    pub guidance_scale: f32,
}

impl ConditioningBundle {
    pub fn dimensions(&self) -> (u32, u32) {
        self.person.dimensions()
    }

    /// Standard-normal latent noise, shape `(1, 4, H/8, W/8)`. Depends only
    /// on the seed and the canvas size.
    pub fn initial_noise(&self) -> Array4<f32> {
        let (w, h) = self.dimensions();
        let shape = (
            1,
            LATENT_CHANNELS,
            (h / LATENT_SCALE) as usize,
            (w / LATENT_SCALE) as usize,
        );
        let mut rng = StdRng::seed_from_u64(self.seed);
        Array4::from_shape_simple_fn(shape, || gaussian(&mut rng))
    }

    /// SHA-256 over every image buffer and scalar, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for img in [
            &self.person,
            &self.garment,
            &self.masked_person,
            &self.densepose,
            &self.skeleton,
        ] {
            hasher.update(img.width().to_le_bytes());
            hasher.update(img.height().to_le_bytes());
            hasher.update(img.as_raw());
        }
        hasher.update(self.mask.as_raw());
        hasher.update(self.category.as_str().as_bytes());
        hasher.update(self.seed.to_le_bytes());
        hasher.update(self.steps.to_le_bytes());
        hasher.update(self.guidance_scale.to_le_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Box–Muller transform over two uniform samples.
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.random::<f32>().max(f32::MIN_POSITIVE);
    let u2: f32 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

/// Bind person, garment, mask and perception maps into one generator input.
///
/// The garment must already be letterboxed onto the person canvas
/// (`Normalizer::normalize_to`), so garments of any size and aspect are
/// accepted upstream. A garment on a different canvas is rejected with
/// `ConditioningSizeMismatch` rather than resized here.
pub fn assemble(
    person: &NormalizedImage,
    garment: &NormalizedImage,
    mask: &InpaintMask,
    perception: &PerceptionBundle,
    category: GarmentCategory,
    seed: u64,
    settings: &GenerationSettings,
) -> Result<ConditioningBundle, AppError> {
    let canvas = person.dimensions();
    if garment.dimensions() != canvas {
        return Err(AppError::ConditioningSizeMismatch {
            person: canvas,
            garment: garment.dimensions(),
        });
    }
    if mask.dimensions() != canvas || perception.dimensions() != canvas {
        return Err(AppError::Internal(format!(
            "mask {:?} / perception {:?} not aligned to canvas {:?}",
            mask.dimensions(),
            perception.dimensions(),
            canvas
        )));
    }

    let mut masked_person = person.pixels.clone();
    for (px, m) in masked_person.pixels_mut().zip(mask.pixels.pixels()) {
        if m[0] > 0 {
            *px = MASK_FILL;
        }
    }

    Ok(ConditioningBundle {
        person: person.pixels.clone(),
        garment: garment.pixels.clone(),
        masked_person,
        mask: mask.pixels.clone(),
        densepose: perception.densepose.clone(),
        skeleton: perception.skeleton.clone(),
        category,
        seed,
        steps: settings.steps,
        guidance_scale: settings.guidance_scale,
    })
}
