use image::{GrayImage, RgbImage};

/// Caller-supplied photograph at its native resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub pixels: RgbImage,
}

impl RawImage {
    pub fn new(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

/// Where the resized content sits on a normalized canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingOffsets {
    pub left: u32,
    pub top: u32,
    pub content_width: u32,
    pub content_height: u32,
}

impl PaddingOffsets {
    /// True when the content rect lies inside a canvas of the given size.
    pub fn fits(&self, canvas: (u32, u32)) -> bool {
        self.content_width > 0
            && self.content_height > 0
            && self.left + self.content_width <= canvas.0
            && self.top + self.content_height <= canvas.1
    }
}

/// A canvas whose sides are multiples of 8, plus what is needed to map it
/// back onto the original photograph.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pub pixels: RgbImage,
    pub original: (u32, u32),
    pub offsets: PaddingOffsets,
}

impl NormalizedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskConfidence {
    Full,
    /// The requested category did not match the detected body parts; the
    /// mask was built from a geometric fallback.
    Reduced,
}

/// Binary (0 / 255) region to regenerate, aligned to the person canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct InpaintMask {
    pub pixels: GrayImage,
    pub confidence: MaskConfidence,
}

impl InpaintMask {
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn coverage(&self) -> usize {
        self.pixels.pixels().filter(|p| p[0] > 0).count()
    }
}

/// Generator output at canvas resolution.
pub type ResultImage = RgbImage;

/// Composited output at the caller's original resolution.
pub type FinalImage = RgbImage;
