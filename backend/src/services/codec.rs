use std::io::Cursor;

use base64::Engine as _;
use image::{DynamicImage, ImageFormat};

use crate::models::error::AppError;
use crate::models::imaging::RawImage;

pub const JPEG_QUALITY: u8 = 95;

/// Strip a `data:` URI prefix and whitespace, and repair the padding so the
/// payload length is a multiple of 4.
pub fn sanitize_base64(payload: &str) -> String {
    let body = match (payload.starts_with("data:"), payload.find(',')) {
        (true, Some(idx)) => &payload[idx + 1..],
        _ => payload,
    };

    let mut cleaned: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    match cleaned.len() % 4 {
        1 => {
            cleaned.pop();
        }
        2 => cleaned.push_str("=="),
        3 => cleaned.push('='),
        _ => {}
    }
    cleaned
}

pub fn decode_base64(payload: &str) -> Result<Vec<u8>, AppError> {
    base64::engine::general_purpose::STANDARD
        .decode(sanitize_base64(payload))
        .map_err(|e| AppError::InvalidImage(format!("base64 decode error: {}", e)))
}

pub fn load_image(data: &[u8]) -> Result<RawImage, AppError> {
    let img = image::load_from_memory(data)
        .map_err(|e| AppError::InvalidImage(e.to_string()))?;
    Ok(RawImage::new(img.to_rgb8()))
}

pub fn base64_to_image(payload: &str) -> Result<RawImage, AppError> {
    let bytes = decode_base64(payload)?;
    load_image(&bytes)
}

pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, AppError> {
    let mut buf = Cursor::new(Vec::new());
    let rgb = img.to_rgb8();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| AppError::Internal(format!("JPEG encode error: {}", e)))?;
    Ok(buf.into_inner())
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, AppError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| AppError::Internal(format!("PNG encode error: {}", e)))?;
    Ok(buf.into_inner())
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Photographic output: JPEG at quality 95.
pub fn image_to_base64(img: &DynamicImage) -> Result<String, AppError> {
    Ok(data_uri("image/jpeg", &encode_jpeg(img, JPEG_QUALITY)?))
}

/// Lossless encoding for masks and intermediates.
pub fn image_to_base64_png(img: &DynamicImage) -> Result<String, AppError> {
    Ok(data_uri("image/png", &encode_png(img)?))
}
