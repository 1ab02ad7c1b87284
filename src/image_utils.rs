//! Decoding and display helpers for uploaded X-ray images

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{ColorType, DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image data is too large: {0} bytes (max: {1} bytes)")]
    TooLarge(usize, usize),

    #[error("Unsupported image format, upload a PNG, JPG or JPEG file")]
    UnsupportedFormat,

    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("Failed to encode image for display: {0}")]
    EncodeFailed(String),

    #[error("Image data is empty")]
    EmptyData,
}

/// An upload decoded and normalized to RGB
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
    /// Color mode of the file before RGB conversion
    pub original_color: ColorType,
    pub size_bytes: usize,
}

/// Decode raw upload bytes, accepting only PNG and JPEG, and convert the
/// result to RGB.
pub fn decode_upload(bytes: &[u8], max_size: usize) -> Result<DecodedImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::EmptyData);
    }

    if bytes.len() > max_size {
        return Err(ImageError::TooLarge(bytes.len(), max_size));
    }

    let format = detect_format(bytes)?;
    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;
    let original_color = image.color();

    Ok(DecodedImage {
        image: to_rgb(image),
        format,
        original_color,
        size_bytes: bytes.len(),
    })
}

/// Detect PNG or JPEG from magic bytes
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, ImageError> {
    match bytes {
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Ok(ImageFormat::Png),

        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Ok(ImageFormat::Jpeg),

        _ => Err(ImageError::UnsupportedFormat),
    }
}

pub fn to_rgb(image: DynamicImage) -> DynamicImage {
    if image.color() == ColorType::Rgb8 {
        image
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    }
}

/// Re-encode as PNG inside a `data:` URL so the page can show the upload
/// without storing it.
pub fn to_data_url(image: &DynamicImage) -> Result<String, ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| ImageError::EncodeFailed(e.to_string()))?;
    Ok(format!(
        "data:image/png;base64,{}",
        STANDARD.encode(buffer.into_inner())
    ))
}
