//! Change detection between two acquisitions of the same area.
//!
//! The pipeline reconciles sizes, masks cloud in either frame, blurs and
//! differences the luminance, scores the clean pixels and renders a heatmap.
//! See [`ChangeDetector::compare`].

pub mod cloud_mask;
pub mod detector;
pub mod heatmap;
pub mod raster;

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage};

pub use cloud_mask::CloudMask;
pub use detector::{ChangeDetector, ChangeReport};

/// Errors raised while comparing or encoding images.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// One of the inputs has no pixels.
    #[error("image has no pixels")]
    EmptyImage,
    /// Stored bytes could not be decoded.
    #[error("could not decode image: {0}")]
    Decode(String),
    /// Rendered output could not be encoded.
    #[error("could not encode image: {0}")]
    Encode(String),
}

/// Decodes stored image bytes.
///
/// # Errors
///
/// Returns [`DetectionError::Decode`] for unsupported or corrupt data.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, DetectionError> {
    image::load_from_memory(bytes).map_err(|e| DetectionError::Decode(e.to_string()))
}

/// Encodes a rendered heatmap as PNG.
///
/// # Errors
///
/// Returns [`DetectionError::Encode`] if the encoder fails.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, DetectionError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| DetectionError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Encodes an acquisition as JPEG, dropping any alpha channel.
///
/// # Errors
///
/// Returns [`DetectionError::Encode`] if the encoder fails.
pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, DetectionError> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .map_err(|e| DetectionError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn png_survives_storage() {
        let image = RgbImage::from_pixel(3, 2, Rgb([9, 8, 7]));
        let Ok(bytes) = encode_png(&image) else {
            panic!("png encodes");
        };
        let Ok(decoded) = decode(&bytes) else {
            panic!("png decodes");
        };
        assert_eq!(decoded.to_rgb8(), image);
    }

    #[test]
    fn jpeg_drops_alpha() {
        let image = DynamicImage::new_rgba8(4, 4);
        let Ok(bytes) = encode_jpeg(&image) else {
            panic!("jpeg encodes");
        };
        assert!(bytes.starts_with(&[0xFF, 0xD8]));
    }
}
