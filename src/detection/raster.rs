//! Single-channel raster primitives used by the change detector.

use image::{GrayImage, Rgb, RgbImage, imageops};

/// HSV saturation on the 0-255 scale.
#[must_use]
pub fn saturation(pixel: Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == 0 {
        return 0;
    }
    let scaled = u32::from(max - min) * 255 / u32::from(max);
    u8::try_from(scaled).unwrap_or(u8::MAX)
}

/// Gaussian blur of a luminance frame.
#[must_use]
pub fn blur(frame: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return frame.clone();
    }
    imageops::blur(frame, sigma)
}

/// Pixel-wise absolute difference of two equally sized frames.
#[must_use]
pub fn abs_diff(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let data = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(x, y)| x.abs_diff(*y))
        .collect();
    GrayImage::from_raw(a.width(), a.height(), data)
        .unwrap_or_else(|| GrayImage::new(a.width(), a.height()))
}

/// Otsu's threshold over a sample of 8-bit values.
///
/// Returns 0 for an empty or constant sample.
pub fn otsu_threshold<I>(values: I) -> u8
where
    I: IntoIterator<Item = u8>,
{
    let mut histogram = [0_u64; 256];
    let mut total = 0_u64;
    for v in values {
        if let Some(bin) = histogram.get_mut(usize::from(v)) {
            *bin += 1;
            total += 1;
        }
    }
    if total == 0 {
        return 0;
    }

    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, count)| level as f64 * *count as f64)
        .sum();

    let mut best_level = 0_u8;
    let mut best_variance = 0.0_f64;
    let mut background_weight = 0_u64;
    let mut background_sum = 0.0_f64;

    for (level, count) in (0_u8..=255).zip(histogram.iter()) {
        background_weight += count;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }
        background_sum += f64::from(level) * *count as f64;

        let mean_background = background_sum / background_weight as f64;
        let mean_foreground = (weighted_total - background_sum) / foreground_weight as f64;
        let spread = mean_background - mean_foreground;
        let variance = background_weight as f64 * foreground_weight as f64 * spread * spread;
        if variance > best_variance {
            best_variance = variance;
            best_level = level;
        }
    }
    best_level
}

/// Resizes to exactly `width` x `height` with Lanczos resampling.
#[must_use]
pub fn resize_rgb(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, imageops::FilterType::Lanczos3)
}
