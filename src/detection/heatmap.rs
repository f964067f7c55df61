//! Heat-coloured rendering of a difference map.

use image::{GrayImage, Rgb, RgbImage};

use super::cloud_mask::CloudMask;

const CLOUD_TONE: f64 = 200.0;
const CLOUD_ALPHA: f64 = 0.7;
const CONTRAST_GAIN: f64 = 1.2;
const CONTRAST_BIAS: f64 = 10.0;

/// Black-red-yellow-white ramp for `t` in `[0, 1]`.
fn hot(t: f64) -> [f64; 3] {
    let t = t.clamp(0.0, 1.0) * 3.0;
    [t.min(1.0), (t - 1.0).clamp(0.0, 1.0), (t - 2.0).clamp(0.0, 1.0)]
}

fn to_channel(value: f64) -> u8 {
    // Clamped to the u8 range just above.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let channel = value.round().clamp(0.0, 255.0) as u8;
    channel
}

/// Renders `diff` with min-max normalisation and a hot colour ramp.
/// Cloud pixels are drawn in a neutral grey instead of being hidden.
#[must_use]
pub fn render(diff: &GrayImage, clouds: &CloudMask) -> RgbImage {
    let masked: Vec<u8> = diff
        .as_raw()
        .iter()
        .zip(clouds.flags())
        .map(|(value, cloudy)| if *cloudy { 0 } else { *value })
        .collect();

    let min = masked.iter().copied().min().unwrap_or(0);
    let max = masked.iter().copied().max().unwrap_or(0);
    let range = f64::from(max - min);

    let mut out = RgbImage::new(diff.width(), diff.height());
    for ((pixel, value), cloudy) in out.pixels_mut().zip(&masked).zip(clouds.flags()) {
        let t = if range > 0.0 {
            f64::from(value - min) / range
        } else {
            0.0
        };
        let colored = hot(t).map(|c| (c * 255.0).mul_add(CONTRAST_GAIN, CONTRAST_BIAS).min(255.0));
        let rendered = if *cloudy {
            colored.map(|c| CLOUD_ALPHA.mul_add(CLOUD_TONE, (1.0 - CLOUD_ALPHA) * c))
        } else {
            colored
        };
        *pixel = Rgb(rendered.map(to_channel));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn strongest_change_is_white_hot() {
        let mut diff = GrayImage::new(2, 1);
        diff.put_pixel(1, 0, Luma([90]));
        let image = render(&diff, &CloudMask::clear(2, 1));
        assert_eq!(image.get_pixel(0, 0).0, [10, 10, 10]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn cloud_pixels_render_grey() {
        let diff = GrayImage::from_pixel(1, 1, Luma([0]));
        let rgb = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        let luma = GrayImage::from_pixel(1, 1, Luma([255]));
        let clouds = CloudMask::detect(&rgb, &luma);
        let image = render(&diff, &clouds);
        assert_eq!(image.get_pixel(0, 0).0, [143, 143, 143]);
    }
}
