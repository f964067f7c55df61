//! Reliability masking.
//!
//! A pixel is treated as cloud or haze when it is both very bright and
//! nearly colourless. Isolated gaps inside a cloud are closed with a small
//! cross-shaped structuring element so that cloud edges do not leak into
//! the change score.

use image::{GrayImage, RgbImage};

use super::raster::saturation;

/// Luminance above which a pixel may be cloud.
pub const BRIGHTNESS_THRESHOLD: u8 = 200;

/// Saturation (0-255) below which a bright pixel is cloud.
pub const SATURATION_THRESHOLD: u8 = 40;

/// Per-pixel cloud flags of one frame, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudMask {
    width: u32,
    height: u32,
    flags: Vec<bool>,
}

impl CloudMask {
    /// Detects cloud pixels in an RGB frame and its luminance.
    #[must_use]
    pub fn detect(rgb: &RgbImage, luma: &GrayImage) -> Self {
        let flags = rgb
            .pixels()
            .zip(luma.pixels())
            .map(|(color, gray)| {
                gray.0[0] > BRIGHTNESS_THRESHOLD && saturation(*color) < SATURATION_THRESHOLD
            })
            .collect();
        Self {
            width: rgb.width(),
            height: rgb.height(),
            flags,
        }
        .closed()
    }

    /// Mask with no cloud pixels.
    #[must_use]
    pub fn clear(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            flags: vec![false; pixel_count(width, height)],
        }
    }

    /// Pixels flagged in either mask.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let flags = self
            .flags
            .iter()
            .zip(&other.flags)
            .map(|(a, b)| *a || *b)
            .collect();
        Self {
            width: self.width,
            height: self.height,
            flags,
        }
    }

    /// Row-major cloud flags.
    #[must_use]
    pub fn flags(&self) -> &[bool] {
        &self.flags
    }

    /// Number of pixels that are not cloud.
    #[must_use]
    pub fn clean_count(&self) -> usize {
        self.flags.iter().filter(|f| !**f).count()
    }

    /// Percentage of pixels flagged as cloud.
    #[must_use]
    pub fn coverage_pct(&self) -> f64 {
        if self.flags.is_empty() {
            return 0.0;
        }
        let cloudy = self.flags.len() - self.clean_count();
        cloudy as f64 / self.flags.len() as f64 * 100.0
    }

    fn get(&self, x: i64, y: i64) -> Option<bool> {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return None;
        }
        let index = usize::try_from(y * i64::from(self.width) + x).ok()?;
        self.flags.get(index).copied()
    }

    /// Dilates (any) or erodes (all) over the 3x3 cross neighbourhood.
    /// Out-of-frame neighbours are ignored.
    fn morph(&self, dilate: bool) -> Self {
        const CROSS: [(i64, i64); 5] = [(0, 0), (-1, 0), (1, 0), (0, -1), (0, 1)];
        let width = i64::from(self.width);
        let flags = (0..self.flags.len())
            .map(|index| {
                let index = i64::try_from(index).unwrap_or(i64::MAX);
                let (x, y) = (index % width.max(1), index / width.max(1));
                let mut neighbours = CROSS.iter().filter_map(|(dx, dy)| self.get(x + dx, y + dy));
                if dilate {
                    neighbours.any(|f| f)
                } else {
                    neighbours.all(|f| f)
                }
            })
            .collect();
        Self {
            width: self.width,
            height: self.height,
            flags,
        }
    }

    /// Morphological close: dilate then erode.
    fn closed(self) -> Self {
        self.morph(true).morph(false)
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    usize::try_from(u64::from(width) * u64::from(height)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb};

    fn mask_of(rgb: &RgbImage) -> CloudMask {
        let luma = DynamicImage::ImageRgb8(rgb.clone()).to_luma8();
        CloudMask::detect(rgb, &luma)
    }

    #[test]
    fn white_frame_is_fully_cloudy() {
        let mask = mask_of(&RgbImage::from_pixel(8, 8, Rgb([250, 250, 250])));
        assert_eq!(mask.clean_count(), 0);
        assert!((mask.coverage_pct() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn saturated_bright_pixels_are_not_cloud() {
        let mask = mask_of(&RgbImage::from_pixel(8, 8, Rgb([255, 230, 20])));
        assert_eq!(mask.clean_count(), 64);
    }

    #[test]
    fn close_fills_single_pixel_gap() {
        let mut rgb = RgbImage::from_pixel(5, 5, Rgb([250, 250, 250]));
        rgb.put_pixel(2, 2, Rgb([30, 90, 30]));
        let mask = mask_of(&rgb);
        assert_eq!(mask.get(2, 2), Some(true));
    }

    #[test]
    fn union_flags_cloud_from_either_frame() {
        let mut left = CloudMask::clear(2, 1);
        let mut right = CloudMask::clear(2, 1);
        left.flags = vec![true, false];
        right.flags = vec![false, true];
        assert_eq!(left.union(&right).clean_count(), 0);
    }
}
