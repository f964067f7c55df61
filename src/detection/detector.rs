//! Cloud-aware change detection between two acquisitions.

use image::{DynamicImage, GrayImage, RgbImage, imageops};
use tracing::debug;

use super::DetectionError;
use super::cloud_mask::CloudMask;
use super::heatmap;
use super::raster::{abs_diff, blur, otsu_threshold, resize_rgb};
use crate::domain::QualityFlag;

/// Sigma equivalent to a 5x5 Gaussian kernel.
const DEFAULT_BLUR_SIGMA: f32 = 1.1;

/// Fraction of the Otsu level above which a pixel counts as changed.
const DEFAULT_AREA_FACTOR: f64 = 0.5;

/// Output of one comparison.
#[derive(Debug, Clone)]
pub struct ChangeReport {
    /// Mean blurred luminance difference over clean pixels, 0-100.
    pub score: f64,
    /// Mean RGB difference over clean pixels, 0-100.
    pub color_shift: f64,
    /// Mean unblurred luminance difference over clean pixels, 0-100.
    pub structural_change: f64,
    /// Percentage of clean pixels above the automatic change threshold.
    pub changed_area_pct: f64,
    /// Strongest unblurred difference over clean pixels, 0-100.
    pub max_intensity: f64,
    /// Percentage of pixels flagged as cloud in either frame.
    pub cloud_coverage_pct: f64,
    /// Percentage of pixels that took part in scoring.
    pub usable_area_pct: f64,
    /// Reliability of the comparison.
    pub quality: QualityFlag,
    /// Compared width after size reconciliation.
    pub width: u32,
    /// Compared height after size reconciliation.
    pub height: u32,
    /// Rendered difference overlay.
    pub heatmap: RgbImage,
}

impl ChangeReport {
    /// A zero-usable-area result is not authoritative.
    #[must_use]
    pub fn is_authoritative(&self) -> bool {
        self.usable_area_pct > 0.0
    }
}

/// Compares two images of the same area.
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    blur_sigma: f32,
    area_factor: f64,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self {
            blur_sigma: DEFAULT_BLUR_SIGMA,
            area_factor: DEFAULT_AREA_FACTOR,
        }
    }
}

fn pct(value: f64) -> f64 {
    value / 255.0 * 100.0
}

fn clean<'a, T: Copy>(values: &'a [T], clouds: &'a CloudMask) -> impl Iterator<Item = T> + 'a {
    values
        .iter()
        .zip(clouds.flags())
        .filter(|(_, cloudy)| !**cloudy)
        .map(|(v, _)| *v)
}

fn mean(values: impl Iterator<Item = u8>, count: usize) -> f64 {
    let sum: u64 = values.map(u64::from).sum();
    sum as f64 / count as f64
}

impl ChangeDetector {
    /// Compares `before` and `after`.
    ///
    /// Images of different sizes are both resampled to the smaller common
    /// dimensions. Pixels flagged as cloud in either frame are excluded; a
    /// fully occluded pair yields a zero score with `quality = low`.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError::EmptyImage`] if either image has no pixels.
    pub fn compare(
        &self,
        before: &DynamicImage,
        after: &DynamicImage,
    ) -> Result<ChangeReport, DetectionError> {
        if before.width() == 0 || before.height() == 0 || after.width() == 0 || after.height() == 0
        {
            return Err(DetectionError::EmptyImage);
        }

        let width = before.width().min(after.width());
        let height = before.height().min(after.height());
        let rgb_before = resize_rgb(&before.to_rgb8(), width, height);
        let rgb_after = resize_rgb(&after.to_rgb8(), width, height);

        let luma_before: GrayImage = imageops::grayscale(&rgb_before);
        let luma_after: GrayImage = imageops::grayscale(&rgb_after);

        let clouds = CloudMask::detect(&rgb_before, &luma_before)
            .union(&CloudMask::detect(&rgb_after, &luma_after));
        let clean_count = clouds.clean_count();
        let total = clouds.flags().len();

        let smoothed = abs_diff(
            &blur(&luma_before, self.blur_sigma),
            &blur(&luma_after, self.blur_sigma),
        );
        let structural = abs_diff(&luma_before, &luma_after);
        let rendered = heatmap::render(&smoothed, &clouds);

        let cloud_coverage_pct = clouds.coverage_pct();
        if clean_count == 0 {
            debug!(width, height, "no clean pixels, comparison not authoritative");
            return Ok(ChangeReport {
                score: 0.0,
                color_shift: 0.0,
                structural_change: 0.0,
                changed_area_pct: 0.0,
                max_intensity: 0.0,
                cloud_coverage_pct,
                usable_area_pct: 0.0,
                quality: QualityFlag::Low,
                width,
                height,
                heatmap: rendered,
            });
        }

        let score = pct(mean(clean(smoothed.as_raw(), &clouds), clean_count));
        let structural_change = pct(mean(clean(structural.as_raw(), &clouds), clean_count));
        let max_intensity = pct(f64::from(
            clean(structural.as_raw(), &clouds).max().unwrap_or(0),
        ));

        let channel_diffs: Vec<u8> = rgb_before
            .pixels()
            .zip(rgb_after.pixels())
            .map(|(a, b)| {
                let sum: u16 = a
                    .0
                    .iter()
                    .zip(b.0.iter())
                    .map(|(x, y)| u16::from(x.abs_diff(*y)))
                    .sum();
                u8::try_from(sum / 3).unwrap_or(u8::MAX)
            })
            .collect();
        let color_shift = pct(mean(clean(&channel_diffs, &clouds), clean_count));

        let cut = f64::from(otsu_threshold(clean(smoothed.as_raw(), &clouds))) * self.area_factor;
        let changed = clean(smoothed.as_raw(), &clouds)
            .filter(|v| f64::from(*v) > cut)
            .count();
        let changed_area_pct = changed as f64 / clean_count as f64 * 100.0;

        let usable_area_pct = clean_count as f64 / total as f64 * 100.0;
        let quality = QualityFlag::from_cloud_coverage(cloud_coverage_pct);
        debug!(
            score,
            changed_area_pct,
            cloud_coverage_pct,
            quality = %quality,
            "comparison finished"
        );

        Ok(ChangeReport {
            score,
            color_shift,
            structural_change,
            changed_area_pct,
            max_intensity,
            cloud_coverage_pct,
            usable_area_pct,
            quality,
            width,
            height,
            heatmap: rendered,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Saturated green-brown field pattern, never cloud.
    fn terrain(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            let r = u8::try_from((x * 3 + y) % 120).unwrap_or(0) + 40;
            Rgb([r, 110, 30])
        }))
    }

    fn with_block(base: &DynamicImage, color: Rgb<u8>) -> DynamicImage {
        let mut rgb = base.to_rgb8();
        for y in 8..24 {
            for x in 8..24 {
                rgb.put_pixel(x, y, color);
            }
        }
        DynamicImage::ImageRgb8(rgb)
    }

    fn compare(a: &DynamicImage, b: &DynamicImage) -> ChangeReport {
        let Ok(report) = ChangeDetector::default().compare(a, b) else {
            panic!("comparison should succeed");
        };
        report
    }

    #[test]
    fn identical_images_score_zero() {
        let image = terrain(48, 48);
        let report = compare(&image, &image);
        assert!(report.score.abs() < f64::EPSILON);
        assert!(report.changed_area_pct.abs() < f64::EPSILON);
        assert!((report.usable_area_pct - 100.0).abs() < f64::EPSILON);
        assert_eq!(report.quality, QualityFlag::High);
    }

    #[test]
    fn score_is_symmetric() {
        let a = terrain(48, 48);
        let b = with_block(&a, Rgb([200, 20, 200]));
        let ab = compare(&a, &b);
        let ba = compare(&b, &a);
        assert!(ab.score > 0.0);
        assert!((ab.score - ba.score).abs() < 1e-12);
        assert!((ab.changed_area_pct - ba.changed_area_pct).abs() < 1e-12);
    }

    #[test]
    fn local_change_reports_partial_area() {
        let a = terrain(48, 48);
        let b = with_block(&a, Rgb([200, 20, 200]));
        let report = compare(&a, &b);
        assert!(report.changed_area_pct > 0.0);
        assert!(report.changed_area_pct < 100.0);
        assert!(report.max_intensity >= report.structural_change);
        assert!(report.color_shift > 0.0);
    }

    #[test]
    fn mismatched_dimensions_are_reconciled() {
        let report = compare(&terrain(1024, 1024), &terrain(900, 900));
        assert_eq!((report.width, report.height), (900, 900));
        assert!((0.0..=100.0).contains(&report.score));
        assert_eq!(report.heatmap.dimensions(), (900, 900));
    }

    #[test]
    fn fully_clouded_frame_is_not_authoritative() {
        let clear = terrain(32, 32);
        let cloud = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([245, 245, 245])));
        let report = compare(&clear, &cloud);
        assert!(report.score.abs() < f64::EPSILON);
        assert!(report.usable_area_pct.abs() < f64::EPSILON);
        assert_eq!(report.quality, QualityFlag::Low);
        assert!(!report.is_authoritative());
    }

    #[test]
    fn partial_cloud_excluded_from_score() {
        let a = terrain(48, 48);
        let b = with_block(&a, Rgb([250, 250, 250]));
        let report = compare(&a, &b);
        assert!(report.cloud_coverage_pct > 0.0);
        assert!(report.usable_area_pct < 100.0);
        assert!(report.structural_change.abs() < f64::EPSILON);
    }

    #[test]
    fn empty_image_is_rejected() {
        let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        let result = ChangeDetector::default().compare(&empty, &terrain(4, 4));
        assert!(matches!(result, Err(DetectionError::EmptyImage)));
    }
}
