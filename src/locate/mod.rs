//! Finds candidate MRZ regions in a binarized image.
//!
//! Contours of the foreground are fitted with rotated boxes; thin, long
//! boxes that lie on parallel nearby baselines are merged so the two or
//! three lines of an MRZ come out as a single region.

use std::f64::consts::FRAC_PI_2;

use image::GrayImage;
use tracing::debug;

use crate::core::geometry::{BoxFit, RotatedBox};
use crate::imgproc::mask_contours;

/// Candidate-region detector over a boolean mask.
#[derive(Debug, Clone)]
pub struct BoxLocator {
    /// Keep at most this many boxes (largest areas first) before merging.
    pub max_boxes: usize,
    /// Contours whose plain bounding box is smaller than this are noise.
    pub min_area: f64,
    /// Minimum width/height ratio of a kept or merged box.
    pub min_aspect: f64,
    /// Two boxes merge only when their angles differ by less than this,
    /// modulo half a turn.
    pub angle_tol: f64,
    /// Baseline distance allowance for merging, in units of the summed
    /// box heights.
    pub lineskip_tol: f64,
}

impl Default for BoxLocator {
    fn default() -> Self {
        Self {
            max_boxes: 4,
            min_area: 500.0,
            min_aspect: 5.0,
            angle_tol: 0.1,
            lineskip_tol: 1.5,
        }
    }
}

impl BoxLocator {
    pub fn locate(&self, mask: &GrayImage) -> Vec<RotatedBox> {
        let mut boxes = Vec::new();
        for contour in mask_contours(mask) {
            if contour.len() < 2 {
                continue;
            }
            let min_x = contour.iter().map(|p| p[0]).fold(f64::INFINITY, f64::min);
            let max_x = contour.iter().map(|p| p[0]).fold(f64::NEG_INFINITY, f64::max);
            let min_y = contour.iter().map(|p| p[1]).fold(f64::INFINITY, f64::min);
            let max_y = contour.iter().map(|p| p[1]).fold(f64::NEG_INFINITY, f64::max);
            if (max_x - min_x) * (max_y - min_y) < self.min_area {
                continue;
            }
            let rb = RotatedBox::from_points(&contour, BoxFit::Trimmed);
            if rb.height <= 0.0 || rb.aspect() < self.min_aspect {
                continue;
            }
            boxes.push(rb);
        }

        boxes.sort_by(|a, b| {
            b.area()
                .partial_cmp(&a.area())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        boxes.truncate(self.max_boxes);
        debug!(candidates = boxes.len(), "fitted candidate boxes");

        self.merge_all(&mut boxes);

        for b in &mut boxes {
            b.angle = snap_angle(b.angle);
        }
        boxes
    }

    /// Repeatedly merges the first mergeable pair until none is left.
    fn merge_all(&self, boxes: &mut Vec<RotatedBox>) {
        loop {
            let mut merged_any = false;
            'pairs: for i in 0..boxes.len() {
                for j in i + 1..boxes.len() {
                    if !self.nearby_parallel(&boxes[i], &boxes[j]) {
                        continue;
                    }
                    let merged = boxes[i].merged(&boxes[j]);
                    if merged.aspect() >= self.min_aspect {
                        boxes[i] = merged;
                        boxes.remove(j);
                        merged_any = true;
                        break 'pairs;
                    }
                }
            }
            if !merged_any {
                return;
            }
        }
    }

    /// True when the two boxes look like adjacent lines of the same text
    /// block: near-equal angles, baselines close along the shared "up"
    /// direction, and comparable widths.
    fn nearby_parallel(&self, a: &RotatedBox, b: &RotatedBox) -> bool {
        let diff = (a.angle - b.angle).rem_euclid(std::f64::consts::PI);
        if diff.min(std::f64::consts::PI - diff) > self.angle_tol {
            return false;
        }
        // Angles live in (-pi/2, pi/2], so near-vertical pairs can sit on
        // opposite ends of the range; averaging them would flip the cross
        // direction. The lower angle picks one consistent frame.
        let angle = a.angle.min(b.angle);
        let up = [-angle.sin(), angle.cos()];
        let dist = ((a.cx - b.cx) * up[0] + (a.cy - b.cy) * up[1]).abs();
        if dist >= self.lineskip_tol * (a.height + b.height) {
            return false;
        }
        if a.width <= 0.0 || b.width <= 0.0 {
            return false;
        }
        let ratio = a.width / b.width;
        0.5 < ratio && ratio < 2.0
    }
}

/// Boxes that are almost axis-aligned get snapped exactly, so extraction
/// avoids a resampling rotation for the common upright scan.
fn snap_angle(angle: f64) -> f64 {
    if angle.abs() <= 0.01 {
        0.0
    } else if (angle.abs() - FRAC_PI_2).abs() <= 0.01 {
        FRAC_PI_2.copysign(angle)
    } else {
        angle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn bar(mask: &mut GrayImage, x: std::ops::Range<u32>, y: std::ops::Range<u32>) {
        for yy in y {
            for xx in x.clone() {
                mask.put_pixel(xx, yy, Luma([255]));
            }
        }
    }

    fn flat_box(cx: f64, cy: f64, width: f64, height: f64) -> RotatedBox {
        RotatedBox {
            cx,
            cy,
            width,
            height,
            angle: 0.0,
            points: Vec::new(),
        }
    }

    #[test]
    fn snaps_near_axis_angles() {
        assert_eq!(snap_angle(0.004), 0.0);
        assert_eq!(snap_angle(-0.009), 0.0);
        assert_eq!(snap_angle(FRAC_PI_2 - 0.005), FRAC_PI_2);
        assert_eq!(snap_angle(-FRAC_PI_2 + 0.005), -FRAC_PI_2);
        let oblique = 0.3;
        assert_eq!(snap_angle(oblique), oblique);
    }

    #[test]
    fn adjacent_parallel_lines_qualify_for_merging() {
        let locator = BoxLocator::default();
        let a = flat_box(100.0, 30.0, 180.0, 4.0);
        let b = flat_box(100.0, 40.0, 180.0, 4.0);
        assert!(locator.nearby_parallel(&a, &b));
    }

    #[test]
    fn distant_or_dissimilar_lines_do_not_merge() {
        let locator = BoxLocator::default();
        let a = flat_box(100.0, 30.0, 180.0, 4.0);
        let far = flat_box(100.0, 60.0, 180.0, 4.0);
        assert!(!locator.nearby_parallel(&a, &far));

        let skewed = RotatedBox {
            angle: 0.5,
            ..flat_box(100.0, 40.0, 180.0, 4.0)
        };
        assert!(!locator.nearby_parallel(&a, &skewed));

        let narrow = flat_box(100.0, 40.0, 60.0, 4.0);
        assert!(!locator.nearby_parallel(&a, &narrow));
    }

    #[test]
    fn near_vertical_pairs_measure_distance_across_the_text() {
        let locator = BoxLocator::default();
        let vertical = |cx: f64, angle: f64| RotatedBox {
            cx,
            cy: 50.0,
            width: 180.0,
            height: 4.0,
            angle,
            points: Vec::new(),
        };
        // Angles on opposite ends of the range are still near-parallel,
        // but columns 120 px apart must not merge.
        let a = vertical(0.0, 1.56);
        let far = vertical(120.0, -1.56);
        assert!(!locator.nearby_parallel(&a, &far));

        let near = vertical(6.0, -1.56);
        assert!(locator.nearby_parallel(&a, &near));
    }

    #[test]
    fn merges_text_lines_into_one_region() {
        let mut mask = GrayImage::new(200, 100);
        bar(&mut mask, 10..190, 30..36);
        bar(&mut mask, 10..190, 40..46);
        bar(&mut mask, 10..190, 50..56);

        let boxes = BoxLocator::default().locate(&mask);
        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        assert_eq!(b.angle, 0.0);
        assert!((b.cx - 100.0).abs() < 3.0);
        assert!((b.cy - 42.0).abs() < 3.0);
        assert!(b.width > 170.0);
        assert!(b.height > 18.0 && b.height < 30.0);
    }

    #[test]
    fn ignores_small_and_blobby_contours() {
        let mut mask = GrayImage::new(200, 100);
        // Too small an area.
        bar(&mut mask, 10..30, 10..12);
        // Large but square, fails the aspect test.
        bar(&mut mask, 100..140, 40..80);
        assert!(BoxLocator::default().locate(&mask).is_empty());
    }
}
