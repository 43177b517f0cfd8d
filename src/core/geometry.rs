use image::GrayImage;
use nalgebra::Matrix2;

use crate::imgproc::rotate_about;

/// How a point cloud is reduced to a box extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxFit {
    /// Min/max of the projected coordinates.
    Bounding,
    /// 10%/90% band along the secondary axis, then a bounding refit on the
    /// surviving points. Used for contour-derived proposals, where bumps on
    /// the long edge would otherwise inflate the height.
    Trimmed,
}

/// A rectangle centered at (cx, cy), `width` along the principal axis,
/// `height` along the secondary axis, rotated `angle` radians
/// counter-clockwise. Coordinates are (x, y) = (column, row).
#[derive(Debug, Clone, PartialEq)]
pub struct RotatedBox {
    pub cx: f64,
    pub cy: f64,
    pub width: f64,
    pub height: f64,
    pub angle: f64,
    /// The point cloud this box was fitted to, kept so that merged boxes
    /// can be refitted from the union of their sources.
    pub points: Vec<[f64; 2]>,
}

impl RotatedBox {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn aspect(&self) -> f64 {
        if self.height == 0.0 {
            f64::INFINITY
        } else {
            self.width / self.height
        }
    }

    /// Fits a box to a point cloud, oriented along its principal axis.
    ///
    /// A single point yields a degenerate zero-size box at that point.
    pub fn from_points(points: &[[f64; 2]], fit: BoxFit) -> Self {
        if points.len() == 1 {
            return RotatedBox {
                cx: points[0][0],
                cy: points[0][1],
                width: 0.0,
                height: 0.0,
                angle: 0.0,
                points: points.to_vec(),
            };
        }

        let (mean, angle) = principal_axis(points);
        let (dir, perp) = axis_vectors(angle);

        let mut u = Vec::with_capacity(points.len());
        let mut s = Vec::with_capacity(points.len());
        for p in points {
            let dx = p[0] - mean[0];
            let dy = p[1] - mean[1];
            u.push(dx * dir[0] + dy * dir[1]);
            s.push(dx * perp[0] + dy * perp[1]);
        }

        if fit == BoxFit::Trimmed && points.len() >= 10 {
            // Drop points outside the 10%/90% band of the secondary-axis
            // coordinate and refit in bounding mode on the remainder.
            let mut sorted = s.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let n = sorted.len();
            let bottom = sorted[n / 10];
            let top = sorted[n * 9 / 10];
            let kept: Vec<[f64; 2]> = points
                .iter()
                .zip(&s)
                .filter(|(_, sc)| **sc >= bottom && **sc <= top)
                .map(|(p, _)| *p)
                .collect();
            let mut rb = RotatedBox::from_points(&kept, BoxFit::Bounding);
            rb.points = points.to_vec();
            return rb;
        }

        let (umin, umax) = min_max(&u);
        let (smin, smax) = min_max(&s);
        let umid = (umin + umax) / 2.0;
        let smid = (smin + smax) / 2.0;

        // The projected bounds describe the box in the rotated frame; the
        // center has to be un-rotated back through the axis transform.
        RotatedBox {
            cx: mean[0] + umid * dir[0] + smid * perp[0],
            cy: mean[1] + umid * dir[1] + smid * perp[1],
            width: umax - umin,
            height: smax - smin,
            angle,
            points: points.to_vec(),
        }
    }

    /// Refits the union of two boxes' source points in bounding mode.
    pub fn merged(&self, other: &RotatedBox) -> RotatedBox {
        let mut union = self.points.clone();
        union.extend_from_slice(&other.points);
        RotatedBox::from_points(&union, BoxFit::Bounding)
    }

    /// Extracts the region covered by this box from `img`, rotated so the
    /// box's principal axis is horizontal.
    ///
    /// `scale` maps box coordinates to image coordinates (used when the box
    /// was located on a downscaled image and the region is cut from the
    /// original). Margins are in image pixels, applied on each side. The
    /// resizing rotation shifts the output frame; the crop bounds are
    /// computed in the rotated frame and compensated by that shift, then
    /// clamped to non-negative indices.
    pub fn extract_from_image(
        &self,
        img: &GrayImage,
        scale: f64,
        margin_width: f64,
        margin_height: f64,
    ) -> GrayImage {
        let center = (self.cx * scale, self.cy * scale);
        let (rotated, (shift_x, shift_y)) = rotate_about(img, -self.angle, center);

        let r1 = (((self.cy - self.height / 2.0) * scale - margin_height - shift_y).max(0.0)) as u32;
        let r2 = (((self.cy + self.height / 2.0) * scale + margin_height - shift_y).max(0.0)) as u32;
        let c1 = (((self.cx - self.width / 2.0) * scale - margin_width - shift_x).max(0.0)) as u32;
        let c2 = (((self.cx + self.width / 2.0) * scale + margin_width - shift_x).max(0.0)) as u32;

        let r2 = r2.min(rotated.height());
        let c2 = c2.min(rotated.width());
        if r2 <= r1 || c2 <= c1 {
            return GrayImage::new(0, 0);
        }
        image::imageops::crop_imm(&rotated, c1, r1, c2 - c1, r2 - r1).to_image()
    }
}

/// Mean and principal-axis angle of a point cloud, from the eigenvector of
/// the larger eigenvalue of the 2x2 covariance matrix. The angle is
/// normalized into (-pi/2, pi/2].
pub fn principal_axis(points: &[[f64; 2]]) -> ([f64; 2], f64) {
    let n = points.len() as f64;
    let mut mx = 0.0;
    let mut my = 0.0;
    for p in points {
        mx += p[0];
        my += p[1];
    }
    mx /= n;
    my /= n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for p in points {
        let dx = p[0] - mx;
        let dy = p[1] - my;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    let cov = Matrix2::new(sxx, sxy, sxy, syy);
    let eigen = cov.symmetric_eigen();
    let i = if eigen.eigenvalues[0] >= eigen.eigenvalues[1] {
        0
    } else {
        1
    };
    let v = eigen.eigenvectors.column(i);
    let angle = normalize_angle(v[1].atan2(v[0]));
    ([mx, my], angle)
}

/// Maps any angle to the equivalent representation in (-pi/2, pi/2],
/// picking whichever pi-reflection has the smaller magnitude.
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(std::f64::consts::PI);
    if (a - std::f64::consts::PI).abs() < a {
        a - std::f64::consts::PI
    } else {
        a
    }
}

fn axis_vectors(angle: f64) -> ([f64; 2], [f64; 2]) {
    let (sin, cos) = angle.sin_cos();
    ([cos, sin], [-sin, cos])
}

fn min_max(values: &[f64]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(*v);
        max = max.max(*v);
    }
    (min, max)
}
