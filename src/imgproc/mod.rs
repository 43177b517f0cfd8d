//! Pixel-level collaborators for the scan pipeline: scaling, the Boone
//! binarization, black-tophat enhancement, contour extraction and the
//! resizing rotation used for region extraction. The rest of the crate
//! consumes these only through their small function contracts.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::contrast::otsu_level;
use imageproc::definitions::Image;
use imageproc::filter::filter3x3;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::morphology::{grayscale_close, Mask};

/// Downscales so the width is at most `max_width`, returning the scaled
/// image and the applied scale factor (1.0 when no scaling was needed).
pub fn scale_to_width(img: &GrayImage, max_width: u32) -> (GrayImage, f64) {
    let (w, h) = img.dimensions();
    if w <= max_width {
        return (img.clone(), 1.0);
    }
    let scale = max_width as f64 / w as f64;
    let nh = ((h as f64 * scale).round() as u32).max(1);
    let scaled = imageops::resize(img, max_width, nh, FilterType::Triangle);
    (scaled, scale)
}

/// Upscales by an integer factor with the given resampling filter.
pub fn upscale(img: &GrayImage, factor: u32, filter: FilterType) -> GrayImage {
    let (w, h) = img.dimensions();
    imageops::resize(img, w * factor, h * factor, filter)
}

/// Morphological black tophat: closing minus original. Brings out dark
/// features smaller than the structuring element on a light background.
pub fn black_tophat(img: &GrayImage, mask: &Mask) -> GrayImage {
    let closed = grayscale_close(img, mask);
    let mut out = GrayImage::new(img.width(), img.height());
    for (p, (c, o)) in out
        .pixels_mut()
        .zip(closed.pixels().zip(img.pixels()))
    {
        p.0[0] = c.0[0].saturating_sub(o.0[0]);
    }
    out
}

/// Dark-feature enhancement used by the recognition retry ladder: black
/// tophat with a disk structuring element.
pub fn enhance_dark_features(img: &GrayImage) -> GrayImage {
    black_tophat(img, &Mask::disk(5))
}

/// The Boone transform: `otsu(close(|sobel_v(black_tophat(img))|))`.
/// Highlights dark-on-light rectangular text zones as a boolean mask
/// (255 foreground, 0 background).
pub fn boone_binarize(img: &GrayImage) -> GrayImage {
    // 5x5 square structuring element.
    let square = Mask::square(2);
    let tophat = black_tophat(img, &square);

    const VERTICAL_SOBEL: [i32; 9] = [-1, 0, 1, -2, 0, 2, -1, 0, 1];
    let sobel: Image<Luma<i16>> = filter3x3(&tophat, &VERTICAL_SOBEL);
    let mut edges = GrayImage::new(img.width(), img.height());
    for (e, s) in edges.pixels_mut().zip(sobel.pixels()) {
        // Sobel magnitude fits 0..=1020; rescale into u8.
        e.0[0] = (s.0[0].unsigned_abs() / 4).min(255) as u8;
    }

    let closed = grayscale_close(&edges, &square);
    let level = otsu_level(&closed);
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        if closed.get_pixel(x, y).0[0] > level {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Closed contours of the foreground regions of a boolean mask, as
/// point clouds in (x, y) coordinates.
pub fn mask_contours(mask: &GrayImage) -> Vec<Vec<[f64; 2]>> {
    find_contours::<u32>(mask)
        .into_iter()
        .map(|c| {
            c.points
                .iter()
                .map(|p| [p.x as f64, p.y as f64])
                .collect()
        })
        .collect()
}

/// Mean intensity normalized to 0..=1. Used to detect near-uniform images
/// (a mostly-white scan or an almost empty binarization).
pub fn mean_level(img: &GrayImage) -> f64 {
    let n = (img.width() as u64 * img.height() as u64).max(1);
    let sum: u64 = img.pixels().map(|p| p.0[0] as u64).sum();
    sum as f64 / n as f64 / 255.0
}

/// Rotates `img` counter-clockwise by `angle` radians around `center`,
/// growing the canvas to fit the rotated corners.
///
/// Returns the rotated image together with the translation the resize
/// introduced: a point `p` of the input appears at `R(p - c) + c - shift`
/// in the output. Callers cropping in the rotated frame must subtract the
/// shift from their coordinates.
pub fn rotate_about(img: &GrayImage, angle: f64, center: (f64, f64)) -> (GrayImage, (f64, f64)) {
    let (w, h) = (img.width() as f64, img.height() as f64);
    let (sin, cos) = angle.sin_cos();
    let rotate = |x: f64, y: f64| {
        let dx = x - center.0;
        let dy = y - center.1;
        (
            cos * dx - sin * dy + center.0,
            sin * dx + cos * dy + center.1,
        )
    };

    let corners = [
        rotate(0.0, 0.0),
        rotate(w, 0.0),
        rotate(w, h),
        rotate(0.0, h),
    ];
    let min_x = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
    let min_y = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
    let max_x = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
    let max_y = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

    let out_w = (max_x - min_x).ceil().max(1.0) as u32;
    let out_h = (max_y - min_y).ceil().max(1.0) as u32;

    // Input -> output: translate to the rotation center, rotate, translate
    // back, then shift so the rotated bounding box starts at the origin.
    let projection = Projection::translate(-min_x as f32, -min_y as f32)
        * Projection::translate(center.0 as f32, center.1 as f32)
        * Projection::rotate(angle as f32)
        * Projection::translate(-center.0 as f32, -center.1 as f32);

    let mut out = GrayImage::new(out_w, out_h);
    warp_into(img, &projection, Interpolation::Bilinear, Luma([0]), &mut out);
    (out, (min_x, min_y))
}
