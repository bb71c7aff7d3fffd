//! Whole-image helpers built from the per-pixel calculations.

use super::calculations::{lerp_rgb, luminance, sanitize};
use image::{ImageBuffer, Luma, Rgb, Rgb32FImage, imageops};

/// Single-channel float map (luminance, height, masks).
pub type LumaMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Apply `f` to every pixel, producing a new image.
pub fn map_pixels(image: &Rgb32FImage, f: impl Fn([f32; 3]) -> [f32; 3]) -> Rgb32FImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        pixel.0 = f(pixel.0);
    }
    out
}

/// Linear blend from `base` towards `top`; `t = 1` yields `top`.
///
/// Pixels outside `top` (mismatched sizes) keep the base value.
pub fn blend(base: &Rgb32FImage, top: &Rgb32FImage, t: f32) -> Rgb32FImage {
    Rgb32FImage::from_fn(base.width(), base.height(), |x, y| {
        let b = base.get_pixel(x, y).0;
        match top.get_pixel_checked(x, y) {
            Some(p) => Rgb(lerp_rgb(b, p.0, t)),
            None => Rgb(b),
        }
    })
}

/// Gaussian blur; `sigma <= 0` returns a copy.
pub fn blur(image: &Rgb32FImage, sigma: f32) -> Rgb32FImage {
    if sigma > 0.0 {
        imageops::blur(image, sigma)
    } else {
        image.clone()
    }
}

/// Unsharp mask: `image + amount * (image - blur(image))`.
pub fn unsharp(image: &Rgb32FImage, sigma: f32, amount: f32) -> Rgb32FImage {
    let blurred = blur(image, sigma);
    Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y).0;
        let b = blurred.get_pixel(x, y).0;
        Rgb([
            p[0] + amount * (p[0] - b[0]),
            p[1] + amount * (p[1] - b[1]),
            p[2] + amount * (p[2] - b[2]),
        ])
    })
}

pub fn luminance_map(image: &Rgb32FImage) -> LumaMap {
    LumaMap::from_fn(image.width(), image.height(), |x, y| {
        Luma([luminance(image.get_pixel(x, y).0)])
    })
}

pub fn mean_luminance(image: &Rgb32FImage) -> f32 {
    let count = (image.width() as usize * image.height() as usize).max(1);
    let sum: f64 = image.pixels().map(|p| luminance(p.0) as f64).sum();
    (sum / count as f64) as f32
}

/// Sobel gradients `(gx, gy)` with clamped borders.
pub fn sobel(map: &LumaMap) -> (LumaMap, LumaMap) {
    let (w, h) = map.dimensions();
    let at = |x: i64, y: i64| -> f32 {
        let cx = x.clamp(0, w as i64 - 1) as u32;
        let cy = y.clamp(0, h as i64 - 1) as u32;
        map.get_pixel(cx, cy).0[0]
    };
    let gx = LumaMap::from_fn(w, h, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let v = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
            - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
        Luma([v])
    });
    let gy = LumaMap::from_fn(w, h, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let v = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
            - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
        Luma([v])
    });
    (gx, gy)
}

/// Bilinear sample at fractional coordinates, clamped to the image bounds.
pub fn sample_bilinear(image: &Rgb32FImage, x: f32, y: f32) -> [f32; 3] {
    let max_x = (image.width() - 1) as f32;
    let max_y = (image.height() - 1) as f32;
    let x = if x.is_finite() { x.clamp(0.0, max_x) } else { 0.0 };
    let y = if y.is_finite() { y.clamp(0.0, max_y) } else { 0.0 };
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);
    let top = lerp_rgb(image.get_pixel(x0, y0).0, image.get_pixel(x1, y0).0, fx);
    let bottom = lerp_rgb(image.get_pixel(x0, y1).0, image.get_pixel(x1, y1).0, fx);
    lerp_rgb(top, bottom, fy)
}

/// Replace non-finite channels and clamp into `[0, 1]`.
///
/// Returns the number of channels that were non-finite.
pub fn sanitize_image(image: &mut Rgb32FImage) -> usize {
    let mut replaced = 0;
    for channel in image.iter_mut() {
        if !channel.is_finite() {
            replaced += 1;
        }
        *channel = sanitize(*channel);
    }
    replaced
}

/// True when every channel is finite and inside `[0, 1]`.
pub fn is_normalized(image: &Rgb32FImage) -> bool {
    image
        .iter()
        .all(|c| c.is_finite() && (0.0..=1.0).contains(c))
}

/// Render a single-channel map as a grey RGB image, rescaled to its range.
pub fn luma_to_rgb(map: &LumaMap) -> Rgb32FImage {
    let (lo, hi) = map
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let span = if hi > lo { hi - lo } else { 1.0 };
    Rgb32FImage::from_fn(map.width(), map.height(), |x, y| {
        let v = sanitize((map.get_pixel(x, y).0[0] - lo) / span);
        Rgb([v, v, v])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{gradient_image, solid_image};

    #[test]
    fn map_pixels_applies_function() {
        let img = solid_image(4, 4, [0.2, 0.4, 0.6]);
        let out = map_pixels(&img, |[r, g, b]| [b, g, r]);
        assert_eq!(out.get_pixel(1, 1).0, [0.6, 0.4, 0.2]);
    }

    #[test]
    fn blend_endpoints() {
        let a = solid_image(3, 3, [0.0, 0.0, 0.0]);
        let b = solid_image(3, 3, [1.0, 1.0, 1.0]);
        assert_eq!(blend(&a, &b, 0.0).get_pixel(0, 0).0, [0.0; 3]);
        assert_eq!(blend(&a, &b, 1.0).get_pixel(0, 0).0, [1.0; 3]);
        assert_eq!(blend(&a, &b, 0.5).get_pixel(2, 2).0, [0.5; 3]);
    }

    #[test]
    fn blend_mismatched_sizes_keeps_base() {
        let a = solid_image(4, 4, [0.1, 0.1, 0.1]);
        let b = solid_image(2, 2, [1.0, 1.0, 1.0]);
        let out = blend(&a, &b, 1.0);
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(3, 3).0, [0.1; 3]);
        assert_eq!(out.get_pixel(0, 0).0, [1.0; 3]);
    }

    #[test]
    fn blur_zero_sigma_is_identity() {
        let img = gradient_image(8, 8);
        assert_eq!(blur(&img, 0.0), img);
    }

    #[test]
    fn unsharp_on_flat_image_is_identity() {
        let img = solid_image(6, 6, [0.3, 0.3, 0.3]);
        let out = unsharp(&img, 1.0, 2.0);
        for p in out.pixels() {
            for c in p.0 {
                assert!((c - 0.3).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn mean_luminance_of_solid() {
        let img = solid_image(5, 5, [1.0, 1.0, 1.0]);
        assert!((mean_luminance(&img) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn sobel_detects_horizontal_ramp() {
        let map = luminance_map(&gradient_image(8, 8));
        let (gx, gy) = sobel(&map);
        // gradient_image increases left to right
        assert!(gx.get_pixel(4, 4).0[0] > 0.0);
        assert!(gy.get_pixel(4, 4).0[0].abs() < gx.get_pixel(4, 4).0[0]);
    }

    #[test]
    fn sample_bilinear_midpoint() {
        let mut img = Rgb32FImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([0.0, 0.0, 0.0]));
        img.put_pixel(1, 0, Rgb([1.0, 1.0, 1.0]));
        let v = sample_bilinear(&img, 0.5, 0.0);
        assert!((v[0] - 0.5).abs() < 1e-6);
        // Out of bounds clamps
        assert_eq!(sample_bilinear(&img, 10.0, -3.0), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn sanitize_image_counts_and_clamps() {
        let mut img = solid_image(2, 1, [0.5, 0.5, 0.5]);
        img.put_pixel(0, 0, Rgb([f32::NAN, f32::INFINITY, f32::NEG_INFINITY]));
        img.put_pixel(1, 0, Rgb([1.5, -0.5, 0.25]));
        assert_eq!(sanitize_image(&mut img), 3);
        assert_eq!(img.get_pixel(0, 0).0, [0.0, 1.0, 0.0]);
        assert_eq!(img.get_pixel(1, 0).0, [1.0, 0.0, 0.25]);
        assert!(is_normalized(&img));
    }

    #[test]
    fn luma_to_rgb_rescales_range() {
        let map = LumaMap::from_fn(3, 1, |x, _| Luma([x as f32 * 10.0]));
        let rgb = luma_to_rgb(&map);
        assert_eq!(rgb.get_pixel(0, 0).0, [0.0; 3]);
        assert_eq!(rgb.get_pixel(2, 0).0, [1.0; 3]);
    }
}
