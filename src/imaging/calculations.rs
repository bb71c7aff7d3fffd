//! Pure per-pixel calculations.
//!
//! All functions here are pure and testable without any I/O or images.
//! Channel values are normalised floats; hue is in degrees `[0, 360)`.

/// Rec. 709 relative luminance of a linear-ish RGB triple.
pub fn luminance(rgb: [f32; 3]) -> f32 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

/// Convert RGB to HSV.
///
/// # Examples
/// ```
/// # use brushwork::imaging::calculations::rgb_to_hsv;
/// let [h, s, v] = rgb_to_hsv([1.0, 0.0, 0.0]);
/// assert_eq!((h, s, v), (0.0, 1.0, 1.0));
/// ```
pub fn rgb_to_hsv(rgb: [f32; 3]) -> [f32; 3] {
    let [r, g, b] = rgb;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max <= f32::EPSILON { 0.0 } else { delta / max };
    [hue.rem_euclid(360.0), saturation, max]
}

/// Convert HSV back to RGB.
pub fn hsv_to_rgb(hsv: [f32; 3]) -> [f32; 3] {
    let [h, s, v] = hsv;
    let h = h.rem_euclid(360.0) / 60.0;
    let c = v * s;
    let x = c * (1.0 - (h.rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    [r + m, g + m, b + m]
}

/// Rotate hue by `degrees` and scale saturation by `saturation`.
pub fn shift_hue(rgb: [f32; 3], degrees: f32, saturation: f32) -> [f32; 3] {
    let [h, s, v] = rgb_to_hsv(rgb);
    hsv_to_rgb([h + degrees, (s * saturation).clamp(0.0, 1.0), v])
}

/// Snap a unit value to one of `levels` evenly spaced steps.
pub fn quantize(value: f32, levels: u32) -> f32 {
    if levels < 2 {
        return value;
    }
    let steps = (levels - 1) as f32;
    (value.clamp(0.0, 1.0) * steps).round() / steps
}

/// Map a possibly non-finite value into `[0, 1]`.
///
/// NaN becomes 0, +Inf becomes 1, -Inf becomes 0; finite values are clamped.
pub fn sanitize(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else if value == f32::INFINITY {
        1.0
    } else if value == f32::NEG_INFINITY {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

pub fn lerp_rgb(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [lerp(a[0], b[0], t), lerp(a[1], b[1], t), lerp(a[2], b[2], t)]
}

/// Heuristic likelihood (0-1) that a pixel is skin-toned.
///
/// Skin sits in a narrow warm hue band with moderate saturation; the score
/// falls off linearly outside it.
pub fn skin_likelihood(rgb: [f32; 3]) -> f32 {
    let [h, s, v] = rgb_to_hsv(rgb);
    if v < 0.2 || rgb[0] <= rgb[2] {
        return 0.0;
    }
    let hue_score = if h <= 50.0 {
        1.0 - (h - 20.0).abs() / 30.0
    } else if h >= 340.0 {
        1.0 - (360.0 - h) / 40.0
    } else {
        0.0
    };
    let sat_score = 1.0 - ((s - 0.4).abs() / 0.35).min(1.0);
    (hue_score.max(0.0) * sat_score).clamp(0.0, 1.0)
}

/// Convert a normalised channel to 8 bits, treating non-finite input as 0.
pub fn to_u8(value: f32) -> u8 {
    if value.is_finite() {
        (value.clamp(0.0, 1.0) * 255.0).round() as u8
    } else {
        0
    }
}
