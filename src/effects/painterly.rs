use crate::effect::{
    Effect, EffectError, FromSettings, check_range, effect_output, parse_settings,
};
use crate::imaging::calculations::{luminance, quantize, shift_hue};
use crate::imaging::ops::{blur, luminance_map, sanitize_image, sobel};
use crate::store::{ArtifactStore, StoreDelta};
use image::{Rgb, Rgb32FImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

// =============================================================================
// Oil paint
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OilPaintSettings {
    radius: u32,
    levels: u32,
}

impl Default for OilPaintSettings {
    fn default() -> Self {
        Self {
            radius: 3,
            levels: 10,
        }
    }
}

/// Kuwahara filter: each pixel takes the mean of whichever of its four
/// neighbouring quadrants has the lowest luminance variance, which flattens
/// regions into strokes while keeping edges crisp.
#[derive(Debug, Clone)]
pub struct OilPaint {
    levels: u32,
    /// Pixel offsets of the four quadrants, built once per instance.
    quadrants: [Vec<(i32, i32)>; 4],
}

impl OilPaint {
    pub fn new(radius: u32, levels: u32) -> Self {
        let r = radius as i32;
        let offsets = |xs: (i32, i32), ys: (i32, i32)| {
            (ys.0..=ys.1)
                .flat_map(|dy| (xs.0..=xs.1).map(move |dx| (dx, dy)))
                .collect::<Vec<_>>()
        };
        Self {
            levels,
            quadrants: [
                offsets((-r, 0), (-r, 0)),
                offsets((0, r), (-r, 0)),
                offsets((-r, 0), (0, r)),
                offsets((0, r), (0, r)),
            ],
        }
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    pub fn kuwahara(&self, image: &Rgb32FImage) -> Rgb32FImage {
        let (w, h) = image.dimensions();
        let at = |x: i32, y: i32| {
            let cx = x.clamp(0, w as i32 - 1) as u32;
            let cy = y.clamp(0, h as i32 - 1) as u32;
            image.get_pixel(cx, cy).0
        };
        Rgb32FImage::from_fn(w, h, |x, y| {
            let mut best = [0.0f32; 3];
            let mut best_var = f32::MAX;
            for quadrant in &self.quadrants {
                let mut sum = [0.0f32; 3];
                let mut l_sum = 0.0f32;
                let mut l_sq = 0.0f32;
                for &(dx, dy) in quadrant {
                    let p = at(x as i32 + dx, y as i32 + dy);
                    sum[0] += p[0];
                    sum[1] += p[1];
                    sum[2] += p[2];
                    let l = luminance(p);
                    l_sum += l;
                    l_sq += l * l;
                }
                let n = quadrant.len() as f32;
                let mean_l = l_sum / n;
                let var = l_sq / n - mean_l * mean_l;
                if var < best_var {
                    best_var = var;
                    best = [sum[0] / n, sum[1] / n, sum[2] / n];
                }
            }
            Rgb(best.map(|c| quantize(c, self.levels)))
        })
    }
}

impl Default for OilPaint {
    fn default() -> Self {
        let s = OilPaintSettings::default();
        Self::new(s.radius, s.levels)
    }
}

impl FromSettings for OilPaint {
    fn from_settings(settings: &toml::Table) -> Result<Self, EffectError> {
        let s: OilPaintSettings = parse_settings("oil_paint", settings)?;
        check_range("oil_paint", "radius", s.radius as f32, 1.0..=8.0)?;
        check_range("oil_paint", "levels", s.levels as f32, 2.0..=64.0)?;
        Ok(Self::new(s.radius, s.levels))
    }
}

impl Effect for OilPaint {
    fn name(&self) -> &str {
        "oil_paint"
    }

    fn apply(&self, image: &Rgb32FImage, _store: &ArtifactStore) -> Result<StoreDelta, EffectError> {
        Ok(effect_output(self.kuwahara(image)))
    }
}

// =============================================================================
// Watercolor
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WatercolorSettings {
    sigma: f32,
    edge_darkening: f32,
    granulation: f32,
    saturation: f32,
}

impl Default for WatercolorSettings {
    fn default() -> Self {
        Self {
            sigma: 2.0,
            edge_darkening: 0.3,
            granulation: 0.05,
            saturation: 0.85,
        }
    }
}

/// Soft wash with pigment pooling at edges and seeded paper granulation.
#[derive(Debug, Clone)]
pub struct Watercolor {
    settings: WatercolorSettings,
}

/// Mixed into the run seed so granulation differs from other seeded noise.
const GRANULATION_SALT: u64 = 0x5741_5445_5243_4f4c;

impl Watercolor {
    pub fn saturation(&self) -> f32 {
        self.settings.saturation
    }
}

impl FromSettings for Watercolor {
    fn from_settings(settings: &toml::Table) -> Result<Self, EffectError> {
        let s: WatercolorSettings = parse_settings("watercolor", settings)?;
        check_range("watercolor", "sigma", s.sigma, 0.0..=10.0)?;
        check_range("watercolor", "edge_darkening", s.edge_darkening, 0.0..=1.0)?;
        check_range("watercolor", "granulation", s.granulation, 0.0..=0.5)?;
        check_range("watercolor", "saturation", s.saturation, 0.0..=2.0)?;
        Ok(Self { settings: s })
    }
}

impl Effect for Watercolor {
    fn name(&self) -> &str {
        "watercolor"
    }

    fn apply(&self, image: &Rgb32FImage, store: &ArtifactStore) -> Result<StoreDelta, EffectError> {
        let s = &self.settings;
        let wash = blur(image, s.sigma);
        let (gx, gy) = sobel(&luminance_map(&wash));
        let mut rng = StdRng::seed_from_u64(store.seed().unwrap_or(0) ^ GRANULATION_SALT);

        let mut out = Rgb32FImage::from_fn(wash.width(), wash.height(), |x, y| {
            let edge = gx.get_pixel(x, y).0[0].hypot(gy.get_pixel(x, y).0[0]).min(1.0);
            let darken = 1.0 - s.edge_darkening * edge;
            let grain = (rng.random::<f32>() - 0.5) * s.granulation;
            let p = wash.get_pixel(x, y).0.map(|c| c * darken + grain);
            Rgb(shift_hue(p, 0.0, s.saturation))
        });
        sanitize_image(&mut out);
        Ok(effect_output(out))
    }
}
