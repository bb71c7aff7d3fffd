use crate::effect::{
    Effect, EffectError, FromSettings, check_range, effect_output, parse_settings,
};
use crate::imaging::LumaMap;
use crate::imaging::calculations::{lerp, luminance, sanitize};
use crate::store::{ArtifactStore, StoreDelta};
use image::{Luma, Rgb, Rgb32FImage, imageops};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

// =============================================================================
// Pencil sketch
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PencilSketchSettings {
    sigma: f32,
    strength: f32,
}

impl Default for PencilSketchSettings {
    fn default() -> Self {
        Self {
            sigma: 3.0,
            strength: 1.0,
        }
    }
}

/// Colour-dodge of the greyscale image against its blurred negative.
#[derive(Debug, Clone)]
pub struct PencilSketch {
    sigma: f32,
    strength: f32,
}

impl FromSettings for PencilSketch {
    fn from_settings(settings: &toml::Table) -> Result<Self, EffectError> {
        let s: PencilSketchSettings = parse_settings("pencil_sketch", settings)?;
        check_range("pencil_sketch", "sigma", s.sigma, 0.1..=20.0)?;
        check_range("pencil_sketch", "strength", s.strength, 0.0..=1.0)?;
        Ok(Self {
            sigma: s.sigma,
            strength: s.strength,
        })
    }
}

/// `base / (1 - blend)`, saturating at white.
pub fn color_dodge(base: f32, blend: f32) -> f32 {
    if blend >= 1.0 {
        1.0
    } else {
        sanitize(base / (1.0 - blend))
    }
}

impl Effect for PencilSketch {
    fn name(&self) -> &str {
        "pencil_sketch"
    }

    fn apply(&self, image: &Rgb32FImage, _store: &ArtifactStore) -> Result<StoreDelta, EffectError> {
        let (w, h) = image.dimensions();
        let grey = LumaMap::from_fn(w, h, |x, y| {
            Luma([sanitize(luminance(image.get_pixel(x, y).0))])
        });
        let negative = LumaMap::from_fn(w, h, |x, y| Luma([1.0 - grey.get_pixel(x, y).0[0]]));
        let smudged = imageops::blur(&negative, self.sigma);

        let out = Rgb32FImage::from_fn(w, h, |x, y| {
            let g = grey.get_pixel(x, y).0[0];
            let sketch = color_dodge(g, smudged.get_pixel(x, y).0[0]);
            let v = lerp(g, sketch, self.strength);
            Rgb([v, v, v])
        });
        Ok(effect_output(out))
    }
}

// =============================================================================
// Grain
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GrainSettings {
    amount: f32,
    monochrome: bool,
}

impl Default for GrainSettings {
    fn default() -> Self {
        Self {
            amount: 0.08,
            monochrome: true,
        }
    }
}

const GRAIN_SALT: u64 = 0x4752_4149_4e00_0001;

/// Film grain drawn from the run seed, so reruns with the same seed match.
#[derive(Debug, Clone)]
pub struct Grain {
    amount: f32,
    monochrome: bool,
}

impl FromSettings for Grain {
    fn from_settings(settings: &toml::Table) -> Result<Self, EffectError> {
        let s: GrainSettings = parse_settings("grain", settings)?;
        check_range("grain", "amount", s.amount, 0.0..=1.0)?;
        Ok(Self {
            amount: s.amount,
            monochrome: s.monochrome,
        })
    }
}

impl Effect for Grain {
    fn name(&self) -> &str {
        "grain"
    }

    fn apply(&self, image: &Rgb32FImage, store: &ArtifactStore) -> Result<StoreDelta, EffectError> {
        let mut rng = StdRng::seed_from_u64(store.seed().unwrap_or(0) ^ GRAIN_SALT);
        let mut out = image.clone();
        for pixel in out.pixels_mut() {
            if self.monochrome {
                let n = (rng.random::<f32>() - 0.5) * self.amount;
                pixel.0 = pixel.0.map(|c| sanitize(c + n));
            } else {
                for c in pixel.0.iter_mut() {
                    *c = sanitize(*c + (rng.random::<f32>() - 0.5) * self.amount);
                }
            }
        }
        Ok(effect_output(out))
    }
}
