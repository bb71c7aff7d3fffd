use crate::effect::{
    Effect, EffectError, FromSettings, check_range, effect_output, parse_settings,
};
use crate::imaging::calculations::{quantize, shift_hue};
use crate::imaging::ops::{map_pixels, sanitize_image};
use crate::store::{ArtifactStore, StoreDelta};
use image::{Rgb, Rgb32FImage};
use serde::Deserialize;

// =============================================================================
// Posterize
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PosterizeSettings {
    levels: u32,
}

impl Default for PosterizeSettings {
    fn default() -> Self {
        Self { levels: 6 }
    }
}

#[derive(Debug, Clone)]
pub struct Posterize {
    levels: u32,
}

impl Posterize {
    pub fn levels(&self) -> u32 {
        self.levels
    }
}

impl FromSettings for Posterize {
    fn from_settings(settings: &toml::Table) -> Result<Self, EffectError> {
        let s: PosterizeSettings = parse_settings("posterize", settings)?;
        check_range("posterize", "levels", s.levels as f32, 2.0..=64.0)?;
        Ok(Self { levels: s.levels })
    }
}

impl Effect for Posterize {
    fn name(&self) -> &str {
        "posterize"
    }

    fn apply(&self, image: &Rgb32FImage, _store: &ArtifactStore) -> Result<StoreDelta, EffectError> {
        let levels = self.levels;
        Ok(effect_output(map_pixels(image, |p| {
            p.map(|c| quantize(c, levels))
        })))
    }
}

// =============================================================================
// Spectral shift
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SpectralShiftSettings {
    degrees: f32,
    saturation: f32,
}

impl Default for SpectralShiftSettings {
    fn default() -> Self {
        Self {
            degrees: 120.0,
            saturation: 1.2,
        }
    }
}

/// Rotates every hue by a fixed angle and boosts saturation.
#[derive(Debug, Clone)]
pub struct SpectralShift {
    degrees: f32,
    saturation: f32,
}

impl SpectralShift {
    /// Hue rotation in degrees.
    pub fn degrees(&self) -> f32 {
        self.degrees
    }

    pub fn saturation(&self) -> f32 {
        self.saturation
    }
}

impl FromSettings for SpectralShift {
    fn from_settings(settings: &toml::Table) -> Result<Self, EffectError> {
        let s: SpectralShiftSettings = parse_settings("spectral_shift", settings)?;
        check_range("spectral_shift", "degrees", s.degrees, -360.0..=360.0)?;
        check_range("spectral_shift", "saturation", s.saturation, 0.0..=2.0)?;
        Ok(Self {
            degrees: s.degrees,
            saturation: s.saturation,
        })
    }
}

impl Effect for SpectralShift {
    fn name(&self) -> &str {
        "spectral_shift"
    }

    fn apply(&self, image: &Rgb32FImage, _store: &ArtifactStore) -> Result<StoreDelta, EffectError> {
        let mut out = map_pixels(image, |p| shift_hue(p, self.degrees, self.saturation));
        sanitize_image(&mut out);
        Ok(effect_output(out))
    }
}

// =============================================================================
// Vignette
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct VignetteSettings {
    strength: f32,
    radius: f32,
}

impl Default for VignetteSettings {
    fn default() -> Self {
        Self {
            strength: 0.5,
            radius: 0.75,
        }
    }
}

/// Darkens towards the corners. `radius` is the normalised distance from
/// the centre at which darkening starts (1.0 = the corner).
#[derive(Debug, Clone)]
pub struct Vignette {
    strength: f32,
    radius: f32,
}

impl FromSettings for Vignette {
    fn from_settings(settings: &toml::Table) -> Result<Self, EffectError> {
        let s: VignetteSettings = parse_settings("vignette", settings)?;
        check_range("vignette", "strength", s.strength, 0.0..=1.0)?;
        check_range("vignette", "radius", s.radius, 0.1..=2.0)?;
        Ok(Self {
            strength: s.strength,
            radius: s.radius,
        })
    }
}

impl Effect for Vignette {
    fn name(&self) -> &str {
        "vignette"
    }

    fn apply(&self, image: &Rgb32FImage, _store: &ArtifactStore) -> Result<StoreDelta, EffectError> {
        let (w, h) = image.dimensions();
        let (cx, cy) = ((w as f32 - 1.0) / 2.0, (h as f32 - 1.0) / 2.0);
        let max_dist = cx.hypot(cy).max(1.0);
        let out = Rgb32FImage::from_fn(w, h, |x, y| {
            let d = (x as f32 - cx).hypot(y as f32 - cy) / max_dist;
            let falloff = ((d - self.radius) / (1.0 - self.radius).max(0.05)).clamp(0.0, 1.0);
            let gain = 1.0 - self.strength * falloff * falloff;
            Rgb(image.get_pixel(x, y).0.map(|c| c * gain))
        });
        Ok(effect_output(out))
    }
}
