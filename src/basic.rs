//! Fallback effect set.
//!
//! When the staged pipeline cannot run (the requested compute device is not
//! available in this build), [`select_transformer`](crate::pipeline::select_transformer)
//! falls back to [`BasicEffects`]: single-pass effects that use only the
//! imaging primitives, with no stages, store, or registry.
//!
//! ## Compatibility contract
//!
//! Every basic effect shares its name with a registry effect. How closely
//! the two agree is part of the contract and is tested:
//!
//! | Name | Parity | Guarantee |
//! |---|---|---|
//! | `posterize` | [`Parity::Exact`] | Identical output for the same settings |
//! | `spectral_shift` | [`Parity::Exact`] | Identical output for the same settings |
//! | `oil_paint` | [`Parity::Approximate`] | Same shape, values in `[0, 1]` |
//! | `watercolor` | [`Parity::Approximate`] | Same shape, values in `[0, 1]` |
//! | `pencil_sketch` | [`Parity::Approximate`] | Same shape, greyscale, values in `[0, 1]` |
//!
//! Names without a basic counterpart fall back to `oil_paint`.

use crate::config::StyleConfig;
use crate::effect::{EffectError, FromSettings};
use crate::effects::{DEFAULT_EFFECT, OilPaint, PencilSketch, Posterize, SpectralShift, Watercolor};
use crate::imaging::calculations::{luminance, quantize, shift_hue};
use crate::imaging::ops::{blend, blur, luminance_map, map_pixels, sanitize_image, sobel};
use crate::pipeline::{PipelineError, Transformer};
use image::{Rgb, Rgb32FImage};
use tracing::debug;

/// How closely a basic effect matches the registry effect of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Exact,
    Approximate,
}

/// Basic effects and their parity with the registry.
pub const BASIC_EFFECTS: &[(&str, Parity)] = &[
    ("oil_paint", Parity::Approximate),
    ("watercolor", Parity::Approximate),
    ("pencil_sketch", Parity::Approximate),
    ("posterize", Parity::Exact),
    ("spectral_shift", Parity::Exact),
];

pub fn parity(name: &str) -> Option<Parity> {
    BASIC_EFFECTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, p)| *p)
}

/// The fallback transformer.
#[derive(Debug, Clone)]
pub struct BasicEffects {
    config: StyleConfig,
}

impl BasicEffects {
    pub fn new(config: StyleConfig) -> Self {
        Self { config }
    }

    /// The basic effect that will run for this config.
    pub fn effect_name(&self) -> &str {
        match self.config.primary_effect.as_deref() {
            Some(name) if parity(name).is_some() => name,
            _ => DEFAULT_EFFECT,
        }
    }

    /// Apply one basic effect by name, without the intensity blend.
    ///
    /// Settings are parsed and range-checked exactly as the registry
    /// effects parse them.
    pub fn apply(&self, name: &str, image: &Rgb32FImage) -> Result<Rgb32FImage, EffectError> {
        let settings = self.config.effect_settings(name);
        let mut out = match name {
            "posterize" => {
                let levels = Posterize::from_settings(&settings)?.levels();
                map_pixels(image, |p| p.map(|c| quantize(c, levels)))
            }
            "spectral_shift" => {
                let shift = SpectralShift::from_settings(&settings)?;
                map_pixels(image, |p| shift_hue(p, shift.degrees(), shift.saturation()))
            }
            "watercolor" => {
                let saturation = Watercolor::from_settings(&settings)?.saturation();
                map_pixels(&blur(image, 2.0), |p| shift_hue(p, 0.0, saturation))
            }
            "pencil_sketch" => {
                PencilSketch::from_settings(&settings)?;
                let (gx, gy) = sobel(&luminance_map(image));
                Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
                    let edge = gx.get_pixel(x, y).0[0].hypot(gy.get_pixel(x, y).0[0]);
                    let tone = 0.85 + 0.15 * luminance(image.get_pixel(x, y).0);
                    let v = tone - edge;
                    Rgb([v, v, v])
                })
            }
            _ => {
                let levels = OilPaint::from_settings(&self.config.effect_settings(DEFAULT_EFFECT))?
                    .levels();
                map_pixels(&blur(image, 1.5), |p| p.map(|c| quantize(c, levels)))
            }
        };
        sanitize_image(&mut out);
        Ok(out)
    }
}

impl Transformer for BasicEffects {
    fn label(&self) -> &str {
        "basic"
    }

    fn transform_image(
        &self,
        image: &Rgb32FImage,
        _seed: Option<u64>,
    ) -> Result<Rgb32FImage, PipelineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PipelineError::EmptyInput);
        }
        let name = self.effect_name();
        debug!(effect = name, "applying basic effect");
        let styled = self.apply(name, image).map_err(|e| PipelineError::Effect {
            effect: name.to_string(),
            message: e.to_string(),
        })?;
        let mut out = blend(image, &styled, self.config.effect.intensity);
        sanitize_image(&mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::apply_standalone;
    use crate::imaging::ops::is_normalized;
    use crate::registry::EffectRegistry;
    use crate::store::ArtifactStore;
    use crate::test_helpers::portrait_image;

    #[test]
    fn basic_names_exist_in_registry() {
        let registry = EffectRegistry::builtin();
        for (name, _) in BASIC_EFFECTS {
            assert!(registry.contains(name), "{name} missing from registry");
        }
    }

    #[test]
    fn exact_parity_effects_match_registry() {
        let img = portrait_image(20, 16);
        let basic = BasicEffects::new(StyleConfig::default());
        let registry = EffectRegistry::builtin();
        for (name, parity) in BASIC_EFFECTS {
            if *parity != Parity::Exact {
                continue;
            }
            let effect = registry.get(name).unwrap();
            let advanced = apply_standalone(effect.as_ref(), &img, &ArtifactStore::new()).unwrap();
            assert_eq!(basic.apply(name, &img).unwrap(), advanced, "{name} diverged");
        }
    }

    #[test]
    fn exact_parity_holds_with_custom_settings() {
        let mut config = StyleConfig::default();
        config.effects.insert(
            "posterize".into(),
            toml::from_str("levels = 3").unwrap(),
        );
        let img = portrait_image(12, 12);
        let basic = BasicEffects::new(config.clone());
        let registry = EffectRegistry::builtin().with_settings(config.effects.clone());
        let advanced = apply_standalone(
            registry.get("posterize").unwrap().as_ref(),
            &img,
            &ArtifactStore::new(),
        )
        .unwrap();
        assert_eq!(basic.apply("posterize", &img).unwrap(), advanced);
    }

    #[test]
    fn invalid_settings_are_rejected_like_the_registry() {
        let mut config = StyleConfig::default().with_primary_effect("posterize");
        config.effects.insert(
            "posterize".into(),
            toml::from_str("levels = 100").unwrap(),
        );
        let img = portrait_image(8, 8);
        let registry = EffectRegistry::builtin().with_settings(config.effects.clone());
        assert!(registry.get("posterize").is_none());

        let basic = BasicEffects::new(config);
        assert!(basic.apply("posterize", &img).is_err());
        assert!(matches!(
            basic.transform_image(&img, None),
            Err(PipelineError::Effect { .. })
        ));
    }

    #[test]
    fn mistyped_settings_are_not_defaulted() {
        let mut config = StyleConfig::default();
        config.effects.insert(
            "spectral_shift".into(),
            toml::from_str("degrees = \"ninety\"").unwrap(),
        );
        let basic = BasicEffects::new(config);
        assert!(basic.apply("spectral_shift", &portrait_image(8, 8)).is_err());
    }

    #[test]
    fn approximate_parity_keeps_shape_and_range() {
        let img = portrait_image(20, 16);
        let basic = BasicEffects::new(StyleConfig::default());
        for (name, _) in BASIC_EFFECTS {
            let out = basic.apply(name, &img).unwrap();
            assert_eq!(out.dimensions(), img.dimensions(), "{name}");
            assert!(is_normalized(&out), "{name}");
        }
        let sketch = basic.apply("pencil_sketch", &img).unwrap();
        assert!(sketch.pixels().all(|p| p.0[0] == p.0[1] && p.0[1] == p.0[2]));
    }

    #[test]
    fn effect_name_falls_back_to_default() {
        let basic = BasicEffects::new(StyleConfig::default().with_primary_effect("vignette"));
        assert_eq!(basic.effect_name(), DEFAULT_EFFECT);
        let basic = BasicEffects::new(StyleConfig::default().with_primary_effect("posterize"));
        assert_eq!(basic.effect_name(), "posterize");
    }

    #[test]
    fn transform_image_blends_by_intensity() {
        let mut config = StyleConfig::default().with_primary_effect("posterize");
        config.effect.intensity = 0.0;
        let img = portrait_image(10, 10);
        let out = BasicEffects::new(config).transform_image(&img, None).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn transform_image_rejects_empty() {
        let basic = BasicEffects::new(StyleConfig::default());
        assert!(matches!(
            basic.transform_image(&Rgb32FImage::new(0, 3), None),
            Err(PipelineError::EmptyInput)
        ));
    }
}
