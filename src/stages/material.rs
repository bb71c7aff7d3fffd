use crate::config::{ColorConfig, ColorScheme, EffectParams, MaterialParams};
use crate::imaging::LumaMap;
use crate::imaging::calculations::{hsv_to_rgb, lerp_rgb, luminance, quantize, rgb_to_hsv};
use crate::imaging::ops::{blur, luma_to_rgb, luminance_map, map_pixels, sample_bilinear};
use crate::stage::{Capability, Stage, StageError};
use crate::store::{Artifact, ArtifactKey, ArtifactStore, FlowField, StoreDelta};
use image::{Rgb, Rgb32FImage, imageops};
use rand::rngs::StdRng;

/// Simulates the paint layer: colour treatment, strokes smeared along the
/// flow field, palette quantisation, and a height map for relief shading.
#[derive(Debug, Clone)]
pub struct MaterialStage {
    params: MaterialParams,
    color: ColorConfig,
    effect: EffectParams,
}

impl MaterialStage {
    pub fn new(params: MaterialParams, color: ColorConfig, effect: EffectParams) -> Self {
        Self {
            params,
            color,
            effect,
        }
    }
}

impl Stage for MaterialStage {
    fn name(&self) -> &'static str {
        "material"
    }

    fn capability(&self) -> Capability {
        Capability::Simulate
    }

    fn reads(&self) -> &'static [ArtifactKey] {
        &[ArtifactKey::OriginalImage, ArtifactKey::FlowField]
    }

    fn writes(&self) -> &'static [ArtifactKey] {
        &[ArtifactKey::MaterialDiffuse, ArtifactKey::MaterialHeight]
    }

    fn run(
        &self,
        image: &Rgb32FImage,
        store: &ArtifactStore,
        _rng: &mut StdRng,
    ) -> Result<StoreDelta, StageError> {
        let treated = map_pixels(image, |rgb| {
            apply_saturation(apply_scheme(rgb, self.color.scheme), self.color.saturation)
        });

        let length = self.effect.stroke_length;
        let stroked = match store.flow() {
            Some(field) if field.width == image.width() && field.height == image.height() => {
                smear_along_flow(&treated, field, length)
            }
            // No usable field: approximate strokes with an isotropic blur
            _ => blur(&treated, length as f32 / 3.0),
        };

        let levels = self.params.levels;
        let keep_detail = self.effect.detail * 0.5;
        let diffuse = Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
            let [r, g, b] = lerp_rgb(stroked.get_pixel(x, y).0, treated.get_pixel(x, y).0, keep_detail);
            Rgb([quantize(r, levels), quantize(g, levels), quantize(b, levels)])
        });

        let height_map = paint_height(&stroked);

        Ok(StoreDelta::new()
            .with(ArtifactKey::MaterialDiffuse, Artifact::Image(diffuse))
            .with(ArtifactKey::MaterialHeight, Artifact::Map(height_map)))
    }

    fn visualization_key(&self) -> Option<&'static str> {
        Some("material_map")
    }

    fn visualize(&self, _image: &Rgb32FImage, store: &ArtifactStore) -> Option<Rgb32FImage> {
        let diffuse = store.image(&ArtifactKey::MaterialDiffuse)?;
        match store.map(&ArtifactKey::MaterialHeight) {
            Some(height) => {
                let relief = luma_to_rgb(height);
                Some(Rgb32FImage::from_fn(diffuse.width(), diffuse.height(), |x, y| {
                    let shade = 0.6 + 0.4 * relief.get_pixel(x, y).0[0];
                    let [r, g, b] = diffuse.get_pixel(x, y).0;
                    Rgb([r * shade, g * shade, b * shade])
                }))
            }
            None => Some(diffuse.clone()),
        }
    }
}

/// Shift a pixel towards the named colour treatment.
pub fn apply_scheme(rgb: [f32; 3], scheme: ColorScheme) -> [f32; 3] {
    let [r, g, b] = rgb;
    match scheme {
        ColorScheme::Natural => rgb,
        ColorScheme::Warm => [r * 1.08 + 0.02, g * 1.02, b * 0.88],
        ColorScheme::Cool => [r * 0.9, g * 1.0, b * 1.08 + 0.02],
        ColorScheme::Monochrome => {
            let l = luminance(rgb);
            [l, l, l]
        }
        ColorScheme::Vivid => apply_saturation(rgb, 1.35),
    }
}

/// Scale HSV saturation by `factor`, clamped to a valid saturation.
pub fn apply_saturation(rgb: [f32; 3], factor: f32) -> [f32; 3] {
    if (factor - 1.0).abs() < f32::EPSILON {
        return rgb;
    }
    let [h, s, v] = rgb_to_hsv(rgb);
    hsv_to_rgb([h, (s * factor).clamp(0.0, 1.0), v])
}

/// Average samples taken along the flow direction on both sides of each
/// pixel (line integral convolution).
pub fn smear_along_flow(image: &Rgb32FImage, field: &FlowField, length: u32) -> Rgb32FImage {
    let half = length.max(1) as i32 / 2;
    Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
        let [vx, vy] = field.at(x, y);
        let mut acc = [0.0f32; 3];
        let mut n = 0.0f32;
        for step in -half..=half {
            let t = step as f32;
            let s = sample_bilinear(image, x as f32 + vx * t, y as f32 + vy * t);
            acc[0] += s[0];
            acc[1] += s[1];
            acc[2] += s[2];
            n += 1.0;
        }
        Rgb([acc[0] / n, acc[1] / n, acc[2] / n])
    })
}

/// Paint thickness: luminance of the stroke layer, lightly smoothed.
fn paint_height(stroked: &Rgb32FImage) -> LumaMap {
    imageops::blur(&luminance_map(stroked), 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::ops::is_normalized;
    use crate::test_helpers::{gradient_image, solid_image, test_rng};

    fn stage_with(color: ColorConfig) -> MaterialStage {
        MaterialStage::new(MaterialParams::default(), color, EffectParams::default())
    }

    #[test]
    fn writes_diffuse_and_height() {
        let img = gradient_image(16, 12);
        let delta = stage_with(ColorConfig::default())
            .run(&img, &ArtifactStore::new(), &mut test_rng())
            .unwrap();
        let diffuse = delta.image(&ArtifactKey::MaterialDiffuse).unwrap();
        assert_eq!(diffuse.dimensions(), (16, 12));
        assert!(is_normalized(diffuse));
        assert_eq!(
            delta.map(&ArtifactKey::MaterialHeight).unwrap().dimensions(),
            (16, 12)
        );
    }

    #[test]
    fn diffuse_is_quantised_to_levels() {
        let img = gradient_image(20, 20);
        let stage = MaterialStage::new(
            MaterialParams {
                levels: 3,
                relief: 0.0,
            },
            ColorConfig::default(),
            EffectParams::default(),
        );
        let delta = stage
            .run(&img, &ArtifactStore::new(), &mut test_rng())
            .unwrap();
        let diffuse = delta.image(&ArtifactKey::MaterialDiffuse).unwrap();
        for c in diffuse.iter() {
            assert!([0.0, 0.5, 1.0].contains(c), "unexpected level {c}");
        }
    }

    #[test]
    fn monochrome_scheme_removes_colour() {
        let img = solid_image(8, 8, [0.9, 0.2, 0.1]);
        let stage = stage_with(ColorConfig {
            scheme: ColorScheme::Monochrome,
            saturation: 1.0,
        });
        let delta = stage
            .run(&img, &ArtifactStore::new(), &mut test_rng())
            .unwrap();
        let [r, g, b] = delta
            .image(&ArtifactKey::MaterialDiffuse)
            .unwrap()
            .get_pixel(4, 4)
            .0;
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn warm_and_cool_shift_balance() {
        let grey = [0.5, 0.5, 0.5];
        let warm = apply_scheme(grey, ColorScheme::Warm);
        let cool = apply_scheme(grey, ColorScheme::Cool);
        assert!(warm[0] > warm[2]);
        assert!(cool[2] > cool[0]);
        assert_eq!(apply_scheme(grey, ColorScheme::Natural), grey);
    }

    #[test]
    fn zero_saturation_is_grey() {
        let [r, g, b] = apply_saturation([0.8, 0.3, 0.2], 0.0);
        assert!((r - g).abs() < 1e-5 && (g - b).abs() < 1e-5);
    }

    #[test]
    fn smear_on_flat_image_is_identity() {
        let img = solid_image(6, 6, [0.25, 0.5, 0.75]);
        let field = FlowField {
            width: 6,
            height: 6,
            vectors: vec![[0.6, 0.8]; 36],
        };
        let out = smear_along_flow(&img, &field, 5);
        for p in out.pixels() {
            for (c, want) in p.0.iter().zip([0.25, 0.5, 0.75]) {
                assert!((c - want).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn horizontal_smear_leaves_vertical_ramp_alone() {
        // Rows are constant in a vertical ramp; smearing along rows keeps them
        let img = Rgb32FImage::from_fn(8, 8, |_, y| Rgb([y as f32 / 7.0; 3]));
        let field = FlowField {
            width: 8,
            height: 8,
            vectors: vec![[1.0, 0.0]; 64],
        };
        let out = smear_along_flow(&img, &field, 6);
        assert!((out.get_pixel(3, 5).0[0] - 5.0 / 7.0).abs() < 1e-5);
    }

    #[test]
    fn visualize_needs_diffuse() {
        let stage = stage_with(ColorConfig::default());
        let img = gradient_image(8, 8);
        assert!(stage.visualize(&img, &ArtifactStore::new()).is_none());
        let delta = stage.run(&img, &ArtifactStore::new(), &mut test_rng()).unwrap();
        assert!(stage.visualize(&img, &delta).is_some());
    }
}
