use crate::imaging::ops::{blend, sobel};
use crate::stage::{Capability, Stage, StageError, resolve_input};
use crate::store::{Artifact, ArtifactKey, ArtifactStore, StoreDelta};
use image::{Rgb, Rgb32FImage};
use rand::rngs::StdRng;

/// Preferred base layer for composition.
const BASE_CHAIN: &[ArtifactKey] = &[
    ArtifactKey::PrimaryEffectImage,
    ArtifactKey::MaterialDiffuse,
    ArtifactKey::OriginalImage,
];

/// Combines the stylised layer with relief shading and blends it over the
/// original by the configured intensity.
#[derive(Debug, Clone)]
pub struct ComposeStage {
    intensity: f32,
    relief: f32,
}

impl ComposeStage {
    pub fn new(intensity: f32, relief: f32) -> Self {
        Self { intensity, relief }
    }
}

impl Stage for ComposeStage {
    fn name(&self) -> &'static str {
        "compose"
    }

    fn capability(&self) -> Capability {
        Capability::Compose
    }

    fn reads(&self) -> &'static [ArtifactKey] {
        &[
            ArtifactKey::PrimaryEffectImage,
            ArtifactKey::MaterialDiffuse,
            ArtifactKey::OriginalImage,
            ArtifactKey::MaterialHeight,
        ]
    }

    fn writes(&self) -> &'static [ArtifactKey] {
        &[ArtifactKey::ComposedImage]
    }

    fn run(
        &self,
        image: &Rgb32FImage,
        store: &ArtifactStore,
        _rng: &mut StdRng,
    ) -> Result<StoreDelta, StageError> {
        let base = resolve_input(store, BASE_CHAIN, image);

        let shaded = match store.map(&ArtifactKey::MaterialHeight) {
            Some(height) if height.dimensions() == base.dimensions() && self.relief > 0.0 => {
                let (gx, gy) = sobel(height);
                Rgb32FImage::from_fn(base.width(), base.height(), |x, y| {
                    // Light from the upper left
                    let slope = gx.get_pixel(x, y).0[0] + gy.get_pixel(x, y).0[0];
                    let shade = 1.0 - self.relief * slope * 0.5;
                    let [r, g, b] = base.get_pixel(x, y).0;
                    Rgb([r * shade, g * shade, b * shade])
                })
            }
            _ => base.clone(),
        };

        let composed = blend(image, &shaded, self.intensity);
        Ok(StoreDelta::new().with(ArtifactKey::ComposedImage, Artifact::Image(composed)))
    }

    fn visualization_key(&self) -> Option<&'static str> {
        Some("composed")
    }

    fn visualize(&self, _image: &Rgb32FImage, store: &ArtifactStore) -> Option<Rgb32FImage> {
        store.image(&ArtifactKey::ComposedImage).cloned()
    }
}
