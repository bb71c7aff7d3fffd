use crate::config::RefineParams;
use crate::imaging::ops::{sanitize_image, unsharp};
use crate::stage::{Capability, Stage, StageError, resolve_input};
use crate::store::{Artifact, ArtifactKey, ArtifactStore, StoreDelta};
use image::Rgb32FImage;
use rand::rngs::StdRng;

const INPUT_CHAIN: &[ArtifactKey] = &[
    ArtifactKey::ReconciledImage,
    ArtifactKey::ComposedImage,
    ArtifactKey::PrimaryEffectImage,
    ArtifactKey::MaterialDiffuse,
    ArtifactKey::OriginalImage,
];

/// Final unsharp mask, scaled by the detail setting.
#[derive(Debug, Clone)]
pub struct RefineStage {
    params: RefineParams,
    detail: f32,
}

impl RefineStage {
    pub fn new(params: RefineParams, detail: f32) -> Self {
        Self { params, detail }
    }

    fn amount(&self) -> f32 {
        self.params.sharpen * (0.5 + self.detail)
    }
}

impl Stage for RefineStage {
    fn name(&self) -> &'static str {
        "refine"
    }

    fn capability(&self) -> Capability {
        Capability::Refine
    }

    fn reads(&self) -> &'static [ArtifactKey] {
        INPUT_CHAIN
    }

    fn writes(&self) -> &'static [ArtifactKey] {
        &[ArtifactKey::RefinedImage]
    }

    fn run(
        &self,
        image: &Rgb32FImage,
        store: &ArtifactStore,
        _rng: &mut StdRng,
    ) -> Result<StoreDelta, StageError> {
        // Reconcile may have failed; never sharpen unbounded input
        let mut input = resolve_input(store, INPUT_CHAIN, image).clone();
        sanitize_image(&mut input);

        let mut refined = unsharp(&input, self.params.sigma, self.amount());
        sanitize_image(&mut refined);
        Ok(StoreDelta::new().with(ArtifactKey::RefinedImage, Artifact::Image(refined)))
    }

    fn visualization_key(&self) -> Option<&'static str> {
        Some("refined")
    }

    fn visualize(&self, _image: &Rgb32FImage, store: &ArtifactStore) -> Option<Rgb32FImage> {
        store.image(&ArtifactKey::RefinedImage).cloned()
    }
}
