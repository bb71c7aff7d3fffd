use crate::config::ReconcileParams;
use crate::imaging::calculations::lerp;
use crate::imaging::ops::{map_pixels, mean_luminance, sanitize_image};
use crate::stage::{Capability, Stage, StageError, resolve_input};
use crate::store::{Artifact, ArtifactKey, ArtifactStore, StoreDelta};
use image::Rgb32FImage;
use rand::rngs::StdRng;
use tracing::debug;

const INPUT_CHAIN: &[ArtifactKey] = &[
    ArtifactKey::ComposedImage,
    ArtifactKey::PrimaryEffectImage,
    ArtifactKey::MaterialDiffuse,
    ArtifactKey::OriginalImage,
];

/// Brings the composed image back into the bounded working space.
///
/// Non-finite channels are replaced (NaN → 0, +Inf → 1, −Inf → 0), every
/// channel is clamped to `[0, 1]`, and the mean luminance is pulled back
/// towards the source by `preserve_luminance`. Everything after this stage
/// may rely on normalised values.
#[derive(Debug, Clone)]
pub struct ReconcileStage {
    params: ReconcileParams,
}

impl ReconcileStage {
    pub fn new(params: ReconcileParams) -> Self {
        Self { params }
    }
}

impl Stage for ReconcileStage {
    fn name(&self) -> &'static str {
        "reconcile"
    }

    fn capability(&self) -> Capability {
        Capability::Reconcile
    }

    fn reads(&self) -> &'static [ArtifactKey] {
        INPUT_CHAIN
    }

    fn writes(&self) -> &'static [ArtifactKey] {
        &[ArtifactKey::ReconciledImage, ArtifactKey::NonFiniteReplaced]
    }

    fn run(
        &self,
        image: &Rgb32FImage,
        store: &ArtifactStore,
        _rng: &mut StdRng,
    ) -> Result<StoreDelta, StageError> {
        let mut working = resolve_input(store, INPUT_CHAIN, image).clone();
        let replaced = sanitize_image(&mut working);
        if replaced > 0 {
            debug!(replaced, "replaced non-finite channels");
        }

        let mut source = image.clone();
        sanitize_image(&mut source);
        let target = mean_luminance(&source);
        let current = mean_luminance(&working);
        if current > 1e-4 && self.params.preserve_luminance > 0.0 {
            let gain = lerp(1.0, target / current, self.params.preserve_luminance);
            working = map_pixels(&working, |[r, g, b]| [r * gain, g * gain, b * gain]);
            sanitize_image(&mut working);
        }

        Ok(StoreDelta::new()
            .with(ArtifactKey::ReconciledImage, Artifact::Image(working))
            .with(
                ArtifactKey::NonFiniteReplaced,
                Artifact::Scalar(replaced as f32),
            ))
    }
}
