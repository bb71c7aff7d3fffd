//! The stage contract shared by every step of the pipeline.
//!
//! A stage receives the original image and a read-only view of the
//! [`ArtifactStore`], and returns a [`StoreDelta`] that the pipeline merges.
//! Stages never mutate the store directly, which is what lets the pipeline
//! contain a failing stage: on `Err` (or a panic) nothing from that stage is
//! merged and the pipeline records a sentinel instead.
//!
//! Randomness comes exclusively from the `StdRng` handed to [`Stage::run`].
//! The pipeline owns that generator and seeds it per transformation, so two
//! pipelines running concurrently never share random state.

use crate::store::{ArtifactKey, ArtifactStore, StoreDelta};
use image::Rgb32FImage;
use rand::rngs::StdRng;
use std::fmt;
use thiserror::Error;

/// What a stage contributes to the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Analyze,
    Generate,
    Simulate,
    Compose,
    Reconcile,
    Refine,
}

impl Capability {
    /// The fixed order in which the pipeline runs its stages.
    pub const ORDER: [Capability; 6] = [
        Capability::Analyze,
        Capability::Generate,
        Capability::Simulate,
        Capability::Compose,
        Capability::Reconcile,
        Capability::Refine,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Analyze => "analyze",
            Capability::Generate => "generate",
            Capability::Simulate => "simulate",
            Capability::Compose => "compose",
            Capability::Reconcile => "reconcile",
            Capability::Refine => "refine",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("input too small: {width}x{height} (need at least {min}x{min})")]
    InputTooSmall { width: u32, height: u32, min: u32 },
    #[error("missing required artifact: {0}")]
    MissingInput(ArtifactKey),
    #[error("{0}")]
    Failed(String),
}

/// One step of the fixed pipeline sequence.
pub trait Stage: Send + Sync {
    /// Stable name, used for sentinel keys and log fields.
    fn name(&self) -> &'static str;

    fn capability(&self) -> Capability;

    /// Keys this stage consults, most preferred first.
    fn reads(&self) -> &'static [ArtifactKey];

    /// Keys this stage writes on success.
    fn writes(&self) -> &'static [ArtifactKey];

    fn run(
        &self,
        image: &Rgb32FImage,
        store: &ArtifactStore,
        rng: &mut StdRng,
    ) -> Result<StoreDelta, StageError>;

    /// Intermediate-output key for [`visualize`](Self::visualize), if any.
    fn visualization_key(&self) -> Option<&'static str> {
        None
    }

    /// Render what this stage contributed. Purely observational.
    fn visualize(&self, _image: &Rgb32FImage, _store: &ArtifactStore) -> Option<Rgb32FImage> {
        None
    }
}

/// Fallback chain for the image a late stage should work on.
pub const WORKING_IMAGE_CHAIN: &[ArtifactKey] = &[
    ArtifactKey::RefinedImage,
    ArtifactKey::ReconciledImage,
    ArtifactKey::ComposedImage,
    ArtifactKey::PrimaryEffectImage,
    ArtifactKey::MaterialDiffuse,
    ArtifactKey::OriginalImage,
];

/// Resolve the first image along `chain`, falling back to `original`.
pub fn resolve_input<'a>(
    store: &'a ArtifactStore,
    chain: &[ArtifactKey],
    original: &'a Rgb32FImage,
) -> &'a Rgb32FImage {
    store
        .resolve_image(chain)
        .map(|(_, img)| img)
        .unwrap_or(original)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Artifact;
    use crate::test_helpers::solid_image;

    #[test]
    fn capability_order_is_sorted() {
        let mut sorted = Capability::ORDER;
        sorted.sort();
        assert_eq!(sorted, Capability::ORDER);
    }

    #[test]
    fn capability_names() {
        assert_eq!(Capability::Generate.to_string(), "generate");
        assert_eq!(Capability::Refine.as_str(), "refine");
    }

    #[test]
    fn resolve_input_prefers_chain_then_original() {
        let original = solid_image(2, 2, [0.0; 3]);
        let empty = ArtifactStore::new();
        let img = resolve_input(&empty, WORKING_IMAGE_CHAIN, &original);
        assert_eq!(img.get_pixel(0, 0).0, [0.0; 3]);

        let store = ArtifactStore::new()
            .with(
                ArtifactKey::MaterialDiffuse,
                Artifact::Image(solid_image(2, 2, [0.4; 3])),
            )
            .with(
                ArtifactKey::ComposedImage,
                Artifact::Image(solid_image(2, 2, [0.9; 3])),
            );
        let img = resolve_input(&store, WORKING_IMAGE_CHAIN, &original);
        assert_eq!(img.get_pixel(0, 0).0, [0.9; 3]);
    }

    #[test]
    fn stage_error_messages() {
        let err = StageError::InputTooSmall {
            width: 2,
            height: 1,
            min: 8,
        };
        assert_eq!(err.to_string(), "input too small: 2x1 (need at least 8x8)");
        assert_eq!(
            StageError::MissingInput(ArtifactKey::FlowField).to_string(),
            "missing required artifact: flow_field"
        );
    }
}
