//! The artifact store threaded through one pipeline run.
//!
//! Every stage reads what earlier stages produced and returns a delta of new
//! entries, which the pipeline merges in. The store is keyed by
//! [`ArtifactKey`], a closed set of well-known artifacts plus string-keyed
//! escape hatches ([`ArtifactKey::Custom`]) for late-bound plugins.
//!
//! ## Invariants
//!
//! - Keys keep their first insertion position; overwriting a value never
//!   moves or removes the key. There is no removal API.
//! - A missing key means "the stage that writes it did not run or failed".
//!   Readers resolve inputs through a priority-ordered fallback chain
//!   ([`ArtifactStore::resolve_image`]) rather than treating absence as an
//!   error.
//! - A failed stage is recorded with two sentinels: `<stage>_failed` (flag)
//!   and `<stage>_error` (the reason).

use crate::imaging::LumaMap;
use image::Rgb32FImage;
use std::fmt;

/// Symbolic name of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKey {
    OriginalImage,
    RunSeed,
    FaceMesh,
    FaceDetected,
    FlowField,
    MaterialDiffuse,
    MaterialHeight,
    PrimaryEffectName,
    PrimaryEffectImage,
    ComposedImage,
    ReconciledImage,
    NonFiniteReplaced,
    RefinedImage,
    FinalImage,
    /// Sentinel flag `<stage>_failed`.
    Failed(String),
    /// Failure reason `<stage>_error`.
    FailureReason(String),
    /// Free-form key for plugins.
    Custom(String),
}

impl ArtifactKey {
    pub fn name(&self) -> String {
        let fixed = match self {
            ArtifactKey::OriginalImage => "original_image",
            ArtifactKey::RunSeed => "run_seed",
            ArtifactKey::FaceMesh => "face_mesh",
            ArtifactKey::FaceDetected => "face_detected",
            ArtifactKey::FlowField => "flow_field",
            ArtifactKey::MaterialDiffuse => "material_diffuse",
            ArtifactKey::MaterialHeight => "material_height",
            ArtifactKey::PrimaryEffectName => "primary_effect_name",
            ArtifactKey::PrimaryEffectImage => "primary_effect_image",
            ArtifactKey::ComposedImage => "composed_image",
            ArtifactKey::ReconciledImage => "reconciled_image",
            ArtifactKey::NonFiniteReplaced => "non_finite_replaced",
            ArtifactKey::RefinedImage => "refined_image",
            ArtifactKey::FinalImage => "final_image",
            ArtifactKey::Failed(stage) => return format!("{stage}_failed"),
            ArtifactKey::FailureReason(stage) => return format!("{stage}_error"),
            ArtifactKey::Custom(name) => return name.clone(),
        };
        fixed.to_string()
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// Landmark grid over a detected face region.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMesh {
    pub region: Region,
    /// Landmark positions in pixel coordinates.
    pub landmarks: Vec<(f32, f32)>,
    /// Mean skin likelihood inside the region, 0-1.
    pub confidence: f32,
}

/// Per-pixel unit direction vectors guiding brush strokes.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    pub width: u32,
    pub height: u32,
    pub vectors: Vec<[f32; 2]>,
}

impl FlowField {
    /// Direction at `(x, y)`, or `[1, 0]` outside the field.
    pub fn at(&self, x: u32, y: u32) -> [f32; 2] {
        if x >= self.width || y >= self.height {
            return [1.0, 0.0];
        }
        self.vectors[(y * self.width + x) as usize]
    }
}

/// A value held in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Image(Rgb32FImage),
    Map(LumaMap),
    Mesh(FaceMesh),
    Flow(FlowField),
    Scalar(f32),
    Seed(u64),
    Flag(bool),
    Text(String),
}

/// A set of entries returned by a stage or effect, to be merged into the store.
pub type StoreDelta = ArtifactStore;

/// Insertion-ordered map from [`ArtifactKey`] to [`Artifact`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactStore {
    entries: Vec<(ArtifactKey, Artifact)>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. An existing key keeps its position.
    pub fn insert(&mut self, key: ArtifactKey, value: Artifact) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder form of [`insert`](Self::insert), used to assemble deltas.
    pub fn with(mut self, key: ArtifactKey, value: Artifact) -> Self {
        self.insert(key, value);
        self
    }

    /// Merge every entry of `delta` in its order.
    pub fn merge(&mut self, delta: StoreDelta) {
        for (key, value) in delta.entries {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<&Artifact> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &ArtifactKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArtifactKey, &Artifact)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn image(&self, key: &ArtifactKey) -> Option<&Rgb32FImage> {
        match self.get(key) {
            Some(Artifact::Image(img)) => Some(img),
            _ => None,
        }
    }

    pub fn map(&self, key: &ArtifactKey) -> Option<&LumaMap> {
        match self.get(key) {
            Some(Artifact::Map(map)) => Some(map),
            _ => None,
        }
    }

    pub fn mesh(&self) -> Option<&FaceMesh> {
        match self.get(&ArtifactKey::FaceMesh) {
            Some(Artifact::Mesh(mesh)) => Some(mesh),
            _ => None,
        }
    }

    pub fn flow(&self) -> Option<&FlowField> {
        match self.get(&ArtifactKey::FlowField) {
            Some(Artifact::Flow(flow)) => Some(flow),
            _ => None,
        }
    }

    pub fn scalar(&self, key: &ArtifactKey) -> Option<f32> {
        match self.get(key) {
            Some(Artifact::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn flag(&self, key: &ArtifactKey) -> Option<bool> {
        match self.get(key) {
            Some(Artifact::Flag(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, key: &ArtifactKey) -> Option<&str> {
        match self.get(key) {
            Some(Artifact::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Seed of the current run, if the pipeline recorded one.
    pub fn seed(&self) -> Option<u64> {
        match self.get(&ArtifactKey::RunSeed) {
            Some(Artifact::Seed(s)) => Some(*s),
            _ => None,
        }
    }

    /// First image present along a priority-ordered fallback chain.
    pub fn resolve_image<'s, 'c>(
        &'s self,
        chain: &'c [ArtifactKey],
    ) -> Option<(&'c ArtifactKey, &'s Rgb32FImage)> {
        chain
            .iter()
            .find_map(|key| self.image(key).map(|img| (key, img)))
    }

    /// Record that `stage` failed, with its reason.
    pub fn mark_failed(&mut self, stage: &str, reason: impl Into<String>) {
        self.insert(ArtifactKey::Failed(stage.to_string()), Artifact::Flag(true));
        self.insert(
            ArtifactKey::FailureReason(stage.to_string()),
            Artifact::Text(reason.into()),
        );
    }

    pub fn has_failed(&self, stage: &str) -> bool {
        self.flag(&ArtifactKey::Failed(stage.to_string())) == Some(true)
    }

    /// `(stage, reason)` for every recorded failure, in failure order.
    pub fn failures(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter_map(|(key, _)| match key {
                ArtifactKey::Failed(stage) => Some((
                    stage.clone(),
                    self.text(&ArtifactKey::FailureReason(stage.clone()))
                        .unwrap_or_default()
                        .to_string(),
                )),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::solid_image;

    #[test]
    fn key_names() {
        assert_eq!(ArtifactKey::OriginalImage.name(), "original_image");
        assert_eq!(ArtifactKey::FinalImage.to_string(), "final_image");
        assert_eq!(
            ArtifactKey::Failed("analysis".into()).name(),
            "analysis_failed"
        );
        assert_eq!(
            ArtifactKey::FailureReason("flow".into()).name(),
            "flow_error"
        );
        assert_eq!(ArtifactKey::Custom("halo".into()).name(), "halo");
    }

    #[test]
    fn insert_preserves_order_on_overwrite() {
        let mut store = ArtifactStore::new();
        store.insert(ArtifactKey::RunSeed, Artifact::Seed(1));
        store.insert(ArtifactKey::FaceDetected, Artifact::Flag(false));
        store.insert(ArtifactKey::RunSeed, Artifact::Seed(2));

        let keys: Vec<_> = store.keys().cloned().collect();
        assert_eq!(keys, vec![ArtifactKey::RunSeed, ArtifactKey::FaceDetected]);
        assert_eq!(store.seed(), Some(2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn merge_applies_delta_in_order() {
        let mut store = ArtifactStore::new().with(ArtifactKey::RunSeed, Artifact::Seed(3));
        let delta = StoreDelta::new()
            .with(ArtifactKey::NonFiniteReplaced, Artifact::Scalar(4.0))
            .with(ArtifactKey::RunSeed, Artifact::Seed(9));
        store.merge(delta);

        let keys: Vec<_> = store.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![ArtifactKey::RunSeed, ArtifactKey::NonFiniteReplaced]
        );
        assert_eq!(store.seed(), Some(9));
        assert_eq!(store.scalar(&ArtifactKey::NonFiniteReplaced), Some(4.0));
    }

    #[test]
    fn typed_accessors_reject_wrong_variant() {
        let store = ArtifactStore::new().with(ArtifactKey::ComposedImage, Artifact::Flag(true));
        assert!(store.image(&ArtifactKey::ComposedImage).is_none());
        assert_eq!(store.flag(&ArtifactKey::ComposedImage), Some(true));
    }

    #[test]
    fn resolve_image_follows_chain() {
        let store = ArtifactStore::new()
            .with(
                ArtifactKey::OriginalImage,
                Artifact::Image(solid_image(2, 2, [0.1; 3])),
            )
            .with(
                ArtifactKey::MaterialDiffuse,
                Artifact::Image(solid_image(2, 2, [0.7; 3])),
            );

        let chain = [
            ArtifactKey::ComposedImage,
            ArtifactKey::MaterialDiffuse,
            ArtifactKey::OriginalImage,
        ];
        let (key, img) = store.resolve_image(&chain).unwrap();
        assert_eq!(*key, ArtifactKey::MaterialDiffuse);
        assert_eq!(img.get_pixel(0, 0).0, [0.7; 3]);

        assert!(store.resolve_image(&[ArtifactKey::RefinedImage]).is_none());
    }

    #[test]
    fn resolved_image_outlives_chain() {
        let store = ArtifactStore::new().with(
            ArtifactKey::OriginalImage,
            Artifact::Image(solid_image(3, 2, [0.4; 3])),
        );
        let img = {
            let chain = vec![ArtifactKey::RefinedImage, ArtifactKey::OriginalImage];
            store.resolve_image(&chain).map(|(_, img)| img)
        };
        assert_eq!(img.map(|i| i.dimensions()), Some((3, 2)));
    }

    #[test]
    fn failure_sentinels() {
        let mut store = ArtifactStore::new();
        assert!(!store.has_failed("analysis"));

        store.mark_failed("analysis", "input too small");
        store.mark_failed("flow", "boom");

        assert!(store.has_failed("analysis"));
        assert_eq!(
            store.text(&ArtifactKey::FailureReason("analysis".into())),
            Some("input too small")
        );
        assert_eq!(
            store.failures(),
            vec![
                ("analysis".to_string(), "input too small".to_string()),
                ("flow".to_string(), "boom".to_string()),
            ]
        );
    }

    #[test]
    fn flow_field_out_of_bounds_default() {
        let field = FlowField {
            width: 1,
            height: 1,
            vectors: vec![[0.0, 1.0]],
        };
        assert_eq!(field.at(0, 0), [0.0, 1.0]);
        assert_eq!(field.at(5, 0), [1.0, 0.0]);
    }

    #[test]
    fn region_contains() {
        let r = Region {
            x: 2,
            y: 2,
            width: 3,
            height: 3,
        };
        assert!(r.contains(2, 2));
        assert!(r.contains(4, 4));
        assert!(!r.contains(5, 4));
        assert!(!r.contains(1, 3));
    }
}
