//! The effect contract.
//!
//! An effect is a named transformation that can be applied on its own or
//! slotted into the pipeline as the primary effect. It has the same shape as
//! a [`Stage`](crate::stage::Stage): it reads an image plus the store and
//! returns a delta. By convention the delta carries the stylised image under
//! [`ArtifactKey::PrimaryEffectImage`].
//!
//! Effects are built by factories that receive the effect's own settings
//! table (`[effects.<name>]` in the config). Settings are parsed with serde
//! into a per-effect struct, so unknown keys and wrong types are reported as
//! [`EffectError::Settings`] when the registry instantiates the effect.

use crate::store::{Artifact, ArtifactKey, ArtifactStore, StoreDelta};
use image::Rgb32FImage;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EffectError {
    #[error("invalid settings for effect '{effect}': {source}")]
    Settings {
        effect: String,
        source: toml::de::Error,
    },
    #[error("invalid value for effect '{effect}': {message}")]
    Invalid { effect: String, message: String },
    #[error("effect '{effect}' failed: {message}")]
    Failed { effect: String, message: String },
}

/// A named, independently applicable transformation.
pub trait Effect: Send + Sync {
    fn name(&self) -> &str;

    /// Stylise `image`, using `store` for context (seed, face mesh, flow).
    fn apply(&self, image: &Rgb32FImage, store: &ArtifactStore) -> Result<StoreDelta, EffectError>;

    /// Render what this effect contributed.
    fn visualize(&self, store: &ArtifactStore) -> Option<Rgb32FImage> {
        store.image(&ArtifactKey::PrimaryEffectImage).cloned()
    }
}

/// Construction from an `[effects.<name>]` table.
pub trait FromSettings: Sized {
    fn from_settings(settings: &toml::Table) -> Result<Self, EffectError>;
}

/// Wrap an effect result in the conventional delta.
pub fn effect_output(image: Rgb32FImage) -> StoreDelta {
    StoreDelta::new().with(ArtifactKey::PrimaryEffectImage, Artifact::Image(image))
}

/// Apply an effect standalone and extract its image.
///
/// Falls back to a copy of the input when the effect returned no image.
pub fn apply_standalone(
    effect: &dyn Effect,
    image: &Rgb32FImage,
    store: &ArtifactStore,
) -> Result<Rgb32FImage, EffectError> {
    let delta = effect.apply(image, store)?;
    Ok(delta
        .image(&ArtifactKey::PrimaryEffectImage)
        .cloned()
        .unwrap_or_else(|| image.clone()))
}

/// Deserialize an effect's settings table into its typed settings.
pub fn parse_settings<T: DeserializeOwned>(
    effect: &str,
    table: &toml::Table,
) -> Result<T, EffectError> {
    toml::Value::Table(table.clone())
        .try_into()
        .map_err(|source| EffectError::Settings {
            effect: effect.to_string(),
            source,
        })
}

/// Reject a setting outside `range`.
pub fn check_range(
    effect: &str,
    field: &str,
    value: f32,
    range: std::ops::RangeInclusive<f32>,
) -> Result<(), EffectError> {
    if !range.contains(&value) {
        return Err(EffectError::Invalid {
            effect: effect.to_string(),
            message: format!(
                "{field} must be within {}-{} (got {value})",
                range.start(),
                range.end()
            ),
        });
    }
    Ok(())
}
