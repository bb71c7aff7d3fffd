//! External effect plugins.
//!
//! A plugin is a TOML manifest in the configured plugin directory. The file
//! stem is the effect name the plugin is registered under; the body is an
//! ordered chain of image operations:
//!
//! ```toml
//! # plugins/sunset.toml → registered as "sunset"
//! description = "Warm, punchy evening light"
//!
//! [[ops]]
//! kind = "hue_rotate"
//! degrees = -15
//!
//! [[ops]]
//! kind = "contrast"
//! amount = 1.2
//!
//! [[ops]]
//! kind = "tint"
//! color = [1.0, 0.6, 0.3]
//! strength = 0.2
//! ```
//!
//! | Op | Fields | Effect |
//! |---|---|---|
//! | `hue_rotate` | `degrees` (-360..360) | Rotate every hue |
//! | `contrast` | `amount` (0-4) | Scale distance from mid-grey |
//! | `brightness` | `amount` (-1..1) | Add to every channel |
//! | `saturate` | `amount` (0-4) | Scale saturation |
//! | `posterize` | `levels` (2-64) | Quantise each channel |
//! | `invert` | | `1 - c` |
//! | `blur` | `sigma` (0-50) | Gaussian blur |
//! | `tint` | `color` (RGB 0-1), `strength` (0-1) | Blend towards a colour |
//!
//! Manifests are parsed and validated at load time. A manifest that fails
//! either step is skipped and reported; it never aborts discovery of the
//! remaining plugins.

use crate::effect::{Effect, EffectError, effect_output};
use crate::imaging::calculations::{lerp_rgb, quantize, shift_hue};
use crate::imaging::ops::{blur, map_pixels, sanitize_image};
use crate::store::{ArtifactStore, StoreDelta};
use image::Rgb32FImage;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extension of plugin manifest files.
pub const MANIFEST_EXTENSION: &str = "toml";

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid plugin name '{0}' (use lowercase letters, digits, and underscores)")]
    InvalidName(String),
    #[error("plugin '{name}': {message}")]
    Invalid { name: String, message: String },
    #[error("cannot scan plugin directory {path}: {message}")]
    Directory { path: PathBuf, message: String },
}

/// One operation in a plugin's chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginOp {
    HueRotate { degrees: f32 },
    Contrast { amount: f32 },
    Brightness { amount: f32 },
    Saturate { amount: f32 },
    Posterize { levels: u32 },
    Invert,
    Blur { sigma: f32 },
    Tint { color: [f32; 3], strength: f32 },
}

impl PluginOp {
    fn validate(&self) -> Result<(), String> {
        let within = |field: &str, v: f32, lo: f32, hi: f32| {
            if v.is_finite() && (lo..=hi).contains(&v) {
                Ok(())
            } else {
                Err(format!("{field} must be within {lo}..{hi} (got {v})"))
            }
        };
        match self {
            PluginOp::HueRotate { degrees } => within("hue_rotate.degrees", *degrees, -360.0, 360.0),
            PluginOp::Contrast { amount } => within("contrast.amount", *amount, 0.0, 4.0),
            PluginOp::Brightness { amount } => within("brightness.amount", *amount, -1.0, 1.0),
            PluginOp::Saturate { amount } => within("saturate.amount", *amount, 0.0, 4.0),
            PluginOp::Posterize { levels } => {
                within("posterize.levels", *levels as f32, 2.0, 64.0)
            }
            PluginOp::Invert => Ok(()),
            PluginOp::Blur { sigma } => within("blur.sigma", *sigma, 0.0, 50.0),
            PluginOp::Tint { color, strength } => {
                for c in color {
                    within("tint.color", *c, 0.0, 1.0)?;
                }
                within("tint.strength", *strength, 0.0, 1.0)
            }
        }
    }

    fn apply(&self, image: &Rgb32FImage) -> Rgb32FImage {
        match *self {
            PluginOp::HueRotate { degrees } => map_pixels(image, |p| shift_hue(p, degrees, 1.0)),
            PluginOp::Contrast { amount } => {
                map_pixels(image, |p| p.map(|c| (c - 0.5) * amount + 0.5))
            }
            PluginOp::Brightness { amount } => map_pixels(image, |p| p.map(|c| c + amount)),
            PluginOp::Saturate { amount } => map_pixels(image, |p| shift_hue(p, 0.0, amount)),
            PluginOp::Posterize { levels } => map_pixels(image, |p| p.map(|c| quantize(c, levels))),
            PluginOp::Invert => map_pixels(image, |p| p.map(|c| 1.0 - c)),
            PluginOp::Blur { sigma } => blur(image, sigma),
            PluginOp::Tint { color, strength } => {
                map_pixels(image, |p| lerp_rgb(p, color, strength))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(default)]
    description: Option<String>,
    ops: Vec<PluginOp>,
}

/// An effect backed by a validated plugin manifest.
#[derive(Debug, Clone)]
pub struct ManifestEffect {
    name: String,
    description: Option<String>,
    source: PathBuf,
    ops: Vec<PluginOp>,
}

impl ManifestEffect {
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn ops(&self) -> &[PluginOp] {
        &self.ops
    }
}

impl Effect for ManifestEffect {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, image: &Rgb32FImage, _store: &ArtifactStore) -> Result<StoreDelta, EffectError> {
        let mut out = self
            .ops
            .iter()
            .fold(image.clone(), |acc, op| op.apply(&acc));
        sanitize_image(&mut out);
        Ok(effect_output(out))
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Load and validate one manifest.
pub fn load_manifest(path: &Path) -> Result<ManifestEffect, PluginError> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    if !is_valid_name(&name) {
        return Err(PluginError::InvalidName(name));
    }

    let content = fs::read_to_string(path).map_err(|source| PluginError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest: Manifest = toml::from_str(&content).map_err(|source| PluginError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if manifest.ops.is_empty() {
        return Err(PluginError::Invalid {
            name,
            message: "ops must not be empty".into(),
        });
    }
    for op in &manifest.ops {
        op.validate().map_err(|message| PluginError::Invalid {
            name: name.clone(),
            message,
        })?;
    }

    Ok(ManifestEffect {
        name,
        description: manifest.description,
        source: path.to_path_buf(),
        ops: manifest.ops,
    })
}

/// Outcome of scanning a plugin directory.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Names registered, in file-name order.
    pub loaded: Vec<String>,
    /// Manifests that were skipped, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Scan `dir` (non-recursively) for manifests, loading each independently.
///
/// Only an unreadable directory is an error; a bad manifest is recorded in
/// the report's `skipped` list.
pub fn scan_plugins(dir: &Path) -> Result<(Vec<ManifestEffect>, DiscoveryReport), PluginError> {
    let mut effects = Vec::new();
    let mut report = DiscoveryReport::default();
    if !dir.is_dir() {
        return Err(PluginError::Directory {
            path: dir.to_path_buf(),
            message: "not a directory".into(),
        });
    }

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|e| PluginError::Directory {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        let path = entry.path();
        let is_manifest = entry.file_type().is_file()
            && path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(MANIFEST_EXTENSION));
        if !is_manifest {
            continue;
        }
        match load_manifest(path) {
            Ok(effect) => {
                debug!(plugin = %effect.name, path = %path.display(), "loaded plugin");
                report.loaded.push(effect.name.clone());
                effects.push(effect);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping plugin");
                report.skipped.push((path.to_path_buf(), e.to_string()));
            }
        }
    }
    Ok((effects, report))
}
