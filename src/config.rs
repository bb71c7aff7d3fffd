//! Style configuration module.
//!
//! Handles loading, validating, and layering `brushwork.toml` files. A
//! configuration is built once per run and is immutable afterwards: stock
//! defaults are overridden by the user file, which in turn can be overridden
//! by a named preset.
//!
//! ```text
//! stock defaults  →  brushwork.toml  →  [presets.<name>]
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! primary_effect = "oil_paint"  # Extra effect run between material and compose
//! seed = 42                     # Omit for a fresh random seed per run
//!
//! [effect]
//! intensity = 0.8               # Blend of stylised result over the original (0-1)
//! detail = 0.5                  # How much fine structure survives (0-1)
//! stroke_length = 6             # Brush stroke length in pixels (>= 1)
//!
//! [color]
//! scheme = "natural"            # natural | warm | cool | monochrome | vivid
//! saturation = 1.0              # 0 = greyscale, 2 = double (0-2)
//!
//! [output]
//! format = "png"                # png | jpeg | webp | tiff
//! quality = 90                  # Lossy encoding quality (1-100)
//!
//! [stages.analysis]
//! mesh_density = 8              # Landmark grid points per side (2-64)
//! skin_threshold = 0.5          # Skin-tone likelihood cut-off (0-1)
//!
//! [stages.flow]
//! jitter = 0.15                 # Random angular jitter (0-1)
//! smoothing = 1.5               # Gaussian sigma applied to gradients (>= 0)
//!
//! [stages.material]
//! levels = 12                   # Palette quantisation levels (2-64)
//! relief = 0.35                 # Height-map shading strength (0-1)
//!
//! [stages.reconcile]
//! preserve_luminance = 0.5      # Pull mean luminance back to the source (0-1)
//!
//! [stages.refine]
//! sharpen = 0.6                 # Unsharp-mask amount (0-4)
//! sigma = 1.0                   # Unsharp-mask radius (> 0)
//!
//! [effects.spectral_shift]      # Free-form per-effect overrides
//! degrees = 45
//!
//! [presets.soft]                # Named overlay, selected with --preset soft
//! effect = { intensity = 0.4 }
//!
//! [processing]
//! max_processes = 4             # Worker pool size (omit for auto = CPU cores)
//! job_timeout_secs = 120        # Per-job wall-clock budget (omit for none)
//!
//! [plugins]
//! dir = "plugins"               # Directory scanned for effect manifests
//! ```
//!
//! Unknown keys are rejected to catch typos early. Out-of-range values are
//! rejected too; nothing is silently clamped at this layer.

use crate::effects;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default file name looked up when no explicit `--config` is given.
pub const CONFIG_FILENAME: &str = "brushwork.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),
}

/// Per-run style configuration.
///
/// All fields have defaults; user files only specify what they override.
/// Once constructed the value is treated as immutable: variations are made
/// through [`StyleConfig::with_seed`] and friends, which return deep copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StyleConfig {
    /// Effect resolved through the registry and run before composition.
    pub primary_effect: Option<String>,
    /// Random seed. `None` draws a fresh seed per transformation.
    pub seed: Option<u64>,
    pub effect: EffectParams,
    pub color: ColorConfig,
    pub output: OutputConfig,
    pub stages: StageParams,
    /// Per-effect settings tables, keyed by effect name.
    pub effects: BTreeMap<String, toml::Table>,
    /// Named overlays applied on top of the resolved config.
    pub presets: BTreeMap<String, toml::Table>,
    pub processing: ProcessingConfig,
    pub plugins: PluginsConfig,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            primary_effect: None,
            seed: None,
            effect: EffectParams::default(),
            color: ColorConfig::default(),
            output: OutputConfig::default(),
            stages: StageParams::default(),
            effects: BTreeMap::new(),
            presets: BTreeMap::new(),
            processing: ProcessingConfig::default(),
            plugins: PluginsConfig::default(),
        }
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Validation(format!(
            "{name} must be within 0-1 (got {value})"
        )));
    }
    Ok(())
}

impl StyleConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("effect.intensity", self.effect.intensity)?;
        check_unit("effect.detail", self.effect.detail)?;
        if self.effect.stroke_length == 0 {
            return Err(ConfigError::Validation(
                "effect.stroke_length must be at least 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.color.saturation) {
            return Err(ConfigError::Validation(
                "color.saturation must be within 0-2".into(),
            ));
        }
        if !(1..=100).contains(&self.output.quality) {
            return Err(ConfigError::Validation(
                "output.quality must be 1-100".into(),
            ));
        }
        if !(2..=64).contains(&self.stages.analysis.mesh_density) {
            return Err(ConfigError::Validation(
                "stages.analysis.mesh_density must be 2-64".into(),
            ));
        }
        check_unit(
            "stages.analysis.skin_threshold",
            self.stages.analysis.skin_threshold,
        )?;
        check_unit("stages.flow.jitter", self.stages.flow.jitter)?;
        if !(self.stages.flow.smoothing >= 0.0) {
            return Err(ConfigError::Validation(
                "stages.flow.smoothing must be non-negative".into(),
            ));
        }
        if !(2..=64).contains(&self.stages.material.levels) {
            return Err(ConfigError::Validation(
                "stages.material.levels must be 2-64".into(),
            ));
        }
        check_unit("stages.material.relief", self.stages.material.relief)?;
        check_unit(
            "stages.reconcile.preserve_luminance",
            self.stages.reconcile.preserve_luminance,
        )?;
        if !(0.0..=4.0).contains(&self.stages.refine.sharpen) {
            return Err(ConfigError::Validation(
                "stages.refine.sharpen must be within 0-4".into(),
            ));
        }
        if !(self.stages.refine.sigma > 0.0) {
            return Err(ConfigError::Validation(
                "stages.refine.sigma must be positive".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        if self.processing.job_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "processing.job_timeout_secs must be at least 1".into(),
            ));
        }
        if self
            .primary_effect
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "primary_effect must not be empty".into(),
            ));
        }
        // Plugin names are resolved later; only built-in tables are known here.
        for (name, table) in &self.effects {
            if let Some(entry) = effects::builtin(name) {
                (entry.build)(table).map_err(|e| {
                    ConfigError::Validation(format!("effects.{name}: {e}"))
                })?;
            }
        }
        Ok(())
    }

    /// Deep copy with a different seed.
    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self.clone()
        }
    }

    /// Deep copy naming a different primary effect.
    pub fn with_primary_effect(&self, name: impl Into<String>) -> Self {
        Self {
            primary_effect: Some(name.into()),
            ..self.clone()
        }
    }

    /// Apply the named preset overlay and re-validate.
    pub fn with_preset(&self, name: &str) -> Result<Self, ConfigError> {
        let overlay = self
            .presets
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))?;
        let base = toml::Value::try_from(self)?;
        let merged = merge_toml(base, toml::Value::Table(overlay));
        let config: StyleConfig = merged.try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Settings table for one effect, empty when the config has none.
    pub fn effect_settings(&self, name: &str) -> toml::Table {
        self.effects.get(name).cloned().unwrap_or_default()
    }

    /// Per-job wall-clock budget, if one is configured.
    pub fn job_timeout(&self) -> Option<Duration> {
        self.processing.job_timeout_secs.map(Duration::from_secs)
    }
}

/// Global effect strength settings shared by every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EffectParams {
    /// Blend of the stylised result over the original, 0-1.
    pub intensity: f32,
    /// How much fine structure survives stylisation, 0-1.
    pub detail: f32,
    /// Brush stroke length in pixels.
    pub stroke_length: u32,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            intensity: 0.8,
            detail: 0.5,
            stroke_length: 6,
        }
    }
}

/// Named color treatments applied while simulating the paint material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    #[default]
    Natural,
    Warm,
    Cool,
    Monochrome,
    Vivid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColorConfig {
    pub scheme: ColorScheme,
    /// Saturation multiplier, 0-2.
    pub saturation: f32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            scheme: ColorScheme::Natural,
            saturation: 1.0,
        }
    }
}

/// Encoded output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Tiff,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
            OutputFormat::Tiff => "tiff",
        }
    }

    /// Infer a format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "webp" => Some(OutputFormat::Webp),
            "tif" | "tiff" => Some(OutputFormat::Tiff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Lossy encoding quality, 1-100. Only JPEG honours it.
    pub quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Png,
            quality: 90,
        }
    }
}

/// Settings for the fixed pipeline stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageParams {
    pub analysis: AnalysisParams,
    pub flow: FlowParams,
    pub material: MaterialParams,
    pub reconcile: ReconcileParams,
    pub refine: RefineParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisParams {
    /// Landmark grid points per side of the detected region.
    pub mesh_density: u32,
    /// Skin-tone likelihood above which a pixel counts as part of a face.
    pub skin_threshold: f32,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            mesh_density: 8,
            skin_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowParams {
    /// Random angular jitter added to the edge-tangent field, 0-1.
    pub jitter: f32,
    /// Gaussian sigma applied to the luminance before taking gradients.
    pub smoothing: f32,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            jitter: 0.15,
            smoothing: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaterialParams {
    /// Palette quantisation levels per channel.
    pub levels: u32,
    /// Height-map shading strength, 0-1.
    pub relief: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            levels: 12,
            relief: 0.35,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileParams {
    /// How strongly mean luminance is pulled back to the source, 0-1.
    pub preserve_luminance: f32,
}

impl Default for ReconcileParams {
    fn default() -> Self {
        Self {
            preserve_luminance: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefineParams {
    /// Unsharp-mask amount, 0-4.
    pub sharpen: f32,
    /// Unsharp-mask blur radius.
    pub sigma: f32,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            sharpen: 0.6,
            sigma: 1.0,
        }
    }
}

/// Batch worker settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel batch workers.
    /// When absent, defaults to the number of CPU cores.
    pub max_processes: Option<usize>,
    /// Wall-clock budget per batch job, in seconds.
    pub job_timeout_secs: Option<u64>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginsConfig {
    /// Directory scanned for effect plugin manifests.
    pub dir: Option<PathBuf>,
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(StyleConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, apply an optional preset,
/// then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
    preset: Option<&str>,
) -> Result<StyleConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: StyleConfig = merged.try_into()?;
    config.validate()?;
    match preset {
        Some(name) => config.with_preset(name),
        None => Ok(config),
    }
}

/// Load config from a file, layering it over the stock defaults.
///
/// A missing file yields the defaults (with the preset still applied).
pub fn load_config(path: &Path, preset: Option<&str>) -> Result<StyleConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay, preset)
}

/// Returns a fully-commented stock `brushwork.toml` with all keys explained.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Brushwork Configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys and out-of-range values cause an error.

# Effect looked up in the registry and run between material simulation and
# composition. Unknown names fall back to "oil_paint".
# primary_effect = "oil_paint"

# Random seed. Omit for a fresh seed on every run.
# seed = 42

# ---------------------------------------------------------------------------
# Global effect strength
# ---------------------------------------------------------------------------
[effect]
# Blend of the stylised result over the original (0-1).
intensity = 0.8
# How much fine structure survives (0-1).
detail = 0.5
# Brush stroke length in pixels (>= 1).
stroke_length = 6

# ---------------------------------------------------------------------------
# Color
# ---------------------------------------------------------------------------
[color]
# natural | warm | cool | monochrome | vivid
scheme = "natural"
# Saturation multiplier (0-2).
saturation = 1.0

# ---------------------------------------------------------------------------
# Output encoding
# ---------------------------------------------------------------------------
[output]
# png | jpeg | webp | tiff
format = "png"
# Lossy encoding quality (1-100). Only used for JPEG.
quality = 90

# ---------------------------------------------------------------------------
# Pipeline stages
# ---------------------------------------------------------------------------
[stages.analysis]
# Landmark grid points per side of the detected face region (2-64).
mesh_density = 8
# Skin-tone likelihood cut-off (0-1).
skin_threshold = 0.5

[stages.flow]
# Random angular jitter of the stroke direction field (0-1).
jitter = 0.15
# Gaussian sigma applied before taking gradients (>= 0).
smoothing = 1.5

[stages.material]
# Palette quantisation levels (2-64).
levels = 12
# Height-map shading strength (0-1).
relief = 0.35

[stages.reconcile]
# Pull mean luminance back towards the source image (0-1).
preserve_luminance = 0.5

[stages.refine]
# Unsharp-mask amount (0-4).
sharpen = 0.6
# Unsharp-mask radius (> 0).
sigma = 1.0

# ---------------------------------------------------------------------------
# Per-effect settings, keyed by effect name
# ---------------------------------------------------------------------------
[effects]
# [effects.spectral_shift]
# degrees = 45

# ---------------------------------------------------------------------------
# Presets: named overlays selected with --preset
# ---------------------------------------------------------------------------
[presets]
# [presets.soft]
# effect = { intensity = 0.4 }

# ---------------------------------------------------------------------------
# Batch processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers. Omit to auto-detect (= number of CPU cores).
# max_processes = 4
# Per-job wall-clock budget in seconds. Omit for no limit.
# job_timeout_secs = 120

# ---------------------------------------------------------------------------
# Plugins
# ---------------------------------------------------------------------------
[plugins]
# Directory scanned for effect manifests (*.toml).
# dir = "plugins"
"##
}
