//! The transformation pipeline.
//!
//! A [`Pipeline`] runs the fixed stage sequence over a fresh
//! [`ArtifactStore`] for each call to [`Pipeline::transform`]:
//!
//! ```text
//! analyze → flow → material → [primary effect] → compose → reconcile → refine
//! ```
//!
//! ## Failure containment
//!
//! Each stage (and the primary effect) runs inside `catch_unwind`. An `Err`
//! or a panic is logged at `warn`, recorded as `<stage>_failed` /
//! `<stage>_error` in the store, and the run continues; later stages resolve
//! their inputs through fallback chains. The only hard failures are an
//! invalid configuration, an unavailable device (at construction), and an
//! empty input image.
//!
//! ## Determinism
//!
//! Every run owns a `StdRng` seeded from, in order of precedence: the
//! `variation_seed` argument, `config.seed`, or fresh OS entropy. The same
//! image, config and seed produce identical output regardless of what other
//! pipelines are doing concurrently.
//!
//! ## Intermediates
//!
//! With `want_intermediates`, each stage's visualization is captured under
//! its key (`face_mesh`, `flow_field`, `material_map`, `primary_effect`,
//! `composed`, `refined`). Visualizations are rendered from the store after
//! the stage's delta is merged and are never written back into it.

use crate::basic::BasicEffects;
use crate::config::{ConfigError, StyleConfig};
use crate::effect::Effect;
use crate::effects::{DEFAULT_EFFECT, OilPaint};
use crate::imaging::ops::sanitize_image;
use crate::registry::EffectRegistry;
use crate::stage::{Capability, Stage, WORKING_IMAGE_CHAIN, resolve_input};
use crate::stages::standard_stages;
use crate::store::{Artifact, ArtifactKey, ArtifactStore};
use image::Rgb32FImage;
use rand::SeedableRng;
use rand::rngs::StdRng;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Sentinel name used when the primary effect fails.
pub const PRIMARY_EFFECT_STAGE: &str = "primary_effect";

/// Compute device hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
}

impl Device {
    /// Whether this build can run the full pipeline on the device.
    pub fn is_available(self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Cpu => "cpu",
            Device::Gpu => "gpu",
        })
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "gpu" => Ok(Device::Gpu),
            other => Err(format!("unknown device '{other}' (expected cpu or gpu)")),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Compute device unavailable: {0}")]
    DeviceUnavailable(Device),
    #[error("Input image is empty")]
    EmptyInput,
    #[error("Effect '{effect}' failed: {message}")]
    Effect { effect: String, message: String },
}

/// Visualizations keyed by stage.
pub type Intermediates = BTreeMap<String, Rgb32FImage>;

/// Result of one transformation.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub image: Rgb32FImage,
    /// Seed the run actually used.
    pub seed: u64,
    /// Present only when intermediates were requested.
    pub intermediates: Option<Intermediates>,
    /// The run's store, retained only when intermediates were requested.
    pub store: Option<ArtifactStore>,
}

/// Anything that can turn one image into a stylised one.
pub trait Transformer: Send + Sync {
    /// Short label for logs and status lines.
    fn label(&self) -> &str;

    fn transform_image(
        &self,
        image: &Rgb32FImage,
        seed: Option<u64>,
    ) -> Result<Rgb32FImage, PipelineError>;
}

/// The full staged pipeline.
pub struct Pipeline {
    config: StyleConfig,
    device: Device,
    registry: Arc<EffectRegistry>,
    stages: Vec<Box<dyn Stage>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("device", &self.device)
            .field("stages", &self.stage_names())
            .field("primary_effect", &self.config.primary_effect)
            .finish()
    }
}

impl Pipeline {
    /// Validate the config and build every stage once.
    ///
    /// The registry is built from the config (built-ins, effect settings,
    /// plugin directory).
    pub fn new(config: StyleConfig, device: Device) -> Result<Self, PipelineError> {
        let (registry, _) = EffectRegistry::from_config(&config);
        Self::with_registry(config, device, Arc::new(registry))
    }

    /// Like [`new`](Self::new) but sharing an existing registry.
    pub fn with_registry(
        config: StyleConfig,
        device: Device,
        registry: Arc<EffectRegistry>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if !device.is_available() {
            return Err(PipelineError::DeviceUnavailable(device));
        }
        let stages = standard_stages(&config);
        Ok(Self {
            config,
            device,
            registry,
            stages,
        })
    }

    pub fn config(&self) -> &StyleConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn registry(&self) -> &Arc<EffectRegistry> {
        &self.registry
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Swap in a custom stage for the one with the same capability.
    pub fn replace_stage(&mut self, stage: Box<dyn Stage>) {
        let capability = stage.capability();
        match self
            .stages
            .iter_mut()
            .find(|s| s.capability() == capability)
        {
            Some(slot) => *slot = stage,
            None => self.stages.push(stage),
        }
        self.stages.sort_by_key(|s| s.capability());
    }

    fn resolve_seed(&self, variation_seed: Option<u64>) -> u64 {
        variation_seed
            .or(self.config.seed)
            .unwrap_or_else(rand::random)
    }

    /// Run every stage and extract the final image.
    pub fn transform(
        &self,
        image: &Rgb32FImage,
        variation_seed: Option<u64>,
        want_intermediates: bool,
    ) -> Result<Transformed, PipelineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PipelineError::EmptyInput);
        }
        let seed = self.resolve_seed(variation_seed);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut intermediates = want_intermediates.then(Intermediates::new);

        let mut store = ArtifactStore::new();
        store.insert(ArtifactKey::OriginalImage, Artifact::Image(image.clone()));
        store.insert(ArtifactKey::RunSeed, Artifact::Seed(seed));

        for stage in &self.stages {
            self.run_stage(stage.as_ref(), image, &mut store, &mut rng, intermediates.as_mut());
            if stage.capability() == Capability::Simulate {
                self.run_primary_effect(image, &mut store, intermediates.as_mut());
            }
        }

        let mut final_image = resolve_input(&store, WORKING_IMAGE_CHAIN, image).clone();
        sanitize_image(&mut final_image);
        store.insert(ArtifactKey::FinalImage, Artifact::Image(final_image.clone()));

        for (stage, reason) in store.failures() {
            debug!(stage = %stage, reason = %reason, "run finished with failed stage");
        }

        Ok(Transformed {
            image: final_image,
            seed,
            intermediates,
            store: want_intermediates.then_some(store),
        })
    }

    fn run_stage(
        &self,
        stage: &dyn Stage,
        image: &Rgb32FImage,
        store: &mut ArtifactStore,
        rng: &mut StdRng,
        intermediates: Option<&mut Intermediates>,
    ) {
        let name = stage.name();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| stage.run(image, store, rng)));
        match outcome {
            Ok(Ok(delta)) => store.merge(delta),
            Ok(Err(e)) => {
                warn!(stage = name, error = %e, "stage failed; continuing with fallbacks");
                store.mark_failed(name, e.to_string());
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(stage = name, error = %message, "stage panicked; continuing with fallbacks");
                store.mark_failed(name, format!("panicked: {message}"));
            }
        }

        if let (Some(out), Some(key)) = (intermediates, stage.visualization_key()) {
            let rendered =
                panic::catch_unwind(AssertUnwindSafe(|| stage.visualize(image, store)));
            if let Ok(Some(vis)) = rendered {
                out.insert(key.to_string(), vis);
            }
        }
    }

    /// Resolve the configured effect, substituting the default when the
    /// name is unknown or its factory fails.
    fn resolve_effect(&self, name: &str) -> Arc<dyn Effect> {
        if let Some(effect) = self.registry.get(name) {
            return effect;
        }
        warn!(requested = name, fallback = DEFAULT_EFFECT, "effect not found; using default");
        self.registry
            .get(DEFAULT_EFFECT)
            .unwrap_or_else(|| Arc::new(OilPaint::default()))
    }

    fn run_primary_effect(
        &self,
        image: &Rgb32FImage,
        store: &mut ArtifactStore,
        intermediates: Option<&mut Intermediates>,
    ) {
        let Some(name) = self.config.primary_effect.as_deref() else {
            return;
        };
        let effect = self.resolve_effect(name);
        store.insert(
            ArtifactKey::PrimaryEffectName,
            Artifact::Text(effect.name().to_string()),
        );

        let input = resolve_input(
            store,
            &[ArtifactKey::MaterialDiffuse, ArtifactKey::OriginalImage],
            image,
        );
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| effect.apply(input, store)));
        match outcome {
            Ok(Ok(delta)) => store.merge(delta),
            Ok(Err(e)) => {
                warn!(effect = effect.name(), error = %e, "primary effect failed");
                store.mark_failed(PRIMARY_EFFECT_STAGE, e.to_string());
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(effect = effect.name(), error = %message, "primary effect panicked");
                store.mark_failed(PRIMARY_EFFECT_STAGE, format!("panicked: {message}"));
            }
        }

        if let Some(out) = intermediates {
            let rendered = panic::catch_unwind(AssertUnwindSafe(|| effect.visualize(store)));
            if let Ok(Some(vis)) = rendered {
                out.insert(PRIMARY_EFFECT_STAGE.to_string(), vis);
            }
        }
    }
}

impl Transformer for Pipeline {
    fn label(&self) -> &str {
        "pipeline"
    }

    fn transform_image(
        &self,
        image: &Rgb32FImage,
        seed: Option<u64>,
    ) -> Result<Rgb32FImage, PipelineError> {
        Ok(self.transform(image, seed, false)?.image)
    }
}

/// Build the full pipeline, or the basic effect set when the requested
/// device is unavailable. Configuration errors are still fatal.
pub fn select_transformer(
    config: StyleConfig,
    device: Device,
    registry: Arc<EffectRegistry>,
) -> Result<Box<dyn Transformer>, PipelineError> {
    match Pipeline::with_registry(config.clone(), device, registry) {
        Ok(pipeline) => Ok(Box::new(pipeline)),
        Err(PipelineError::DeviceUnavailable(device)) => {
            warn!(%device, "advanced pipeline unavailable; using basic effects");
            Ok(Box::new(BasicEffects::new(config)))
        }
        Err(e) => Err(e),
    }
}

/// Seed for variation `index`, derived from `base` with SHA-256.
pub fn variation_seed(base: u64, index: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(base.to_le_bytes());
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
