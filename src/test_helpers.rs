//! Shared fixtures for the unit tests.
//!
//! Synthetic images (no fixture files on disk), a seeded RNG, and test
//! doubles for the three failure boundaries: stages, effects, and batch job
//! runners.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let img = portrait_image(32, 24);
//! let mut pipeline = Pipeline::new(StyleConfig::default(), Device::Cpu).unwrap();
//! pipeline.replace_stage(Box::new(FailingStage::new(Capability::Analyze, "analysis")));
//! ```

use crate::batch::{BatchJob, JobError, JobRunner};
use crate::effect::{Effect, EffectError};
use crate::stage::{Capability, Stage, StageError};
use crate::store::{Artifact, ArtifactKey, ArtifactStore, StoreDelta};
use image::{Rgb, Rgb32FImage, RgbImage};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

// =========================================================================
// Synthetic images
// =========================================================================

/// Greyscale ramp, brighter to the right and slightly brighter downwards.
pub fn gradient_image(width: u32, height: u32) -> Rgb32FImage {
    let wx = width.saturating_sub(1).max(1) as f32;
    let hy = height.saturating_sub(1).max(1) as f32;
    Rgb32FImage::from_fn(width, height, |x, y| {
        let v = 0.8 * x as f32 / wx + 0.2 * y as f32 / hy;
        Rgb([v, v, v])
    })
}

pub fn solid_image(width: u32, height: u32, color: [f32; 3]) -> Rgb32FImage {
    Rgb32FImage::from_pixel(width, height, Rgb(color))
}

/// A skin-toned ellipse centred on a blue background.
pub fn portrait_image(width: u32, height: u32) -> Rgb32FImage {
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let rx = (width as f32 / 4.0).max(1.0);
    let ry = (height as f32 / 3.0).max(1.0);
    Rgb32FImage::from_fn(width, height, |x, y| {
        let dx = (x as f32 + 0.5 - cx) / rx;
        let dy = (y as f32 + 0.5 - cy) / ry;
        if dx * dx + dy * dy <= 1.0 {
            Rgb([0.87, 0.63, 0.5])
        } else {
            Rgb([0.2, 0.3, 0.6])
        }
    })
}

/// Mid-grey with NaN/Inf at (0, 0) and out-of-range values at (1, 0).
pub fn poisoned_image(width: u32, height: u32) -> Rgb32FImage {
    let mut img = solid_image(width, height, [0.5; 3]);
    img.put_pixel(0, 0, Rgb([f32::NAN, f32::INFINITY, f32::NEG_INFINITY]));
    if width > 1 {
        img.put_pixel(1, 0, Rgb([2.0, -1.0, 0.5]));
    }
    img
}

pub fn test_rng() -> StdRng {
    StdRng::seed_from_u64(7)
}

// =========================================================================
// Filesystem fixtures
// =========================================================================

/// Write `<name>.toml` into `dir` and return its path.
pub fn write_plugin(dir: &Path, name: &str, content: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{name}.toml"));
    fs::write(&path, content).unwrap();
    path
}

/// Write `count` small PNGs named `image_000.png`, `image_001.png`, ...
pub fn write_test_images(dir: &Path, count: usize) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    (0..count)
        .map(|i| {
            let shift = (i * 37 % 256) as u8;
            let img = RgbImage::from_fn(16, 12, |x, y| {
                Rgb([
                    (x * 15) as u8,
                    (y * 20) as u8,
                    shift.wrapping_add((x * y) as u8),
                ])
            });
            let path = dir.join(format!("image_{i:03}.png"));
            img.save(&path).unwrap();
            path
        })
        .collect()
}

// =========================================================================
// Stage doubles
// =========================================================================

/// Returns `StageError::Failed("synthetic failure")` every time.
pub struct FailingStage {
    capability: Capability,
    name: &'static str,
}

impl FailingStage {
    pub fn new(capability: Capability, name: &'static str) -> Self {
        Self { capability, name }
    }
}

impl Stage for FailingStage {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn reads(&self) -> &'static [ArtifactKey] {
        &[]
    }

    fn writes(&self) -> &'static [ArtifactKey] {
        &[]
    }

    fn run(
        &self,
        _image: &Rgb32FImage,
        _store: &ArtifactStore,
        _rng: &mut StdRng,
    ) -> Result<StoreDelta, StageError> {
        Err(StageError::Failed("synthetic failure".into()))
    }
}

/// Panics instead of returning.
pub struct PanickingStage {
    capability: Capability,
    name: &'static str,
}

impl PanickingStage {
    pub fn new(capability: Capability, name: &'static str) -> Self {
        Self { capability, name }
    }
}

impl Stage for PanickingStage {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn reads(&self) -> &'static [ArtifactKey] {
        &[]
    }

    fn writes(&self) -> &'static [ArtifactKey] {
        &[]
    }

    fn run(
        &self,
        _image: &Rgb32FImage,
        _store: &ArtifactStore,
        _rng: &mut StdRng,
    ) -> Result<StoreDelta, StageError> {
        panic!("stage blew up");
    }
}

/// A compose stage whose output is full of NaN and Inf.
pub struct NonFiniteStage;

impl Stage for NonFiniteStage {
    fn name(&self) -> &'static str {
        "compose"
    }

    fn capability(&self) -> Capability {
        Capability::Compose
    }

    fn reads(&self) -> &'static [ArtifactKey] {
        &[]
    }

    fn writes(&self) -> &'static [ArtifactKey] {
        &[ArtifactKey::ComposedImage]
    }

    fn run(
        &self,
        image: &Rgb32FImage,
        _store: &ArtifactStore,
        _rng: &mut StdRng,
    ) -> Result<StoreDelta, StageError> {
        let poisoned = poisoned_image(image.width(), image.height());
        Ok(StoreDelta::new().with(ArtifactKey::ComposedImage, Artifact::Image(poisoned)))
    }
}

// =========================================================================
// Effect doubles
// =========================================================================

/// Always fails in `apply`.
pub struct FailingEffect;

impl Effect for FailingEffect {
    fn name(&self) -> &str {
        "failing"
    }

    fn apply(&self, _image: &Rgb32FImage, _store: &ArtifactStore) -> Result<StoreDelta, EffectError> {
        Err(EffectError::Failed {
            effect: "failing".into(),
            message: "synthetic failure".into(),
        })
    }
}

// =========================================================================
// Job runner doubles
// =========================================================================

/// Panics on every job.
pub struct PanickingRunner;

impl JobRunner for PanickingRunner {
    fn run(&self, _job: &BatchJob, _deadline: Option<Instant>) -> Result<PathBuf, JobError> {
        panic!("runner exploded");
    }
}

/// Sleeps, then honours the deadline like the in-process runner does.
pub struct SleepyRunner(pub Duration);

impl JobRunner for SleepyRunner {
    fn run(&self, job: &BatchJob, deadline: Option<Instant>) -> Result<PathBuf, JobError> {
        thread::sleep(self.0);
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(JobError::Timeout);
        }
        Ok(job.output_path.clone())
    }
}
