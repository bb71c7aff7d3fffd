//! End-to-end pipeline behaviour through the public library API.

use brushwork::config::StyleConfig;
use brushwork::effects::DEFAULT_EFFECT;
use brushwork::imaging::ops::is_normalized;
use brushwork::pipeline::{Device, Pipeline, select_transformer};
use brushwork::registry::EffectRegistry;
use brushwork::stage::{Capability, Stage, StageError};
use brushwork::store::{Artifact, ArtifactKey, ArtifactStore, StoreDelta};
use image::{Rgb, Rgb32FImage};
use rand::rngs::StdRng;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn portrait(width: u32, height: u32) -> Rgb32FImage {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let (rx, ry) = (width as f32 / 4.0, height as f32 / 3.0);
    Rgb32FImage::from_fn(width, height, |x, y| {
        let dx = (x as f32 + 0.5 - cx) / rx;
        let dy = (y as f32 + 0.5 - cy) / ry;
        if dx * dx + dy * dy <= 1.0 {
            Rgb([0.87, 0.63, 0.5])
        } else {
            Rgb([0.2, 0.3, 0.6 + 0.01 * (x % 7) as f32])
        }
    })
}

struct BrokenAnalysis;

impl Stage for BrokenAnalysis {
    fn name(&self) -> &'static str {
        "analysis"
    }

    fn capability(&self) -> Capability {
        Capability::Analyze
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
        Err(StageError::Failed("landmark model missing".into()))
    }
}

struct UnstableCompose;

impl Stage for UnstableCompose {
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
        let poisoned = Rgb32FImage::from_fn(image.width(), image.height(), |x, _| match x % 3 {
            0 => Rgb([f32::NAN, 0.5, 0.5]),
            1 => Rgb([f32::INFINITY, f32::NEG_INFINITY, 0.5]),
            _ => Rgb([3.0, -2.0, 0.25]),
        });
        Ok(StoreDelta::new().with(ArtifactKey::ComposedImage, Artifact::Image(poisoned)))
    }
}

#[test]
fn same_seed_same_bytes() {
    let img = portrait(32, 24);
    let pipeline = Pipeline::new(StyleConfig::default(), Device::Cpu).unwrap();
    let a = pipeline.transform(&img, Some(42), false).unwrap();
    let b = pipeline.transform(&img, Some(42), false).unwrap();
    assert_eq!(a.image, b.image);
    assert_eq!(a.seed, 42);
}

#[test]
fn config_seed_matches_explicit_seed() {
    let img = portrait(24, 24);
    let seeded = Pipeline::new(StyleConfig::default().with_seed(9), Device::Cpu).unwrap();
    let plain = Pipeline::new(StyleConfig::default(), Device::Cpu).unwrap();
    assert_eq!(
        seeded.transform(&img, None, false).unwrap().image,
        plain.transform(&img, Some(9), false).unwrap().image
    );
}

#[test]
fn separate_pipelines_agree_across_threads() {
    let img = Arc::new(portrait(24, 20));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let img = Arc::clone(&img);
            std::thread::spawn(move || {
                let config = StyleConfig::default().with_primary_effect("watercolor");
                Pipeline::new(config, Device::Cpu)
                    .unwrap()
                    .transform(&img, Some(77), false)
                    .unwrap()
                    .image
            })
        })
        .collect();
    let results: Vec<Rgb32FImage> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn failed_analysis_still_produces_image() {
    let img = portrait(20, 20);
    let mut pipeline = Pipeline::new(StyleConfig::default(), Device::Cpu).unwrap();
    pipeline.replace_stage(Box::new(BrokenAnalysis));

    let out = pipeline.transform(&img, Some(1), true).unwrap();
    assert_eq!(out.image.dimensions(), img.dimensions());
    let store = out.store.unwrap();
    assert!(store.has_failed("analysis"));
    assert!(!store.contains(&ArtifactKey::FaceMesh));
}

#[test]
fn non_finite_compose_output_is_sanitised() {
    let img = portrait(18, 12);
    let mut pipeline = Pipeline::new(StyleConfig::default(), Device::Cpu).unwrap();
    pipeline.replace_stage(Box::new(UnstableCompose));

    let out = pipeline.transform(&img, Some(5), false).unwrap();
    assert!(out.image.pixels().all(|p| p.0.iter().all(|c| c.is_finite())));
    assert!(is_normalized(&out.image));
}

#[test]
fn spectral_shift_primary_effect_is_visualized() {
    let config = StyleConfig::default().with_primary_effect("spectral_shift");
    let pipeline = Pipeline::new(config, Device::Cpu).unwrap();
    let out = pipeline.transform(&portrait(16, 16), Some(3), true).unwrap();

    let intermediates = out.intermediates.unwrap();
    assert!(intermediates.contains_key("primary_effect"));
    for key in ["face_mesh", "flow_field", "material_map", "composed", "refined"] {
        assert!(intermediates.contains_key(key), "missing {key}");
    }
}

#[test]
fn unknown_effect_falls_back_to_default() {
    let config = StyleConfig::default().with_primary_effect("nonexistent");
    let registry = EffectRegistry::builtin();
    assert!(registry.get("nonexistent").is_none());

    let pipeline = Pipeline::with_registry(config, Device::Cpu, Arc::new(registry)).unwrap();
    let out = pipeline.transform(&portrait(16, 16), Some(3), true).unwrap();
    assert_eq!(
        out.store.unwrap().text(&ArtifactKey::PrimaryEffectName),
        Some(DEFAULT_EFFECT)
    );
}

#[test]
fn plugin_effect_runs_as_primary() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("negative.toml"),
        "description = \"Inverted colours\"\n\n[[ops]]\nkind = \"invert\"\n",
    )
    .unwrap();
    fs::write(tmp.path().join("garbage.toml"), "this is = = not toml").unwrap();

    let mut config = StyleConfig::default().with_primary_effect("negative");
    config.plugins.dir = Some(tmp.path().to_path_buf());
    let (registry, report) = EffectRegistry::from_config(&config);
    let report = report.unwrap();
    assert_eq!(report.loaded, vec!["negative"]);
    assert_eq!(report.skipped.len(), 1);

    let registry = Arc::new(registry);
    assert!(Arc::ptr_eq(
        &registry.get("negative").unwrap(),
        &registry.get("negative").unwrap()
    ));
    let pipeline = Pipeline::with_registry(config, Device::Cpu, registry).unwrap();
    let out = pipeline.transform(&portrait(16, 16), Some(3), true).unwrap();
    let store = out.store.unwrap();
    assert_eq!(store.text(&ArtifactKey::PrimaryEffectName), Some("negative"));
    assert!(store.failures().is_empty());
}

#[test]
fn gpu_request_falls_back_to_basic_effects() {
    let config = StyleConfig::default().with_primary_effect("posterize");
    let transformer =
        select_transformer(config, Device::Gpu, Arc::new(EffectRegistry::builtin())).unwrap();
    assert_eq!(transformer.label(), "basic");
    let out = transformer.transform_image(&portrait(12, 12), None).unwrap();
    assert!(is_normalized(&out));
}

#[test]
fn out_of_range_effect_settings_are_fatal_at_construction() {
    let mut config = StyleConfig::default().with_primary_effect("posterize");
    config
        .effects
        .insert("posterize".into(), toml::from_str("levels = 100").unwrap());

    assert!(Pipeline::new(config.clone(), Device::Cpu).is_err());
    assert!(
        select_transformer(config, Device::Gpu, Arc::new(EffectRegistry::builtin())).is_err()
    );
}
