//! # Brushwork
//!
//! An artistic image transformation engine. A photo goes in; a painted,
//! sketched, or otherwise stylised version of it comes out.
//!
//! # Architecture: Staged Pipeline
//!
//! A single transformation threads an [`store::ArtifactStore`] through a
//! fixed sequence of stages, each reading what earlier stages produced:
//!
//! ```text
//! analyze → flow → material → (primary effect) → compose → reconcile → refine
//!    │        │        │              │               │          │          │
//! face_mesh  flow_  material_    primary_effect_  composed_  reconciled_  refined_
//!            field  diffuse        image           image      image       image
//! ```
//!
//! A stage that fails (or panics) is recorded in the store as
//! `<stage>_failed` and the run continues; later stages resolve their input
//! through a fallback chain that ends at the original image. The pipeline
//! only errors when there is no image to work on at all.
//!
//! The optional primary effect is looked up by name in an
//! [`registry::EffectRegistry`], which holds the built-in catalog plus any
//! plugin manifests found in the configured directory. Unknown names fall
//! back to [`effects::DEFAULT_EFFECT`].
//!
//! On top of the pipeline, [`batch`] runs whole directories on a worker pool
//! with per-job fault isolation, and [`basic`] provides single-pass effects
//! for builds where the full pipeline cannot run on the requested device.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `brushwork.toml` loading, presets, validation, stock config |
//! | [`store`] | Typed artifact keys and values threaded through a run |
//! | [`stage`] | The `Stage` contract and input fallback chains |
//! | [`stages`] | The six standard stages |
//! | [`effect`] | The `Effect` contract and settings helpers |
//! | [`effects`] | Built-in effect catalog |
//! | [`plugin`] | TOML plugin manifests |
//! | [`registry`] | Name → effect resolution with cached instances |
//! | [`pipeline`] | Stage sequencing, seeding, failure containment |
//! | [`basic`] | Fallback effect set |
//! | [`batch`] | Directory runs: discovery, worker pool, progress, console |
//! | [`imaging`] | Decode/encode and float image primitives |
//! | [`output`] | CLI output formatting |
//!
//! # Determinism
//!
//! Every run owns a `StdRng` seeded from, in order of precedence, the
//! caller's variation seed, `seed` in the config, or OS entropy. The seed is
//! stored in the artifact store, so two runs with the same image, config and
//! seed produce identical bytes regardless of what else runs in the process.

pub mod basic;
pub mod batch;
pub mod config;
pub mod effect;
pub mod effects;
pub mod imaging;
pub mod output;
pub mod pipeline;
pub mod plugin;
pub mod registry;
pub mod stage;
pub mod stages;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;
