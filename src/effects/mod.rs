//! Built-in effect catalog.
//!
//! | Name | Effect | Settings (`[effects.<name>]`) |
//! |---|---|---|
//! | `oil_paint` | Kuwahara smoothing + palette quantisation | `radius`, `levels` |
//! | `watercolor` | Soft wash, darkened edges, paper granulation | `sigma`, `edge_darkening`, `granulation`, `saturation` |
//! | `pencil_sketch` | Colour-dodge graphite sketch | `sigma`, `strength` |
//! | `posterize` | Per-channel quantisation | `levels` |
//! | `spectral_shift` | Hue rotation with saturation boost | `degrees`, `saturation` |
//! | `vignette` | Radial darkening | `strength`, `radius` |
//! | `grain` | Seeded film grain | `amount`, `monochrome` |
//!
//! `oil_paint` is the default: the pipeline substitutes it whenever a named
//! primary effect cannot be resolved.

mod painterly;
mod texture;
mod tonal;

pub use painterly::{OilPaint, Watercolor};
pub use texture::{Grain, PencilSketch};
pub use tonal::{Posterize, SpectralShift, Vignette};

use crate::effect::{Effect, EffectError, FromSettings};

/// Name of the effect used when a requested one cannot be resolved.
pub const DEFAULT_EFFECT: &str = "oil_paint";

/// Constructor for a built-in effect from its settings table.
pub type BuiltinConstructor = fn(&toml::Table) -> Result<Box<dyn Effect>, EffectError>;

/// One entry of the built-in catalog.
#[derive(Clone, Copy)]
pub struct BuiltinEffect {
    pub name: &'static str,
    pub description: &'static str,
    pub build: BuiltinConstructor,
}

pub const BUILTIN_EFFECTS: &[BuiltinEffect] = &[
    BuiltinEffect {
        name: "oil_paint",
        description: "Kuwahara smoothing with palette quantisation",
        build: construct::<OilPaint>,
    },
    BuiltinEffect {
        name: "watercolor",
        description: "Soft wash with darkened edges and paper granulation",
        build: construct::<Watercolor>,
    },
    BuiltinEffect {
        name: "pencil_sketch",
        description: "Colour-dodge graphite sketch",
        build: construct::<PencilSketch>,
    },
    BuiltinEffect {
        name: "posterize",
        description: "Per-channel colour quantisation",
        build: construct::<Posterize>,
    },
    BuiltinEffect {
        name: "spectral_shift",
        description: "Hue rotation with a saturation boost",
        build: construct::<SpectralShift>,
    },
    BuiltinEffect {
        name: "vignette",
        description: "Radial darkening towards the corners",
        build: construct::<Vignette>,
    },
    BuiltinEffect {
        name: "grain",
        description: "Seeded film grain",
        build: construct::<Grain>,
    },
];

fn construct<E: Effect + FromSettings + 'static>(
    settings: &toml::Table,
) -> Result<Box<dyn Effect>, EffectError> {
    Ok(Box::new(E::from_settings(settings)?))
}

pub fn builtin(name: &str) -> Option<&'static BuiltinEffect> {
    BUILTIN_EFFECTS.iter().find(|e| e.name == name)
}
