//! The six built-in pipeline stages.
//!
//! | Stage | Capability | Reads | Writes |
//! |---|---|---|---|
//! | [`AnalysisStage`] | analyze | original | `face_mesh`, `face_detected` |
//! | [`FlowStage`] | generate | original, `face_mesh` | `flow_field` |
//! | [`MaterialStage`] | simulate | original, `flow_field` | `material_diffuse`, `material_height` |
//! | [`ComposeStage`] | compose | primary effect → diffuse → original, `material_height` | `composed_image` |
//! | [`ReconcileStage`] | reconcile | composed → diffuse → original | `reconciled_image`, `non_finite_replaced` |
//! | [`RefineStage`] | refine | reconciled → composed → … → original | `refined_image` |
//!
//! Each stage holds only the slice of [`StyleConfig`] it needs, copied at
//! construction, and is reused across transformations.

mod analyze;
mod compose;
mod flow;
mod material;
mod reconcile;
mod refine;

pub use analyze::AnalysisStage;
pub use compose::ComposeStage;
pub use flow::FlowStage;
pub use material::MaterialStage;
pub use reconcile::ReconcileStage;
pub use refine::RefineStage;

use crate::config::StyleConfig;
use crate::stage::Stage;

/// Construct the standard stage sequence in [`Capability::ORDER`](crate::stage::Capability::ORDER).
pub fn standard_stages(config: &StyleConfig) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(AnalysisStage::new(config.stages.analysis.clone())),
        Box::new(FlowStage::new(config.stages.flow.clone(), config.effect.detail)),
        Box::new(MaterialStage::new(
            config.stages.material.clone(),
            config.color.clone(),
            config.effect.clone(),
        )),
        Box::new(ComposeStage::new(
            config.effect.intensity,
            config.stages.material.relief,
        )),
        Box::new(ReconcileStage::new(config.stages.reconcile.clone())),
        Box::new(RefineStage::new(
            config.stages.refine.clone(),
            config.effect.detail,
        )),
    ]
}
