use crate::config::FlowParams;
use crate::imaging::calculations::hsv_to_rgb;
use crate::imaging::ops::{luminance_map, sobel};
use crate::stage::{Capability, Stage, StageError};
use crate::store::{Artifact, ArtifactKey, ArtifactStore, FlowField, StoreDelta};
use image::{Rgb, Rgb32FImage, imageops};
use rand::Rng;
use rand::rngs::StdRng;
use std::f32::consts::FRAC_PI_2;

/// Gradient magnitude below which a pixel is considered flat.
const FLAT_THRESHOLD: f32 = 1e-3;

/// Derives a brush-stroke direction field from the image's edge structure.
///
/// Strokes run along edges (perpendicular to the luminance gradient). Flat
/// areas default to horizontal strokes. A seeded angular jitter keeps the
/// result from looking mechanical; jitter is halved inside a detected face.
#[derive(Debug, Clone)]
pub struct FlowStage {
    params: FlowParams,
    detail: f32,
}

impl FlowStage {
    pub fn new(params: FlowParams, detail: f32) -> Self {
        Self { params, detail }
    }
}

impl Stage for FlowStage {
    fn name(&self) -> &'static str {
        "flow"
    }

    fn capability(&self) -> Capability {
        Capability::Generate
    }

    fn reads(&self) -> &'static [ArtifactKey] {
        &[ArtifactKey::OriginalImage, ArtifactKey::FaceMesh]
    }

    fn writes(&self) -> &'static [ArtifactKey] {
        &[ArtifactKey::FlowField]
    }

    fn run(
        &self,
        image: &Rgb32FImage,
        store: &ArtifactStore,
        rng: &mut StdRng,
    ) -> Result<StoreDelta, StageError> {
        let (width, height) = image.dimensions();
        let mut luma = luminance_map(image);
        // Finer detail keeps more of the small-scale gradient structure
        let sigma = self.params.smoothing * (1.0 - 0.5 * self.detail);
        if sigma > 0.0 {
            luma = imageops::blur(&luma, sigma);
        }
        let (gx, gy) = sobel(&luma);
        let face = store.mesh().map(|m| m.region);

        let mut vectors = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let dx = gx.get_pixel(x, y).0[0];
                let dy = gy.get_pixel(x, y).0[0];
                let base = if dx.hypot(dy) < FLAT_THRESHOLD {
                    0.0
                } else {
                    // Tangent to the edge
                    dx.atan2(-dy)
                };
                let mut jitter = (rng.random::<f32>() * 2.0 - 1.0) * self.params.jitter * FRAC_PI_2;
                if face.is_some_and(|r| r.contains(x, y)) {
                    jitter *= 0.5;
                }
                let angle = base + jitter;
                vectors.push([angle.cos(), angle.sin()]);
            }
        }

        Ok(StoreDelta::new().with(
            ArtifactKey::FlowField,
            Artifact::Flow(FlowField {
                width,
                height,
                vectors,
            }),
        ))
    }

    fn visualization_key(&self) -> Option<&'static str> {
        Some("flow_field")
    }

    fn visualize(&self, _image: &Rgb32FImage, store: &ArtifactStore) -> Option<Rgb32FImage> {
        let field = store.flow()?;
        Some(Rgb32FImage::from_fn(field.width, field.height, |x, y| {
            let [vx, vy] = field.at(x, y);
            let hue = vy.atan2(vx).to_degrees().rem_euclid(360.0);
            Rgb(hsv_to_rgb([hue, 0.8, 0.9]))
        }))
    }
}
