use crate::config::AnalysisParams;
use crate::imaging::calculations::skin_likelihood;
use crate::imaging::ops::map_pixels;
use crate::stage::{Capability, Stage, StageError};
use crate::store::{Artifact, ArtifactKey, ArtifactStore, FaceMesh, Region, StoreDelta};
use image::{Rgb, Rgb32FImage};
use rand::rngs::StdRng;

/// Smallest image the analysis can work on.
pub const MIN_ANALYSIS_SIZE: u32 = 8;

/// Share of skin-toned pixels below which no face is reported.
const MIN_COVERAGE: f32 = 0.02;

const MESH_COLOR: [f32; 3] = [0.1, 0.9, 0.3];

/// Locates the dominant skin-toned region and lays a landmark grid over it.
#[derive(Debug, Clone)]
pub struct AnalysisStage {
    params: AnalysisParams,
}

impl AnalysisStage {
    pub fn new(params: AnalysisParams) -> Self {
        Self { params }
    }
}

impl Stage for AnalysisStage {
    fn name(&self) -> &'static str {
        "analysis"
    }

    fn capability(&self) -> Capability {
        Capability::Analyze
    }

    fn reads(&self) -> &'static [ArtifactKey] {
        &[ArtifactKey::OriginalImage]
    }

    fn writes(&self) -> &'static [ArtifactKey] {
        &[ArtifactKey::FaceMesh, ArtifactKey::FaceDetected]
    }

    fn run(
        &self,
        image: &Rgb32FImage,
        _store: &ArtifactStore,
        _rng: &mut StdRng,
    ) -> Result<StoreDelta, StageError> {
        let (width, height) = image.dimensions();
        if width < MIN_ANALYSIS_SIZE || height < MIN_ANALYSIS_SIZE {
            return Err(StageError::InputTooSmall {
                width,
                height,
                min: MIN_ANALYSIS_SIZE,
            });
        }

        let delta = match detect_face(image, &self.params) {
            Some(mesh) => StoreDelta::new()
                .with(ArtifactKey::FaceMesh, Artifact::Mesh(mesh))
                .with(ArtifactKey::FaceDetected, Artifact::Flag(true)),
            None => StoreDelta::new().with(ArtifactKey::FaceDetected, Artifact::Flag(false)),
        };
        Ok(delta)
    }

    fn visualization_key(&self) -> Option<&'static str> {
        Some("face_mesh")
    }

    fn visualize(&self, image: &Rgb32FImage, store: &ArtifactStore) -> Option<Rgb32FImage> {
        let mut canvas = map_pixels(image, |[r, g, b]| [r * 0.5, g * 0.5, b * 0.5]);
        if let Some(mesh) = store.mesh() {
            draw_mesh(&mut canvas, mesh);
        }
        Some(canvas)
    }
}

/// Bounding box of skin-toned pixels, with a `mesh_density`² landmark grid.
///
/// Returns `None` when too few pixels pass the threshold.
pub fn detect_face(image: &Rgb32FImage, params: &AnalysisParams) -> Option<FaceMesh> {
    let (width, height) = image.dimensions();
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0, 0);
    let mut count = 0usize;
    let mut score_sum = 0.0f32;

    for (x, y, pixel) in image.enumerate_pixels() {
        let score = skin_likelihood(pixel.0);
        if score >= params.skin_threshold {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            count += 1;
            score_sum += score;
        }
    }

    let coverage = count as f32 / (width as f32 * height as f32);
    if count == 0 || coverage < MIN_COVERAGE {
        return None;
    }

    let region = Region {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    };
    let n = params.mesh_density.max(2);
    let step = |extent: u32, i: u32| (extent - 1) as f32 * i as f32 / (n - 1) as f32;
    let landmarks = (0..n)
        .flat_map(|j| {
            (0..n).map(move |i| {
                (
                    region.x as f32 + step(region.width, i),
                    region.y as f32 + step(region.height, j),
                )
            })
        })
        .collect();

    Some(FaceMesh {
        region,
        landmarks,
        confidence: score_sum / count as f32,
    })
}

fn draw_mesh(canvas: &mut Rgb32FImage, mesh: &FaceMesh) {
    let r = mesh.region;
    let (right, bottom) = (r.x + r.width - 1, r.y + r.height - 1);
    for x in r.x..=right {
        canvas.put_pixel(x, r.y, Rgb(MESH_COLOR));
        canvas.put_pixel(x, bottom, Rgb(MESH_COLOR));
    }
    for y in r.y..=bottom {
        canvas.put_pixel(r.x, y, Rgb(MESH_COLOR));
        canvas.put_pixel(right, y, Rgb(MESH_COLOR));
    }
    for &(x, y) in &mesh.landmarks {
        let (px, py) = (x.round() as u32, y.round() as u32);
        if px < canvas.width() && py < canvas.height() {
            canvas.put_pixel(px, py, Rgb([1.0, 1.0, 1.0]));
        }
    }
}
