//! 2-D projection of a namespace's embeddings for visualization.
//!
//! The dimensionality-reduction routine itself is external; this module
//! invokes it behind [`ProjectionReducer`] and persists the resulting
//! points. Each run supersedes the previous one wholesale.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::errors::{CoreError, Result};
use crate::filter::RecordFilter;
use crate::model::{ProjectionPoint, ProjectionRun};
use crate::registry::Registry;

/// External 2-D reducer (UMAP or similar). Input vectors share one
/// dimensionality; output has one `[x, y]` per input, in order.
pub trait ProjectionReducer: Send + Sync {
    fn reduce(&self, vectors: &[Vec<f32>]) -> anyhow::Result<Vec<[f32; 2]>>;
}

/// Seeded Gaussian random projection, the reference reducer. Deterministic
/// for a given seed and input order.
pub struct RandomProjection {
    seed: u64,
}

impl RandomProjection {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl ProjectionReducer for RandomProjection {
    fn reduce(&self, vectors: &[Vec<f32>]) -> anyhow::Result<Vec<[f32; 2]>> {
        let Some(first) = vectors.first() else {
            return Ok(Vec::new());
        };
        let dims = first.len();
        anyhow::ensure!(dims > 0, "cannot project zero-dimensional vectors");

        let mut rng = StdRng::seed_from_u64(self.seed);
        let scale = 1.0 / (dims as f32).sqrt();
        let axes: [Vec<f32>; 2] = [
            (0..dims).map(|_| sample_gaussian(&mut rng) * scale).collect(),
            (0..dims).map(|_| sample_gaussian(&mut rng) * scale).collect(),
        ];

        vectors
            .iter()
            .map(|v| {
                anyhow::ensure!(
                    v.len() == dims,
                    "dimension mismatch: expected {}, got {}",
                    dims,
                    v.len()
                );
                let x = v.iter().zip(&axes[0]).map(|(a, b)| a * b).sum();
                let y = v.iter().zip(&axes[1]).map(|(a, b)| a * b).sum();
                Ok([x, y])
            })
            .collect()
    }
}

/// Box-Muller from two uniforms.
fn sample_gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

/// Project every embedding in the namespace and record the run. An empty
/// namespace yields an empty run rather than an error.
pub async fn run_projection(
    registry: &Registry,
    reducer: &dyn ProjectionReducer,
    namespace: &str,
) -> Result<ProjectionRun> {
    let generation = registry.generation(namespace);
    let filter = RecordFilter::namespace_only(namespace);
    let rows = registry
        .store()
        .fetch(&filter, None, None, None)
        .await
        .map_err(CoreError::store)?;

    let vectors: Vec<Vec<f32>> = rows.iter().map(|r| r.vector.clone()).collect();
    let coords = reducer
        .reduce(&vectors)
        .map_err(|e| CoreError::Projection(format!("{:#}", e)))?;

    let points: Vec<ProjectionPoint> = rows
        .iter()
        .zip(coords)
        .map(|(record, [x, y])| ProjectionPoint {
            embedding_uuid: record.uuid,
            x,
            y,
            target_label: record.dataset_label.clone(),
        })
        .collect();

    let run = ProjectionRun {
        namespace: namespace.to_string(),
        generation,
        points,
        computed_at: Utc::now(),
    };
    registry.record_projection(run.clone());
    tracing::info!(
        "Projection for {} done: {} points at generation {}",
        namespace,
        run.points.len(),
        generation
    );
    Ok(run)
}
