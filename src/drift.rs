//! Per-class drift scoring: Gaussian statistics over the training
//! partition, Mahalanobis distances for the target partition.
//!
//! Statistics are recomputed wholesale each run (no incremental update),
//! which is what makes the surrounding job retry-safe: a rerun overwrites
//! instead of accumulating.

use chrono::Utc;
use ndarray::{Array1, Array2};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::errors::{CoreError, Result};
use crate::filter::RecordFilter;
use crate::model::{DriftReport, EmbeddingRecord, FailedClass, DISTANCE_SCORE_KEY};
use crate::registry::Registry;

const PIVOT_EPSILON: f64 = 1e-10;

/// Per-class Gaussian statistics for one namespace.
pub struct ClassStatistic {
    pub namespace: String,
    pub class_label: String,
    pub mean: Array1<f64>,
    pub inverse_covariance: Array2<f64>,
}

/// Score every target-partition datapoint against its predicted class's
/// training distribution and persist the distances as derived metadata.
///
/// Per class: a singular covariance fails that class alone; remaining
/// classes still score. Target labels absent from the training partition
/// are skipped without error and listed in the report.
pub async fn compute_class_distances(
    registry: &Registry,
    namespace: &str,
    training_partition: &str,
    target_partition: &str,
) -> Result<DriftReport> {
    let generation = registry.generation(namespace);

    let training = fetch_partition(registry, namespace, training_partition).await?;
    let target = fetch_partition(registry, namespace, target_partition).await?;

    let classes: BTreeSet<String> = training
        .iter()
        .filter_map(|r| r.ground_truth_label.clone())
        .collect();
    let target_labels: BTreeSet<String> = target
        .iter()
        .filter_map(|r| r.inference_class.clone())
        .collect();
    let skipped_labels: Vec<String> = target_labels.difference(&classes).cloned().collect();
    if !skipped_labels.is_empty() {
        tracing::warn!(
            "Drift scoring in {} skipping target labels with no training data: {:?}",
            namespace,
            skipped_labels
        );
    }

    let mut scored = BTreeMap::new();
    let mut failed_classes = Vec::new();

    for class in &classes {
        let members: Vec<&EmbeddingRecord> = training
            .iter()
            .filter(|r| r.ground_truth_label.as_deref() == Some(class.as_str()))
            .collect();

        let stat = match class_statistic(namespace, class, &members) {
            Ok(stat) => stat,
            Err(err) => {
                tracing::warn!("Drift scoring failed for class {} in {}: {}", class, namespace, err);
                failed_classes.push(FailedClass {
                    class: class.clone(),
                    error: err.to_string(),
                });
                continue;
            }
        };

        let targets: Vec<&EmbeddingRecord> = target
            .iter()
            .filter(|r| r.inference_class.as_deref() == Some(class.as_str()))
            .collect();
        if targets.is_empty() {
            scored.insert(class.clone(), 0);
            continue;
        }

        let mut uuids: Vec<Uuid> = Vec::with_capacity(targets.len());
        let mut values = Vec::with_capacity(targets.len());
        let mut class_failed = false;
        for record in &targets {
            match mahalanobis(&stat, &record.vector) {
                Ok(distance) => {
                    uuids.push(record.uuid);
                    values.push(json!(distance));
                }
                Err(err) => {
                    failed_classes.push(FailedClass {
                        class: class.clone(),
                        error: err.to_string(),
                    });
                    class_failed = true;
                    break;
                }
            }
        }
        if class_failed {
            continue;
        }

        registry
            .store()
            .set_derived(&uuids, DISTANCE_SCORE_KEY, values)
            .await
            .map_err(CoreError::store)?;
        scored.insert(class.clone(), uuids.len());
    }

    let report = DriftReport {
        namespace: namespace.to_string(),
        generation,
        scored,
        skipped_labels,
        failed_classes,
        computed_at: Utc::now(),
    };
    registry.record_drift(report.clone());
    tracing::info!(
        "Drift scoring for {} done: {} classes scored, {} skipped, {} failed",
        namespace,
        report.scored.len(),
        report.skipped_labels.len(),
        report.failed_classes.len()
    );
    Ok(report)
}

async fn fetch_partition(
    registry: &Registry,
    namespace: &str,
    partition: &str,
) -> Result<Vec<EmbeddingRecord>> {
    let filter = RecordFilter::namespace_only(namespace)
        .equals("dataset_label", json!(partition));
    registry
        .store()
        .fetch(&filter, None, None, None)
        .await
        .map_err(CoreError::store)
}

/// Sample mean and inverse covariance of a class's training vectors.
/// Covariance is over dimensions: each dimension is a variable, each
/// embedding a sample. Fewer samples than dimensions (or a degenerate
/// subset) makes the matrix singular.
pub fn class_statistic(
    namespace: &str,
    class: &str,
    members: &[&EmbeddingRecord],
) -> Result<ClassStatistic> {
    let n = members.len();
    let dims = members.first().map(|r| r.vector.len()).unwrap_or(0);
    if n <= dims || dims == 0 {
        return Err(CoreError::SingularCovariance {
            class: class.to_string(),
            samples: n,
            dims,
        });
    }
    for record in members {
        if record.vector.len() != dims {
            return Err(CoreError::DimensionMismatch {
                expected: dims,
                actual: record.vector.len(),
            });
        }
    }

    let mut mean = Array1::<f64>::zeros(dims);
    for record in members {
        for (i, v) in record.vector.iter().enumerate() {
            mean[i] += *v as f64;
        }
    }
    mean /= n as f64;

    let mut covariance = Array2::<f64>::zeros((dims, dims));
    for record in members {
        let deviation: Array1<f64> =
            Array1::from_iter(record.vector.iter().map(|v| *v as f64)) - &mean;
        for i in 0..dims {
            for j in 0..dims {
                covariance[[i, j]] += deviation[i] * deviation[j];
            }
        }
    }
    covariance /= (n - 1) as f64;

    let inverse_covariance =
        invert(&covariance).ok_or_else(|| CoreError::SingularCovariance {
            class: class.to_string(),
            samples: n,
            dims,
        })?;

    Ok(ClassStatistic {
        namespace: namespace.to_string(),
        class_label: class.to_string(),
        mean,
        inverse_covariance,
    })
}

/// Mahalanobis distance `sqrt((x - mean)^T inv_cov (x - mean))`.
pub fn mahalanobis(stat: &ClassStatistic, vector: &[f32]) -> Result<f64> {
    if vector.len() != stat.mean.len() {
        return Err(CoreError::DimensionMismatch {
            expected: stat.mean.len(),
            actual: vector.len(),
        });
    }
    let deviation: Array1<f64> =
        Array1::from_iter(vector.iter().map(|v| *v as f64)) - &stat.mean;
    let squared = deviation.dot(&stat.inverse_covariance.dot(&deviation));
    // Rounding can push a boundary point fractionally negative.
    Ok(squared.max(0.0).sqrt())
}

/// Gauss-Jordan inversion with partial pivoting. Returns None when a pivot
/// degenerates, i.e. the matrix is singular.
fn invert(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    let n = matrix.nrows();
    let mut work = matrix.clone();
    let mut inverse = Array2::<f64>::eye(n);

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&a, &b| {
                work[[a, col]]
                    .abs()
                    .partial_cmp(&work[[b, col]].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;
        if work[[pivot_row, col]].abs() < PIVOT_EPSILON {
            return None;
        }
        if pivot_row != col {
            for j in 0..n {
                work.swap([pivot_row, j], [col, j]);
                inverse.swap([pivot_row, j], [col, j]);
            }
        }

        let pivot = work[[col, col]];
        for j in 0..n {
            work[[col, j]] /= pivot;
            inverse[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                work[[row, j]] -= factor * work[[col, j]];
                inverse[[row, j]] -= factor * inverse[[col, j]];
            }
        }
    }
    Some(inverse)
}
