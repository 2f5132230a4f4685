//! Multi-strategy active-learning sampler.
//!
//! Combines uncertainty, boundary, outlier and random strategies into one
//! proportioned selection over a namespace's reviewable pool (rows with an
//! inference class). Earlier strategies win dedup conflicts; later ones
//! replace a taken uuid with their next-best candidate.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cmp::Ordering;
use std::collections::HashSet;
use uuid::Uuid;

use crate::errors::{CoreError, Result};
use crate::filter::RecordFilter;
use crate::model::{EmbeddingRecord, SampleRequest, SampleSelection, Strategy};
use crate::registry::Registry;

pub async fn sample(
    registry: &Registry,
    namespace: &str,
    req: SampleRequest,
) -> Result<Vec<SampleSelection>> {
    let mut rng = StdRng::from_entropy();
    sample_with_rng(registry, namespace, req, &mut rng).await
}

/// Deterministic entry point; the public [`sample`] seeds from entropy.
pub async fn sample_with_rng(
    registry: &Registry,
    namespace: &str,
    req: SampleRequest,
    rng: &mut StdRng,
) -> Result<Vec<SampleSelection>> {
    if !registry.index().has_index(namespace).await {
        return Err(CoreError::IndexNotBuilt(namespace.to_string()));
    }
    let drift = registry
        .latest_drift(namespace)
        .ok_or_else(|| CoreError::NoDriftScores(namespace.to_string()))?;
    let current = registry.generation(namespace);
    if drift.generation != current {
        tracing::warn!(
            "Sampling {} against stale drift scores (computed at generation {}, store at {})",
            namespace,
            drift.generation,
            current
        );
    }

    let filter = RecordFilter::namespace_only(namespace).exists("inference_class");
    let rows = registry
        .store()
        .fetch(&filter, None, None, None)
        .await
        .map_err(CoreError::store)?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut selected: Vec<SampleSelection> = Vec::with_capacity(req.total_n);
    let mut chosen: HashSet<Uuid> = HashSet::with_capacity(req.total_n);

    for strategy in Strategy::ALL {
        let fraction = req.proportions.get(&strategy).copied().unwrap_or(0.0);
        let want = (req.total_n as f64 * fraction).round() as usize;
        if want == 0 {
            continue;
        }
        let mut taken = 0;
        for uuid in ranked_candidates(strategy, &rows, rng) {
            if taken == want {
                break;
            }
            if chosen.insert(uuid) {
                selected.push(SampleSelection {
                    namespace: namespace.to_string(),
                    uuid,
                    strategy,
                });
                taken += 1;
            }
        }
    }

    // Per-strategy rounding can land above or below total_n; reconcile so
    // the returned set is exactly min(total_n, eligible).
    if selected.len() > req.total_n {
        for dropped in selected.drain(req.total_n..) {
            chosen.remove(&dropped.uuid);
        }
    } else if selected.len() < req.total_n {
        let mut remainder: Vec<Uuid> = rows
            .iter()
            .map(|r| r.uuid)
            .filter(|u| !chosen.contains(u))
            .collect();
        remainder.shuffle(rng);
        for uuid in remainder {
            if selected.len() == req.total_n {
                break;
            }
            chosen.insert(uuid);
            selected.push(SampleSelection {
                namespace: namespace.to_string(),
                uuid,
                strategy: Strategy::Random,
            });
        }
    }

    tracing::info!(
        "Sampled {} of {} requested from namespace {}",
        selected.len(),
        req.total_n,
        namespace
    );
    Ok(selected)
}

/// Ranked uuid list for one strategy, best candidate first. Rows lacking
/// the strategy's signal are excluded from its ranking. Ties break on uuid
/// so rankings are stable.
fn ranked_candidates(
    strategy: Strategy,
    rows: &[EmbeddingRecord],
    rng: &mut StdRng,
) -> Vec<Uuid> {
    match strategy {
        Strategy::ActivationUncertainty => {
            ranked_by(rows, |r| max_confidence(r), false)
        }
        Strategy::BoundaryUncertainty => ranked_by(rows, |r| top_two_margin(r), false),
        // The stored distance is already relative to the row's own
        // predicted class distribution, so a global descending rank
        // surfaces the strongest per-cluster outliers.
        Strategy::RepresentativeClusterOutlier => {
            ranked_by(rows, |r| r.distance_score().map(|d| d as f32), true)
        }
        Strategy::Random => {
            let mut uuids: Vec<Uuid> = rows.iter().map(|r| r.uuid).collect();
            uuids.shuffle(rng);
            uuids
        }
    }
}

fn ranked_by<F>(rows: &[EmbeddingRecord], score: F, descending: bool) -> Vec<Uuid>
where
    F: Fn(&EmbeddingRecord) -> Option<f32>,
{
    let mut scored: Vec<(f32, Uuid)> = rows
        .iter()
        .filter_map(|r| score(r).map(|s| (s, r.uuid)))
        .collect();
    scored.sort_by(|a, b| {
        let ord = a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal);
        let ord = if descending { ord.reverse() } else { ord };
        ord.then(a.1.cmp(&b.1))
    });
    scored.into_iter().map(|(_, uuid)| uuid).collect()
}

/// Highest single-class confidence; low values mean an ambiguous prediction.
fn max_confidence(record: &EmbeddingRecord) -> Option<f32> {
    record.inference_scores.values().cloned().reduce(f32::max)
}

/// Margin between the two strongest class confidences; needs at least two.
fn top_two_margin(record: &EmbeddingRecord) -> Option<f32> {
    let mut scores: Vec<f32> = record.inference_scores.values().cloned().collect();
    if scores.len() < 2 {
        return None;
    }
    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    Some(scores[0] - scores[1])
}
