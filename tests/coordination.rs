//! Integration tests for the coordination layer: store/index consistency,
//! filtered queries, drift scoring, sampling, background jobs.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use uuid::Uuid;

use curator_vectors::config::JobPolicy;
use curator_vectors::coordinator;
use curator_vectors::drift;
use curator_vectors::errors::CoreError;
use curator_vectors::filter::RecordFilter;
use curator_vectors::guard::AdmissionGuard;
use curator_vectors::index::{BruteForceIndex, VectorIndex};
use curator_vectors::jobs::{JobInfo, JobRunner, JobStatus};
use curator_vectors::lifecycle;
use curator_vectors::model::{
    AddRequest, NeighborsRequest, NewEmbedding, OneOrMany, SampleRequest, Strategy,
};
use curator_vectors::projection::RandomProjection;
use curator_vectors::query;
use curator_vectors::registry::Registry;
use curator_vectors::sampler;
use curator_vectors::store::{MemoryStore, MetadataStore, SortOrder};

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

fn registry_with_store() -> (Arc<Registry>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(Registry::new(
        store.clone(),
        Arc::new(BruteForceIndex::new()),
        AdmissionGuard::unlimited(),
    ));
    (registry, store)
}

fn registry() -> Arc<Registry> {
    registry_with_store().0
}

fn add_vectors(vectors: Vec<Vec<f32>>, dataset_label: &str) -> AddRequest {
    AddRequest {
        vectors,
        source_uris: OneOrMany::One("mem://test".to_string()),
        dataset_labels: OneOrMany::One(dataset_label.to_string()),
        inference_classes: None,
        ground_truth_labels: None,
        inference_scores: None,
    }
}

fn scores(pairs: &[(&str, f32)]) -> HashMap<String, f32> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Two well-conditioned training classes (identity covariance around
/// (1,1) and (11,11)) plus four targets, one carrying a label no training
/// class has.
async fn seed_two_classes(registry: &Registry, ns: &str) -> Vec<Uuid> {
    let training = AddRequest {
        vectors: vec![
            vec![0.0, 0.0],
            vec![2.0, 0.0],
            vec![0.0, 2.0],
            vec![2.0, 2.0],
            vec![1.0, 1.0],
            vec![10.0, 10.0],
            vec![12.0, 10.0],
            vec![10.0, 12.0],
            vec![12.0, 12.0],
            vec![11.0, 11.0],
        ],
        source_uris: OneOrMany::One("mem://train".to_string()),
        dataset_labels: OneOrMany::One("training".to_string()),
        inference_classes: None,
        ground_truth_labels: Some(OneOrMany::Many(
            ["a", "a", "a", "a", "a", "b", "b", "b", "b", "b"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )),
        inference_scores: None,
    };
    coordinator::add(registry, ns, training).await.unwrap();

    let targets = AddRequest {
        vectors: vec![
            vec![3.0, 1.0],
            vec![1.0, 3.0],
            vec![11.0, 13.0],
            vec![50.0, 50.0],
        ],
        source_uris: OneOrMany::One("mem://target".to_string()),
        dataset_labels: OneOrMany::One("target".to_string()),
        inference_classes: Some(OneOrMany::Many(
            ["a", "a", "b", "c"].iter().map(|s| s.to_string()).collect(),
        )),
        ground_truth_labels: None,
        inference_scores: Some(OneOrMany::Many(vec![
            scores(&[("a", 0.9), ("b", 0.1)]),
            scores(&[("a", 0.5), ("b", 0.45)]),
            scores(&[("b", 0.7), ("a", 0.3)]),
            scores(&[("c", 0.99)]),
        ])),
    };
    coordinator::add(registry, ns, targets).await.unwrap()
}

async fn wait_for_job(jobs: &JobRunner, id: Uuid) -> JobInfo {
    for _ in 0..500 {
        let info = jobs.status(id).unwrap();
        match info.status {
            JobStatus::Succeeded | JobStatus::Failed { .. } => return info,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    panic!("job {} did not finish", id);
}

// ─────────────────────────────────────────────
// Consistency coordinator
// ─────────────────────────────────────────────

#[tokio::test]
async fn reset_is_idempotent() {
    let reg = registry();
    coordinator::add(&reg, "n1", add_vectors(vec![vec![1.0], vec![2.0]], "target"))
        .await
        .unwrap();

    coordinator::reset(&reg, "n1").await.unwrap();
    coordinator::reset(&reg, "n1").await.unwrap();

    assert_eq!(query::count(&reg, Some("n1")).await.unwrap(), 0);
    assert!(lifecycle::has_index(&reg, "n1").await);
    let hits = query::nearest_neighbors(
        &reg,
        NeighborsRequest {
            namespace: "n1".into(),
            vector: vec![0.0],
            k: 5,
            filter: json!({"namespace": "n1"}),
        },
    )
    .await;
    assert!(matches!(hits, Err(CoreError::EmptyFilterResult(_))));
}

#[tokio::test]
async fn arity_broadcast_matches_explicit_list() {
    let reg = registry();
    let scalar = AddRequest {
        vectors: vec![vec![1.0], vec![2.0]],
        source_uris: OneOrMany::One("mem://x".into()),
        dataset_labels: OneOrMany::One("x".into()),
        inference_classes: None,
        ground_truth_labels: None,
        inference_scores: None,
    };
    let listed = AddRequest {
        vectors: vec![vec![1.0], vec![2.0]],
        source_uris: OneOrMany::Many(vec!["mem://x".into()]),
        dataset_labels: OneOrMany::Many(vec!["x".into(), "x".into()]),
        inference_classes: None,
        ground_truth_labels: None,
        inference_scores: None,
    };
    coordinator::add(&reg, "s", scalar).await.unwrap();
    coordinator::add(&reg, "l", listed).await.unwrap();

    for ns in ["s", "l"] {
        let rows = reg
            .store()
            .fetch(&RecordFilter::namespace_only(ns), None, None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.dataset_label == "x"));
        assert!(rows.iter().all(|r| r.source_uri == "mem://x"));
    }
}

#[tokio::test]
async fn arity_mismatch_rejects_before_any_write() {
    let reg = registry();
    let bad = AddRequest {
        vectors: vec![vec![1.0], vec![2.0], vec![3.0]],
        source_uris: OneOrMany::One("mem://x".into()),
        dataset_labels: OneOrMany::Many(vec!["a".into(), "b".into()]),
        inference_classes: None,
        ground_truth_labels: None,
        inference_scores: None,
    };
    let err = coordinator::add(&reg, "n", bad).await;
    assert!(matches!(err, Err(CoreError::ArityMismatch { .. })));
    assert_eq!(query::count(&reg, Some("n")).await.unwrap(), 0);
}

#[tokio::test]
async fn whole_namespace_delete_drops_the_index() {
    let reg = registry();
    coordinator::add(&reg, "t1", add_vectors(vec![vec![1.0], vec![2.0]], "target"))
        .await
        .unwrap();
    lifecycle::build(&reg, "t1").await.unwrap();
    assert!(lifecycle::has_index(&reg, "t1").await);

    let outcome = coordinator::delete(&reg, "t1", json!({"namespace": "t1"}))
        .await
        .unwrap();
    assert!(outcome.index_dropped);
    assert_eq!(outcome.deleted.len(), 2);
    assert!(!lifecycle::has_index(&reg, "t1").await);
}

#[tokio::test]
async fn narrow_delete_removes_ids_from_index() {
    let reg = registry();
    coordinator::add(
        &reg,
        "t1",
        AddRequest {
            vectors: vec![vec![0.0], vec![1.0]],
            source_uris: OneOrMany::One("mem://x".into()),
            dataset_labels: OneOrMany::Many(vec!["keep".into(), "drop".into()]),
            inference_classes: None,
            ground_truth_labels: None,
            inference_scores: None,
        },
    )
    .await
    .unwrap();
    lifecycle::build(&reg, "t1").await.unwrap();

    let outcome = coordinator::delete(
        &reg,
        "t1",
        json!({"namespace": "t1", "dataset_label": "drop"}),
    )
    .await
    .unwrap();
    assert!(!outcome.index_dropped);
    assert_eq!(outcome.deleted.len(), 1);
    assert!(lifecycle::has_index(&reg, "t1").await);

    let hits = reg
        .index()
        .query("t1", &[1.0], 5, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn delete_requires_namespace_in_filter() {
    let reg = registry();
    let err = coordinator::delete(&reg, "t1", json!({"dataset_label": "x"})).await;
    assert!(matches!(err, Err(CoreError::MissingNamespace)));
}

// ─────────────────────────────────────────────
// Reset partial failure
// ─────────────────────────────────────────────

/// Index whose namespace clear always fails, to exercise the poisoned
/// store/index state after a half-done reset.
struct BrokenClearIndex;

#[async_trait]
impl VectorIndex for BrokenClearIndex {
    async fn build(&self, _: &str, _: Vec<Uuid>, _: Vec<Vec<f32>>) -> anyhow::Result<()> {
        Ok(())
    }
    async fn query(
        &self,
        _: &str,
        _: &[f32],
        _: usize,
        _: Option<&HashSet<Uuid>>,
    ) -> anyhow::Result<Vec<(Uuid, f32)>> {
        Ok(Vec::new())
    }
    async fn delete_ids(&self, _: &str, _: &[Uuid]) -> anyhow::Result<()> {
        Ok(())
    }
    async fn delete_namespace(&self, namespace: &str) -> anyhow::Result<()> {
        anyhow::bail!("cannot clear index for {}", namespace)
    }
    async fn has_index(&self, _: &str) -> bool {
        true
    }
    fn set_persistence_dir(&self, _: PathBuf) {}
}

#[tokio::test]
async fn reset_surfaces_partial_failure() {
    let store = Arc::new(MemoryStore::new());
    let reg = Registry::new(
        store.clone(),
        Arc::new(BrokenClearIndex),
        AdmissionGuard::unlimited(),
    );
    coordinator::add(&reg, "n1", add_vectors(vec![vec![1.0]], "target"))
        .await
        .unwrap();

    let err = coordinator::reset(&reg, "n1").await;
    assert!(matches!(err, Err(CoreError::ResetPartialFailure { .. })));
    // The store side really was cleared; that is exactly the reported hazard.
    assert_eq!(store.count(Some("n1")).await.unwrap(), 0);
}

// ─────────────────────────────────────────────
// Query orchestration
// ─────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_query_over_100_vectors() {
    let reg = registry();
    let vectors: Vec<Vec<f32>> = (0..100).map(|i| vec![i as f32, (i % 10) as f32]).collect();
    let classes: Vec<String> = (0..100)
        .map(|i| if i % 2 == 0 { "even" } else { "odd" }.to_string())
        .collect();
    coordinator::add(
        &reg,
        "t1",
        AddRequest {
            vectors,
            source_uris: OneOrMany::One("mem://grid".into()),
            dataset_labels: OneOrMany::One("target".into()),
            inference_classes: Some(OneOrMany::Many(classes)),
            ground_truth_labels: None,
            inference_scores: None,
        },
    )
    .await
    .unwrap();

    let indexed = lifecycle::build(&reg, "t1").await.unwrap();
    assert_eq!(indexed, 100);

    let result = query::nearest_neighbors(
        &reg,
        NeighborsRequest {
            namespace: "t1".into(),
            vector: vec![0.0, 0.0],
            k: 5,
            filter: json!({"namespace": "t1"}),
        },
    )
    .await
    .unwrap();

    assert_eq!(result.ids.len(), 5);
    assert!(result.distances.windows(2).all(|w| w[0] <= w[1]));
    let stored = reg
        .store()
        .get_by_ids(&result.ids)
        .await
        .unwrap();
    assert_eq!(stored.len(), 5);
}

#[tokio::test]
async fn query_never_returns_stale_index_entries() {
    let (reg, store) = registry_with_store();
    let uuids = coordinator::add(
        &reg,
        "t1",
        add_vectors(vec![vec![0.0], vec![0.1], vec![5.0]], "target"),
    )
    .await
    .unwrap();
    lifecycle::build(&reg, "t1").await.unwrap();

    // Delete the closest row behind the coordinator's back; the index
    // still physically holds it.
    let stale = uuids[0];
    let direct = RecordFilter::try_from(json!({"namespace": "t1", "uuid": stale.to_string()}))
        .unwrap();
    store.delete(&direct).await.unwrap();

    let result = query::nearest_neighbors(
        &reg,
        NeighborsRequest {
            namespace: "t1".into(),
            vector: vec![0.0],
            k: 3,
            filter: json!({"namespace": "t1"}),
        },
    )
    .await
    .unwrap();
    assert!(!result.ids.contains(&stale));
    assert_eq!(result.ids.len(), 2);
}

#[tokio::test]
async fn query_results_stay_inside_the_admissible_set() {
    let reg = registry();
    coordinator::add(
        &reg,
        "t1",
        AddRequest {
            // Training rows sit right at the query point; target rows are
            // farther away but are the only admissible ones.
            vectors: vec![vec![0.0], vec![0.01], vec![3.0], vec![4.0]],
            source_uris: OneOrMany::One("mem://x".into()),
            dataset_labels: OneOrMany::Many(vec![
                "training".into(),
                "training".into(),
                "target".into(),
                "target".into(),
            ]),
            inference_classes: None,
            ground_truth_labels: None,
            inference_scores: None,
        },
    )
    .await
    .unwrap();
    lifecycle::build(&reg, "t1").await.unwrap();

    let filter = json!({"namespace": "t1", "dataset_label": "target"});
    let admissible: HashSet<Uuid> = reg
        .store()
        .fetch(&RecordFilter::try_from(filter.clone()).unwrap(), None, None, None)
        .await
        .unwrap()
        .iter()
        .map(|r| r.uuid)
        .collect();

    let result = query::nearest_neighbors(
        &reg,
        NeighborsRequest {
            namespace: "t1".into(),
            vector: vec![0.0],
            k: 4,
            filter,
        },
    )
    .await
    .unwrap();

    assert_eq!(result.ids.len(), 2);
    assert!(result.ids.iter().all(|id| admissible.contains(id)));
}

#[tokio::test]
async fn query_without_namespace_key_is_rejected() {
    let reg = registry();
    let err = query::nearest_neighbors(
        &reg,
        NeighborsRequest {
            namespace: "t1".into(),
            vector: vec![0.0],
            k: 1,
            filter: json!({"dataset_label": "target"}),
        },
    )
    .await;
    assert!(matches!(err, Err(CoreError::MissingNamespace)));
}

#[tokio::test]
async fn query_with_no_matching_rows_is_an_empty_filter_error() {
    let reg = registry();
    coordinator::add(&reg, "t1", add_vectors(vec![vec![1.0]], "target"))
        .await
        .unwrap();
    lifecycle::build(&reg, "t1").await.unwrap();

    let err = query::nearest_neighbors(
        &reg,
        NeighborsRequest {
            namespace: "t1".into(),
            vector: vec![0.0],
            k: 1,
            filter: json!({"namespace": "t1", "dataset_label": "nope"}),
        },
    )
    .await;
    assert!(matches!(err, Err(CoreError::EmptyFilterResult(_))));
}

// ─────────────────────────────────────────────
// Drift scoring
// ─────────────────────────────────────────────

#[tokio::test]
async fn drift_scores_targets_and_skips_unseen_labels() {
    let reg = registry();
    let target_uuids = seed_two_classes(&reg, "d1").await;

    let report = drift::compute_class_distances(&reg, "d1", "training", "target")
        .await
        .unwrap();

    assert_eq!(report.scored.get("a"), Some(&2));
    assert_eq!(report.scored.get("b"), Some(&1));
    assert_eq!(report.skipped_labels, vec!["c".to_string()]);
    assert!(report.failed_classes.is_empty());

    let rows = reg.store().get_by_ids(&target_uuids).await.unwrap();
    let d0 = rows[0].distance_score().unwrap();
    let d2 = rows[2].distance_score().unwrap();
    assert!((d0 - 2.0).abs() < 1e-6, "identity covariance: got {}", d0);
    assert!((d2 - 2.0).abs() < 1e-6, "identity covariance: got {}", d2);
    // The unseen label got no score at all.
    assert_eq!(rows[3].distance_score(), None);
}

#[tokio::test]
async fn drift_is_deterministic_for_unchanged_data() {
    let reg = registry();
    let target_uuids = seed_two_classes(&reg, "d2").await;

    drift::compute_class_distances(&reg, "d2", "training", "target")
        .await
        .unwrap();
    let first: Vec<Option<f64>> = reg
        .store()
        .get_by_ids(&target_uuids)
        .await
        .unwrap()
        .iter()
        .map(|r| r.distance_score())
        .collect();

    drift::compute_class_distances(&reg, "d2", "training", "target")
        .await
        .unwrap();
    let second: Vec<Option<f64>> = reg
        .store()
        .get_by_ids(&target_uuids)
        .await
        .unwrap()
        .iter()
        .map(|r| r.distance_score())
        .collect();

    for (a, b) in first.iter().zip(&second) {
        match (a, b) {
            (Some(a), Some(b)) => assert!((a - b).abs() < 1e-12),
            (None, None) => {}
            other => panic!("score presence changed between runs: {:?}", other),
        }
    }
}

#[tokio::test]
async fn singular_class_fails_alone() {
    let reg = registry();
    seed_two_classes(&reg, "d3").await;
    // A third class with two samples in 2-D cannot produce an invertible
    // covariance.
    coordinator::add(
        &reg,
        "d3",
        AddRequest {
            vectors: vec![vec![5.0, 5.0], vec![6.0, 6.0]],
            source_uris: OneOrMany::One("mem://train".into()),
            dataset_labels: OneOrMany::One("training".into()),
            inference_classes: None,
            ground_truth_labels: Some(OneOrMany::One("thin".into())),
            inference_scores: None,
        },
    )
    .await
    .unwrap();

    let report = drift::compute_class_distances(&reg, "d3", "training", "target")
        .await
        .unwrap();
    assert_eq!(report.failed_classes.len(), 1);
    assert_eq!(report.failed_classes[0].class, "thin");
    // The healthy classes still scored.
    assert_eq!(report.scored.get("a"), Some(&2));
    assert_eq!(report.scored.get("b"), Some(&1));
}

// ─────────────────────────────────────────────
// Sampler
// ─────────────────────────────────────────────

fn even_proportions() -> HashMap<Strategy, f64> {
    Strategy::ALL.iter().map(|s| (*s, 0.25)).collect()
}

#[tokio::test]
async fn sampler_requires_index_and_drift_scores() {
    let reg = registry();
    seed_two_classes(&reg, "s1").await;

    let err = sampler::sample(
        &reg,
        "s1",
        SampleRequest {
            total_n: 2,
            proportions: even_proportions(),
        },
    )
    .await;
    assert!(matches!(err, Err(CoreError::IndexNotBuilt(_))));

    lifecycle::build(&reg, "s1").await.unwrap();
    let err = sampler::sample(
        &reg,
        "s1",
        SampleRequest {
            total_n: 2,
            proportions: even_proportions(),
        },
    )
    .await;
    assert!(matches!(err, Err(CoreError::NoDriftScores(_))));
}

#[tokio::test]
async fn sampler_returns_exact_count_without_duplicates() {
    let reg = registry();
    // 24 target rows with full signals on top of the training seed.
    seed_two_classes(&reg, "s2").await;
    let vectors: Vec<Vec<f32>> = (0..24).map(|i| vec![i as f32, 0.5]).collect();
    let confidences: Vec<HashMap<String, f32>> = (0..24)
        .map(|i| scores(&[("a", 0.5 + (i as f32) * 0.01), ("b", 0.3)]))
        .collect();
    coordinator::add(
        &reg,
        "s2",
        AddRequest {
            vectors,
            source_uris: OneOrMany::One("mem://pool".into()),
            dataset_labels: OneOrMany::One("target".into()),
            inference_classes: Some(OneOrMany::One("a".into())),
            ground_truth_labels: None,
            inference_scores: Some(OneOrMany::Many(confidences)),
        },
    )
    .await
    .unwrap();

    lifecycle::build(&reg, "s2").await.unwrap();
    drift::compute_class_distances(&reg, "s2", "training", "target")
        .await
        .unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let selections = sampler::sample_with_rng(
        &reg,
        "s2",
        SampleRequest {
            total_n: 12,
            proportions: even_proportions(),
        },
        &mut rng,
    )
    .await
    .unwrap();

    assert_eq!(selections.len(), 12);
    let unique: HashSet<Uuid> = selections.iter().map(|s| s.uuid).collect();
    assert_eq!(unique.len(), 12);
}

#[tokio::test]
async fn sampler_returns_fewer_when_pool_is_small() {
    let reg = registry();
    seed_two_classes(&reg, "s3").await;
    lifecycle::build(&reg, "s3").await.unwrap();
    drift::compute_class_distances(&reg, "s3", "training", "target")
        .await
        .unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let selections = sampler::sample_with_rng(
        &reg,
        "s3",
        SampleRequest {
            total_n: 100,
            proportions: even_proportions(),
        },
        &mut rng,
    )
    .await
    .unwrap();

    // Only the four target rows carry an inference class.
    assert_eq!(selections.len(), 4);
    let unique: HashSet<Uuid> = selections.iter().map(|s| s.uuid).collect();
    assert_eq!(unique.len(), 4);
}

// ─────────────────────────────────────────────
// Background jobs
// ─────────────────────────────────────────────

fn fast_policy() -> JobPolicy {
    JobPolicy {
        attempts: 3,
        backoff: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn drift_and_projection_job_succeeds_and_records_artifacts() {
    let reg = registry();
    seed_two_classes(&reg, "j1").await;

    let jobs = JobRunner::new(
        reg.clone(),
        Arc::new(RandomProjection::new(1)),
        fast_policy(),
    );
    let handle = jobs
        .run_drift_and_projection("j1", "training", "target")
        .unwrap();
    let info = wait_for_job(&jobs, handle.id).await;

    assert!(matches!(info.status, JobStatus::Succeeded));
    assert_eq!(info.attempts, 1);
    let report = info.report.expect("successful job carries its report");
    assert_eq!(report.skipped_labels, vec!["c".to_string()]);

    let run = reg.latest_projection("j1").expect("projection recorded");
    assert_eq!(run.points.len(), 14);
    let status = reg.artifact_status("j1");
    assert!(!status.drift_stale);
    assert!(!status.projection_stale);
}

/// Store that always fails, for retry-exhaustion behavior.
struct DownStore;

#[async_trait]
impl MetadataStore for DownStore {
    async fn insert(&self, _: Vec<NewEmbedding>) -> anyhow::Result<Vec<Uuid>> {
        anyhow::bail!("store unavailable")
    }
    async fn fetch(
        &self,
        _: &RecordFilter,
        _: Option<SortOrder>,
        _: Option<usize>,
        _: Option<usize>,
    ) -> anyhow::Result<Vec<curator_vectors::model::EmbeddingRecord>> {
        anyhow::bail!("store unavailable")
    }
    async fn delete(&self, _: &RecordFilter) -> anyhow::Result<Vec<Uuid>> {
        anyhow::bail!("store unavailable")
    }
    async fn count(&self, _: Option<&str>) -> anyhow::Result<usize> {
        anyhow::bail!("store unavailable")
    }
    async fn get_by_ids(&self, _: &[Uuid]) -> anyhow::Result<Vec<curator_vectors::model::EmbeddingRecord>> {
        anyhow::bail!("store unavailable")
    }
    async fn set_derived(
        &self,
        _: &[Uuid],
        _: &str,
        _: Vec<serde_json::Value>,
    ) -> anyhow::Result<()> {
        anyhow::bail!("store unavailable")
    }
    async fn raw_query(&self, _: &str) -> anyhow::Result<Vec<serde_json::Value>> {
        anyhow::bail!("store unavailable")
    }
}

#[tokio::test]
async fn job_retries_then_surfaces_failure() {
    let reg = Arc::new(Registry::new(
        Arc::new(DownStore),
        Arc::new(BruteForceIndex::new()),
        AdmissionGuard::unlimited(),
    ));
    let jobs = JobRunner::new(
        reg,
        Arc::new(RandomProjection::new(1)),
        fast_policy(),
    );
    let handle = jobs
        .run_drift_and_projection("j2", "training", "target")
        .unwrap();
    let info = wait_for_job(&jobs, handle.id).await;

    assert_eq!(info.attempts, 3);
    match info.status {
        JobStatus::Failed { error } => assert!(error.contains("store unavailable")),
        other => panic!("expected failure, got {:?}", other),
    }
}

// ─────────────────────────────────────────────
// Guards and staleness
// ─────────────────────────────────────────────

#[tokio::test]
async fn quota_rejects_adds_over_the_namespace_limit() {
    let reg = Registry::new(
        Arc::new(MemoryStore::new()),
        Arc::new(BruteForceIndex::new()),
        AdmissionGuard::new(Some(3), None),
    );
    coordinator::add(&reg, "q1", add_vectors(vec![vec![1.0], vec![2.0]], "target"))
        .await
        .unwrap();

    let err = coordinator::add(
        &reg,
        "q1",
        add_vectors(vec![vec![3.0], vec![4.0]], "target"),
    )
    .await;
    assert!(matches!(err, Err(CoreError::QuotaExceeded { limit: 3, .. })));
    // Rejected before any write.
    assert_eq!(query::count(&reg, Some("q1")).await.unwrap(), 2);
}

#[tokio::test]
async fn deletes_mark_drift_scores_stale() {
    let reg = registry();
    let target_uuids = seed_two_classes(&reg, "g1").await;
    drift::compute_class_distances(&reg, "g1", "training", "target")
        .await
        .unwrap();
    assert!(!reg.artifact_status("g1").drift_stale);

    coordinator::delete(
        &reg,
        "g1",
        json!({"namespace": "g1", "uuid": target_uuids[0].to_string()}),
    )
    .await
    .unwrap();
    assert!(reg.artifact_status("g1").drift_stale);
}
