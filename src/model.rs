use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::errors::CoreError;

/// Key under which drift scoring persists the Mahalanobis distance in a
/// record's derived metadata.
pub const DISTANCE_SCORE_KEY: &str = "distance_score";

/// One embedding row. The metadata store owns the full record; the ANN index
/// only ever holds the `(uuid, vector)` projection of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub uuid: Uuid,
    pub namespace: String,
    pub vector: Vec<f32>,
    pub source_uri: String,
    /// Partition tag, e.g. "training" or "target".
    pub dataset_label: String,
    #[serde(default)]
    pub inference_class: Option<String>,
    #[serde(default)]
    pub ground_truth_label: Option<String>,
    /// Per-class confidences from the upstream model, keyed by class label.
    #[serde(default)]
    pub inference_scores: HashMap<String, f32>,
    /// Derived metadata written by background jobs (e.g. `distance_score`).
    #[serde(default = "empty_object")]
    pub derived: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

impl EmbeddingRecord {
    /// The persisted Mahalanobis distance, if drift scoring has run.
    pub fn distance_score(&self) -> Option<f64> {
        self.derived.get(DISTANCE_SCORE_KEY).and_then(|v| v.as_f64())
    }
}

/// Insert payload for one row; the store assigns uuid and created_at.
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    pub namespace: String,
    pub vector: Vec<f32>,
    pub source_uri: String,
    pub dataset_label: String,
    pub inference_class: Option<String>,
    pub ground_truth_label: Option<String>,
    pub inference_scores: HashMap<String, f32>,
}

/// A scalar-or-list field on an ingest request. A single value broadcasts to
/// every record; a list must have length 1 or match the record count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn broadcast(&self, field: &'static str, n: usize) -> Result<Vec<T>, CoreError> {
        match self {
            OneOrMany::One(v) => Ok(vec![v.clone(); n]),
            OneOrMany::Many(vs) if vs.len() == 1 => Ok(vec![vs[0].clone(); n]),
            OneOrMany::Many(vs) if vs.len() == n => Ok(vs.clone()),
            OneOrMany::Many(vs) => Err(CoreError::ArityMismatch {
                field,
                got: vs.len(),
                expected: n,
            }),
        }
    }
}

/// Broadcast an optional scalar-or-list field into per-record options.
pub fn broadcast_opt<T: Clone>(
    field: &'static str,
    value: &Option<OneOrMany<T>>,
    n: usize,
) -> Result<Vec<Option<T>>, CoreError> {
    match value {
        Some(v) => Ok(v.broadcast(field, n)?.into_iter().map(Some).collect()),
        None => Ok(vec![None; n]),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddRequest {
    pub vectors: Vec<Vec<f32>>,
    pub source_uris: OneOrMany<String>,
    pub dataset_labels: OneOrMany<String>,
    #[serde(default)]
    pub inference_classes: Option<OneOrMany<String>>,
    #[serde(default)]
    pub ground_truth_labels: Option<OneOrMany<String>>,
    #[serde(default)]
    pub inference_scores: Option<OneOrMany<HashMap<String, f32>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddResponse {
    pub uuids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchRequest {
    pub filter: serde_json::Value,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub descending: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NeighborsRequest {
    pub namespace: String,
    pub vector: Vec<f32>,
    #[serde(default = "default_top_k")]
    pub k: usize,
    /// Filter resolved against the metadata store; must constrain the
    /// namespace key.
    pub filter: serde_json::Value,
}

fn default_top_k() -> usize {
    crate::defaults::DEFAULT_TOP_K
}

/// Filtered kNN result, increasing distance order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborsResult {
    pub ids: Vec<Uuid>,
    pub vectors: Vec<Vec<f32>>,
    pub distances: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOutcome {
    /// Uuids removed from the store, for caller-side reconciliation of
    /// derived artifacts.
    pub deleted: Vec<Uuid>,
    /// True when the whole namespace index was dropped instead of id-by-id
    /// removal.
    pub index_dropped: bool,
}

/// Sampling strategy tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ActivationUncertainty,
    BoundaryUncertainty,
    RepresentativeClusterOutlier,
    Random,
}

impl Strategy {
    /// Fixed evaluation order; earlier strategies win dedup conflicts.
    pub const ALL: [Strategy; 4] = [
        Strategy::ActivationUncertainty,
        Strategy::BoundaryUncertainty,
        Strategy::RepresentativeClusterOutlier,
        Strategy::Random,
    ];
}

#[derive(Debug, Clone, Deserialize)]
pub struct SampleRequest {
    pub total_n: usize,
    pub proportions: HashMap<Strategy, f64>,
}

/// One selected datapoint. Ephemeral; persistence is a store concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSelection {
    pub namespace: String,
    pub uuid: Uuid,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedClass {
    pub class: String,
    pub error: String,
}

/// Outcome of one drift-scoring run. A singular class fails alone; the other
/// classes still score. Target labels with no training counterpart are
/// skipped silently but listed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub namespace: String,
    /// Store generation observed when the run started.
    pub generation: u64,
    /// Scored datapoint count per class.
    pub scored: BTreeMap<String, usize>,
    pub skipped_labels: Vec<String>,
    pub failed_classes: Vec<FailedClass>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionPoint {
    pub embedding_uuid: Uuid,
    pub x: f32,
    pub y: f32,
    pub target_label: String,
}

/// One projection run; immutable once written, superseded by later runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionRun {
    pub namespace: String,
    pub generation: u64,
    pub points: Vec<ProjectionPoint>,
    pub computed_at: DateTime<Utc>,
}

/// Freshness of a namespace's derived artifacts relative to its current
/// store generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactStatus {
    pub namespace: String,
    pub current_generation: u64,
    pub drift_generation: Option<u64>,
    pub drift_stale: bool,
    pub projection_generation: Option<u64>,
    pub projection_stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_scalar_to_all_records() {
        let field = OneOrMany::One("x".to_string());
        assert_eq!(field.broadcast("dataset_labels", 3).unwrap(), vec!["x", "x", "x"]);
    }

    #[test]
    fn broadcast_singleton_list_to_all_records() {
        let field = OneOrMany::Many(vec!["x".to_string()]);
        assert_eq!(field.broadcast("dataset_labels", 2).unwrap(), vec!["x", "x"]);
    }

    #[test]
    fn broadcast_matching_list_passes_through() {
        let field = OneOrMany::Many(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(field.broadcast("dataset_labels", 2).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn broadcast_wrong_arity_is_rejected() {
        let field = OneOrMany::Many(vec!["a".to_string(), "b".to_string()]);
        match field.broadcast("dataset_labels", 3) {
            Err(CoreError::ArityMismatch { field, got, expected }) => {
                assert_eq!(field, "dataset_labels");
                assert_eq!(got, 2);
                assert_eq!(expected, 3);
            }
            other => panic!("expected ArityMismatch, got {:?}", other),
        }
    }

    #[test]
    fn one_or_many_deserializes_both_shapes() {
        let one: OneOrMany<String> = serde_json::from_str("\"x\"").unwrap();
        let many: OneOrMany<String> = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(one.broadcast("f", 2).unwrap(), vec!["x", "x"]);
        assert_eq!(many.broadcast("f", 2).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn distance_score_reads_derived_metadata() {
        let mut rec = EmbeddingRecord {
            uuid: Uuid::new_v4(),
            namespace: "n".into(),
            vector: vec![0.0],
            source_uri: "s3://x".into(),
            dataset_label: "target".into(),
            inference_class: None,
            ground_truth_label: None,
            inference_scores: HashMap::new(),
            derived: serde_json::json!({}),
            created_at: Utc::now(),
        };
        assert_eq!(rec.distance_score(), None);
        rec.derived[DISTANCE_SCORE_KEY] = serde_json::json!(2.5);
        assert_eq!(rec.distance_score(), Some(2.5));
    }
}
