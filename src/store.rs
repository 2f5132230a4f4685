use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::filter::RecordFilter;
use crate::model::{EmbeddingRecord, NewEmbedding};

/// Sort directive for fetch.
#[derive(Debug, Clone)]
pub struct SortOrder {
    pub field: String,
    pub descending: bool,
}

/// The relational/columnar metadata store, as the coordination layer
/// consumes it. The engine itself (SQL, columnar, whatever) lives behind
/// this trait; the crate ships [`MemoryStore`] as the reference backend.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert rows, assigning uuids. Returns the assigned uuids in input
    /// order.
    async fn insert(&self, rows: Vec<NewEmbedding>) -> anyhow::Result<Vec<Uuid>>;

    async fn fetch(
        &self,
        filter: &RecordFilter,
        sort: Option<SortOrder>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> anyhow::Result<Vec<EmbeddingRecord>>;

    /// Delete matching rows, returning the deleted uuids.
    async fn delete(&self, filter: &RecordFilter) -> anyhow::Result<Vec<Uuid>>;

    async fn count(&self, namespace: Option<&str>) -> anyhow::Result<usize>;

    /// Fetch full records by id. Ids with no live row are omitted.
    async fn get_by_ids(&self, uuids: &[Uuid]) -> anyhow::Result<Vec<EmbeddingRecord>>;

    /// Write one derived-metadata key on each of the given rows, overwriting
    /// any prior value. `values` must match `uuids` in length and order.
    async fn set_derived(&self, uuids: &[Uuid], key: &str, values: Vec<Value>)
        -> anyhow::Result<()>;

    /// Engine-specific query passthrough.
    async fn raw_query(&self, text: &str) -> anyhow::Result<Vec<Value>>;
}

/// In-memory reference store. Row order is insertion order, which gives
/// fetch a stable default ordering.
pub struct MemoryStore {
    rows: RwLock<Vec<EmbeddingRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn insert(&self, rows: Vec<NewEmbedding>) -> anyhow::Result<Vec<Uuid>> {
        let mut guard = self.rows.write().unwrap();
        let mut uuids = Vec::with_capacity(rows.len());
        for row in rows {
            let uuid = Uuid::new_v4();
            uuids.push(uuid);
            guard.push(EmbeddingRecord {
                uuid,
                namespace: row.namespace,
                vector: row.vector,
                source_uri: row.source_uri,
                dataset_label: row.dataset_label,
                inference_class: row.inference_class,
                ground_truth_label: row.ground_truth_label,
                inference_scores: row.inference_scores,
                derived: serde_json::json!({}),
                created_at: Utc::now(),
            });
        }
        Ok(uuids)
    }

    async fn fetch(
        &self,
        filter: &RecordFilter,
        sort: Option<SortOrder>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> anyhow::Result<Vec<EmbeddingRecord>> {
        let guard = self.rows.read().unwrap();
        let mut matched: Vec<EmbeddingRecord> =
            guard.iter().filter(|r| filter.matches(r)).cloned().collect();
        drop(guard);

        if let Some(sort) = sort {
            matched.sort_by(|a, b| {
                let ord = sort_key(a, &sort.field)
                    .partial_cmp(&sort_key(b, &sort.field))
                    .unwrap_or(std::cmp::Ordering::Equal);
                if sort.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let start = offset.unwrap_or(0).min(matched.len());
        let end = limit.map(|l| (start + l).min(matched.len())).unwrap_or(matched.len());
        Ok(matched[start..end].to_vec())
    }

    async fn delete(&self, filter: &RecordFilter) -> anyhow::Result<Vec<Uuid>> {
        let mut guard = self.rows.write().unwrap();
        let deleted: Vec<Uuid> = guard
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.uuid)
            .collect();
        guard.retain(|r| !filter.matches(r));
        Ok(deleted)
    }

    async fn count(&self, namespace: Option<&str>) -> anyhow::Result<usize> {
        let guard = self.rows.read().unwrap();
        Ok(match namespace {
            Some(ns) => guard.iter().filter(|r| r.namespace == ns).count(),
            None => guard.len(),
        })
    }

    async fn get_by_ids(&self, uuids: &[Uuid]) -> anyhow::Result<Vec<EmbeddingRecord>> {
        let guard = self.rows.read().unwrap();
        let by_id: HashMap<Uuid, &EmbeddingRecord> =
            guard.iter().map(|r| (r.uuid, r)).collect();
        Ok(uuids
            .iter()
            .filter_map(|id| by_id.get(id).map(|r| (*r).clone()))
            .collect())
    }

    async fn set_derived(
        &self,
        uuids: &[Uuid],
        key: &str,
        values: Vec<Value>,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            uuids.len() == values.len(),
            "set_derived got {} uuids but {} values",
            uuids.len(),
            values.len()
        );
        let mut guard = self.rows.write().unwrap();
        let mut by_uuid: HashMap<Uuid, Value> =
            uuids.iter().cloned().zip(values).collect();
        for row in guard.iter_mut() {
            if let Some(value) = by_uuid.remove(&row.uuid) {
                if !row.derived.is_object() {
                    row.derived = serde_json::json!({});
                }
                row.derived[key] = value;
            }
        }
        Ok(())
    }

    async fn raw_query(&self, _text: &str) -> anyhow::Result<Vec<Value>> {
        anyhow::bail!("raw queries are not supported by the in-memory store")
    }
}

/// Sortable projection of a record field; only numeric-or-string fields are
/// meaningful to sort on.
fn sort_key(record: &EmbeddingRecord, field: &str) -> f64 {
    match field {
        "created_at" => record.created_at.timestamp_micros() as f64,
        "distance_score" => record.distance_score().unwrap_or(f64::NEG_INFINITY),
        other => record
            .derived
            .get(other)
            .and_then(|v| v.as_f64())
            .unwrap_or(f64::NEG_INFINITY),
    }
}
