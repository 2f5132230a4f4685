//! Read-path orchestration: filtered nearest-neighbor queries and plain
//! store reads.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::errors::{CoreError, Result};
use crate::filter::RecordFilter;
use crate::model::{EmbeddingRecord, FetchRequest, NeighborsRequest, NeighborsResult};
use crate::registry::Registry;
use crate::store::SortOrder;

/// Filtered kNN. The admissible set comes from the store; the index may
/// hold stale ids (deleted rows not yet rebuilt away) and anything outside
/// the admissible set is never returned, however close. The store is
/// authoritative for vector payloads, so returned vectors are re-fetched
/// by id rather than taken from the index.
pub async fn nearest_neighbors(
    registry: &Registry,
    req: NeighborsRequest,
) -> Result<NeighborsResult> {
    let filter = RecordFilter::try_from(req.filter)?;
    let namespace = filter
        .namespace()
        .ok_or(CoreError::MissingNamespace)?
        .to_string();
    if namespace != req.namespace {
        return Err(CoreError::InvalidFilter(format!(
            "filter namespace {} does not match requested namespace {}",
            namespace, req.namespace
        )));
    }

    let rows = registry
        .store()
        .fetch(&filter, None, None, None)
        .await
        .map_err(CoreError::store)?;
    if rows.is_empty() {
        return Err(CoreError::EmptyFilterResult(namespace));
    }
    let admissible: HashSet<Uuid> = rows.iter().map(|r| r.uuid).collect();

    if !registry.index().has_index(&namespace).await {
        return Err(CoreError::IndexNotBuilt(namespace));
    }
    let hits = registry
        .index()
        .query(&namespace, &req.vector, req.k, Some(&admissible))
        .await
        .map_err(CoreError::index)?;

    let ids: Vec<Uuid> = hits.iter().map(|(id, _)| *id).collect();
    let records = registry
        .store()
        .get_by_ids(&ids)
        .await
        .map_err(CoreError::store)?;
    let by_id: HashMap<Uuid, EmbeddingRecord> =
        records.into_iter().map(|r| (r.uuid, r)).collect();

    let mut result = NeighborsResult {
        ids: Vec::with_capacity(hits.len()),
        vectors: Vec::with_capacity(hits.len()),
        distances: Vec::with_capacity(hits.len()),
    };
    for (id, distance) in hits {
        // Rows deleted between the admissible fetch and this lookup simply
        // drop out; the store wins.
        if let Some(record) = by_id.get(&id) {
            result.ids.push(id);
            result.vectors.push(record.vector.clone());
            result.distances.push(distance);
        }
    }
    tracing::debug!(
        "nearest_neighbors in {} returned {} of k={}",
        req.namespace,
        result.ids.len(),
        req.k
    );
    Ok(result)
}

/// Plain store read with the JSON filter shape.
pub async fn fetch(registry: &Registry, req: FetchRequest) -> Result<Vec<EmbeddingRecord>> {
    let filter = RecordFilter::try_from(req.filter)?;
    let sort = req.sort_by.map(|field| SortOrder {
        field,
        descending: req.descending,
    });
    registry
        .store()
        .fetch(&filter, sort, req.limit, req.offset)
        .await
        .map_err(CoreError::store)
}

pub async fn count(registry: &Registry, namespace: Option<&str>) -> Result<usize> {
    registry.store().count(namespace).await.map_err(CoreError::store)
}
