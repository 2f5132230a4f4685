//! Index lifecycle: explicit full rebuilds from store snapshots.

use uuid::Uuid;

use crate::errors::{CoreError, Result};
use crate::filter::RecordFilter;
use crate::registry::Registry;

/// Rebuild the namespace's ANN index from the store's current
/// `(uuid, vector)` pairs. Not incremental: the result is exactly as fresh
/// as the snapshot read here. Serialized against other structural
/// operations on the namespace.
pub async fn build(registry: &Registry, namespace: &str) -> Result<usize> {
    let state = registry.namespace(namespace);
    let _structural = state.structural.lock().await;

    let filter = RecordFilter::namespace_only(namespace);
    let rows = registry
        .store()
        .fetch(&filter, None, None, None)
        .await
        .map_err(CoreError::store)?;

    let (uuids, vectors): (Vec<Uuid>, Vec<Vec<f32>>) =
        rows.into_iter().map(|r| (r.uuid, r.vector)).unzip();
    let count = uuids.len();

    registry
        .index()
        .build(namespace, uuids, vectors)
        .await
        .map_err(CoreError::index)?;
    tracing::info!("Built index for namespace {} from {} vectors", namespace, count);
    Ok(count)
}

pub async fn has_index(registry: &Registry, namespace: &str) -> bool {
    registry.index().has_index(namespace).await
}
