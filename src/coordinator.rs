//! Write-path coordination between the metadata store and the ANN index.
//!
//! The store is written first and is always authoritative; the index is a
//! derived cache, refreshed by explicit rebuild rather than touched
//! synchronously on add. Structural operations (reset, whole-namespace
//! delete, index build) serialize on the per-namespace mutex.

use serde_json::Value;
use uuid::Uuid;

use crate::errors::{CoreError, Result};
use crate::filter::RecordFilter;
use crate::guard::ResourceKind;
use crate::model::{broadcast_opt, AddRequest, DeleteOutcome, NewEmbedding};
use crate::registry::Registry;

/// Normalize scalar-or-list fields, then write the rows to the store. The
/// index is deliberately not touched; callers rebuild it explicitly.
pub async fn add(registry: &Registry, namespace: &str, req: AddRequest) -> Result<Vec<Uuid>> {
    registry.guard().check_rate(ResourceKind::Records, namespace)?;

    let n = req.vectors.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let source_uris = req.source_uris.broadcast("source_uris", n)?;
    let dataset_labels = req.dataset_labels.broadcast("dataset_labels", n)?;
    let inference_classes = broadcast_opt("inference_classes", &req.inference_classes, n)?;
    let ground_truth_labels = broadcast_opt("ground_truth_labels", &req.ground_truth_labels, n)?;
    let inference_scores = broadcast_opt("inference_scores", &req.inference_scores, n)?;

    let current = registry
        .store()
        .count(Some(namespace))
        .await
        .map_err(CoreError::store)?;
    registry
        .guard()
        .check_quota(ResourceKind::Records, namespace, current + n)?;

    let rows: Vec<NewEmbedding> = req
        .vectors
        .into_iter()
        .enumerate()
        .map(|(i, vector)| NewEmbedding {
            namespace: namespace.to_string(),
            vector,
            source_uri: source_uris[i].clone(),
            dataset_label: dataset_labels[i].clone(),
            inference_class: inference_classes[i].clone(),
            ground_truth_label: ground_truth_labels[i].clone(),
            inference_scores: inference_scores[i].clone().unwrap_or_default(),
        })
        .collect();

    let uuids = registry.store().insert(rows).await.map_err(CoreError::store)?;
    registry.bump_generation(namespace);
    tracing::info!(
        "Added {} records to namespace {} (index rebuild deferred)",
        uuids.len(),
        namespace
    );
    Ok(uuids)
}

/// Delete matching rows from the store, then reconcile the index: the
/// whole-namespace shape drops the index outright, anything narrower
/// removes ids one by one. Returns the deleted uuids so callers can
/// reconcile derived artifacts; the coordinator does not cascade.
pub async fn delete(
    registry: &Registry,
    namespace: &str,
    filter_json: Value,
) -> Result<DeleteOutcome> {
    registry.guard().check_rate(ResourceKind::Records, namespace)?;

    let filter = RecordFilter::try_from(filter_json)?;
    let filter_ns = filter.namespace().ok_or(CoreError::MissingNamespace)?;
    if filter_ns != namespace {
        return Err(CoreError::InvalidFilter(format!(
            "filter namespace {} does not match operation namespace {}",
            filter_ns, namespace
        )));
    }

    if filter.is_namespace_only() {
        let state = registry.namespace(namespace);
        let _structural = state.structural.lock().await;

        let deleted = registry.store().delete(&filter).await.map_err(CoreError::store)?;
        registry
            .index()
            .delete_namespace(namespace)
            .await
            .map_err(CoreError::index)?;
        registry.bump_generation(namespace);
        tracing::info!(
            "Deleted namespace {}: {} rows, index dropped",
            namespace,
            deleted.len()
        );
        return Ok(DeleteOutcome {
            deleted,
            index_dropped: true,
        });
    }

    let deleted = registry.store().delete(&filter).await.map_err(CoreError::store)?;
    if !deleted.is_empty() {
        if registry.index().has_index(namespace).await {
            registry
                .index()
                .delete_ids(namespace, &deleted)
                .await
                .map_err(CoreError::index)?;
        }
        registry.bump_generation(namespace);
    }
    tracing::info!("Deleted {} rows from namespace {}", deleted.len(), namespace);
    Ok(DeleteOutcome {
        deleted,
        index_dropped: false,
    })
}

/// Destructive: clear the namespace's store rows and recreate an empty
/// index handle. Atomic from the caller's perspective; if the index clear
/// fails after the store clear succeeded the pair is inconsistent, which
/// surfaces as the fatal `ResetPartialFailure`.
pub async fn reset(registry: &Registry, namespace: &str) -> Result<()> {
    registry.guard().check_rate(ResourceKind::Records, namespace)?;

    let state = registry.namespace(namespace);
    let _structural = state.structural.lock().await;

    let filter = RecordFilter::namespace_only(namespace);
    registry.store().delete(&filter).await.map_err(CoreError::store)?;

    // Store is now empty; any index failure past this point must not be
    // swallowed.
    let cleared = async {
        registry.index().delete_namespace(namespace).await?;
        registry.index().build(namespace, Vec::new(), Vec::new()).await
    };
    if let Err(err) = cleared.await {
        tracing::error!(
            "Reset of namespace {} left the index poisoned: {:#}",
            namespace,
            err
        );
        return Err(CoreError::ResetPartialFailure {
            namespace: namespace.to_string(),
            detail: format!("{:#}", err),
        });
    }

    registry.clear_artifacts(namespace);
    registry.bump_generation(namespace);
    tracing::info!("Reset namespace {}", namespace);
    Ok(())
}
