//! HTTP surface over the coordination layer.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::config::Config;
use crate::coordinator;
use crate::errors::CoreError;
use crate::index::{BruteForceIndex, VectorIndex};
use crate::jobs::{JobHandle, JobInfo, JobRunner};
use crate::lifecycle;
use crate::model::*;
use crate::projection::RandomProjection;
use crate::query;
use crate::registry::Registry;
use crate::sampler;
use crate::store::MemoryStore;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub jobs: Arc<JobRunner>,
}

/// Wraps `CoreError` for the axum boundary, mapping the taxonomy onto
/// status codes: validation 400, state-precondition 409, admission 429,
/// numerical 422, everything infrastructural 500.
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::ArityMismatch { .. }
            | CoreError::MissingNamespace
            | CoreError::InvalidFilter(_)
            | CoreError::DimensionMismatch { .. } => StatusCode::BAD_REQUEST,
            CoreError::EmptyFilterResult(_)
            | CoreError::IndexNotBuilt(_)
            | CoreError::NoDriftScores(_) => StatusCode::CONFLICT,
            CoreError::JobNotFound(_) => StatusCode::NOT_FOUND,
            CoreError::QuotaExceeded { .. } | CoreError::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            CoreError::SingularCovariance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::ResetPartialFailure { .. }
            | CoreError::Store(_)
            | CoreError::Index(_)
            | CoreError::Projection(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "version": crate::VERSION }))
}

async fn add(
    Path(namespace): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<AddRequest>,
) -> ApiResult<Json<AddResponse>> {
    let uuids = coordinator::add(&state.registry, &namespace, req).await?;
    Ok(Json(AddResponse { uuids }))
}

#[derive(Deserialize)]
struct DeleteBody {
    filter: serde_json::Value,
}

async fn delete(
    Path(namespace): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<DeleteBody>,
) -> ApiResult<Json<DeleteOutcome>> {
    let outcome = coordinator::delete(&state.registry, &namespace, body.filter).await?;
    Ok(Json(outcome))
}

async fn reset(
    Path(namespace): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    coordinator::reset(&state.registry, &namespace).await?;
    Ok(Json(json!({ "reset": namespace })))
}

async fn build_index(
    Path(namespace): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let indexed = lifecycle::build(&state.registry, &namespace).await?;
    Ok(Json(json!({ "namespace": namespace, "indexed": indexed })))
}

async fn index_status(
    Path(namespace): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let built = lifecycle::has_index(&state.registry, &namespace).await;
    Json(json!({ "namespace": namespace, "built": built }))
}

async fn neighbors(
    State(state): State<AppState>,
    Json(req): Json<NeighborsRequest>,
) -> ApiResult<Json<NeighborsResult>> {
    Ok(Json(query::nearest_neighbors(&state.registry, req).await?))
}

async fn fetch(
    State(state): State<AppState>,
    Json(req): Json<FetchRequest>,
) -> ApiResult<Json<Vec<EmbeddingRecord>>> {
    Ok(Json(query::fetch(&state.registry, req).await?))
}

#[derive(Deserialize)]
struct CountParams {
    namespace: Option<String>,
}

async fn count(
    State(state): State<AppState>,
    Query(params): Query<CountParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let count = query::count(&state.registry, params.namespace.as_deref()).await?;
    Ok(Json(json!({ "count": count })))
}

#[derive(Deserialize)]
struct DriftJobBody {
    training_partition: String,
    target_partition: String,
}

async fn drift_job(
    Path(namespace): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<DriftJobBody>,
) -> ApiResult<Json<JobHandle>> {
    let handle = state.jobs.run_drift_and_projection(
        &namespace,
        &body.training_partition,
        &body.target_partition,
    )?;
    Ok(Json(handle))
}

async fn job_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<JobInfo>> {
    Ok(Json(state.jobs.status(id)?))
}

async fn sample(
    Path(namespace): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<SampleRequest>,
) -> ApiResult<Json<Vec<SampleSelection>>> {
    Ok(Json(sampler::sample(&state.registry, &namespace, req).await?))
}

async fn artifacts(
    Path(namespace): Path<String>,
    State(state): State<AppState>,
) -> Json<ArtifactStatus> {
    Json(state.registry.artifact_status(&namespace))
}

async fn projection_latest(
    Path(namespace): Path<String>,
    State(state): State<AppState>,
) -> Json<Option<ProjectionRun>> {
    Json(state.registry.latest_projection(&namespace))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/namespaces/:namespace/add", post(add))
        .route("/namespaces/:namespace/delete", post(delete))
        .route("/namespaces/:namespace/reset", post(reset))
        .route("/namespaces/:namespace/build-index", post(build_index))
        .route("/namespaces/:namespace/index", get(index_status))
        .route("/namespaces/:namespace/jobs/drift", post(drift_job))
        .route("/namespaces/:namespace/sample", post(sample))
        .route("/namespaces/:namespace/artifacts", get(artifacts))
        .route("/namespaces/:namespace/projection", get(projection_latest))
        .route("/query", post(neighbors))
        .route("/fetch", post(fetch))
        .route("/count", get(count))
        .route("/jobs/:id", get(job_status))
        .with_state(state)
}

/// Wire up the reference backends and serve. External store/index engines
/// can build their own `AppState` and call [`router`] directly.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let index: Arc<dyn VectorIndex> = match &config.persistence_dir {
        Some(dir) => Arc::new(BruteForceIndex::with_persistence(dir.clone())?),
        None => Arc::new(BruteForceIndex::new()),
    };
    let registry = Arc::new(Registry::new(store, index, config.guard()));
    let reducer = Arc::new(RandomProjection::new(config.projection_seed));
    let jobs = Arc::new(JobRunner::new(registry.clone(), reducer, config.job_policy));
    let state = AppState { registry, jobs };

    let app = router(state);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("API listening on {}", config.bind_addr);
    serve(listener, app).await?;
    Ok(())
}
