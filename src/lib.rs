//! Curator Vectors
//!
//! Coordination layer for an embedding store: keeps a relational metadata
//! store and a per-namespace ANN index consistent under concurrent
//! add/delete/reset, answers filtered nearest-neighbor queries, and runs
//! drift-scoring and projection jobs that feed an active-learning sampler.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod drift;
pub mod filter;
pub mod guard;
pub mod index;
pub mod jobs;
pub mod lifecycle;
pub mod model;
pub mod projection;
pub mod query;
pub mod registry;
pub mod sampler;
pub mod store;

pub use model::*;
pub use registry::Registry;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    pub const DEFAULT_TOP_K: usize = 10;
    pub const DEFAULT_JOB_ATTEMPTS: u32 = 3;
    pub const DEFAULT_JOB_BACKOFF_SECS: u64 = 60;
    pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;
}

/// Error types for the coordination layer
pub mod errors {
    pub type Result<T> = std::result::Result<T, CoreError>;

    #[derive(Debug, thiserror::Error)]
    pub enum CoreError {
        #[error("arity mismatch for {field}: got {got} values for {expected} records")]
        ArityMismatch {
            field: &'static str,
            got: usize,
            expected: usize,
        },

        #[error("filter does not constrain the namespace key")]
        MissingNamespace,

        #[error("filter matched no rows in namespace {0}")]
        EmptyFilterResult(String),

        #[error("no index built for namespace {0}")]
        IndexNotBuilt(String),

        #[error("no drift scores for namespace {0}, run drift scoring first")]
        NoDriftScores(String),

        #[error("singular covariance for class {class}: {samples} samples across {dims} dimensions")]
        SingularCovariance {
            class: String,
            samples: usize,
            dims: usize,
        },

        #[error("reset of namespace {namespace} cleared the store but failed to clear the index: {detail}")]
        ResetPartialFailure { namespace: String, detail: String },

        #[error("quota exceeded for {kind} in namespace {namespace} (limit {limit})")]
        QuotaExceeded {
            kind: String,
            namespace: String,
            limit: usize,
        },

        #[error("rate limited for {kind} in namespace {namespace} ({limit} ops per {window_secs}s)")]
        RateLimited {
            kind: String,
            namespace: String,
            limit: u32,
            window_secs: u64,
        },

        #[error("invalid filter: {0}")]
        InvalidFilter(String),

        #[error("dimension mismatch: expected {expected}, got {actual}")]
        DimensionMismatch { expected: usize, actual: usize },

        #[error("job {0} not found")]
        JobNotFound(uuid::Uuid),

        #[error("store error: {0}")]
        Store(String),

        #[error("index error: {0}")]
        Index(String),

        #[error("projection error: {0}")]
        Projection(String),
    }

    impl CoreError {
        /// Wrap an error surfaced by the metadata store engine.
        pub fn store(err: anyhow::Error) -> Self {
            CoreError::Store(format!("{:#}", err))
        }

        /// Wrap an error surfaced by the ANN index engine.
        pub fn index(err: anyhow::Error) -> Self {
            CoreError::Index(format!("{:#}", err))
        }
    }
}
