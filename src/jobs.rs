//! Background job runner for the analysis pipeline.
//!
//! At-least-once, bounded retries with a fixed backoff, no cancellation of
//! in-flight work. Jobs must be idempotent; drift scoring and projection
//! both recompute-and-overwrite, so a retry after partial completion is
//! safe.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::JobPolicy;
use crate::drift;
use crate::errors::{CoreError, Result};
use crate::guard::ResourceKind;
use crate::model::DriftReport;
use crate::projection::{self, ProjectionReducer};
use crate::registry::Registry;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub namespace: String,
    pub kind: &'static str,
    pub status: JobStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Drift report from the successful attempt.
    pub report: Option<DriftReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
}

pub struct JobRunner {
    registry: Arc<Registry>,
    reducer: Arc<dyn ProjectionReducer>,
    policy: JobPolicy,
    jobs: Arc<Mutex<HashMap<Uuid, JobInfo>>>,
    permits: Arc<Semaphore>,
}

impl JobRunner {
    pub fn new(
        registry: Arc<Registry>,
        reducer: Arc<dyn ProjectionReducer>,
        policy: JobPolicy,
    ) -> Self {
        Self {
            registry,
            reducer,
            policy,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(num_cpus::get().max(1))),
        }
    }

    pub fn status(&self, id: Uuid) -> Result<JobInfo> {
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(CoreError::JobNotFound(id))
    }

    /// Queue one job that runs drift scoring then the projection pass for
    /// the namespace. Returns immediately with a handle; poll `status`.
    pub fn run_drift_and_projection(
        &self,
        namespace: &str,
        training_partition: &str,
        target_partition: &str,
    ) -> Result<JobHandle> {
        self.registry
            .guard()
            .check_rate(ResourceKind::Jobs, namespace)?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        self.jobs.lock().unwrap().insert(
            id,
            JobInfo {
                id,
                namespace: namespace.to_string(),
                kind: "drift_and_projection",
                status: JobStatus::Queued,
                attempts: 0,
                created_at: now,
                updated_at: now,
                report: None,
            },
        );

        let registry = self.registry.clone();
        let reducer = self.reducer.clone();
        let policy = self.policy;
        let jobs = self.jobs.clone();
        let permits = self.permits.clone();
        let namespace = namespace.to_string();
        let training = training_partition.to_string();
        let target = target_partition.to_string();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    update(&jobs, id, |job| {
                        job.status = JobStatus::Failed {
                            error: "job runner shut down".to_string(),
                        };
                    });
                    return;
                }
            };
            update(&jobs, id, |job| job.status = JobStatus::Running);

            let mut attempt = 0;
            loop {
                attempt += 1;
                update(&jobs, id, |job| job.attempts = attempt);
                match run_once(&registry, reducer.as_ref(), &namespace, &training, &target).await
                {
                    Ok(report) => {
                        update(&jobs, id, |job| {
                            job.status = JobStatus::Succeeded;
                            job.report = Some(report.clone());
                        });
                        break;
                    }
                    Err(err) if attempt < policy.attempts => {
                        tracing::warn!(
                            "Job {} attempt {}/{} failed: {}; retrying in {:?}",
                            id,
                            attempt,
                            policy.attempts,
                            err,
                            policy.backoff
                        );
                        tokio::time::sleep(policy.backoff).await;
                    }
                    Err(err) => {
                        tracing::error!(
                            "Job {} failed after {} attempts: {}",
                            id,
                            attempt,
                            err
                        );
                        update(&jobs, id, |job| {
                            job.status = JobStatus::Failed {
                                error: err.to_string(),
                            };
                        });
                        break;
                    }
                }
            }
        });

        Ok(JobHandle { id })
    }
}

async fn run_once(
    registry: &Registry,
    reducer: &dyn ProjectionReducer,
    namespace: &str,
    training_partition: &str,
    target_partition: &str,
) -> Result<DriftReport> {
    let report =
        drift::compute_class_distances(registry, namespace, training_partition, target_partition)
            .await?;
    projection::run_projection(registry, reducer, namespace).await?;
    Ok(report)
}

fn update<F: FnOnce(&mut JobInfo)>(jobs: &Mutex<HashMap<Uuid, JobInfo>>, id: Uuid, apply: F) {
    let mut guard = jobs.lock().unwrap();
    if let Some(job) = guard.get_mut(&id) {
        apply(job);
        job.updated_at = Utc::now();
    }
}
