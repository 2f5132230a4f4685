use std::path::PathBuf;
use std::time::Duration;

use crate::defaults;
use crate::guard::{AdmissionGuard, RateLimit};

/// Retry policy for background jobs.
#[derive(Debug, Clone, Copy)]
pub struct JobPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            attempts: defaults::DEFAULT_JOB_ATTEMPTS,
            backoff: Duration::from_secs(defaults::DEFAULT_JOB_BACKOFF_SECS),
        }
    }
}

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub persistence_dir: Option<PathBuf>,
    pub job_policy: JobPolicy,
    pub max_records_per_namespace: Option<usize>,
    pub rate_limit: Option<RateLimit>,
    pub projection_seed: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let bind_addr =
            std::env::var("CURATOR_BIND").unwrap_or_else(|_| "0.0.0.0:8081".to_string());
        let persistence_dir = std::env::var("CURATOR_INDEX_DIR").ok().map(PathBuf::from);

        let attempts = env_parse("CURATOR_JOB_ATTEMPTS").unwrap_or(defaults::DEFAULT_JOB_ATTEMPTS);
        let backoff_secs =
            env_parse("CURATOR_JOB_BACKOFF_SECS").unwrap_or(defaults::DEFAULT_JOB_BACKOFF_SECS);

        let max_records_per_namespace = env_parse("CURATOR_MAX_RECORDS_PER_NAMESPACE");
        let rate_limit = env_parse::<u32>("CURATOR_RATE_LIMIT_OPS").map(|max_ops| RateLimit {
            max_ops,
            window: Duration::from_secs(
                env_parse("CURATOR_RATE_WINDOW_SECS")
                    .unwrap_or(defaults::DEFAULT_RATE_WINDOW_SECS),
            ),
        });

        let projection_seed = env_parse("CURATOR_PROJECTION_SEED").unwrap_or(42);

        Self {
            bind_addr,
            persistence_dir,
            job_policy: JobPolicy {
                attempts: attempts.max(1),
                backoff: Duration::from_secs(backoff_secs),
            },
            max_records_per_namespace,
            rate_limit,
            projection_seed,
        }
    }

    pub fn guard(&self) -> AdmissionGuard {
        AdmissionGuard::new(self.max_records_per_namespace, self.rate_limit)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
