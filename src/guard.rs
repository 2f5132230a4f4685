use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::errors::{CoreError, Result};

/// Resource classes the admission guard distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Records,
    Jobs,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Records => write!(f, "records"),
            ResourceKind::Jobs => write!(f, "jobs"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_ops: u32,
    pub window: Duration,
}

/// Cross-cutting admission check consulted before mutations. Both checks
/// are optional; an unconfigured guard always passes.
pub struct AdmissionGuard {
    max_records_per_namespace: Option<usize>,
    rate_limit: Option<RateLimit>,
    windows: Mutex<HashMap<(String, ResourceKind), (Instant, u32)>>,
}

impl AdmissionGuard {
    pub fn new(max_records_per_namespace: Option<usize>, rate_limit: Option<RateLimit>) -> Self {
        Self {
            max_records_per_namespace,
            rate_limit,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    /// Quota check against the projected post-operation count for the
    /// namespace. The caller supplies the count since only it knows the
    /// store.
    pub fn check_quota(
        &self,
        kind: ResourceKind,
        namespace: &str,
        projected: usize,
    ) -> Result<()> {
        if kind == ResourceKind::Records {
            if let Some(limit) = self.max_records_per_namespace {
                if projected > limit {
                    return Err(CoreError::QuotaExceeded {
                        kind: kind.to_string(),
                        namespace: namespace.to_string(),
                        limit,
                    });
                }
            }
        }
        Ok(())
    }

    /// Fixed-window rate check; counts one operation per call.
    pub fn check_rate(&self, kind: ResourceKind, namespace: &str) -> Result<()> {
        let Some(limit) = self.rate_limit else {
            return Ok(());
        };
        let mut windows = self.windows.lock().unwrap();
        let entry = windows
            .entry((namespace.to_string(), kind))
            .or_insert_with(|| (Instant::now(), 0));
        if entry.0.elapsed() >= limit.window {
            *entry = (Instant::now(), 0);
        }
        if entry.1 >= limit.max_ops {
            return Err(CoreError::RateLimited {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                limit: limit.max_ops,
                window_secs: limit.window.as_secs(),
            });
        }
        entry.1 += 1;
        Ok(())
    }
}
