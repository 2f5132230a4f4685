use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::guard::AdmissionGuard;
use crate::index::VectorIndex;
use crate::model::{ArtifactStatus, DriftReport, ProjectionRun};
use crate::store::MetadataStore;

/// Per-namespace coordination state.
pub struct NamespaceState {
    /// Serializes structural operations (reset, build, whole-namespace
    /// delete). At most one may run per namespace at a time.
    pub structural: tokio::sync::Mutex<()>,
    /// Bumped by every store mutation; derived artifacts are stamped with
    /// the generation they were computed against.
    generation: AtomicU64,
    artifacts: Mutex<Artifacts>,
}

#[derive(Default)]
struct Artifacts {
    drift: Option<DriftReport>,
    projection: Option<ProjectionRun>,
}

impl NamespaceState {
    fn new() -> Self {
        Self {
            structural: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            artifacts: Mutex::new(Artifacts::default()),
        }
    }
}

/// Explicit registry mapping namespaces to their coordination state, plus
/// the shared store/index handles. Constructed once at startup and passed
/// by `Arc` to every operation; there is no process-wide mutable global.
pub struct Registry {
    store: Arc<dyn MetadataStore>,
    index: Arc<dyn VectorIndex>,
    guard: AdmissionGuard,
    namespaces: Mutex<HashMap<String, Arc<NamespaceState>>>,
}

impl Registry {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        index: Arc<dyn VectorIndex>,
        guard: AdmissionGuard,
    ) -> Self {
        Self {
            store,
            index,
            guard,
            namespaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &dyn MetadataStore {
        self.store.as_ref()
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn guard(&self) -> &AdmissionGuard {
        &self.guard
    }

    /// Get-or-create the state for a namespace.
    pub fn namespace(&self, namespace: &str) -> Arc<NamespaceState> {
        let mut guard = self.namespaces.lock().unwrap();
        guard
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(NamespaceState::new()))
            .clone()
    }

    pub fn generation(&self, namespace: &str) -> u64 {
        self.namespace(namespace).generation.load(Ordering::SeqCst)
    }

    pub fn bump_generation(&self, namespace: &str) -> u64 {
        self.namespace(namespace)
            .generation
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    pub fn record_drift(&self, report: DriftReport) {
        let state = self.namespace(&report.namespace);
        state.artifacts.lock().unwrap().drift = Some(report);
    }

    pub fn latest_drift(&self, namespace: &str) -> Option<DriftReport> {
        self.namespace(namespace).artifacts.lock().unwrap().drift.clone()
    }

    /// Record a projection run, superseding (not updating) the prior one.
    pub fn record_projection(&self, run: ProjectionRun) {
        let state = self.namespace(&run.namespace);
        state.artifacts.lock().unwrap().projection = Some(run);
    }

    pub fn latest_projection(&self, namespace: &str) -> Option<ProjectionRun> {
        self.namespace(namespace)
            .artifacts
            .lock()
            .unwrap()
            .projection
            .clone()
    }

    /// Drop all derived artifacts for a namespace (reset path).
    pub fn clear_artifacts(&self, namespace: &str) {
        let state = self.namespace(namespace);
        *state.artifacts.lock().unwrap() = Artifacts::default();
    }

    pub fn artifact_status(&self, namespace: &str) -> ArtifactStatus {
        let current = self.generation(namespace);
        let state = self.namespace(namespace);
        let artifacts = state.artifacts.lock().unwrap();
        let drift_generation = artifacts.drift.as_ref().map(|d| d.generation);
        let projection_generation = artifacts.projection.as_ref().map(|p| p.generation);
        ArtifactStatus {
            namespace: namespace.to_string(),
            current_generation: current,
            drift_stale: drift_generation.map(|g| g != current).unwrap_or(false),
            drift_generation,
            projection_stale: projection_generation.map(|g| g != current).unwrap_or(false),
            projection_generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::AdmissionGuard;
    use crate::index::BruteForceIndex;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn registry() -> Registry {
        Registry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(BruteForceIndex::new()),
            AdmissionGuard::unlimited(),
        )
    }

    #[test]
    fn generations_start_at_zero_and_bump() {
        let reg = registry();
        assert_eq!(reg.generation("a"), 0);
        assert_eq!(reg.bump_generation("a"), 1);
        assert_eq!(reg.generation("a"), 1);
        assert_eq!(reg.generation("b"), 0);
    }

    #[test]
    fn artifact_status_tracks_staleness() {
        let reg = registry();
        reg.record_drift(DriftReport {
            namespace: "a".into(),
            generation: reg.generation("a"),
            scored: Default::default(),
            skipped_labels: vec![],
            failed_classes: vec![],
            computed_at: Utc::now(),
        });
        assert!(!reg.artifact_status("a").drift_stale);

        reg.bump_generation("a");
        let status = reg.artifact_status("a");
        assert!(status.drift_stale);
        assert_eq!(status.drift_generation, Some(0));
        assert_eq!(status.current_generation, 1);
    }
}
