use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

/// The ANN index engine, as the coordination layer consumes it. One logical
/// index per namespace; always a derived, rebuildable projection of the
/// store, never a second source of truth. The crate ships
/// [`BruteForceIndex`] as the reference backend; an HNSW engine would
/// implement the same trait.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Full rebuild of the namespace index from a store snapshot. Replaces
    /// any prior index for the namespace.
    async fn build(
        &self,
        namespace: &str,
        uuids: Vec<Uuid>,
        vectors: Vec<Vec<f32>>,
    ) -> anyhow::Result<()>;

    /// k nearest neighbors to `vector`, optionally restricted to
    /// `allowed_ids`. Returns `(uuid, distance)` pairs in increasing
    /// distance order; ties break in the index's internal (stable) order.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        allowed_ids: Option<&HashSet<Uuid>>,
    ) -> anyhow::Result<Vec<(Uuid, f32)>>;

    /// Remove ids from the namespace index if present.
    async fn delete_ids(&self, namespace: &str, uuids: &[Uuid]) -> anyhow::Result<()>;

    /// Drop the whole namespace index.
    async fn delete_namespace(&self, namespace: &str) -> anyhow::Result<()>;

    async fn has_index(&self, namespace: &str) -> bool;

    /// Directory for index snapshots; engines without persistence may
    /// ignore it.
    fn set_persistence_dir(&self, path: PathBuf);
}

#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    namespace: String,
    entries: Vec<(Uuid, Vec<f32>)>,
}

/// Exact brute-force index over euclidean distance. Entries keep build
/// order, which makes tie-breaking stable within a process.
pub struct BruteForceIndex {
    namespaces: RwLock<HashMap<String, Vec<(Uuid, Vec<f32>)>>>,
    persistence_dir: Mutex<Option<PathBuf>>,
}

impl BruteForceIndex {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            persistence_dir: Mutex::new(None),
        }
    }

    /// Load any snapshots found in `dir` and keep persisting there.
    pub fn with_persistence(dir: PathBuf) -> anyhow::Result<Self> {
        let index = Self::new();
        if dir.is_dir() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    let data = std::fs::read(&path)?;
                    let snapshot: IndexSnapshot = serde_json::from_slice(&data)?;
                    tracing::info!(
                        "Loaded index snapshot for namespace {} ({} vectors)",
                        snapshot.namespace,
                        snapshot.entries.len()
                    );
                    index
                        .namespaces
                        .write()
                        .unwrap()
                        .insert(snapshot.namespace, snapshot.entries);
                }
            }
        } else {
            std::fs::create_dir_all(&dir)?;
        }
        index.set_persistence_dir(dir);
        Ok(index)
    }

    fn snapshot_path(&self, namespace: &str) -> Option<PathBuf> {
        self.persistence_dir
            .lock()
            .unwrap()
            .as_ref()
            .map(|dir| dir.join(format!("{}.index.json", namespace)))
    }

    fn persist(&self, namespace: &str) -> anyhow::Result<()> {
        let Some(path) = self.snapshot_path(namespace) else {
            return Ok(());
        };
        let guard = self.namespaces.read().unwrap();
        match guard.get(namespace) {
            Some(entries) => {
                let snapshot = IndexSnapshot {
                    namespace: namespace.to_string(),
                    entries: entries.clone(),
                };
                std::fs::write(&path, serde_json::to_vec(&snapshot)?)?;
            }
            None => {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }
}

impl Default for BruteForceIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Search candidate ordered so `BinaryHeap` acts as a max-heap on distance;
/// the farthest candidate pops first once the heap exceeds k.
struct Candidate {
    position: usize,
    uuid: Uuid,
    distance: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.position == other.position
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then(self.position.cmp(&other.position))
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[async_trait]
impl VectorIndex for BruteForceIndex {
    async fn build(
        &self,
        namespace: &str,
        uuids: Vec<Uuid>,
        vectors: Vec<Vec<f32>>,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            uuids.len() == vectors.len(),
            "build got {} uuids but {} vectors",
            uuids.len(),
            vectors.len()
        );
        let entries: Vec<(Uuid, Vec<f32>)> = uuids.into_iter().zip(vectors).collect();
        self.namespaces
            .write()
            .unwrap()
            .insert(namespace.to_string(), entries);
        self.persist(namespace)
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        allowed_ids: Option<&HashSet<Uuid>>,
    ) -> anyhow::Result<Vec<(Uuid, f32)>> {
        anyhow::ensure!(k > 0, "k must be > 0");
        let guard = self.namespaces.read().unwrap();
        let entries = guard
            .get(namespace)
            .ok_or_else(|| anyhow::anyhow!("no index for namespace {}", namespace))?;

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        for (position, (uuid, stored)) in entries.iter().enumerate() {
            if let Some(allowed) = allowed_ids {
                if !allowed.contains(uuid) {
                    continue;
                }
            }
            anyhow::ensure!(
                stored.len() == vector.len(),
                "dimension mismatch: query has {} dims, index has {}",
                vector.len(),
                stored.len()
            );
            let distance = euclidean(vector, stored);

            if heap.len() >= k {
                if let Some(worst) = heap.peek() {
                    if distance >= worst.distance {
                        continue;
                    }
                }
            }
            heap.push(Candidate {
                position,
                uuid: *uuid,
                distance,
            });
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut results: Vec<Candidate> = heap.into_iter().collect();
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        Ok(results.into_iter().map(|c| (c.uuid, c.distance)).collect())
    }

    async fn delete_ids(&self, namespace: &str, uuids: &[Uuid]) -> anyhow::Result<()> {
        let removed: HashSet<Uuid> = uuids.iter().cloned().collect();
        {
            let mut guard = self.namespaces.write().unwrap();
            if let Some(entries) = guard.get_mut(namespace) {
                entries.retain(|(uuid, _)| !removed.contains(uuid));
            }
        }
        self.persist(namespace)
    }

    async fn delete_namespace(&self, namespace: &str) -> anyhow::Result<()> {
        self.namespaces.write().unwrap().remove(namespace);
        self.persist(namespace)
    }

    async fn has_index(&self, namespace: &str) -> bool {
        self.namespaces.read().unwrap().contains_key(namespace)
    }

    fn set_persistence_dir(&self, path: PathBuf) {
        *self.persistence_dir.lock().unwrap() = Some(path);
    }
}
