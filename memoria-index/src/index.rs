//! Persistent HNSW-like vector index keyed by external string ids.
//!
//! An `Hnsw<'static, f32, DistCosine>` graph (pure-Rust ANN) behind a
//! single `RwLock`, with a soft-delete set filtered at search time because
//! HNSW graphs don't support point removal without breaking proximity
//! edges other points rely on. Generalized from a simple per-namespace
//! `HashMap<id, usize>` mapping into explicit free-list/tombstone
//! bookkeeping, and made self-persisting — this crate has no row store to
//! rebuild from on load, so it keeps its own `index.bin`.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use hnsw_rs::prelude::*;
use tracing::{debug, instrument, warn};

use memoria_core::config::VectorIndexConfig;
use memoria_core::error::Result;
use memoria_core::index_error::IndexError;

use crate::graph_file;
use crate::mapping::IdMapping;

/// Outcome of `initialize()`.
#[derive(Debug, Clone, Copy)]
pub struct InitializeOutcome {
    pub loaded: bool,
    pub vector_count: usize,
}

/// Outcome of `add()`.
#[derive(Debug, Clone, Copy)]
pub struct AddOutcome {
    pub slot: usize,
    pub is_update: bool,
}

/// Outcome of `search()`.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub ids: Vec<String>,
    pub distances: Vec<f32>,
}

struct State {
    hnsw: Hnsw<'static, f32, DistCosine>,
    mapping: IdMapping,
    /// Source of truth for persistence and rebuild; mirrors what's live in
    /// `hnsw` for slots that are not tombstoned.
    vectors: std::collections::HashMap<usize, Vec<f32>>,
}

/// Persistent approximate nearest-neighbor index over `D`-dimensional
/// L2-normalized vectors.
pub struct VectorIndex {
    config: VectorIndexConfig,
    state: RwLock<State>,
}

impl VectorIndex {
    pub fn new(config: VectorIndexConfig) -> Self {
        let hnsw = Self::build_graph(&config);
        Self {
            state: RwLock::new(State {
                hnsw,
                mapping: IdMapping::new(config.dimension),
                vectors: std::collections::HashMap::new(),
            }),
            config,
        }
    }

    fn build_graph(config: &VectorIndexConfig) -> Hnsw<'static, f32, DistCosine> {
        Hnsw::new(
            config.max_nb_connection,
            config.max_elements,
            config.max_layer,
            config.ef_construction,
            DistCosine,
        )
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Loads `index.bin` + `mapping.json` from `dir` if present, else
    /// leaves the index empty and sized for `max_elements`.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub fn initialize(&self, dir: &Path) -> Result<InitializeOutcome> {
        let points = graph_file::load(dir)?;
        let Some(points) = points else {
            return Ok(InitializeOutcome {
                loaded: false,
                vector_count: 0,
            });
        };
        let graph_len = points.len();
        let mapping = IdMapping::load(dir, graph_len)?.unwrap_or_else(|| IdMapping::new(self.config.dimension));

        let hnsw = Self::build_graph(&self.config);
        let mut vectors = std::collections::HashMap::with_capacity(points.len());
        let live: Vec<(&Vec<f32>, usize)> = points
            .iter()
            .filter(|(slot, _)| !mapping.is_tombstoned(*slot))
            .map(|(slot, v)| (v, *slot))
            .collect();
        if !live.is_empty() {
            hnsw.parallel_insert(&live);
        }
        for (slot, vector) in points {
            vectors.insert(slot, vector);
        }

        let vector_count = mapping.len();
        debug!(vector_count, "loaded vector index from disk");
        let mut state = self.state.write().map_err(|_| IndexError::LockPoisoned)?;
        *state = State {
            hnsw,
            mapping,
            vectors,
        };
        Ok(InitializeOutcome {
            loaded: true,
            vector_count,
        })
    }

    /// Adds or logically replaces the vector for `id`.
    pub fn add(&self, id: &str, vector: &[f32]) -> Result<AddOutcome> {
        if vector.len() != self.config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            }
            .into());
        }
        let mut state = self.state.write().map_err(|_| IndexError::LockPoisoned)?;
        if state.mapping.next_slot() >= self.config.max_elements && state.mapping.bind_needs_growth(id) {
            return Err(IndexError::CapacityExceeded {
                max_elements: self.config.max_elements,
            }
            .into());
        }
        let (slot, is_update) = state.mapping.bind(id);
        state.hnsw.insert((vector, slot));
        state.vectors.insert(slot, vector.to_vec());
        Ok(AddOutcome { slot, is_update })
    }

    /// Unmaps `id`, tombstoning its slot. Idempotent.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().map_err(|_| IndexError::LockPoisoned)?;
        Ok(state.mapping.remove(id))
    }

    pub fn has(&self, id: &str) -> bool {
        self.state
            .read()
            .map(|s| s.mapping.contains(id))
            .unwrap_or(false)
    }

    pub fn get_position(&self, id: &str) -> Option<usize> {
        self.state.read().ok().and_then(|s| s.mapping.get_slot(id))
    }

    pub fn get_all_ids(&self) -> Vec<String> {
        self.state.read().map(|s| s.mapping.all_ids()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.mapping.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fragmentation(&self) -> f64 {
        self.state.read().map(|s| s.mapping.fragmentation()).unwrap_or(0.0)
    }

    /// Whether tombstones exceed 30% of allocated slots.
    pub fn needs_rebuild(&self) -> bool {
        self.fragmentation() > 0.3
    }

    /// Returns up to `k` active results ordered by ascending distance.
    /// Over-fetches internally to cover expected tombstones.
    pub fn search(&self, query: &[f32], k: usize, ef_search: Option<usize>) -> Result<SearchOutcome> {
        if query.len() != self.config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                actual: query.len(),
            }
            .into());
        }
        if k == 0 {
            return Ok(SearchOutcome::default());
        }
        let state = self.state.read().map_err(|_| IndexError::LockPoisoned)?;
        let ef = ef_search.unwrap_or(self.config.ef_search).max(k);
        let tombstone_headroom = (state.mapping.fragmentation() * state.mapping.next_slot() as f64).ceil() as usize;
        let over_fetch = k + tombstone_headroom + 1;

        let neighbours = state.hnsw.search(query, over_fetch, ef);
        let mut ids = Vec::with_capacity(k);
        let mut distances = Vec::with_capacity(k);
        for n in neighbours {
            if state.mapping.is_tombstoned(n.d_id) {
                continue;
            }
            if let Some(id) = state.mapping.get_id(n.d_id) {
                ids.push(id.to_string());
                distances.push(n.distance);
                if ids.len() == k {
                    break;
                }
            }
        }
        Ok(SearchOutcome { ids, distances })
    }

    /// Atomically persists `mapping.json` then `index.bin`, in that order.
    /// A crash between the two writes leaves the mapping referencing slots
    /// the graph file doesn't have yet; `initialize()` trims those entries
    /// back out on load rather than treating it as corruption.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub fn save(&self, dir: &Path) -> Result<()> {
        let state = self.state.read().map_err(|_| IndexError::LockPoisoned)?;
        state.mapping.save(dir)?;
        let mut points: Vec<(usize, Vec<f32>)> = state.vectors.iter().map(|(s, v)| (*s, v.clone())).collect();
        points.sort_by_key(|(slot, _)| *slot);
        graph_file::save(dir, self.config.dimension, &points)?;
        Ok(())
    }

    /// Rebuilds the live HNSW graph with only currently-mapped (non-
    /// tombstoned) vectors, dropping stale edges left behind by reused
    /// slots. Operational repair utility.
    pub fn rebuild(&self) -> Result<()> {
        let mut state = self.state.write().map_err(|_| IndexError::LockPoisoned)?;
        let live: Vec<(usize, Vec<f32>)> = state
            .vectors
            .iter()
            .filter(|(slot, _)| !state.mapping.is_tombstoned(**slot))
            .map(|(s, v)| (*s, v.clone()))
            .collect();
        let hnsw = Self::build_graph(&self.config);
        let batch: Vec<(&Vec<f32>, usize)> = live.iter().map(|(s, v)| (v, *s)).collect();
        if !batch.is_empty() {
            hnsw.parallel_insert(&batch);
        }
        let live_slots: std::collections::HashSet<usize> = live.iter().map(|(s, _)| *s).collect();
        state.vectors.retain(|slot, _| live_slots.contains(slot));
        state.hnsw = hnsw;
        warn!(kept = live_slots.len(), "vector index rebuilt, tombstones discarded");
        Ok(())
    }
}

pub fn default_vector_dir(base: &Path) -> PathBuf {
    base.join("vector")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> VectorIndexConfig {
        VectorIndexConfig {
            dimension: 8,
            max_elements: 1000,
            ef_construction: 100,
            ef_search: 50,
            max_nb_connection: 16,
            max_layer: 8,
        }
    }

    fn vec_seed(seed: u64, dim: usize) -> Vec<f32> {
        (0..dim).map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin()).collect()
    }

    #[test]
    fn new_index_is_empty() {
        let idx = VectorIndex::new(test_config());
        assert!(idx.is_empty());
    }

    #[test]
    fn add_and_search_roundtrip() {
        let idx = VectorIndex::new(test_config());
        for i in 0..10u64 {
            idx.add(&format!("id-{i}"), &vec_seed(i, 8)).unwrap();
        }
        let out = idx.search(&vec_seed(5, 8), 3, None).unwrap();
        assert!(!out.ids.is_empty());
        assert!(out.ids.len() <= 3);
        assert_eq!(out.ids.len(), out.distances.len());
    }

    #[test]
    fn dimension_mismatch_on_add_is_rejected_and_index_unchanged() {
        let idx = VectorIndex::new(test_config());
        let before = idx.len();
        let err = idx.add("x", &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, memoria_core::error::MemoriaError::Index(_)));
        assert_eq!(idx.len(), before);
    }

    #[test]
    fn remove_excludes_from_search() {
        let idx = VectorIndex::new(test_config());
        for i in 0..5u64 {
            idx.add(&format!("id-{i}"), &vec_seed(i, 8)).unwrap();
        }
        idx.remove("id-0").unwrap();
        assert!(!idx.has("id-0"));
        let out = idx.search(&vec_seed(0, 8), 10, None).unwrap();
        assert!(!out.ids.contains(&"id-0".to_string()));
    }

    #[test]
    fn add_existing_id_is_update_with_fresh_slot() {
        let idx = VectorIndex::new(test_config());
        let first = idx.add("a", &vec_seed(1, 8)).unwrap();
        assert!(!first.is_update);
        let second = idx.add("a", &vec_seed(2, 8)).unwrap();
        assert!(second.is_update);
        assert_ne!(first.slot, second.slot);
        assert_eq!(idx.get_position("a"), Some(second.slot));
    }

    #[test]
    fn search_k_zero_returns_empty() {
        let idx = VectorIndex::new(test_config());
        idx.add("a", &vec_seed(1, 8)).unwrap();
        let out = idx.search(&vec_seed(1, 8), 0, None).unwrap();
        assert!(out.ids.is_empty());
    }

    #[test]
    fn search_empty_index_returns_empty() {
        let idx = VectorIndex::new(test_config());
        let out = idx.search(&vec_seed(1, 8), 5, None).unwrap();
        assert!(out.ids.is_empty());
    }

    #[test]
    fn save_then_initialize_restores_state() {
        let idx = VectorIndex::new(test_config());
        for i in 0..5u64 {
            idx.add(&format!("id-{i}"), &vec_seed(i, 8)).unwrap();
        }
        idx.remove("id-2").unwrap();
        let dir = tempfile::tempdir().unwrap();
        idx.save(dir.path()).unwrap();

        let restored = VectorIndex::new(test_config());
        let outcome = restored.initialize(dir.path()).unwrap();
        assert!(outcome.loaded);
        assert_eq!(outcome.vector_count, 4);
        assert!(!restored.has("id-2"));
        assert!(restored.has("id-0"));

        let out = restored.search(&vec_seed(0, 8), 3, None).unwrap();
        assert!(out.ids.contains(&"id-0".to_string()));
    }

    #[test]
    fn initialize_on_empty_dir_is_not_loaded() {
        let idx = VectorIndex::new(test_config());
        let dir = tempfile::tempdir().unwrap();
        let outcome = idx.initialize(dir.path()).unwrap();
        assert!(!outcome.loaded);
        assert_eq!(outcome.vector_count, 0);
    }

    #[test]
    fn fragmentation_tracks_tombstone_ratio() {
        let idx = VectorIndex::new(test_config());
        for i in 0..10u64 {
            idx.add(&format!("id-{i}"), &vec_seed(i, 8)).unwrap();
        }
        assert_eq!(idx.fragmentation(), 0.0);
        for i in 0..4u64 {
            idx.remove(&format!("id-{i}")).unwrap();
        }
        assert!(idx.fragmentation() >= 0.3);
        assert!(idx.needs_rebuild());
    }

    #[test]
    fn rebuild_drops_tombstoned_slots() {
        let idx = VectorIndex::new(test_config());
        for i in 0..6u64 {
            idx.add(&format!("id-{i}"), &vec_seed(i, 8)).unwrap();
        }
        idx.remove("id-1").unwrap();
        idx.remove("id-3").unwrap();
        idx.rebuild().unwrap();
        let out = idx.search(&vec_seed(1, 8), 10, None).unwrap();
        assert!(!out.ids.contains(&"id-1".to_string()));
        assert!(out.ids.contains(&"id-0".to_string()));
    }
}
