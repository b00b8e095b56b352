//! Request/response shapes for the coordinator's public surface.

use std::time::Duration;

use memoria_core::record::{MemoryRecord, MemoryType};

/// Options accepted by `search`. `search_vector`/`search_bm25` take only
/// `limit`/`k` directly; the rest of this struct doesn't apply to them.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub memory_type: Option<MemoryType>,
    /// Multi-type filter: keep a result if its type is any of these. Unlike
    /// `memory_type`, this is a set rather than a single value; the two can
    /// be used together (both must pass).
    pub types: Option<Vec<MemoryType>>,
    pub project_hash: Option<String>,
    pub source: Option<String>,
    pub vector_weight: f32,
    pub rrf_k: u32,
    pub min_score: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            memory_type: None,
            types: None,
            project_hash: None,
            source: None,
            vector_weight: 0.5,
            rrf_k: 60,
            min_score: 0.0,
        }
    }
}

impl SearchOptions {
    pub fn bm25_weight(&self) -> f32 {
        1.0 - self.vector_weight
    }

    /// Deterministic key for the result cache: same query text and same
    /// option values must hash identically regardless of call site.
    pub(crate) fn cache_key(&self, query: &str) -> String {
        format!(
            "{query}|{:?}|{:?}|{:?}|{:?}|{:.3}|{}|{:.3}|{}",
            self.memory_type.map(|t| t.as_str()),
            self.types.as_ref().map(|ts| ts.iter().map(|t| t.as_str()).collect::<Vec<_>>()),
            self.project_hash,
            self.source,
            self.vector_weight,
            self.rrf_k,
            self.min_score,
            self.limit,
        )
    }
}

/// Which subsystem(s) a result was found through.
pub type Sources = Vec<&'static str>;

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub record: MemoryRecord,
    pub sources: Sources,
    pub vector_rank: Option<usize>,
    pub bm25_rank: Option<usize>,
    pub fused_score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    pub query_count: u64,
    pub last_latency: Duration,
    pub avg_latency: Duration,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchEnvelope {
    pub results: Vec<SearchResult>,
    pub stats: SearchStats,
}

#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub id: String,
    pub embedded: bool,
}

#[derive(Debug, Clone)]
pub struct ComponentStatus {
    pub name: &'static str,
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct InitializeOutcome {
    pub components: Vec<ComponentStatus>,
}

#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub components: Vec<ComponentHealth>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillProgress {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub query_count: u64,
    pub last_query_latency: Duration,
    pub avg_query_latency: Duration,
    pub pending_vector_adds: usize,
    pub vector_count: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub store: Option<memoria_storage::StoreStats>,
    pub embedder: Option<memoria_embeddings::GeneratorStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_distinguishes_types_filter() {
        let base = SearchOptions::default();
        let filtered = SearchOptions {
            types: Some(vec![MemoryType::Skill, MemoryType::Fact]),
            ..SearchOptions::default()
        };
        assert_ne!(base.cache_key("q"), filtered.cache_key("q"));
    }

    #[test]
    fn cache_key_is_stable_for_equivalent_options() {
        let a = SearchOptions {
            types: Some(vec![MemoryType::Skill]),
            ..SearchOptions::default()
        };
        let b = SearchOptions {
            types: Some(vec![MemoryType::Skill]),
            ..SearchOptions::default()
        };
        assert_eq!(a.cache_key("q"), b.cache_key("q"));
    }
}
