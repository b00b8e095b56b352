//! Explicit engine configuration.
//!
//! Every recognized option from the external-interfaces configuration table
//! is an enumerated field here — no silent defaults buried in adapter code.
//! `Config::default()` documents the shipped defaults; `validate()` rejects
//! out-of-range values up front rather than failing deep in a subsystem.

use std::path::PathBuf;

use crate::error::{MemoriaError, Result};

/// Embedding cache + generator configuration (components A and B).
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Identifier/path of the sentence-encoder model.
    pub model: String,
    /// `N` for the Embedding Cache.
    pub cache_size: usize,
    /// `T` (seconds) for the Embedding Cache.
    pub cache_ttl_secs: u64,
    /// Emit load progress to stderr.
    pub verbose: bool,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model: "builtin-minilm".to_string(),
            cache_size: 1000,
            cache_ttl_secs: 3600,
            verbose: false,
        }
    }
}

/// Vector index configuration (component D).
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    /// `D`, must match the embedder's output dimension.
    pub dimension: usize,
    pub max_elements: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_nb_connection: usize,
    pub max_layer: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            max_elements: 100_000,
            ef_construction: 200,
            ef_search: 50,
            max_nb_connection: 16,
            max_layer: 16,
        }
    }
}

/// Record store configuration (component C).
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Override the default DB path (`base_path/data/memories.db`).
    pub db_path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    pub timeout_ms: u32,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            timeout_ms: 5000,
        }
    }
}

/// Hybrid coordinator configuration (component E).
#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub vector_weight: f32,
    pub rrf_k: u32,
    pub result_cache_size: usize,
    pub result_cache_ttl_secs: u64,
}

impl HybridConfig {
    pub fn bm25_weight(&self) -> f32 {
        1.0 - self.vector_weight
    }
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.5,
            rrf_k: 60,
            result_cache_size: 200,
            result_cache_ttl_secs: 300,
        }
    }
}

/// Root configuration for the engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for persistent state. Default `${HOME}/.claude/memory`.
    pub base_path: PathBuf,
    pub embedder: EmbedderConfig,
    pub vector_index: VectorIndexConfig,
    pub memory_store: MemoryStoreConfig,
    pub hybrid: HybridConfig,
}

impl Default for Config {
    fn default() -> Self {
        let base_path = dirs_home().join(".claude").join("memory");
        Self {
            base_path,
            embedder: EmbedderConfig::default(),
            vector_index: VectorIndexConfig::default(),
            memory_store: MemoryStoreConfig::default(),
            hybrid: HybridConfig::default(),
        }
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    /// Directory holding `memories.db` and the `vector/` subtree.
    pub fn data_dir(&self) -> PathBuf {
        self.base_path.join("data")
    }

    pub fn db_path(&self) -> PathBuf {
        self.memory_store
            .db_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("memories.db"))
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir().join("vector")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir().join("backups")
    }

    /// Validates every field, rejecting unrecognized/out-of-range values
    /// rather than letting them silently degrade into no-ops.
    pub fn validate(&self) -> Result<()> {
        if self.base_path.as_os_str().is_empty() {
            return Err(MemoriaError::invalid_input("base_path must not be empty"));
        }
        if self.embedder.model.trim().is_empty() {
            return Err(MemoriaError::invalid_input("embedder.model must not be empty"));
        }
        if self.embedder.cache_size == 0 {
            return Err(MemoriaError::invalid_input(
                "embedder.cache_size must be > 0",
            ));
        }
        if self.embedder.cache_ttl_secs == 0 {
            return Err(MemoriaError::invalid_input(
                "embedder.cache_ttl must be > 0",
            ));
        }
        if self.vector_index.dimension == 0 || self.vector_index.dimension > 4096 {
            return Err(MemoriaError::invalid_input(
                "vector_index.dimension must be in 1..=4096",
            ));
        }
        if self.vector_index.max_elements == 0 {
            return Err(MemoriaError::invalid_input(
                "vector_index.max_elements must be > 0",
            ));
        }
        if self.vector_index.ef_construction == 0 || self.vector_index.ef_search == 0 {
            return Err(MemoriaError::invalid_input(
                "vector_index ef parameters must be > 0",
            ));
        }
        if self.memory_store.timeout_ms == 0 {
            return Err(MemoriaError::invalid_input(
                "memory_store.timeout must be > 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.hybrid.vector_weight) {
            return Err(MemoriaError::invalid_input(
                "hybrid.vector_weight must be in [0,1]",
            ));
        }
        if self.hybrid.rrf_k == 0 {
            return Err(MemoriaError::invalid_input("hybrid.rrf_k must be > 0"));
        }
        Ok(())
    }
}
