//! Shared domain types, configuration, and error taxonomy for the memory
//! engine.
//!
//! `memoria-core` has no knowledge of SQLite, ONNX, or HNSW — it is the
//! vocabulary the other crates (`memoria-embeddings`, `memoria-index`,
//! `memoria-storage`, `memoria-engine`) share and depend on, never the
//! reverse.

pub mod config;
pub mod embedding_error;
pub mod error;
pub mod index_error;
pub mod record;
pub mod storage_error;

pub use config::{Config, EmbedderConfig, HybridConfig, MemoryStoreConfig, VectorIndexConfig};
pub use embedding_error::EmbeddingError;
pub use error::{MemoriaError, Result};
pub use index_error::IndexError;
pub use record::{
    MemoryRecord, MemoryType, OrderBy, QueryFilter, RecordDraft, RecordPatch, RecordStatus,
    SortOrder, Source,
};
pub use storage_error::StorageError;
