//! Error taxonomy for the memory engine.
//!
//! Each subsystem (embeddings, index, storage) owns a narrow `thiserror` enum;
//! `MemoriaError` is the umbrella type the coordinator and its callers see.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MemoriaError>;

/// Top-level error kind surfaced to callers of the coordinator.
///
/// Maps 1:1 onto the error-kind taxonomy: `InvalidInput`, `NotInitialized`,
/// `AlreadyExists`/`NotFound`, `ModelUnavailable`, `IndexCapacityExceeded`,
/// `IndexCorrupt`, `StorageBusy`, `StorageCorrupt`/`MigrationFailed`,
/// `PartialWrite`.
#[derive(Debug, thiserror::Error)]
pub enum MemoriaError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("engine not initialized")]
    NotInitialized,

    #[error("record already exists: {id}")]
    AlreadyExists { id: String },

    #[error("record not found: {id}")]
    NotFound { id: String },

    #[error("embedding model unavailable: {reason}")]
    ModelUnavailable { reason: String },

    #[error("vector index capacity exceeded: {max_elements} elements")]
    IndexCapacityExceeded { max_elements: usize },

    #[error("vector index corrupt: {details}")]
    IndexCorrupt { details: String },

    #[error("storage busy, retried {attempts} times")]
    StorageBusy { attempts: u32 },

    #[error("storage corrupt: {details}")]
    StorageCorrupt { details: String },

    #[error("migration failed at version {version}: {reason}")]
    MigrationFailed { version: u32, reason: String },

    #[error("partial write for id {id}: row store succeeded, {subsystem} failed: {reason}")]
    PartialWrite {
        id: String,
        subsystem: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Embedding(#[from] crate::embedding_error::EmbeddingError),

    #[error(transparent)]
    Index(#[from] crate::index_error::IndexError),

    #[error(transparent)]
    Storage(#[from] crate::storage_error::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MemoriaError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists { id: id.into() }
    }

    pub fn partial_write(
        id: impl Into<String>,
        subsystem: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::PartialWrite {
            id: id.into(),
            subsystem,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }

    pub fn is_partial_write(&self) -> bool {
        matches!(self, Self::PartialWrite { .. })
    }

    pub fn is_storage_busy(&self) -> bool {
        matches!(self, Self::StorageBusy { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StorageCorrupt { .. } | Self::MigrationFailed { .. } | Self::IndexCorrupt { .. }
        )
    }
}
