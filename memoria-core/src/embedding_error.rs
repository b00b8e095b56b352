/// Embedding subsystem errors (cache + generator).
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("model load failed: {path}: {reason}")]
    ModelLoadFailed { path: String, reason: String },

    #[error("inference failed: {reason}")]
    InferenceFailed { reason: String },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embed() called with empty or whitespace-only text")]
    EmptyInput,
}
