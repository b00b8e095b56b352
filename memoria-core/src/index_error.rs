/// Vector index subsystem errors.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index capacity exceeded: {max_elements} elements")]
    CapacityExceeded { max_elements: usize },

    #[error("index corrupt: {details}")]
    Corrupt { details: String },

    #[error("index state lock poisoned")]
    LockPoisoned,

    #[error("io error persisting index: {0}")]
    Io(String),
}
