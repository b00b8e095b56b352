//! Hybrid search coordinator: the single entry point callers use to drive
//! the embedding cache + generator, the record store, and the vector index
//! as one coherent memory engine.

mod cache;
mod coordinator;
mod repair;
mod rrf;
mod types;

pub use coordinator::Engine;
pub use repair::IntegrityReport;
pub use types::{
    BackfillProgress, ComponentHealth, ComponentStatus, EngineStats, HealthReport,
    InitializeOutcome, InsertOutcome, SearchEnvelope, SearchOptions, SearchResult, SearchStats,
};
