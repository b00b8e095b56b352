//! Record store (component C): SQLite-backed persistence for memory
//! records, with FTS5 full-text search kept in sync via triggers.
//!
//! Owns the `memories.db` file described in the engine's file layout and
//! nothing else — no knowledge of embeddings beyond storing/returning the
//! raw vector bytes, no knowledge of the vector index.

mod schema;
mod store;

pub use schema::AppliedMigration;
pub use store::{FtsOptions, InsertOutcome, Store, StoreStats};
