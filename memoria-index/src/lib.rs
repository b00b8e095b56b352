//! Persistent HNSW-like approximate nearest-neighbor index over
//! `D`-dimensional vectors keyed by external string ids (component D).
//!
//! ```text
//! VectorIndex::add(id, vector)
//!     -> IdMapping::bind(id)     (allocate or re-allocate a slot)
//!     -> Hnsw::insert((vector, slot))
//!
//! VectorIndex::search(query, k)
//!     -> Hnsw::search(query, k + tombstone headroom)
//!     -> filter tombstoned slots, map slot -> id
//! ```

mod graph_file;
mod index;
mod mapping;

pub use index::{default_vector_dir, AddOutcome, InitializeOutcome, SearchOutcome, VectorIndex};
pub use mapping::{IdMapping, MappingFile};
