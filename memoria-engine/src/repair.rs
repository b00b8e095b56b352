//! Operational repair surface — not part of the public query/write API,
//! invoked by a maintenance command rather than in the hot path.
//!
//! Each step is independently callable and returns its own outcome rather
//! than being bundled into one "fix everything" call, mirroring how
//! `memoria-storage::schema::rebuild_fts` and `memoria-index::VectorIndex::rebuild`
//! are themselves standalone operations this module only sequences.

use memoria_core::error::Result;

use crate::coordinator::Engine;

/// Outcome of `Engine::check_integrity`.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub store_reachable: bool,
    pub vector_index_fragmentation: f64,
    pub vector_index_needs_rebuild: bool,
    pub pending_vector_adds: usize,
}

impl Engine {
    /// Read-only health scan, more thorough than `health_check` (may touch
    /// disk) but still no embedding inference.
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        self.require_ready()?;
        let stats = self.store().get_stats();
        Ok(IntegrityReport {
            store_reachable: stats.is_ok(),
            vector_index_fragmentation: self.index_fragmentation(),
            vector_index_needs_rebuild: self.index_needs_rebuild(),
            pending_vector_adds: self.recovery_queue_len(),
        })
    }

    /// Applies any migrations with version greater than the current
    /// ledger max. Safe to call repeatedly; idempotent when nothing is
    /// pending.
    pub fn apply_pending_migrations(&self) -> Result<Vec<memoria_storage::AppliedMigration>> {
        self.require_ready()?;
        self.store().apply_migrations()
    }

    /// Drops and repopulates `memories_fts` from `memories`, then runs an
    /// FTS5 optimize merge.
    pub fn rebuild_fts(&self) -> Result<()> {
        self.require_ready()?;
        self.store().rebuild_fts()
    }

    /// Reclaims free pages in the row store file.
    pub fn vacuum(&self) -> Result<()> {
        self.require_ready()?;
        self.store().vacuum()
    }

    /// Rebuilds the live HNSW graph, dropping tombstoned slots and the
    /// stale edges they leave behind. Recommended when fragmentation
    /// exceeds 30% (see `check_integrity`).
    pub fn rebuild_vector_index(&self) -> Result<()> {
        self.require_ready()?;
        self.rebuild_index()?;
        self.save()
    }
}
