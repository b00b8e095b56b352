//! Schema DDL and the migration runner.
//!
//! Grounded on the FTS5-over-rusqlite pattern in
//! `examples/other_examples/117d0d72_Rapheal7-My-Agent__src-memory-sqlite.rs.rs`
//! (external-content virtual table + `porter unicode61` tokenizer) and the
//! trigger-sync pattern in
//! `examples/other_examples/28f147bf_Nitin-100-rustedclaw__crates-memory-src-sqlite.rs.rs`,
//! adapted from `sqlx`'s async pool to a single blocking `rusqlite::Connection`
//! the way a storage module typically owns a single database handle for
//! the lifetime of the process.

use chrono::Utc;
use rusqlite::{params, Connection, Transaction};
use tracing::{debug, info, instrument, warn};

use memoria_core::error::Result;
use memoria_core::storage_error::StorageError;

/// One row of the migration ledger (`schema_migrations`).
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
    pub applied_at: chrono::DateTime<Utc>,
    pub description: Option<String>,
    pub duration_ms: Option<i64>,
}

struct Migration {
    version: u32,
    name: &'static str,
    description: &'static str,
    apply: fn(&Transaction) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_memories_table",
        description: "base memories row store",
        apply: create_memories_table,
    },
    Migration {
        version: 2,
        name: "create_memories_indexes",
        description: "secondary, composite, and partial indexes",
        apply: create_memories_indexes,
    },
    Migration {
        version: 3,
        name: "create_memories_fts",
        description: "FTS5 virtual table over content/summary/tags_json",
        apply: create_memories_fts,
    },
    Migration {
        version: 4,
        name: "create_memories_fts_triggers",
        description: "triggers keeping memories_fts in sync with memories",
        apply: create_memories_fts_triggers,
    },
];

fn create_memories_table(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id                      TEXT PRIMARY KEY,
            version                 INTEGER NOT NULL,
            content                 TEXT NOT NULL,
            summary                 TEXT NOT NULL DEFAULT '',
            memory_type             TEXT NOT NULL,
            intent                  TEXT NOT NULL DEFAULT '',
            tags_json               TEXT NOT NULL DEFAULT '[]',
            source                  TEXT NOT NULL,
            source_id               TEXT,
            session_id              TEXT,
            project_hash            TEXT,
            extraction_confidence   REAL NOT NULL DEFAULT 0.5,
            quality_score           REAL NOT NULL DEFAULT 0.5,
            usage_count             INTEGER NOT NULL DEFAULT 0,
            usage_success_rate      REAL NOT NULL DEFAULT 0.5,
            last_accessed           TEXT,
            strength                REAL NOT NULL DEFAULT 1.0,
            decay_score             REAL NOT NULL DEFAULT 1.0,
            embedding               BLOB,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL,
            status                  TEXT NOT NULL DEFAULT 'active'
        );
        "#,
    )
}

fn create_memories_indexes(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_memories_memory_type ON memories(memory_type);
        CREATE INDEX IF NOT EXISTS idx_memories_project_hash ON memories(project_hash);
        CREATE INDEX IF NOT EXISTS idx_memories_source ON memories(source);
        CREATE INDEX IF NOT EXISTS idx_memories_status ON memories(status);
        CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at);
        CREATE INDEX IF NOT EXISTS idx_memories_updated_at ON memories(updated_at);
        CREATE INDEX IF NOT EXISTS idx_memories_status_quality_usage
            ON memories(status, quality_score DESC, usage_count DESC);
        CREATE INDEX IF NOT EXISTS idx_memories_status_decay_created
            ON memories(status, decay_score DESC, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_memories_missing_embedding
            ON memories(id) WHERE embedding IS NULL;
        "#,
    )
}

fn create_memories_fts(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
            content,
            summary,
            tags_json,
            content='memories',
            content_rowid='rowid',
            tokenize='porter unicode61'
        );
        "#,
    )
}

/// Trigger creation as three distinct statements rather than one
/// `execute_batch` call — the "imperative handler alternative to SQL"
/// Kept as an alternative to SQL dialects that want per-statement
/// invocation here, since each trigger body itself contains multiple
/// semicolon-terminated `INSERT` statements that must not be split by a
/// naive statement splitter.
fn create_memories_fts_triggers(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute(
        r#"
        CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
            INSERT INTO memories_fts(rowid, content, summary, tags_json)
            VALUES (new.rowid, new.content, new.summary, new.tags_json);
        END;
        "#,
        [],
    )?;
    tx.execute(
        r#"
        CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content, summary, tags_json)
            VALUES ('delete', old.rowid, old.content, old.summary, old.tags_json);
        END;
        "#,
        [],
    )?;
    tx.execute(
        r#"
        CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content, summary, tags_json)
            VALUES ('delete', old.rowid, old.content, old.summary, old.tags_json);
            INSERT INTO memories_fts(rowid, content, summary, tags_json)
            VALUES (new.rowid, new.content, new.summary, new.tags_json);
        END;
        "#,
        [],
    )?;
    Ok(())
}

fn ensure_ledger_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            name        TEXT NOT NULL,
            applied_at  TEXT NOT NULL,
            description TEXT,
            duration_ms INTEGER
        );
        "#,
    )
}

fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|v| v as u32)
}

/// Applies every migration with `version` strictly greater than the
/// current ledger max, in order, each inside its own transaction.
/// "Already exists" DDL errors are tolerated (every statement uses `IF NOT
/// EXISTS`, so this path should rarely trigger). Stops at the first
/// failure; no higher version is recorded past that point.
#[instrument(skip(conn))]
pub fn run_migrations(conn: &mut Connection) -> Result<Vec<AppliedMigration>> {
    ensure_ledger_table(conn).map_err(|e| StorageError::MigrationFailed {
        version: 0,
        reason: e.to_string(),
    })?;
    let current = current_version(conn).map_err(|e| StorageError::MigrationFailed {
        version: 0,
        reason: e.to_string(),
    })?;

    let mut applied = Vec::new();
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let start = std::time::Instant::now();
        let tx = conn.transaction().map_err(|e| StorageError::MigrationFailed {
            version: migration.version,
            reason: e.to_string(),
        })?;

        let result = (migration.apply)(&tx).or_else(|e| {
            if is_already_exists(&e) {
                warn!(version = migration.version, "tolerating already-exists DDL error");
                Ok(())
            } else {
                Err(e)
            }
        });

        if let Err(e) = result {
            return Err(StorageError::MigrationFailed {
                version: migration.version,
                reason: e.to_string(),
            }
            .into());
        }

        let applied_at = Utc::now();
        let duration_ms = start.elapsed().as_millis() as i64;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at, description, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                migration.version,
                migration.name,
                applied_at.to_rfc3339(),
                migration.description,
                duration_ms,
            ],
        )
        .map_err(|e| StorageError::MigrationFailed {
            version: migration.version,
            reason: e.to_string(),
        })?;

        tx.commit().map_err(|e| StorageError::MigrationFailed {
            version: migration.version,
            reason: e.to_string(),
        })?;

        debug!(version = migration.version, name = migration.name, "migration applied");
        applied.push(AppliedMigration {
            version: migration.version,
            name: migration.name.to_string(),
            applied_at,
            description: Some(migration.description.to_string()),
            duration_ms: Some(duration_ms),
        });
    }

    if !applied.is_empty() {
        info!(count = applied.len(), "schema migrations applied");
    }
    Ok(applied)
}

fn is_already_exists(err: &rusqlite::Error) -> bool {
    err.to_string().to_lowercase().contains("already exists")
}

/// Drops and repopulates `memories_fts` from `memories`, then requests an
/// FTS5 optimize merge. Repair operation for FTS consistency.
pub fn rebuild_fts(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        INSERT INTO memories_fts(memories_fts) VALUES ('rebuild');
        INSERT INTO memories_fts(memories_fts) VALUES ('optimize');
        "#,
    )
    .map_err(|e| StorageError::Sqlite { message: e.to_string() }.into())
}
