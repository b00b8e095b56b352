//! CRUD, FTS, and statistics over the `memories` table (component C).
//!
//! A single `rusqlite::Connection` behind a `Mutex`, an `Arc<Mutex<Connection>>`
//! SQLite wrapper pattern (see grounding note in `schema.rs`) matching the
//! single-writer assumption the engine relies on.
//! Read-mostly callers still share the one connection — WAL mode is what
//! buys the "multiple reader queries may execute concurrently" property,
//! not a connection pool, matching the file layout
//! (`memories.db` + `-wal`/`-shm` siblings).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::instrument;

use memoria_core::error::Result;
use memoria_core::record::{
    MemoryRecord, MemoryType, QueryFilter, RecordDraft, RecordPatch, RecordStatus, Source,
};
use memoria_core::storage_error::StorageError;

use crate::schema::{self, AppliedMigration};

/// Outcome of `insert()`.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub id: String,
    pub embedded: bool,
}

/// Filters accepted by `fts()`, beyond the MATCH query text itself.
#[derive(Debug, Clone, Default)]
pub struct FtsOptions {
    pub limit: usize,
    pub memory_type: Option<MemoryType>,
    pub project_hash: Option<String>,
    pub source: Option<String>,
}

/// Snapshot returned by `get_stats()`.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total: u64,
    pub active: u64,
    pub deleted: u64,
    pub by_type: Vec<(String, u64)>,
    pub by_source: Vec<(String, u64)>,
    pub with_embedding: u64,
    pub embedding_coverage_pct: f64,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if absent) the database at `path`, applies WAL mode
    /// and the configured busy timeout, and runs any pending migrations.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub fn open(path: &Path, timeout_ms: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path).map_err(sqlite_err)?;
        conn.busy_timeout(std::time::Duration::from_millis(timeout_ms as u64))
            .map_err(sqlite_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(sqlite_err)?;
        schema::run_migrations(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests; still runs migrations.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(sqlite_err)?;
        schema::run_migrations(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn apply_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let mut conn = self.conn.lock().unwrap();
        schema::run_migrations(&mut conn)
    }

    #[instrument(skip(self, draft, embedding), fields(id))]
    pub fn insert(&self, draft: &RecordDraft, embedding: Option<&[f32]>) -> Result<InsertOutcome> {
        if draft.content.trim().is_empty() {
            return Err(memoria_core::error::MemoriaError::invalid_input(
                "content must not be empty",
            ));
        }
        let Some(source) = &draft.source else {
            return Err(memoria_core::error::MemoriaError::invalid_input(
                "source is required",
            ));
        };

        let id = draft.id.clone().unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let conn = self.conn.lock().unwrap();

        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM memories WHERE id = ?1", params![id], |r| r.get(0))
            .optional()
            .map_err(sqlite_err)?;
        if exists.is_some() {
            return Err(memoria_core::error::MemoriaError::already_exists(id));
        }

        let now = Utc::now();
        let tags_json = serde_json::to_string(&draft.tags)?;
        let blob = embedding.map(vector_to_blob);

        conn.execute(
            r#"INSERT INTO memories
               (id, version, content, summary, memory_type, intent, tags_json, source,
                source_id, session_id, project_hash, extraction_confidence, quality_score,
                usage_count, usage_success_rate, last_accessed, strength, decay_score,
                embedding, created_at, updated_at, status)
               VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, 0.5, NULL, 1.0, 1.0,
                       ?13, ?14, ?14, 'active')"#,
            params![
                id,
                draft.content,
                draft.summary,
                draft.memory_type.as_str(),
                draft.intent,
                tags_json,
                source.as_string(),
                draft.source_id,
                draft.session_id,
                draft.project_hash,
                draft.extraction_confidence,
                draft.quality_score,
                blob,
                now.to_rfc3339(),
            ],
        )
        .map_err(sqlite_err)?;

        Ok(InsertOutcome {
            id,
            embedded: embedding.is_some(),
        })
    }

    pub fn get(&self, id: &str, include_embedding: bool) -> Result<Option<MemoryRecord>> {
        let conn = self.conn.lock().unwrap();
        let columns = if include_embedding { SELECT_COLUMNS_WITH_EMBEDDING } else { SELECT_COLUMNS_NO_EMBEDDING };
        let sql = format!("SELECT {columns} FROM memories WHERE id = ?1");
        conn.query_row(&sql, params![id], |row| row_to_record(row, include_embedding))
            .optional()
            .map_err(sqlite_err)
    }

    /// Merges `patch` into the row, bumping `version`/`updated_at`.
    /// Returns `false` without error if no row exists — update is never a
    /// hard failure for a missing id.
    #[instrument(skip(self, patch, embedding))]
    pub fn update(&self, id: &str, patch: &RecordPatch, embedding: Option<&[f32]>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let current: Option<(i64,)> = conn
            .query_row("SELECT version FROM memories WHERE id = ?1", params![id], |r| Ok((r.get(0)?,)))
            .optional()
            .map_err(sqlite_err)?;
        let Some((version,)) = current else {
            return Ok(false);
        };

        let now = Utc::now().to_rfc3339();
        let mut sets = vec!["version = ?1".to_string(), "updated_at = ?2".to_string()];
        let mut idx = 3;
        macro_rules! push_set {
            ($col:expr) => {{
                sets.push(format!("{} = ?{}", $col, idx));
                idx += 1;
            }};
        }

        if patch.content.is_some() {
            push_set!("content");
        }
        if patch.summary.is_some() {
            push_set!("summary");
        }
        if patch.memory_type.is_some() {
            push_set!("memory_type");
        }
        if patch.intent.is_some() {
            push_set!("intent");
        }
        if patch.tags.is_some() {
            push_set!("tags_json");
        }
        if patch.project_hash.is_some() {
            push_set!("project_hash");
        }
        if patch.quality_score.is_some() {
            push_set!("quality_score");
        }
        if patch.strength.is_some() {
            push_set!("strength");
        }
        if patch.decay_score.is_some() {
            push_set!("decay_score");
        }
        if patch.status.is_some() {
            push_set!("status");
        }
        if embedding.is_some() {
            push_set!("embedding");
        }

        let sql = format!("UPDATE memories SET {} WHERE id = ?{}", sets.join(", "), idx);

        let mut stmt = conn.prepare(&sql).map_err(sqlite_err)?;
        let mut values: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(version + 1), Box::new(now)];
        if let Some(v) = &patch.content {
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &patch.summary {
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &patch.memory_type {
            values.push(Box::new(v.as_str()));
        }
        if let Some(v) = &patch.intent {
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &patch.tags {
            values.push(Box::new(serde_json::to_string(v)?));
        }
        if let Some(v) = &patch.project_hash {
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = patch.quality_score {
            values.push(Box::new(v));
        }
        if let Some(v) = patch.strength {
            values.push(Box::new(v));
        }
        if let Some(v) = patch.decay_score {
            values.push(Box::new(v));
        }
        if let Some(v) = &patch.status {
            values.push(Box::new(v.as_str()));
        }
        if let Some(v) = embedding {
            values.push(Box::new(vector_to_blob(v)));
        }
        values.push(Box::new(id.to_string()));

        let params_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        stmt.execute(params_refs.as_slice()).map_err(sqlite_err)?;
        Ok(true)
    }

    /// Soft-delete sets `status='deleted'`; hard-delete removes the row.
    /// Triggers remove the FTS entry in both cases (an `UPDATE` refreshes
    /// it, a `DELETE` drops it); `fts()`/`query()` additionally filter on
    /// `status='active'` so soft-deleted rows never surface in standard
    /// search results even though their FTS shadow entry persists.
    pub fn delete(&self, id: &str, hard: bool) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = if hard {
            conn.execute("DELETE FROM memories WHERE id = ?1", params![id]).map_err(sqlite_err)?
        } else {
            conn.execute(
                "UPDATE memories SET status = 'deleted', updated_at = ?2, version = version + 1 WHERE id = ?1 AND status != 'deleted'",
                params![id, Utc::now().to_rfc3339()],
            )
            .map_err(sqlite_err)?
        };
        Ok(affected > 0)
    }

    pub fn set_embedding(&self, id: &str, vector: &[f32]) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn
            .execute(
                "UPDATE memories SET embedding = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, vector_to_blob(vector), Utc::now().to_rfc3339()],
            )
            .map_err(sqlite_err)?;
        Ok(affected > 0)
    }

    pub fn get_embedding(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock().unwrap();
        let blob: Option<Option<Vec<u8>>> = conn
            .query_row("SELECT embedding FROM memories WHERE id = ?1", params![id], |r| r.get(0))
            .optional()
            .map_err(sqlite_err)?;
        Ok(blob.flatten().and_then(|b| blob_to_vector(&b)))
    }

    /// Increments `usage_count`, bumps `last_accessed`, and recomputes
    /// `usage_success_rate` as an EWMA with smoothing 0.1.
    pub fn record_access(&self, id: &str, success: bool) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let current: Option<(f64,)> = conn
            .query_row("SELECT usage_success_rate FROM memories WHERE id = ?1", params![id], |r| {
                Ok((r.get(0)?,))
            })
            .optional()
            .map_err(sqlite_err)?;
        let Some((old_rate,)) = current else {
            return Ok(false);
        };
        let new_rate = ewma_success_rate(old_rate, success);
        conn.execute(
            "UPDATE memories SET usage_count = usage_count + 1, last_accessed = ?2, usage_success_rate = ?3 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339(), new_rate],
        )
        .map_err(sqlite_err)?;
        Ok(true)
    }

    #[instrument(skip(self, filter))]
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut clauses = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status = ?".to_string());
            values.push(Box::new(status.as_str()));
        }
        if let Some(memory_type) = filter.memory_type {
            clauses.push("memory_type = ?".to_string());
            values.push(Box::new(memory_type.as_str()));
        }
        if let Some(project_hash) = &filter.project_hash {
            clauses.push("project_hash = ?".to_string());
            values.push(Box::new(project_hash.clone()));
        }
        if let Some(source) = &filter.source {
            clauses.push("source = ?".to_string());
            values.push(Box::new(source.clone()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let sql = format!(
            "SELECT {SELECT_COLUMNS_NO_EMBEDDING} FROM memories {where_clause} ORDER BY {} {} LIMIT ? OFFSET ?",
            filter.order_by.column(),
            filter.order.as_sql(),
        );
        values.push(Box::new(limit as i64));
        values.push(Box::new(filter.offset as i64));

        let mut stmt = conn.prepare(&sql).map_err(sqlite_err)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(params_refs.as_slice(), |row| row_to_record(row, false))
            .map_err(sqlite_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sqlite_err)
    }

    /// Full-text search. Ranks are expressed as position `0..n-1`, best
    /// match first (ascending `bm25()`, where lower is better in SQLite's
    /// FTS5 scoring).
    #[instrument(skip(self, query_text, options))]
    pub fn fts(&self, query_text: &str, options: &FtsOptions) -> Result<Vec<(String, usize)>> {
        let match_query = sanitize_fts_query(query_text);
        if match_query.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();

        let mut clauses = vec!["m.status = 'active'".to_string()];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(match_query)];

        if let Some(memory_type) = options.memory_type {
            clauses.push("m.memory_type = ?".to_string());
            values.push(Box::new(memory_type.as_str()));
        }
        if let Some(project_hash) = &options.project_hash {
            clauses.push("m.project_hash = ?".to_string());
            values.push(Box::new(project_hash.clone()));
        }
        if let Some(source) = &options.source {
            clauses.push("m.source = ?".to_string());
            values.push(Box::new(source.clone()));
        }

        let limit = if options.limit == 0 { 50 } else { options.limit };
        let sql = format!(
            "SELECT m.id FROM memories_fts \
             JOIN memories m ON m.rowid = memories_fts.rowid \
             WHERE memories_fts MATCH ?1 AND {} \
             ORDER BY bm25(memories_fts) LIMIT {}",
            clauses.join(" AND "),
            limit,
        );

        let mut stmt = conn.prepare(&sql).map_err(sqlite_err)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let ids = stmt
            .query_map(params_refs.as_slice(), |row| row.get::<_, String>(0))
            .map_err(sqlite_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sqlite_err)?;
        Ok(ids.into_iter().enumerate().map(|(rank, id)| (id, rank)).collect())
    }

    /// Paginated scan of active rows lacking an embedding, for backfill.
    pub fn get_missing_embeddings(&self, limit: usize) -> Result<Vec<(String, String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, content, summary FROM memories WHERE embedding IS NULL AND status = 'active' LIMIT ?1",
            )
            .map_err(sqlite_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })
            .map_err(sqlite_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sqlite_err)
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row("SELECT count(*) FROM memories", [], |r| r.get(0)).map_err(sqlite_err)?;
        let active: i64 = conn
            .query_row("SELECT count(*) FROM memories WHERE status = 'active'", [], |r| r.get(0))
            .map_err(sqlite_err)?;
        let with_embedding: i64 = conn
            .query_row("SELECT count(*) FROM memories WHERE embedding IS NOT NULL", [], |r| r.get(0))
            .map_err(sqlite_err)?;

        let mut by_type = Vec::new();
        let mut stmt = conn
            .prepare("SELECT memory_type, count(*) FROM memories GROUP BY memory_type")
            .map_err(sqlite_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))
            .map_err(sqlite_err)?;
        for row in rows {
            by_type.push(row.map_err(sqlite_err)?);
        }
        drop(stmt);

        let mut by_source = Vec::new();
        let mut stmt = conn
            .prepare("SELECT source, count(*) FROM memories GROUP BY source")
            .map_err(sqlite_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))
            .map_err(sqlite_err)?;
        for row in rows {
            by_source.push(row.map_err(sqlite_err)?);
        }

        let embedding_coverage_pct = if total == 0 { 0.0 } else { (with_embedding as f64 / total as f64) * 100.0 };

        Ok(StoreStats {
            total: total as u64,
            active: active as u64,
            deleted: (total - active) as u64,
            by_type,
            by_source,
            with_embedding: with_embedding as u64,
            embedding_coverage_pct,
        })
    }

    pub fn rebuild_fts(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        schema::rebuild_fts(&conn)
    }

    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("VACUUM;").map_err(sqlite_err)
    }
}

const SELECT_COLUMNS_NO_EMBEDDING: &str = "id, version, content, summary, memory_type, intent, tags_json, source, \
     source_id, session_id, project_hash, extraction_confidence, quality_score, usage_count, \
     usage_success_rate, last_accessed, strength, decay_score, created_at, updated_at, status";

const SELECT_COLUMNS_WITH_EMBEDDING: &str = "id, version, content, summary, memory_type, intent, tags_json, source, \
     source_id, session_id, project_hash, extraction_confidence, quality_score, usage_count, \
     usage_success_rate, last_accessed, strength, decay_score, created_at, updated_at, status, embedding";

fn row_to_record(row: &Row, include_embedding: bool) -> rusqlite::Result<MemoryRecord> {
    let tags_json: String = row.get("tags_json")?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    let memory_type_str: String = row.get("memory_type")?;
    let source_str: String = row.get("source")?;
    let status_str: String = row.get("status")?;
    let last_accessed: Option<String> = row.get("last_accessed")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let embedding = if include_embedding {
        let blob: Option<Vec<u8>> = row.get("embedding")?;
        blob.and_then(|b| blob_to_vector(&b))
    } else {
        None
    };

    Ok(MemoryRecord {
        id: row.get("id")?,
        version: row.get::<_, i64>("version")? as u64,
        content: row.get("content")?,
        summary: row.get("summary")?,
        memory_type: MemoryType::parse(&memory_type_str).unwrap_or_default(),
        intent: row.get("intent")?,
        tags,
        source: Source::parse(&source_str).unwrap_or(Source::User),
        source_id: row.get("source_id")?,
        session_id: row.get("session_id")?,
        project_hash: row.get("project_hash")?,
        extraction_confidence: row.get("extraction_confidence")?,
        quality_score: row.get("quality_score")?,
        usage_count: row.get::<_, i64>("usage_count")? as u64,
        usage_success_rate: row.get("usage_success_rate")?,
        last_accessed: last_accessed.and_then(|s| parse_ts(&s)),
        strength: row.get("strength")?,
        decay_score: row.get("decay_score")?,
        embedding,
        created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_ts(&updated_at).unwrap_or_else(Utc::now),
        status: if status_str == "deleted" { RecordStatus::Deleted } else { RecordStatus::Active },
    })
}

fn parse_ts(s: &str) -> Option<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

/// EWMA update for `usage_success_rate`, smoothing factor 0.1. Stays within
/// `[0, 1]` whenever `old_rate` does, since it's a convex combination of
/// `old_rate` and a 0/1 observation.
fn ewma_success_rate(old_rate: f64, success: bool) -> f64 {
    let observed = if success { 1.0 } else { 0.0 };
    0.9 * old_rate + 0.1 * observed
}

fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn blob_to_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

/// Wraps each whitespace-delimited token in double quotes (escaping any
/// embedded quote) and joins with implicit-AND spacing, so arbitrary user
/// text never trips FTS5's own query-operator grammar (`OR`, `NOT`, `*`,
/// column filters, …).
fn sanitize_fts_query(text: &str) -> String {
    text.split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn sqlite_err(e: rusqlite::Error) -> memoria_core::error::MemoriaError {
    if e.to_string().to_lowercase().contains("database is locked") {
        StorageError::Busy { attempts: 1 }.into()
    } else {
        StorageError::Sqlite { message: e.to_string() }.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_core::record::RecordPatch;

    fn draft(content: &str) -> RecordDraft {
        RecordDraft {
            content: content.to_string(),
            source: Some(Source::User),
            ..Default::default()
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let outcome = store.insert(&draft("hello world"), None).unwrap();
        let record = store.get(&outcome.id, false).unwrap().unwrap();
        assert_eq!(record.content, "hello world");
        assert_eq!(record.version, 1);
        assert_eq!(record.status, RecordStatus::Active);
        assert!(record.embedding.is_none());
    }

    #[test]
    fn insert_rejects_empty_content() {
        let store = Store::open_in_memory().unwrap();
        let err = store.insert(&draft("   "), None).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn insert_rejects_missing_source() {
        let store = Store::open_in_memory().unwrap();
        let mut d = draft("hi");
        d.source = None;
        let err = store.insert(&d, None).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn duplicate_id_is_already_exists() {
        let store = Store::open_in_memory().unwrap();
        let mut d = draft("hi");
        d.id = Some("fixed-id".to_string());
        store.insert(&d, None).unwrap();
        let err = store.insert(&d, None).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn hard_delete_then_reinsert_succeeds() {
        let store = Store::open_in_memory().unwrap();
        let mut d = draft("hi");
        d.id = Some("reuse-id".to_string());
        store.insert(&d, None).unwrap();
        store.delete("reuse-id", true).unwrap();
        assert!(store.get("reuse-id", false).unwrap().is_none());
        store.insert(&d, None).unwrap();
        assert!(store.get("reuse-id", false).unwrap().is_some());
    }

    #[test]
    fn soft_delete_hides_from_fts_but_keeps_row() {
        let store = Store::open_in_memory().unwrap();
        let outcome = store.insert(&draft("asyncio python programming"), None).unwrap();
        store.delete(&outcome.id, false).unwrap();
        let record = store.get(&outcome.id, false).unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Deleted);
        let hits = store.fts("asyncio", &FtsOptions { limit: 10, ..Default::default() }).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn update_bumps_version_and_is_blind_on_equal_content() {
        let store = Store::open_in_memory().unwrap();
        let outcome = store.insert(&draft("same content"), None).unwrap();
        let patch = RecordPatch {
            content: Some("same content".to_string()),
            ..Default::default()
        };
        assert!(store.update(&outcome.id, &patch, None).unwrap());
        let record = store.get(&outcome.id, false).unwrap().unwrap();
        assert_eq!(record.content, "same content");
        assert_eq!(record.version, 2);
    }

    #[test]
    fn update_missing_id_returns_false() {
        let store = Store::open_in_memory().unwrap();
        let patch = RecordPatch::default();
        assert!(!store.update("nope", &patch, None).unwrap());
    }

    #[test]
    fn embedding_roundtrip_byte_exact() {
        let store = Store::open_in_memory().unwrap();
        let outcome = store.insert(&draft("hi"), None).unwrap();
        let v = vec![0.5_f32, -1.25, 3.0];
        store.set_embedding(&outcome.id, &v).unwrap();
        let roundtrip = store.get_embedding(&outcome.id).unwrap().unwrap();
        assert_eq!(roundtrip, v);
    }

    #[test]
    fn record_access_updates_ewma_and_usage_count() {
        let store = Store::open_in_memory().unwrap();
        let outcome = store.insert(&draft("hi"), None).unwrap();
        store.record_access(&outcome.id, true).unwrap();
        let r1 = store.get(&outcome.id, false).unwrap().unwrap();
        assert_eq!(r1.usage_count, 1);
        assert!((r1.usage_success_rate - (0.9 * 0.5 + 0.1)).abs() < 1e-9);
        store.record_access(&outcome.id, false).unwrap();
        let r2 = store.get(&outcome.id, false).unwrap().unwrap();
        assert_eq!(r2.usage_count, 2);
    }

    #[test]
    fn fts_ranks_exact_lexical_match_first() {
        let store = Store::open_in_memory().unwrap();
        store.insert(&draft("React hooks let functional components hold state."), None).unwrap();
        store.insert(&draft("Vue composition API is similar to React hooks."), None).unwrap();
        store.insert(&draft("Python asyncio enables asynchronous programming."), None).unwrap();
        let hits = store.fts("asyncio", &FtsOptions { limit: 3, ..Default::default() }).unwrap();
        assert!(!hits.is_empty());
        let top = store.get(&hits[0].0, false).unwrap().unwrap();
        assert!(top.content.contains("asyncio"));
    }

    #[test]
    fn fts_filters_by_memory_type() {
        let store = Store::open_in_memory().unwrap();
        let mut learning = draft("programming patterns in general");
        learning.memory_type = MemoryType::Learning;
        let mut pattern = draft("programming pattern example");
        pattern.memory_type = MemoryType::Pattern;
        store.insert(&learning, None).unwrap();
        let pattern_outcome = store.insert(&pattern, None).unwrap();

        let hits = store
            .fts("programming", &FtsOptions { limit: 10, memory_type: Some(MemoryType::Pattern), ..Default::default() })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, pattern_outcome.id);
    }

    #[test]
    fn query_honors_status_and_type_filters() {
        let store = Store::open_in_memory().unwrap();
        let mut skill = draft("a skill record");
        skill.memory_type = MemoryType::Skill;
        store.insert(&skill, None).unwrap();
        store.insert(&draft("an observation"), None).unwrap();

        let filter = QueryFilter {
            status: Some(RecordStatus::Active),
            memory_type: Some(MemoryType::Skill),
            limit: 10,
            ..Default::default()
        };
        let results = store.query(&filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory_type, MemoryType::Skill);
    }

    #[test]
    fn missing_embeddings_scan_excludes_backfilled_rows() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert(&draft("a"), None).unwrap();
        store.insert(&draft("b"), Some(&[1.0, 2.0])).unwrap();
        let missing = store.get_missing_embeddings(10).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].0, a.id);
    }

    #[test]
    fn stats_report_counts_and_coverage() {
        let store = Store::open_in_memory().unwrap();
        store.insert(&draft("a"), Some(&[1.0])).unwrap();
        store.insert(&draft("b"), None).unwrap();
        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.with_embedding, 1);
        assert!((stats.embedding_coverage_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn empty_query_text_returns_empty_results() {
        let store = Store::open_in_memory().unwrap();
        store.insert(&draft("hi"), None).unwrap();
        let hits = store.fts("   ", &FtsOptions::default()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("memories.db");

        let id = {
            let store = Store::open(&db_path, 5_000).unwrap();
            store.insert(&draft("persisted across reopen"), None).unwrap().id
        };

        let store = Store::open(&db_path, 5_000).unwrap();
        let record = store.get(&id, false).unwrap().unwrap();
        assert_eq!(record.content, "persisted across reopen");
        let applied = store.apply_migrations().unwrap();
        assert!(applied.is_empty(), "reopening must not reapply migrations");
    }
}
