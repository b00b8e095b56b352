//! The hybrid search coordinator (component E).
//!
//! Wires the embedding cache + generator (`memoria-embeddings`), the record
//! store (`memoria-storage`), and the vector index (`memoria-index`)
//! together behind one handle, modeled on how database handle wrapper
//! structs in this codebase's corpus hold their storage/embedding/index
//! fields directly rather than behind trait objects. Opens are deferred
//! to an explicit `initialize()` rather than done eagerly in the
//! constructor, collapsing concurrent callers onto a single
//! `OnceLock`-guarded run the way `memoria-embeddings::generator`
//! collapses concurrent model loads.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tracing::{instrument, warn};

use memoria_core::config::Config;
use memoria_core::error::{MemoriaError, Result};
use memoria_core::record::{MemoryRecord, QueryFilter, RecordDraft, RecordPatch};
use memoria_embeddings::EmbeddingGenerator;
use memoria_index::VectorIndex;
use memoria_storage::{FtsOptions, Store};

use crate::cache::ResultCache;
use crate::rrf::rrf;
use crate::types::{
    BackfillProgress, ComponentHealth, ComponentStatus, EngineStats, HealthReport,
    InitializeOutcome, InsertOutcome, SearchEnvelope, SearchOptions, SearchResult, SearchStats,
};

#[derive(Default)]
struct LatencyTracker {
    count: u64,
    total: Duration,
    last: Duration,
}

impl LatencyTracker {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.last = elapsed;
    }

    fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// Coordinates the four subsystems behind one handle.
pub struct Engine {
    config: Config,
    embedder: EmbeddingGenerator,
    store: OnceLock<Store>,
    index: VectorIndex,
    result_cache: ResultCache,
    init: OnceLock<Arc<std::result::Result<Vec<ComponentStatus>, String>>>,
    ready: AtomicBool,
    shut_down: AtomicBool,
    /// Ids whose row exists and carries an embedding that `D.add` failed
    /// to apply. Converges to empty via `backfill_embeddings`.
    recovery_queue: Mutex<HashSet<String>>,
    latency: Mutex<LatencyTracker>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let model_path = PathBuf::from(&config.embedder.model);
        let embedder = EmbeddingGenerator::new(
            config.embedder.clone(),
            config.vector_index.dimension,
            model_path,
        );
        let index = VectorIndex::new(config.vector_index.clone());
        let result_cache = ResultCache::new(
            config.hybrid.result_cache_size,
            Duration::from_secs(config.hybrid.result_cache_ttl_secs),
        );
        Ok(Self {
            config,
            embedder,
            store: OnceLock::new(),
            index,
            result_cache,
            init: OnceLock::new(),
            ready: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            recovery_queue: Mutex::new(HashSet::new()),
            latency: Mutex::new(LatencyTracker::default()),
        })
    }

    /// Ensures data directories exist, opens the record store (applying
    /// migrations), and loads or allocates the vector index. Safe to call
    /// from multiple threads concurrently — only the first caller does the
    /// work, the rest observe its outcome.
    #[instrument(skip(self))]
    pub fn initialize(&self) -> Result<InitializeOutcome> {
        let outcome = self.init.get_or_init(|| Arc::new(self.do_initialize().map_err(|e| e.to_string())));
        match outcome.as_ref() {
            Ok(components) => Ok(InitializeOutcome {
                components: components.clone(),
            }),
            Err(reason) => Err(MemoriaError::invalid_input(format!(
                "initialization failed: {reason}"
            ))),
        }
    }

    fn do_initialize(&self) -> Result<Vec<ComponentStatus>> {
        std::fs::create_dir_all(self.config.data_dir())?;
        std::fs::create_dir_all(self.config.vector_dir())?;

        let mut components = vec![ComponentStatus {
            name: "embedding_generator",
            ok: true,
            message: "constructed; model load deferred to first embed".to_string(),
        }];

        let store = Store::open(&self.config.db_path(), self.config.memory_store.timeout_ms)?;
        components.push(ComponentStatus {
            name: "record_store",
            ok: true,
            message: "opened and migrated".to_string(),
        });
        let _ = self.store.set(store);

        let idx_outcome = self.index.initialize(&self.config.vector_dir())?;
        components.push(ComponentStatus {
            name: "vector_index",
            ok: true,
            message: format!(
                "loaded_from_disk={} vector_count={}",
                idx_outcome.loaded, idx_outcome.vector_count
            ),
        });

        self.ready.store(true, Ordering::Release);
        Ok(components)
    }

    pub(crate) fn require_ready(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) || !self.ready.load(Ordering::Acquire) {
            Err(MemoriaError::NotInitialized)
        } else {
            Ok(())
        }
    }

    pub(crate) fn store(&self) -> &Store {
        self.store.get().expect("require_ready checked initialization")
    }

    pub(crate) fn index_fragmentation(&self) -> f64 {
        self.index.fragmentation()
    }

    pub(crate) fn index_needs_rebuild(&self) -> bool {
        self.index.needs_rebuild()
    }

    pub(crate) fn recovery_queue_len(&self) -> usize {
        self.recovery_queue.lock().unwrap().len()
    }

    pub(crate) fn rebuild_index(&self) -> Result<()> {
        self.index.rebuild()
    }

    #[instrument(skip(self, draft))]
    pub fn insert(&self, draft: &RecordDraft, generate_embedding: bool) -> Result<InsertOutcome> {
        self.require_ready()?;
        let embedding = if generate_embedding {
            let text = embed_text(&draft.summary, &draft.content);
            Some(self.embedder.embed(text)?)
        } else {
            None
        };

        let outcome = self.store().insert(draft, embedding.as_deref())?;

        if let Some(vector) = &embedding {
            if let Err(e) = self.index.add(&outcome.id, vector) {
                warn!(id = %outcome.id, error = %e, "vector index add failed after row commit, queued for backfill");
                self.recovery_queue.lock().unwrap().insert(outcome.id.clone());
            }
        }
        self.result_cache.invalidate_all();

        Ok(InsertOutcome {
            id: outcome.id,
            embedded: outcome.embedded,
        })
    }

    #[instrument(skip(self, patch))]
    pub fn update(&self, id: &str, patch: &RecordPatch) -> Result<bool> {
        self.require_ready()?;
        let embedding = if patch.touches_text() {
            let text = patch.summary.as_deref().or(patch.content.as_deref()).unwrap_or("");
            Some(self.embedder.embed(text)?)
        } else {
            None
        };

        let updated = self.store().update(id, patch, embedding.as_deref())?;
        if updated {
            if let Some(vector) = &embedding {
                if let Err(e) = self.index.add(id, vector) {
                    warn!(id, error = %e, "vector index update failed, queued for backfill");
                    self.recovery_queue.lock().unwrap().insert(id.to_string());
                }
            }
            self.result_cache.invalidate_all();
        }
        Ok(updated)
    }

    /// Deletes the row (soft or hard), then unconditionally tombstones the
    /// vector-index entry — idempotent, so a retry after a crash mid-delete
    /// is always safe even if the row was already gone.
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str, hard: bool) -> Result<bool> {
        self.require_ready()?;
        let deleted = self.store().delete(id, hard)?;
        self.index.remove(id)?;
        if deleted {
            self.result_cache.invalidate_all();
        }
        Ok(deleted)
    }

    pub fn get(&self, id: &str, include_embedding: bool) -> Result<Option<MemoryRecord>> {
        self.require_ready()?;
        self.store().get(id, include_embedding)
    }

    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<MemoryRecord>> {
        self.require_ready()?;
        self.store().query(filter)
    }

    /// Records a usage event against `id` — increments `usage_count`,
    /// bumps `last_accessed`, and updates the EWMA success rate. Does not
    /// touch the vector index or invalidate the result cache: usage
    /// counters aren't part of any cached search envelope's fused score.
    pub fn record_access(&self, id: &str, success: bool) -> Result<bool> {
        self.require_ready()?;
        self.store().record_access(id, success)
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.require_ready()?;
        self.embedder.embed(text)
    }

    pub fn preload_model(&self) -> Result<()> {
        self.require_ready()?;
        self.embedder.preload()
    }

    /// Scans `get_missing_embeddings` in batches, embeds, writes back, and
    /// adds to the vector index, until the store reports none left.
    #[instrument(skip(self, on_progress))]
    pub fn backfill_embeddings(
        &self,
        batch_size: usize,
        mut on_progress: impl FnMut(&BackfillProgress),
    ) -> Result<BackfillProgress> {
        self.require_ready()?;
        let batch_size = if batch_size == 0 { 50 } else { batch_size };
        let mut summary = BackfillProgress::default();

        loop {
            let missing = self.store().get_missing_embeddings(batch_size)?;
            if missing.is_empty() {
                break;
            }
            let returned = missing.len();

            for (id, content, summary_text) in &missing {
                let text = embed_text(summary_text, content);
                match self.embedder.embed(text) {
                    Ok(vector) => {
                        if self.store().set_embedding(id, &vector)? {
                            match self.index.add(id, &vector) {
                                Ok(_) => summary.processed += 1,
                                Err(e) => {
                                    warn!(id, error = %e, "backfill vector add failed, re-queued");
                                    self.recovery_queue.lock().unwrap().insert(id.clone());
                                    summary.errors += 1;
                                }
                            }
                        } else {
                            summary.skipped += 1;
                        }
                    }
                    Err(e) => {
                        warn!(id, error = %e, "backfill embed failed");
                        summary.errors += 1;
                    }
                }
            }

            on_progress(&summary);
            if returned < batch_size {
                break;
            }
        }

        self.index.save(&self.config.vector_dir())?;
        self.result_cache.invalidate_all();
        Ok(summary)
    }

    /// Hybrid search: vector + BM25 candidates fused with reciprocal rank
    /// fusion, re-filtered against the hydrated row, sorted, truncated.
    #[instrument(skip(self, query))]
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchEnvelope> {
        self.require_ready()?;
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Ok(SearchEnvelope::default());
        }

        if let Some(mut cached) = self.result_cache.get(trimmed, options) {
            cached.stats.cache_hit = true;
            return Ok(cached);
        }

        let start = Instant::now();
        let over_fetch = options.limit.saturating_mul(3).max(options.limit);

        let query_vec = self.embedder.embed(trimmed)?;
        let vector_hits = self.index.search(&query_vec, over_fetch, None)?;

        let fts_options = FtsOptions {
            limit: over_fetch,
            memory_type: options.memory_type,
            project_hash: options.project_hash.clone(),
            source: options.source.clone(),
        };
        let bm25_hits = self.store().fts(trimmed, &fts_options)?;

        let mut vector_rank: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for (rank, id) in vector_hits.ids.iter().enumerate() {
            vector_rank.insert(id.clone(), rank);
        }
        let mut bm25_rank: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for (id, rank) in &bm25_hits {
            bm25_rank.insert(id.clone(), *rank);
        }

        let mut candidate_ids: Vec<String> = vector_rank.keys().cloned().collect();
        for id in bm25_rank.keys() {
            if !vector_rank.contains_key(id) {
                candidate_ids.push(id.clone());
            }
        }

        let vector_weight = options.vector_weight;
        let bm25_weight = options.bm25_weight();

        let mut results = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            let Some(record) = self.store().get(&id, false)? else {
                continue;
            };
            if record.status != memoria_core::record::RecordStatus::Active {
                continue;
            }
            if let Some(mt) = options.memory_type {
                if record.memory_type != mt {
                    continue;
                }
            }
            if let Some(types) = &options.types {
                if !types.contains(&record.memory_type) {
                    continue;
                }
            }
            if let Some(ph) = &options.project_hash {
                if record.project_hash.as_deref() != Some(ph.as_str()) {
                    continue;
                }
            }
            if let Some(src) = &options.source {
                if &record.source.as_string() != src {
                    continue;
                }
            }

            let vr = vector_rank.get(&id).copied();
            let br = bm25_rank.get(&id).copied();
            let mut sources = Vec::with_capacity(2);
            let mut fused_score = 0.0f32;
            if let Some(r) = vr {
                fused_score += vector_weight * rrf(r, options.rrf_k);
                sources.push("vector");
            }
            if let Some(r) = br {
                fused_score += bm25_weight * rrf(r, options.rrf_k);
                sources.push("bm25");
            }

            results.push(SearchResult {
                record,
                sources,
                vector_rank: vr,
                bm25_rank: br,
                fused_score,
            });
        }

        results.sort_by(|a, b| b.fused_score.partial_cmp(&a.fused_score).unwrap_or(std::cmp::Ordering::Equal));
        results.retain(|r| r.fused_score >= options.min_score);
        results.truncate(options.limit);

        let elapsed = start.elapsed();
        let stats = self.record_latency(elapsed);

        let envelope = SearchEnvelope {
            results,
            stats: SearchStats {
                query_count: stats.0,
                last_latency: stats.1,
                avg_latency: stats.2,
                cache_hit: false,
            },
        };
        self.result_cache.put(trimmed, options, envelope.clone());
        Ok(envelope)
    }

    /// Vector-only passthrough, single-source annotation.
    pub fn search_vector(&self, query: &str, k: usize) -> Result<SearchEnvelope> {
        self.require_ready()?;
        let trimmed = query.trim();
        if trimmed.is_empty() || k == 0 {
            return Ok(SearchEnvelope::default());
        }
        let start = Instant::now();
        let query_vec = self.embedder.embed(trimmed)?;
        let hits = self.index.search(&query_vec, k, None)?;

        let mut results = Vec::with_capacity(hits.ids.len());
        for (rank, id) in hits.ids.iter().enumerate() {
            let Some(record) = self.store().get(id, false)? else {
                continue;
            };
            if record.status != memoria_core::record::RecordStatus::Active {
                continue;
            }
            results.push(SearchResult {
                record,
                sources: vec!["vector"],
                vector_rank: Some(rank),
                bm25_rank: None,
                fused_score: rrf(rank, 60),
            });
        }

        let stats = self.record_latency(start.elapsed());
        Ok(SearchEnvelope {
            results,
            stats: SearchStats {
                query_count: stats.0,
                last_latency: stats.1,
                avg_latency: stats.2,
                cache_hit: false,
            },
        })
    }

    /// BM25-only passthrough, single-source annotation.
    pub fn search_bm25(&self, query: &str, limit: usize) -> Result<SearchEnvelope> {
        self.require_ready()?;
        let trimmed = query.trim();
        if trimmed.is_empty() || limit == 0 {
            return Ok(SearchEnvelope::default());
        }
        let start = Instant::now();
        let hits = self.store().fts(trimmed, &FtsOptions { limit, ..Default::default() })?;

        let mut results = Vec::with_capacity(hits.len());
        for (id, rank) in &hits {
            let Some(record) = self.store().get(id, false)? else {
                continue;
            };
            results.push(SearchResult {
                record,
                sources: vec!["bm25"],
                vector_rank: None,
                bm25_rank: Some(*rank),
                fused_score: rrf(*rank, 60),
            });
        }

        let stats = self.record_latency(start.elapsed());
        Ok(SearchEnvelope {
            results,
            stats: SearchStats {
                query_count: stats.0,
                last_latency: stats.1,
                avg_latency: stats.2,
                cache_hit: false,
            },
        })
    }

    fn record_latency(&self, elapsed: Duration) -> (u64, Duration, Duration) {
        let mut tracker = self.latency.lock().unwrap();
        tracker.record(elapsed);
        (tracker.count, tracker.last, tracker.average())
    }

    pub fn save(&self) -> Result<()> {
        self.require_ready()?;
        self.index.save(&self.config.vector_dir())
    }

    /// Idempotent: the first call flushes the index; later calls are
    /// no-ops. After shutdown, every other operation raises `NotInitialized`.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.ready.load(Ordering::Acquire) {
            self.index.save(&self.config.vector_dir())?;
        }
        Ok(())
    }

    /// Cheap liveness check — no embedding calls, no disk I/O beyond what's
    /// already resident.
    pub fn health_check(&self) -> HealthReport {
        let initialized = self.ready.load(Ordering::Acquire) && !self.shut_down.load(Ordering::Acquire);
        let mut components = vec![ComponentHealth {
            name: "engine",
            ok: initialized,
            message: if initialized { "initialized".to_string() } else { "not initialized".to_string() },
        }];

        if initialized {
            let pending = self.recovery_queue.lock().unwrap().len();
            components.push(ComponentHealth {
                name: "record_store",
                ok: true,
                message: "connection held open".to_string(),
            });
            components.push(ComponentHealth {
                name: "vector_index",
                ok: true,
                message: format!("{} vectors resident", self.index.len()),
            });
            components.push(ComponentHealth {
                name: "recovery_queue",
                ok: pending == 0,
                message: format!("{pending} ids pending backfill"),
            });
        }

        let healthy = components.iter().all(|c| c.ok);
        HealthReport { healthy, components }
    }

    pub fn get_stats(&self) -> EngineStats {
        let (query_count, last, avg) = {
            let tracker = self.latency.lock().unwrap();
            (tracker.count, tracker.last, tracker.average())
        };
        EngineStats {
            query_count,
            last_query_latency: last,
            avg_query_latency: avg,
            pending_vector_adds: self.recovery_queue.lock().unwrap().len(),
            vector_count: self.index.len(),
            cache_hits: self.result_cache.hits(),
            cache_misses: self.result_cache.misses(),
            store: self.store.get().map(|s| s.get_stats()).and_then(|r| r.ok()),
            embedder: Some(self.embedder.stats()),
        }
    }
}

fn embed_text<'a>(summary: &'a str, content: &'a str) -> &'a str {
    if !summary.trim().is_empty() {
        summary
    } else {
        content
    }
}
