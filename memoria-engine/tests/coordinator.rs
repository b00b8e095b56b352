//! End-to-end coverage of the coordinator against a real tempfile-backed
//! database and vector index. Exercises only paths that don't require a
//! real ONNX model file to be present (no `generate_embedding=true` insert,
//! no `search`/`search_vector`/`embed`/`backfill_embeddings` calls) — the
//! embedding generator's own test suite is likewise scoped to its
//! model-free helper functions for the same reason.

use memoria_core::config::Config;
use memoria_core::record::{MemoryType, QueryFilter, RecordDraft, RecordPatch, RecordStatus, Source};
use memoria_engine::Engine;

fn test_config(base: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.base_path = base.to_path_buf();
    config.vector_index.dimension = 8;
    config.vector_index.max_elements = 1000;
    config
}

fn draft(content: &str) -> RecordDraft {
    RecordDraft {
        content: content.to_string(),
        source: Some(Source::User),
        ..Default::default()
    }
}

#[test]
fn operations_before_initialize_raise_not_initialized() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    let err = engine.get("nope", false).unwrap_err();
    assert!(matches!(err, memoria_core::error::MemoriaError::NotInitialized));
}

#[test]
fn initialize_is_idempotent_and_collapses_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    let first = engine.initialize().unwrap();
    let second = engine.initialize().unwrap();
    assert_eq!(first.components.len(), second.components.len());
    assert!(first.components.iter().all(|c| c.ok));
}

#[test]
fn insert_without_embedding_then_get_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();

    let outcome = engine.insert(&draft("plain text memory"), false).unwrap();
    assert!(!outcome.embedded);

    let record = engine.get(&outcome.id, false).unwrap().unwrap();
    assert_eq!(record.content, "plain text memory");
    assert_eq!(record.status, RecordStatus::Active);
}

#[test]
fn update_without_text_change_does_not_require_embedding() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();

    let outcome = engine.insert(&draft("static content"), false).unwrap();
    let patch = RecordPatch {
        quality_score: Some(0.9),
        ..Default::default()
    };
    assert!(engine.update(&outcome.id, &patch).unwrap());

    let record = engine.get(&outcome.id, false).unwrap().unwrap();
    assert_eq!(record.content, "static content");
    assert_eq!(record.version, 2);
    assert!((record.quality_score - 0.9).abs() < 1e-6);
}

#[test]
fn hard_delete_removes_row_and_vector_entry() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();

    let outcome = engine.insert(&draft("to be deleted"), false).unwrap();
    assert!(engine.delete(&outcome.id, true).unwrap());
    assert!(engine.get(&outcome.id, false).unwrap().is_none());
}

#[test]
fn soft_delete_hides_row_from_query_but_keeps_it() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();

    let outcome = engine.insert(&draft("soft deleted memory"), false).unwrap();
    assert!(engine.delete(&outcome.id, false).unwrap());

    let record = engine.get(&outcome.id, false).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Deleted);

    let filter = QueryFilter {
        status: Some(RecordStatus::Active),
        limit: 10,
        ..Default::default()
    };
    let active = engine.query(&filter).unwrap();
    assert!(active.iter().all(|r| r.id != outcome.id));
}

#[test]
fn search_bm25_ranks_lexical_match_without_touching_the_embedder() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();

    engine.insert(&draft("rust ownership and borrowing rules"), false).unwrap();
    engine.insert(&draft("python list comprehensions are concise"), false).unwrap();

    let envelope = engine.search_bm25("ownership", 5).unwrap();
    assert!(!envelope.results.is_empty());
    assert!(envelope.results[0].record.content.contains("ownership"));
    assert_eq!(envelope.results[0].sources, vec!["bm25"]);
    assert!(envelope.results[0].vector_rank.is_none());
}

#[test]
fn query_filters_by_memory_type() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();

    let mut skill = draft("a learned skill");
    skill.memory_type = MemoryType::Skill;
    engine.insert(&skill, false).unwrap();
    engine.insert(&draft("a plain observation"), false).unwrap();

    let filter = QueryFilter {
        memory_type: Some(MemoryType::Skill),
        limit: 10,
        ..Default::default()
    };
    let results = engine.query(&filter).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory_type, MemoryType::Skill);
}

#[test]
fn health_check_reflects_lifecycle_without_expensive_work() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    assert!(!engine.health_check().healthy);

    engine.initialize().unwrap();
    let report = engine.health_check();
    assert!(report.healthy);
    assert!(report.components.iter().any(|c| c.name == "recovery_queue" && c.ok));
}

#[test]
fn shutdown_is_idempotent_and_blocks_further_operations() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();
    engine.insert(&draft("before shutdown"), false).unwrap();

    engine.shutdown().unwrap();
    engine.shutdown().unwrap();

    let err = engine.get("anything", false).unwrap_err();
    assert!(matches!(err, memoria_core::error::MemoriaError::NotInitialized));
}

#[test]
fn persistence_round_trip_across_coordinator_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let id = {
        let engine = Engine::new(config.clone()).unwrap();
        engine.initialize().unwrap();
        let outcome = engine.insert(&draft("persisted across restart"), false).unwrap();
        engine.save().unwrap();
        outcome.id
    };

    let engine = Engine::new(config).unwrap();
    engine.initialize().unwrap();
    let record = engine.get(&id, false).unwrap().unwrap();
    assert_eq!(record.content, "persisted across restart");
}

#[test]
fn stats_report_query_count_after_bm25_search() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();
    engine.insert(&draft("stats tracked content"), false).unwrap();

    engine.search_bm25("stats", 5).unwrap();
    let stats = engine.get_stats();
    assert_eq!(stats.query_count, 1);
    assert!(stats.store.is_some());
}

#[test]
fn check_integrity_reports_store_reachable_and_zero_fragmentation_when_clean() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();
    engine.insert(&draft("tracked for integrity check"), false).unwrap();

    let report = engine.check_integrity().unwrap();
    assert!(report.store_reachable);
    assert_eq!(report.vector_index_fragmentation, 0.0);
    assert!(!report.vector_index_needs_rebuild);
    assert_eq!(report.pending_vector_adds, 0);
}

#[test]
fn apply_pending_migrations_is_idempotent_once_already_current() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();

    let applied = engine.apply_pending_migrations().unwrap();
    assert!(applied.is_empty(), "migrations already ran during initialize()");
}

#[test]
fn rebuild_fts_keeps_existing_rows_searchable() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();
    engine.insert(&draft("rebuildable fts content"), false).unwrap();

    engine.rebuild_fts().unwrap();
    let hits = engine.search_bm25("rebuildable", 5).unwrap();
    assert!(!hits.results.is_empty());
}

#[test]
fn vacuum_succeeds_on_a_freshly_migrated_store() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();
    engine.vacuum().unwrap();
}

#[test]
fn rebuild_vector_index_preserves_live_ids_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    engine.initialize().unwrap();
    engine.insert(&draft("stays after rebuild"), false).unwrap();

    engine.rebuild_vector_index().unwrap();
    let report = engine.check_integrity().unwrap();
    assert!(!report.vector_index_needs_rebuild);
}

#[test]
fn repair_operations_before_initialize_raise_not_initialized() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path())).unwrap();
    let err = engine.check_integrity().unwrap_err();
    assert!(matches!(err, memoria_core::error::MemoriaError::NotInitialized));
}
