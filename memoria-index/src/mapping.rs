//! Bidirectional external-id ↔ internal-slot mapping, persisted as JSON.
//!
//! Generalized from a fixed-size UUID-keyed id map into arbitrary external
//! string ids, extended with explicit free-list/tombstone bookkeeping for
//! slot reuse.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use memoria_core::index_error::IndexError;
use memoria_core::error::Result;

pub const MAPPING_FILE: &str = "mapping.json";

/// On-disk form of the id mapping. Readers must tolerate extra fields, so
/// this intentionally does not derive `deny_unknown_fields`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingFile {
    #[serde(rename = "idToPosition")]
    pub id_to_position: HashMap<String, usize>,
    #[serde(rename = "positionToId")]
    pub position_to_id: HashMap<usize, String>,
    #[serde(rename = "deletedPositions")]
    pub deleted_positions: Vec<usize>,
    #[serde(rename = "nextPosition")]
    pub next_position: usize,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory id↔slot mapping with a free-list of tombstoned slots.
#[derive(Debug)]
pub struct IdMapping {
    id_to_slot: HashMap<String, usize>,
    slot_to_id: HashMap<usize, String>,
    /// Slots whose mapping was removed; reused by `add` before `next_slot`
    /// is bumped. A slot may appear here without appearing in `deleted`
    /// (e.g. it was freed and then reused already) — `free_slots` and
    /// `deleted` are tracked separately because a slot can be "free" (never
    /// assigned) and "deleted" (tombstoned, graph entry still present) are
    /// the same set in practice for this implementation: see `remove`.
    free_slots: Vec<usize>,
    deleted: HashSet<usize>,
    next_slot: usize,
    dimension: usize,
    created_at: DateTime<Utc>,
}

impl IdMapping {
    pub fn new(dimension: usize) -> Self {
        Self {
            id_to_slot: HashMap::new(),
            slot_to_id: HashMap::new(),
            free_slots: Vec::new(),
            deleted: HashSet::new(),
            next_slot: 0,
            dimension,
            created_at: Utc::now(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn next_slot(&self) -> usize {
        self.next_slot
    }

    pub fn len(&self) -> usize {
        self.id_to_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_slot.is_empty()
    }

    pub fn get_slot(&self, id: &str) -> Option<usize> {
        self.id_to_slot.get(id).copied()
    }

    pub fn get_id(&self, slot: usize) -> Option<&str> {
        self.slot_to_id.get(&slot).map(|s| s.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_to_slot.contains_key(id)
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.id_to_slot.keys().cloned().collect()
    }

    pub fn is_tombstoned(&self, slot: usize) -> bool {
        self.deleted.contains(&slot)
    }

    /// Allocates a slot for a brand-new id: reuses a tombstoned slot from
    /// the free list if one exists, else bumps `next_slot`.
    fn allocate_slot(&mut self) -> usize {
        if let Some(slot) = self.free_slots.pop() {
            self.deleted.remove(&slot);
            return slot;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Allocates a slot by always bumping `next_slot`, never touching the
    /// free list. Used for re-binding an id that already has a slot, so
    /// the new vector never lands on the id's own just-freed slot (which
    /// the plain LIFO free list would otherwise hand right back).
    fn allocate_fresh_slot(&mut self) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Whether binding `id` right now would need to grow `next_slot`
    /// (as opposed to reusing an already-tombstoned slot from the free
    /// list) — used by the caller to enforce `max_elements`.
    pub fn bind_needs_growth(&self, id: &str) -> bool {
        if self.id_to_slot.contains_key(id) {
            true
        } else {
            self.free_slots.is_empty()
        }
    }

    /// Binds `id` to a slot. If `id` already has a slot, the old slot is
    /// tombstoned and freed (available to OTHER ids later), and a fresh
    /// slot is allocated for the new binding — `hnsw_rs` has no API to
    /// mutate a graph point's data in-place, so "overwrite at that slot"
    /// is implemented as tombstone-old + allocate-new, which
    /// preserves the invariant that a live slot's graph entry is always
    /// the most recent `add(id, ·)`. Returns `(slot, is_update)`.
    pub fn bind(&mut self, id: &str) -> (usize, bool) {
        if let Some(&old_slot) = self.id_to_slot.get(id) {
            let new_slot = self.allocate_fresh_slot();
            self.slot_to_id.remove(&old_slot);
            self.deleted.insert(old_slot);
            self.free_slots.push(old_slot);
            self.id_to_slot.insert(id.to_string(), new_slot);
            self.slot_to_id.insert(new_slot, id.to_string());
            return (new_slot, true);
        }
        let slot = self.allocate_slot();
        self.id_to_slot.insert(id.to_string(), slot);
        self.slot_to_id.insert(slot, id.to_string());
        (slot, false)
    }

    /// Unmaps `id`, tombstoning its slot. Idempotent: returns `false` if
    /// `id` was not mapped.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.id_to_slot.remove(id) {
            Some(slot) => {
                self.slot_to_id.remove(&slot);
                self.deleted.insert(slot);
                self.free_slots.push(slot);
                true
            }
            None => false,
        }
    }

    pub fn fragmentation(&self) -> f64 {
        if self.next_slot == 0 {
            0.0
        } else {
            self.deleted.len() as f64 / self.next_slot as f64
        }
    }

    pub fn to_file(&self) -> MappingFile {
        let now = Utc::now();
        MappingFile {
            id_to_position: self.id_to_slot.clone(),
            position_to_id: self.slot_to_id.clone(),
            deleted_positions: self.deleted.iter().copied().collect(),
            next_position: self.next_slot,
            dimension: self.dimension,
            created_at: self.created_at,
            updated_at: now,
        }
    }

    /// Rebuilds from a parsed mapping file, trimming any entry whose slot
    /// is `>= graph_len` — the repairable "mapping ahead of graph"
    /// inconsistency a crash between the two index files can leave behind.
    pub fn from_file(file: MappingFile, graph_len: usize) -> Self {
        let mut id_to_slot = HashMap::new();
        let mut slot_to_id = HashMap::new();
        for (id, slot) in file.id_to_position {
            if slot < graph_len {
                id_to_slot.insert(id.clone(), slot);
                slot_to_id.insert(slot, id);
            }
        }
        let deleted: HashSet<usize> = file
            .deleted_positions
            .into_iter()
            .filter(|&s| s < graph_len)
            .collect();
        let free_slots: Vec<usize> = deleted.iter().copied().collect();
        let next_slot = file.next_position.min(graph_len);
        Self {
            id_to_slot,
            slot_to_id,
            free_slots,
            deleted,
            next_slot,
            dimension: file.dimension,
            created_at: file.created_at,
        }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let file = self.to_file();
        let json = serde_json::to_string_pretty(&file)?;
        let final_path = dir.join(MAPPING_FILE);
        let tmp_path = dir.join(format!("{MAPPING_FILE}.tmp"));
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Loads `mapping.json` if present. `graph_len` is the number of
    /// vectors actually present in the loaded graph, used to trim a
    /// mapping that raced ahead of the graph file on a prior crash.
    pub fn load(dir: &Path, graph_len: usize) -> Result<Option<Self>> {
        let path = dir.join(MAPPING_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        let file: MappingFile = serde_json::from_str(&contents).map_err(|e| {
            IndexError::Corrupt {
                details: format!("mapping.json: {e}"),
            }
        })?;
        Ok(Some(Self::from_file(file, graph_len)))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Bind(&'static str),
        Remove(&'static str),
    }

    fn op() -> impl Strategy<Value = Op> {
        let ids = prop_oneof![
            Just("a"), Just("b"), Just("c"), Just("d"), Just("e"),
        ];
        prop_oneof![
            ids.clone().prop_map(Op::Bind),
            ids.prop_map(Op::Remove),
        ]
    }

    proptest! {
        /// `free_slots + live = next_slot` must hold after every bind/remove,
        /// no matter how ids are bound, re-bound, or removed.
        #[test]
        fn free_slots_plus_live_always_equals_next_slot(ops in proptest::collection::vec(op(), 0..100)) {
            let mut m = IdMapping::new(4);
            for op in ops {
                match op {
                    Op::Bind(id) => { m.bind(id); }
                    Op::Remove(id) => { m.remove(id); }
                }
                prop_assert_eq!(m.free_slots.len() + m.len(), m.next_slot());
            }
        }
    }
}
