//! The memory record and its draft/patch counterparts.
//!
//! Re-architected from the distilled source's duck-typed adapter records into
//! a closed set of types: `MemoryType` is a tagged enum (not a free string),
//! `RecordDraft` is what producers build, `MemoryRecord` is what the store
//! persists and returns, and `RecordPatch` is the set of optional mutable
//! fields `update` accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Closed set of memory record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Observation,
    Learning,
    Pattern,
    Skill,
    Decision,
    Insight,
    Fact,
}

impl Default for MemoryType {
    fn default() -> Self {
        Self::Observation
    }
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Learning => "learning",
            Self::Pattern => "pattern",
            Self::Skill => "skill",
            Self::Decision => "decision",
            Self::Insight => "insight",
            Self::Fact => "fact",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "observation" => Self::Observation,
            "learning" => Self::Learning,
            "pattern" => Self::Pattern,
            "skill" => Self::Skill,
            "decision" => Self::Decision,
            "insight" => Self::Insight,
            "fact" => Self::Fact,
            _ => return None,
        })
    }
}

/// Provenance of a record: who or what produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    User,
    System,
    Adapter(String),
}

impl Source {
    pub fn as_string(&self) -> String {
        match self {
            Self::User => "user".to_string(),
            Self::System => "system".to_string(),
            Self::Adapter(name) => format!("adapter:{name}"),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        Some(match s {
            "user" => Self::User,
            "system" => Self::System,
            other => {
                let name = other.strip_prefix("adapter:")?;
                Self::Adapter(name.to_string())
            }
        })
    }
}

/// Soft-delete status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Deleted,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }
}

/// What a producer (adapter, caller) builds to create a record.
///
/// Adapters are producers of `RecordDraft` and do not otherwise participate
/// in the core's type system.
#[derive(Debug, Clone, Default)]
pub struct RecordDraft {
    pub id: Option<String>,
    pub content: String,
    pub summary: String,
    pub memory_type: MemoryType,
    pub intent: String,
    pub tags: BTreeSet<String>,
    pub source: Option<Source>,
    pub source_id: Option<String>,
    pub session_id: Option<String>,
    pub project_hash: Option<String>,
    pub extraction_confidence: f32,
    pub quality_score: f32,
}

/// The durable entity returned by the record store and the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub version: u64,
    pub content: String,
    pub summary: String,
    pub memory_type: MemoryType,
    pub intent: String,
    pub tags: BTreeSet<String>,
    pub source: Source,
    pub source_id: Option<String>,
    pub session_id: Option<String>,
    pub project_hash: Option<String>,
    pub extraction_confidence: f32,
    pub quality_score: f32,
    pub usage_count: u64,
    pub usage_success_rate: f32,
    pub last_accessed: Option<DateTime<Utc>>,
    pub strength: f32,
    pub decay_score: f32,
    /// Embedding is omitted from `get()` by default; populated only when
    /// `include_embedding=true` or internally during search hydration/re-embed.
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RecordStatus,
}

/// Fields `update` may merge into an existing row. `None` means "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub content: Option<String>,
    pub summary: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub intent: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub project_hash: Option<String>,
    pub quality_score: Option<f32>,
    pub strength: Option<f32>,
    pub decay_score: Option<f32>,
    pub status: Option<RecordStatus>,
}

impl RecordPatch {
    /// Whether this patch requires a re-embed (content or summary changed).
    pub fn touches_text(&self) -> bool {
        self.content.is_some() || self.summary.is_some()
    }
}

/// Column `query` may sort by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    CreatedAt,
    UpdatedAt,
    QualityScore,
    UsageCount,
    DecayScore,
}

impl OrderBy {
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::QualityScore => "quality_score",
            Self::UsageCount => "usage_count",
            Self::DecayScore => "decay_score",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Structured filters for `query`/`search`.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub status: Option<RecordStatus>,
    pub memory_type: Option<MemoryType>,
    pub project_hash: Option<String>,
    pub source: Option<String>,
    pub order_by: OrderBy,
    pub order: SortOrder,
    pub limit: usize,
    pub offset: usize,
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// `Source::parse(&source.as_string())` must recover the original
        /// value for any adapter name, including names containing `:` or
        /// other characters that could confuse the "adapter:" prefix split.
        #[test]
        fn adapter_source_roundtrips_through_as_string(name in ".*") {
            let source = Source::Adapter(name);
            prop_assert_eq!(Source::parse(&source.as_string()), Some(source));
        }
    }
}
