//! Narrow façade over the backing compound index (vector + lexical +
//! filter). The core never sees the index's internals; it sends one
//! compound request and gets scored hits back. `MemoryIndex` is the
//! in-process reference backend used by tests and small deployments.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineError;
use crate::text;
use crate::types::{Chunk, Highlight};

pub use memory::MemoryIndex;

/// Required predicate. Every hit satisfies all of these.
#[derive(Debug, Clone)]
pub enum MustClause {
    Equals { path: String, value: String },
    Range { path: String, gte: i64, lte: i64 },
    Phrase { path: String, value: String },
    Text { query: String, paths: Vec<String> },
}

/// Relevance clause. Hits must satisfy at least `min_should_match` of
/// these when any are present.
///
/// `Knn` deliberately has no boost field: some index tiers reject boosted
/// scoring nested under a compound query, so boosts are only expressible
/// on `Text` clauses.
#[derive(Debug, Clone)]
pub enum ShouldClause {
    Text {
        query: String,
        paths: Vec<String>,
        boost: f32,
    },
    Knn {
        vector: Vec<f32>,
        path: String,
        k: usize,
    },
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub must: Vec<MustClause>,
    pub should: Vec<ShouldClause>,
    pub limit: usize,
    pub min_should_match: usize,
    /// Projection hint; backends may return more fields than asked.
    pub fields: Vec<String>,
    pub highlight: bool,
}

#[derive(Debug, Clone)]
pub struct IndexHit {
    pub chunk: Chunk,
    pub score: f32,
    pub highlights: Vec<Highlight>,
}

#[derive(Debug, Clone)]
pub struct IndexResponse {
    pub hits: Vec<IndexHit>,
    /// Set when the backend answered from a partial or degraded state.
    pub degraded: bool,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), EngineError>;

    async fn delete_resource(&self, tenant_id: &str, resource_id: Uuid)
        -> Result<(), EngineError>;

    async fn search(&self, request: &SearchRequest) -> Result<IndexResponse, EngineError>;
}

// ── Field resolution shared with the store's lexical fallback ───────────

/// Exact-match (keyword) field values.
pub(crate) fn keyword_field(chunk: &Chunk, path: &str) -> Option<String> {
    match path {
        "tenant_id" => Some(chunk.tenant_id.clone()),
        "file_type" => Some(chunk.file_kind.as_str().to_string()),
        "chunk_type" => Some(chunk.kind.as_str().to_string()),
        "currency" => chunk.currency.clone(),
        "vendor" => chunk.vendor.clone(),
        _ => None,
    }
}

pub(crate) fn numeric_field(chunk: &Chunk, path: &str) -> Vec<i64> {
    match path {
        "amounts_cents" => chunk.amounts_cents.clone(),
        "page_number" => chunk.page_number.map(i64::from).into_iter().collect(),
        "row_index" => chunk.row_index.map(i64::from).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Normalized text content for lexical matching. Unknown paths (e.g.
/// resource-level fields a richer backend would carry) resolve to None.
pub(crate) fn text_field(chunk: &Chunk, path: &str) -> Option<String> {
    match path {
        "text" | "text_normalized" => chunk
            .text_normalized
            .clone()
            .or_else(|| chunk.text.as_deref().map(|t| text::normalize(t, true))),
        "ocr_text" | "ocr_text_normalized" => chunk.ocr_text_normalized.clone(),
        "caption" | "image_description" | "image_description_normalized" => {
            chunk.caption.as_deref().map(|c| text::normalize(c, true))
        }
        "entities" => {
            if chunk.entities.is_empty() {
                None
            } else {
                Some(text::normalize(&chunk.entities.join(" "), true))
            }
        }
        "keywords" => {
            if chunk.keywords.is_empty() {
                None
            } else {
                Some(chunk.keywords.join(" "))
            }
        }
        "vendor" => chunk.vendor.clone(),
        "file_name" => Some(text::normalize(&chunk.file_name, true)),
        "searchable_text" => Some(chunk.searchable_text.clone()),
        _ => None,
    }
}

pub(crate) fn matches_must(chunk: &Chunk, clause: &MustClause) -> bool {
    match clause {
        MustClause::Equals { path, value } => keyword_field(chunk, path)
            .map(|field| field.eq_ignore_ascii_case(value))
            .unwrap_or(false),
        MustClause::Range { path, gte, lte } => numeric_field(chunk, path)
            .iter()
            .any(|v| v >= gte && v <= lte),
        MustClause::Phrase { path, value } => {
            let needle = text::normalize(value, true);
            if needle.is_empty() {
                return false;
            }
            if path == "keywords" {
                chunk.keywords.iter().any(|k| *k == needle)
            } else {
                text_field(chunk, path)
                    .map(|field| field.contains(&needle))
                    .unwrap_or(false)
            }
        }
        MustClause::Text { query, paths } => {
            let tokens = text::tokenize(query);
            if tokens.is_empty() {
                return false;
            }
            paths.iter().any(|path| {
                text_field(chunk, path)
                    .map(|field| tokens.iter().any(|t| field.contains(t.as_str())))
                    .unwrap_or(false)
            })
        }
    }
}
