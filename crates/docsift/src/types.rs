use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::query::QueryAnalysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Csv,
    Image,
    Text,
    Other,
}

impl FileKind {
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.to_lowercase();
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence {
            "application/pdf" => Self::Pdf,
            "text/csv" | "application/csv" => Self::Csv,
            m if m.starts_with("image/") => Self::Image,
            m if m.starts_with("text/") => Self::Text,
            "application/json" | "application/xml" => Self::Text,
            _ => Self::Other,
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "csv" => Self::Csv,
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tiff" | "tif" | "webp" => Self::Image,
            "txt" | "md" | "markdown" | "text" | "json" | "xml" | "html" | "htm" => Self::Text,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Image => "image",
            Self::Text => "text",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Text,
    Page,
    Row,
    Cell,
    Region,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Page => "page",
            Self::Row => "row",
            Self::Cell => "cell",
            Self::Region => "region",
        }
    }
}

/// One ingested artifact with its aggregate metadata.
///
/// `(tenant_id, uri)` is unique; `owner_id` is immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub tenant_id: String,
    pub owner_id: String,
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: String,
    pub file_kind: FileKind,
    pub size_bytes: u64,
    pub summary: Option<String>,
    /// Full text, kept only when small enough to be a useful preview.
    pub content: Option<String>,
    pub tags: Vec<String>,
    // Extracted structured fields, denormalized for fast filtering.
    pub vendor: Option<String>,
    pub currency: Option<String>,
    pub amounts_cents: Vec<i64>,
    pub entities: Vec<String>,
    pub keywords: Vec<String>,
    pub dates: Vec<DateTime<Utc>>,
    pub invoice_no: Option<String>,
    // Pointer into the external blob store.
    pub file_id: Option<String>,
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A searchable subunit of a Resource. Immutable after ingestion;
/// reprocessing replaces the whole chunk set, never individual chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub resource_id: Uuid,
    /// Denormalized copy of the parent's tenant for index-side ACL filtering.
    pub tenant_id: String,
    pub kind: ChunkKind,
    /// Monotonic within a resource, assigned in parse order.
    pub chunk_index: u32,
    pub page_number: Option<u32>,
    pub row_index: Option<u32>,
    pub col_index: Option<u32>,
    pub bbox: Option<[f32; 4]>,
    // Original content.
    pub text: Option<String>,
    pub ocr_text: Option<String>,
    pub caption: Option<String>,
    pub image_labels: Vec<String>,
    // Normalized content (diacritic-stripped, lowercased).
    pub text_normalized: Option<String>,
    pub ocr_text_normalized: Option<String>,
    /// Concatenation of all normalized textual sources, recomputable from
    /// the originals alone.
    pub searchable_text: String,
    // Structured copies scoped to this chunk.
    pub vendor: Option<String>,
    pub currency: Option<String>,
    pub amounts_cents: Vec<i64>,
    pub entities: Vec<String>,
    pub keywords: Vec<String>,
    pub dates: Vec<DateTime<Utc>>,
    /// Copied from the parent so the index can filter without a join.
    pub file_kind: FileKind,
    pub file_name: String,
    // Dense vectors, unit-norm when present.
    pub text_embedding: Option<Vec<f32>>,
    pub caption_embedding: Option<Vec<f32>>,
    /// Set when an embedding call failed during ingestion; the chunk is
    /// searchable lexically and awaits backfill.
    pub embedding_missing: bool,
    pub created_at: DateTime<Utc>,
}

/// Why a result matched, in decreasing order of exactness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    ExactAmount,
    ExactId,
    ExactPhrase,
    SemanticStrong,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Compound,
    CompoundDegraded,
    KeywordFallback,
}

/// Opaque highlight fragment handed back by the index collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Highlight {
    pub path: String,
    pub texts: Vec<String>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    /// Chunk id of the best-scoring chunk for the resource.
    pub id: Uuid,
    pub resource_id: Uuid,
    pub file_name: String,
    pub file_type: FileKind,
    /// Normalized into [0, 1].
    pub score: f32,
    pub match_type: MatchType,
    pub open_url: String,
    pub highlights: Vec<Highlight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amounts_cents: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub analysis: QueryAnalysis,
    pub results: Vec<SearchResultItem>,
    pub total: usize,
    pub search_strategy: SearchStrategy,
}

/// Deep-link into the exact in-document location of a hit.
pub fn build_open_url(
    resource_id: Uuid,
    page_number: Option<u32>,
    row_index: Option<u32>,
    bbox: Option<[f32; 4]>,
) -> String {
    let mut params = Vec::new();
    if let Some(page) = page_number {
        params.push(format!("page={}", page));
    }
    if let Some(row) = row_index {
        params.push(format!("row={}", row));
    }
    if let Some([x, y, w, h]) = bbox {
        params.push(format!("bbox={},{},{},{}", x, y, w, h));
    }
    if params.is_empty() {
        format!("/resources/{}", resource_id)
    } else {
        format!("/resources/{}?{}", resource_id, params.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kind_from_mime() {
        assert_eq!(FileKind::from_mime("application/pdf"), FileKind::Pdf);
        assert_eq!(FileKind::from_mime("text/csv"), FileKind::Csv);
        assert_eq!(FileKind::from_mime("image/png"), FileKind::Image);
        assert_eq!(
            FileKind::from_mime("text/plain; charset=utf-8"),
            FileKind::Text
        );
        assert_eq!(
            FileKind::from_mime("application/octet-stream"),
            FileKind::Other
        );
    }

    #[test]
    fn file_kind_from_extension() {
        assert_eq!(FileKind::from_extension("PDF"), FileKind::Pdf);
        assert_eq!(FileKind::from_extension("jpeg"), FileKind::Image);
        assert_eq!(FileKind::from_extension("bin"), FileKind::Other);
    }

    #[test]
    fn open_url_path_only() {
        let rid = Uuid::new_v4();
        assert_eq!(
            build_open_url(rid, None, None, None),
            format!("/resources/{}", rid)
        );
    }

    #[test]
    fn open_url_with_position_hints() {
        let rid = Uuid::new_v4();
        assert_eq!(
            build_open_url(rid, Some(3), None, None),
            format!("/resources/{}?page=3", rid)
        );
        assert_eq!(
            build_open_url(rid, None, Some(12), None),
            format!("/resources/{}?row=12", rid)
        );
        let url = build_open_url(rid, Some(1), None, Some([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(url, format!("/resources/{}?page=1&bbox=1,2,3,4", rid));
    }
}
