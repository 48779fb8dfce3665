use thiserror::Error;

/// Error taxonomy surfaced by the engine. Collaborator implementations may
/// wrap their own failures with `anyhow` internally, but everything that
/// crosses a component boundary is classified into one of these kinds.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Tenant mismatch or absent ACL. Fatal to the request, never retried.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A competing ingestion holds the lease on the same (tenant, uri).
    #[error("conflict: ingestion already in progress for '{uri}'")]
    Conflict { uri: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unsupported mime type: {0}")]
    UnsupportedMimeType(String),

    /// The parse layer produced no parts; the resource is not created.
    #[error("parse failed: {0}")]
    ParseFailed(String),

    /// Degraded-operation errors: ingestion proceeds with the affected
    /// field absent and the chunk flagged for backfill.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("ocr unavailable: {0}")]
    OcrUnavailable(String),

    #[error("caption unavailable: {0}")]
    CaptionUnavailable(String),

    /// The compound index cannot serve; search falls back to the store.
    #[error("search index unavailable: {0}")]
    IndexUnavailable(String),

    /// Both the compound index and the lexical fallback failed.
    #[error("search unavailable: {0}")]
    SearchUnavailable(String),

    /// Store write failure during ingestion; no partial state is kept.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("timeout after {ms} ms in {operation}")]
    Timeout { operation: &'static str, ms: u64 },
}

impl EngineError {
    /// Stable category label, the user-visible failure name.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Forbidden(_) => "forbidden",
            Self::Conflict { .. } => "conflict",
            Self::BadRequest(_) => "bad_request",
            Self::UnsupportedMimeType(_) => "unsupported_mime_type",
            Self::ParseFailed(_) => "parse_failed",
            Self::EmbeddingUnavailable(_) => "embedding_unavailable",
            Self::OcrUnavailable(_) => "ocr_unavailable",
            Self::CaptionUnavailable(_) => "caption_unavailable",
            Self::IndexUnavailable(_) => "index_unavailable",
            Self::SearchUnavailable(_) => "search_unavailable",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Whether ingestion may proceed past this error with the affected
    /// field absent (the "degraded but ingestable" class).
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable(_)
                | Self::OcrUnavailable(_)
                | Self::CaptionUnavailable(_)
                | Self::Timeout { .. }
        )
    }
}

/// Run a collaborator call under its configured deadline, surfacing a
/// typed `Timeout` instead of hanging past it.
pub(crate) async fn with_deadline<T, F>(
    operation: &'static str,
    ms: u64,
    fut: F,
) -> Result<T, EngineError>
where
    F: std::future::Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(std::time::Duration::from_millis(ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout { operation, ms }),
    }
}
