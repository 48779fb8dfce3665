//! Ingestion orchestration: parse to parts, extract metadata, normalize,
//! embed, aggregate, persist, then best-effort suggestion and index
//! updates. One ingestion per (tenant, uri) at a time; different
//! resources proceed in parallel under the worker and per-tenant caps.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::embeddings::EmbeddingClient;
use crate::error::{with_deadline, EngineError};
use crate::extract::MetadataExtractor;
use crate::image::{ImageBundle, ImageProcessor};
use crate::index::SearchIndex;
use crate::ingest::parser::{Part, PartParser};
use crate::store::ResourceStore;
use crate::suggest::SuggestionIndex;
use crate::text;
use crate::types::{Chunk, ChunkKind, FileKind, Resource};

/// Full text is kept on the resource row only when it stays small enough
/// to be a useful preview.
const SMALL_CONTENT_MAX_CHARS: usize = 16_000;
const SUMMARY_MAX_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub tenant_id: String,
    pub owner_id: String,
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: String,
    pub bytes: Bytes,
    pub tags: Vec<String>,
}

/// Per-resource ingestion record: which optional steps succeeded.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub resource_id: Uuid,
    pub chunks_created: usize,
    pub embedding_complete: bool,
    pub search_indexed: bool,
    pub suggestions_indexed: bool,
}

struct PreparedPart {
    part: Part,
    image: Option<ImageBundle>,
}

pub struct IngestionPipeline {
    store: Arc<dyn ResourceStore>,
    index: Arc<dyn SearchIndex>,
    suggestions: Arc<SuggestionIndex>,
    embedder: Arc<dyn EmbeddingClient>,
    images: ImageProcessor,
    extractor: MetadataExtractor,
    parser: PartParser,
    config: EngineConfig,
    leases: DashMap<(String, String), ()>,
    tenant_slots: DashMap<String, Arc<Semaphore>>,
    worker_slots: Semaphore,
}

impl IngestionPipeline {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ResourceStore>,
        index: Arc<dyn SearchIndex>,
        suggestions: Arc<SuggestionIndex>,
        embedder: Arc<dyn EmbeddingClient>,
        images: ImageProcessor,
    ) -> Self {
        Self {
            store,
            index,
            suggestions,
            embedder,
            images,
            extractor: MetadataExtractor::new(config.vendor_map.clone()),
            parser: PartParser::new(&config.ingest),
            worker_slots: Semaphore::new(config.ingest.worker_concurrency),
            leases: DashMap::new(),
            tenant_slots: DashMap::new(),
            config,
        }
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReceipt, EngineError> {
        if request.tenant_id.trim().is_empty() {
            return Err(EngineError::Forbidden("tenant_id is required".to_string()));
        }
        if request.uri.trim().is_empty() || request.name.trim().is_empty() {
            return Err(EngineError::BadRequest(
                "uri and name are required".to_string(),
            ));
        }
        if request.bytes.is_empty() {
            return Err(EngineError::BadRequest("empty upload".to_string()));
        }

        let file_kind = resolve_file_kind(&request)?;
        let _lease = self.acquire_lease(&request)?;

        let _worker = self
            .worker_slots
            .acquire()
            .await
            .expect("worker semaphore is never closed");
        let tenant_sem = {
            let entry = self
                .tenant_slots
                .entry(request.tenant_id.clone())
                .or_insert_with(|| {
                    Arc::new(Semaphore::new(self.config.ingest.per_tenant_concurrency))
                });
            entry.value().clone()
        };
        let _tenant = tenant_sem
            .acquire_owned()
            .await
            .expect("tenant semaphore is never closed");

        let store_ms = self.config.deadlines.store_ms;
        let existing = with_deadline(
            "store_get",
            store_ms,
            self.store.get_by_uri(&request.tenant_id, &request.uri),
        )
        .await?;

        if let Some(existing) = &existing {
            if existing.owner_id != request.owner_id {
                return Err(EngineError::Forbidden(
                    "resource is owned by a different principal".to_string(),
                ));
            }
        }

        let prepared = self.parse_parts(&request, file_kind).await?;
        if prepared.is_empty() {
            return Err(EngineError::ParseFailed(
                "no parts produced from upload".to_string(),
            ));
        }

        let resource_id = existing.as_ref().map(|r| r.id).unwrap_or_else(Uuid::new_v4);
        let mut chunks: Vec<Chunk> = prepared
            .iter()
            .enumerate()
            .map(|(idx, p)| self.build_chunk(&request, resource_id, file_kind, idx as u32, p))
            .collect();

        let embedding_complete = self.embed_chunks(&mut chunks).await;
        let resource = self.aggregate_resource(&request, resource_id, file_kind, &existing, &prepared, &chunks);

        // Persist: resource first, then the chunk set. Reingestion drops
        // the old chunks before the new resource row lands, so observers
        // see the previous version or the new one, never a mix.
        if existing.is_some() {
            with_deadline(
                "store_delete_chunks",
                store_ms,
                self.store.delete_chunks_by_resource(resource_id),
            )
            .await?;
            with_deadline(
                "store_replace",
                store_ms,
                self.store.replace_resource(resource.clone()),
            )
            .await?;
        } else {
            with_deadline(
                "store_create",
                store_ms,
                self.store.create_resource(resource.clone()),
            )
            .await?;
        }
        if let Err(e) = with_deadline(
            "store_chunks",
            store_ms,
            self.store.create_chunks(chunks.clone()),
        )
        .await
        {
            tracing::error!(error = %e, resource_id = %resource_id, "chunk write failed, rolling back resource");
            self.store
                .delete_resource(&request.tenant_id, resource_id)
                .await
                .ok();
            return Err(e);
        }

        // Post-commit side-effects are best-effort; the resource stays
        // reachable through the store either way.
        self.suggestions
            .remove_resource(&request.tenant_id, resource_id);
        self.suggestions.index_resource(&resource);
        let suggestions_indexed = true;

        let search_indexed = match self.push_to_index(&request.tenant_id, resource_id, &chunks).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    resource_id = %resource_id,
                    "search index update failed, lexical fallback will still find this resource"
                );
                false
            }
        };

        tracing::info!(
            tenant_id = %request.tenant_id,
            resource_id = %resource_id,
            uri = %request.uri,
            chunks = chunks.len(),
            embedding_complete,
            search_indexed,
            "ingested resource"
        );

        Ok(IngestReceipt {
            resource_id,
            chunks_created: chunks.len(),
            embedding_complete,
            search_indexed,
            suggestions_indexed,
        })
    }

    fn acquire_lease(&self, request: &IngestRequest) -> Result<LeaseGuard<'_>, EngineError> {
        use dashmap::mapref::entry::Entry;
        let key = (request.tenant_id.clone(), request.uri.clone());
        match self.leases.entry(key.clone()) {
            Entry::Occupied(_) => Err(EngineError::Conflict {
                uri: request.uri.clone(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Ok(LeaseGuard {
                    leases: &self.leases,
                    key,
                })
            }
        }
    }

    async fn parse_parts(
        &self,
        request: &IngestRequest,
        file_kind: FileKind,
    ) -> Result<Vec<PreparedPart>, EngineError> {
        let plain = |parts: Vec<Part>| {
            parts
                .into_iter()
                .map(|part| PreparedPart { part, image: None })
                .collect::<Vec<_>>()
        };

        match file_kind {
            FileKind::Text | FileKind::Other => {
                let content = std::str::from_utf8(&request.bytes)
                    .map_err(|_| EngineError::ParseFailed("text upload is not UTF-8".to_string()))?;
                Ok(plain(self.parser.parse_text(content)?))
            }
            FileKind::Pdf => Ok(plain(self.parser.parse_pdf(&request.bytes)?)),
            FileKind::Csv => Ok(plain(self.parser.parse_csv(&request.bytes)?)),
            FileKind::Image => {
                let bundle = self.images.process(&request.bytes, &request.mime_type).await;
                Ok(vec![PreparedPart {
                    part: Part {
                        kind: ChunkKind::Region,
                        text: None,
                        page_number: None,
                        row_index: None,
                    },
                    image: Some(bundle),
                }])
            }
        }
    }

    fn build_chunk(
        &self,
        request: &IngestRequest,
        resource_id: Uuid,
        file_kind: FileKind,
        chunk_index: u32,
        prepared: &PreparedPart,
    ) -> Chunk {
        let part = &prepared.part;
        let bundle = prepared.image.as_ref();

        // Structured extraction sees the part text plus whatever text the
        // image produced.
        let mut extraction_input = part.text.clone().unwrap_or_default();
        if let Some(bundle) = bundle {
            for extra in [bundle.ocr_text.as_deref(), bundle.caption.as_deref()] {
                if let Some(extra) = extra {
                    if !extraction_input.is_empty() {
                        extraction_input.push('\n');
                    }
                    extraction_input.push_str(extra);
                }
            }
        }
        let meta = self.extractor.extract(&extraction_input);

        let labels = bundle.map(|b| b.image_labels.clone()).unwrap_or_default();
        let labels_joined = labels.join(" ");
        let searchable_text = text::create_searchable_text([
            part.text.as_deref(),
            bundle.and_then(|b| b.ocr_text.as_deref()),
            bundle.and_then(|b| b.caption.as_deref()),
            if labels_joined.is_empty() {
                None
            } else {
                Some(labels_joined.as_str())
            },
        ]);

        Chunk {
            id: Uuid::new_v4(),
            resource_id,
            tenant_id: request.tenant_id.clone(),
            kind: part.kind,
            chunk_index,
            page_number: part.page_number,
            row_index: part.row_index,
            col_index: None,
            bbox: None,
            text: part.text.clone(),
            ocr_text: bundle.and_then(|b| b.ocr_text.clone()),
            caption: bundle.and_then(|b| b.caption.clone()),
            image_labels: labels,
            text_normalized: part.text.as_deref().map(|t| text::normalize(t, true)),
            ocr_text_normalized: bundle.and_then(|b| b.ocr_text_normalized.clone()),
            searchable_text,
            vendor: meta.vendor,
            currency: meta.currency,
            amounts_cents: meta.amounts_cents,
            entities: meta.entities,
            keywords: meta.keywords,
            dates: meta.dates,
            file_kind,
            file_name: request.name.clone(),
            text_embedding: None,
            caption_embedding: bundle.and_then(|b| b.caption_embedding.clone()),
            embedding_missing: bundle.map(|b| b.embedding_missing).unwrap_or(false),
            created_at: Utc::now(),
        }
    }

    /// Embed every chunk that has text to embed. Failures degrade: the
    /// chunk is flagged for backfill and ingestion continues. Returns
    /// whether every embedding landed.
    async fn embed_chunks(&self, chunks: &mut [Chunk]) -> bool {
        let embed_ms = self.config.deadlines.embed_ms;
        let jobs: Vec<(usize, String)> = chunks
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                let input = chunk
                    .text_normalized
                    .clone()
                    .filter(|t| !t.is_empty())
                    .or_else(|| {
                        Some(chunk.searchable_text.clone()).filter(|t| !t.is_empty())
                    })?;
                Some((i, input))
            })
            .collect();

        let results = join_all(jobs.iter().map(|(i, input)| async move {
            (
                *i,
                with_deadline("embed", embed_ms, self.embedder.embed(input)).await,
            )
        }))
        .await;

        let mut complete = true;
        for (i, result) in results {
            match result {
                Ok(vector) => chunks[i].text_embedding = Some(vector),
                Err(e) => {
                    complete = false;
                    chunks[i].embedding_missing = true;
                    tracing::warn!(
                        error = %e,
                        chunk_index = chunks[i].chunk_index,
                        "embedding failed, chunk flagged for backfill"
                    );
                }
            }
        }
        complete && chunks.iter().all(|c| !c.embedding_missing)
    }

    fn aggregate_resource(
        &self,
        request: &IngestRequest,
        resource_id: Uuid,
        file_kind: FileKind,
        existing: &Option<Resource>,
        prepared: &[PreparedPart],
        chunks: &[Chunk],
    ) -> Resource {
        let mut keywords = Vec::new();
        let mut entities = Vec::new();
        let mut amounts_cents = Vec::new();
        let mut dates = Vec::new();
        let mut currency = None;
        let mut vendor = None;
        let mut invoice_no = None;

        for chunk in chunks {
            for keyword in &chunk.keywords {
                if !keywords.contains(keyword) {
                    keywords.push(keyword.clone());
                }
            }
            for entity in &chunk.entities {
                if !entities.contains(entity) {
                    entities.push(entity.clone());
                }
            }
            amounts_cents.extend(chunk.amounts_cents.iter().copied());
            dates.extend(chunk.dates.iter().copied());
            if currency.is_none() {
                currency = chunk.currency.clone();
            }
            if vendor.is_none() {
                vendor = chunk.vendor.clone();
            }
            if invoice_no.is_none() {
                invoice_no = chunk
                    .keywords
                    .iter()
                    .find(|k| crate::extract::INVOICE_ID_RE.is_match(&k.to_uppercase()))
                    .cloned();
            }
        }
        dates.sort();
        dates.dedup();

        let full_text: String = prepared
            .iter()
            .filter_map(|p| p.part.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n\n");
        let content = if !full_text.is_empty()
            && full_text.chars().count() <= SMALL_CONTENT_MAX_CHARS
        {
            Some(full_text.clone())
        } else {
            None
        };
        let summary = full_text
            .split("\n\n")
            .next()
            .map(|p| text::truncate_chars(p, SUMMARY_MAX_CHARS).trim().to_string())
            .filter(|s| !s.is_empty());

        let now = Utc::now();
        Resource {
            id: resource_id,
            tenant_id: request.tenant_id.clone(),
            owner_id: request.owner_id.clone(),
            uri: request.uri.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            mime_type: request.mime_type.clone(),
            file_kind,
            size_bytes: request.bytes.len() as u64,
            summary,
            content,
            tags: request.tags.clone(),
            vendor,
            currency,
            amounts_cents,
            entities,
            keywords,
            dates,
            invoice_no,
            file_id: None,
            file_path: Some(request.uri.clone()),
            created_at: existing.as_ref().map(|r| r.created_at).unwrap_or(now),
            updated_at: now,
        }
    }

    async fn push_to_index(
        &self,
        tenant_id: &str,
        resource_id: Uuid,
        chunks: &[Chunk],
    ) -> Result<(), EngineError> {
        let search_ms = self.config.deadlines.search_ms;
        with_deadline(
            "index_delete",
            search_ms,
            self.index.delete_resource(tenant_id, resource_id),
        )
        .await?;
        with_deadline("index_chunks", search_ms, self.index.index_chunks(chunks)).await
    }
}

fn resolve_file_kind(request: &IngestRequest) -> Result<FileKind, EngineError> {
    let kind = FileKind::from_mime(&request.mime_type);
    if kind != FileKind::Other {
        return Ok(kind);
    }
    // Unknown mime: ingest as text when the payload is valid UTF-8,
    // refuse opaque binaries.
    if std::str::from_utf8(&request.bytes).is_ok() {
        Ok(FileKind::Other)
    } else {
        Err(EngineError::UnsupportedMimeType(request.mime_type.clone()))
    }
}

struct LeaseGuard<'a> {
    leases: &'a DashMap<(String, String), ()>,
    key: (String, String),
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.leases.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use crate::index::MemoryIndex;
    use crate::store::{MemoryStore, ResourceStore};
    use async_trait::async_trait;

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingClient for FailingEmbedder {
        async fn embed(&self, _input: &str) -> Result<Vec<f32>, EngineError> {
            Err(EngineError::EmbeddingUnavailable("model down".to_string()))
        }

        async fn embed_caption(&self, _input: &str) -> Result<Vec<f32>, EngineError> {
            Err(EngineError::EmbeddingUnavailable("model down".to_string()))
        }

        fn dim_text(&self) -> usize {
            64
        }

        fn dim_caption(&self) -> usize {
            64
        }
    }

    struct Fixture {
        pipeline: IngestionPipeline,
        store: Arc<MemoryStore>,
        index: Arc<MemoryIndex>,
        suggestions: Arc<SuggestionIndex>,
    }

    fn fixture_with(embedder: Arc<dyn EmbeddingClient>) -> Fixture {
        let config = EngineConfig::default();
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new());
        let suggestions = Arc::new(SuggestionIndex::new(
            config.suggest.max_terms_per_resource,
        ));
        let images = ImageProcessor::new(None, None, embedder.clone(), &config.deadlines);
        let pipeline = IngestionPipeline::new(
            config,
            store.clone(),
            index.clone(),
            suggestions.clone(),
            embedder,
            images,
        );
        Fixture {
            pipeline,
            store,
            index,
            suggestions,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(HashEmbedder::new(64, 64)))
    }

    fn text_request(tenant: &str, uri: &str, body: &str) -> IngestRequest {
        IngestRequest {
            tenant_id: tenant.to_string(),
            owner_id: "owner-1".to_string(),
            uri: uri.to_string(),
            name: format!("{}.txt", uri),
            description: None,
            mime_type: "text/plain".to_string(),
            bytes: Bytes::from(body.to_string()),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn text_ingest_creates_resource_and_chunks() {
        let f = fixture();
        let receipt = f
            .pipeline
            .ingest(text_request(
                "t1",
                "docs/invoice.txt",
                "Invoice INV-2024-001 from Acme Corp for $1,234.56",
            ))
            .await
            .unwrap();

        assert_eq!(receipt.chunks_created, 1);
        assert!(receipt.embedding_complete);
        assert!(receipt.search_indexed);

        let resource = f
            .store
            .get_by_uri("t1", "docs/invoice.txt")
            .await
            .unwrap()
            .expect("resource persisted");
        assert_eq!(resource.id, receipt.resource_id);
        assert!(resource.keywords.contains(&"inv-2024-001".to_string()));
        assert_eq!(resource.currency.as_deref(), Some("USD"));
        assert_eq!(resource.amounts_cents, vec![123_456]);
        assert_eq!(resource.invoice_no.as_deref(), Some("inv-2024-001"));

        let chunks = f
            .store
            .chunks_by_resource("t1", resource.id)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].tenant_id, "t1");
        assert!(chunks[0].text_embedding.is_some());
        assert!(chunks[0]
            .searchable_text
            .contains("invoice inv-2024-001 from acme corp"));
        assert_eq!(f.index.len(), 1);
    }

    #[tokio::test]
    async fn chunk_indexes_are_monotonic() {
        let f = fixture();
        let body: String = (0..60)
            .map(|i| format!("Paragraph number {:03} talks about revenue and churn.\n\n", i))
            .collect();
        let receipt = f
            .pipeline
            .ingest(text_request("t1", "docs/long.txt", &body))
            .await
            .unwrap();
        assert!(receipt.chunks_created > 1);

        let chunks = f
            .store
            .chunks_by_resource("t1", receipt.resource_id)
            .await
            .unwrap();
        for (expected, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, expected as u32);
        }
    }

    #[tokio::test]
    async fn reingest_keeps_resource_id_and_replaces_chunks() {
        let f = fixture();
        let first = f
            .pipeline
            .ingest(text_request("t1", "docs/a.txt", "first version body"))
            .await
            .unwrap();
        let second = f
            .pipeline
            .ingest(text_request("t1", "docs/a.txt", "second version body entirely"))
            .await
            .unwrap();

        assert_eq!(first.resource_id, second.resource_id);
        let chunks = f
            .store
            .chunks_by_resource("t1", second.resource_id)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.as_deref().unwrap().contains("second version"));
        assert_eq!(f.store.chunk_count(), 1);
        assert_eq!(f.index.len(), 1);
    }

    #[tokio::test]
    async fn reingest_is_idempotent_in_outcome() {
        let f = fixture();
        let body = "stable content with Acme Corp inside";
        let first = f
            .pipeline
            .ingest(text_request("t1", "docs/a.txt", body))
            .await
            .unwrap();
        let second = f
            .pipeline
            .ingest(text_request("t1", "docs/a.txt", body))
            .await
            .unwrap();

        assert_eq!(first.resource_id, second.resource_id);
        let a = f
            .store
            .chunks_by_resource("t1", first.resource_id)
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].searchable_text, "stable content with acme corp inside");
        // Suggestion counters did not inflate.
        let suggestions = f.suggestions.suggest("t1", "docs", 10);
        assert_eq!(suggestions.len(), 1);
        assert!((suggestions[0].score - (2.0f32).ln()).abs() < 1e-5);
    }

    #[tokio::test]
    async fn csv_ingest_produces_row_and_schema_chunks() {
        let f = fixture();
        let mut request = text_request("t1", "docs/spend.csv", "vendor,amount\ngoogle,1200\namazon,800\n");
        request.mime_type = "text/csv".to_string();
        let receipt = f.pipeline.ingest(request).await.unwrap();
        assert_eq!(receipt.chunks_created, 3);

        let chunks = f
            .store
            .chunks_by_resource("t1", receipt.resource_id)
            .await
            .unwrap();
        assert_eq!(chunks[0].kind, ChunkKind::Row);
        assert_eq!(chunks[0].row_index, Some(0));
        assert_eq!(chunks[2].kind, ChunkKind::Text);
        assert!(chunks[2].searchable_text.contains("csv schema"));
    }

    #[tokio::test]
    async fn degraded_embedding_still_persists_chunks() {
        let f = fixture_with(Arc::new(FailingEmbedder));
        let receipt = f
            .pipeline
            .ingest(text_request(
                "t1",
                "docs/deg.txt",
                "Keyword INV-2024-777 survives without vectors",
            ))
            .await
            .unwrap();

        assert!(!receipt.embedding_complete);
        let chunks = f
            .store
            .chunks_by_resource("t1", receipt.resource_id)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text_embedding.is_none());
        assert!(chunks[0].embedding_missing);
        let missing = f.store.chunks_missing_embeddings("t1").await.unwrap();
        assert_eq!(missing.len(), 1);
    }

    #[tokio::test]
    async fn opaque_binary_with_unknown_mime_is_rejected() {
        let f = fixture();
        let mut request = text_request("t1", "docs/blob.bin", "");
        request.mime_type = "application/octet-stream".to_string();
        request.bytes = Bytes::from_static(&[0x00, 0xFF, 0xFE, 0x01]);
        let err = f.pipeline.ingest(request).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedMimeType(_)));
        assert_eq!(f.store.resource_count(), 0);
    }

    #[tokio::test]
    async fn parse_failure_creates_no_resource() {
        let f = fixture();
        let mut request = text_request("t1", "docs/empty.pdf", "");
        request.mime_type = "application/pdf".to_string();
        request.bytes = Bytes::from_static(b"not a pdf at all");
        let err = f.pipeline.ingest(request).await.unwrap_err();
        assert!(matches!(err, EngineError::ParseFailed(_)));
        assert_eq!(f.store.resource_count(), 0);
        assert_eq!(f.index.len(), 0);
    }

    #[tokio::test]
    async fn owner_mismatch_on_existing_uri_is_forbidden() {
        let f = fixture();
        f.pipeline
            .ingest(text_request("t1", "docs/a.txt", "original"))
            .await
            .unwrap();

        let mut request = text_request("t1", "docs/a.txt", "takeover attempt");
        request.owner_id = "someone-else".to_string();
        let err = f.pipeline.ingest(request).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn competing_lease_yields_conflict() {
        let f = fixture();
        let request = text_request("t1", "docs/a.txt", "body");
        let _held = f.pipeline.acquire_lease(&request).unwrap();
        let err = f.pipeline.ingest(request).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
    }

    #[tokio::test]
    async fn missing_tenant_is_forbidden() {
        let f = fixture();
        let err = f
            .pipeline
            .ingest(text_request("", "docs/a.txt", "body"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn index_outage_degrades_but_ingests() {
        let f = fixture();
        f.index.set_unavailable(true);
        let receipt = f
            .pipeline
            .ingest(text_request("t1", "docs/a.txt", "still ingestable body"))
            .await
            .unwrap();
        assert!(!receipt.search_indexed);
        assert_eq!(f.store.resource_count(), 1);
    }
}
