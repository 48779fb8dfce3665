//! Composition root: wires the injected collaborators (store, index,
//! embedding model, optional OCR/captioner) to the pure components and
//! exposes the public operations: ingest, compound search, suggestions,
//! deletion, and the embedding backfill pass.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::embeddings::EmbeddingClient;
use crate::error::{with_deadline, EngineError};
use crate::image::{Captioner, ImageProcessor, OcrEngine};
use crate::index::SearchIndex;
use crate::ingest::{IngestReceipt, IngestRequest, IngestionPipeline};
use crate::search::SearchExecutor;
use crate::store::ResourceStore;
use crate::suggest::{Suggestion, SuggestionIndex};
use crate::types::SearchResponse;

const DEFAULT_SEARCH_LIMIT: usize = 30;
const MAX_SEARCH_LIMIT: usize = 100;

pub struct SearchEngine {
    config: EngineConfig,
    store: Arc<dyn ResourceStore>,
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn EmbeddingClient>,
    suggestions: Arc<SuggestionIndex>,
    pipeline: IngestionPipeline,
    executor: SearchExecutor,
}

impl SearchEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ResourceStore>,
        index: Arc<dyn SearchIndex>,
        embedder: Arc<dyn EmbeddingClient>,
        ocr: Option<Arc<dyn OcrEngine>>,
        captioner: Option<Arc<dyn Captioner>>,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::BadRequest)?;

        let suggestions = Arc::new(SuggestionIndex::new(config.suggest.max_terms_per_resource));
        let images = ImageProcessor::new(ocr, captioner, embedder.clone(), &config.deadlines);
        let pipeline = IngestionPipeline::new(
            config.clone(),
            store.clone(),
            index.clone(),
            suggestions.clone(),
            embedder.clone(),
            images,
        );
        let executor = SearchExecutor::new(
            index.clone(),
            store.clone(),
            embedder.clone(),
            config.search.clone(),
            config.deadlines.clone(),
        );

        Ok(Self {
            config,
            store,
            index,
            embedder,
            suggestions,
            pipeline,
            executor,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ingest one uploaded artifact into a resource plus its chunks.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReceipt, EngineError> {
        self.pipeline.ingest(request).await
    }

    /// Compound hybrid search. `limit` defaults to 30 and is capped at 100.
    pub async fn compound_search(
        &self,
        query: &str,
        tenant_id: &str,
        limit: Option<usize>,
    ) -> Result<SearchResponse, EngineError> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        if limit == 0 || limit > MAX_SEARCH_LIMIT {
            return Err(EngineError::BadRequest(format!(
                "limit must be in 1..={}",
                MAX_SEARCH_LIMIT
            )));
        }
        self.executor.compound_search(query, tenant_id, limit).await
    }

    /// Prefix autocomplete. Never errors; backing trouble yields an empty
    /// list.
    pub fn suggest(&self, tenant_id: &str, prefix: &str, limit: usize) -> Vec<Suggestion> {
        if tenant_id.trim().is_empty() {
            return Vec::new();
        }
        self.suggestions.suggest(tenant_id, prefix, limit)
    }

    /// Delete a resource and everything derived from it: chunks, index
    /// documents, suggestion contributions.
    pub async fn delete_resource(
        &self,
        tenant_id: &str,
        resource_id: Uuid,
    ) -> Result<(), EngineError> {
        with_deadline(
            "store_delete",
            self.config.deadlines.store_ms,
            self.store.delete_resource(tenant_id, resource_id),
        )
        .await?;
        self.suggestions.remove_resource(tenant_id, resource_id);
        if let Err(e) = self.index.delete_resource(tenant_id, resource_id).await {
            tracing::warn!(
                error = %e,
                %resource_id,
                "index cleanup failed after store delete, documents will be orphaned until reindex"
            );
        }
        Ok(())
    }

    /// Backfill pass for chunks whose embedding call failed at ingestion
    /// time. Returns how many chunks were repaired.
    pub async fn reindex_missing_embeddings(
        &self,
        tenant_id: &str,
    ) -> Result<usize, EngineError> {
        let missing = with_deadline(
            "store_missing",
            self.config.deadlines.store_ms,
            self.store.chunks_missing_embeddings(tenant_id),
        )
        .await?;

        let mut repaired = 0usize;
        for mut chunk in missing {
            let Some(input) = chunk
                .text_normalized
                .clone()
                .filter(|t| !t.is_empty())
                .or_else(|| Some(chunk.searchable_text.clone()).filter(|t| !t.is_empty()))
            else {
                continue;
            };

            match with_deadline(
                "embed",
                self.config.deadlines.embed_ms,
                self.embedder.embed(&input),
            )
            .await
            {
                Ok(vector) => {
                    self.store
                        .update_chunk_embedding(chunk.id, vector.clone())
                        .await?;
                    chunk.text_embedding = Some(vector);
                    chunk.embedding_missing = false;
                    if let Err(e) = self.index.index_chunks(std::slice::from_ref(&chunk)).await {
                        tracing::warn!(error = %e, chunk_id = %chunk.id, "index refresh failed during backfill");
                    }
                    repaired += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, chunk_id = %chunk.id, "embedding still unavailable, leaving chunk flagged");
                }
            }
        }

        if repaired > 0 {
            tracing::info!(tenant_id, repaired, "embedding backfill pass finished");
        }
        Ok(repaired)
    }
}
