//! In-memory reference implementation of the store contract. Keeps the
//! same shape a document database would: a primary map per entity, a
//! unique (tenant, uri) index, and tenant checks on every read and write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{ResourcePatch, ResourceStore};
use crate::error::EngineError;
use crate::index::{matches_must, IndexHit, MustClause};
use crate::text;
use crate::types::{Chunk, Resource};

#[derive(Default)]
struct StoreState {
    resources: HashMap<Uuid, Resource>,
    by_uri: HashMap<(String, String), Uuid>,
    chunks: HashMap<Uuid, Chunk>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage; every call fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn resource_count(&self) -> usize {
        self.state.read().resources.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.state.read().chunks.len()
    }

    fn check_available(&self) -> Result<(), EngineError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn create_resource(&self, resource: Resource) -> Result<(), EngineError> {
        self.check_available()?;
        let mut state = self.state.write();
        let uri_key = (resource.tenant_id.clone(), resource.uri.clone());
        if state.by_uri.contains_key(&uri_key) {
            return Err(EngineError::Conflict {
                uri: resource.uri.clone(),
            });
        }
        state.by_uri.insert(uri_key, resource.id);
        state.resources.insert(resource.id, resource);
        Ok(())
    }

    async fn replace_resource(&self, resource: Resource) -> Result<(), EngineError> {
        self.check_available()?;
        let mut state = self.state.write();
        match state.resources.get(&resource.id) {
            Some(existing) if existing.tenant_id == resource.tenant_id => {}
            Some(_) => {
                return Err(EngineError::Forbidden(
                    "resource belongs to another tenant".to_string(),
                ))
            }
            None => {
                return Err(EngineError::StoreUnavailable(
                    "replace of unknown resource".to_string(),
                ))
            }
        }
        state
            .by_uri
            .insert((resource.tenant_id.clone(), resource.uri.clone()), resource.id);
        state.resources.insert(resource.id, resource);
        Ok(())
    }

    async fn update_resource(
        &self,
        tenant_id: &str,
        id: Uuid,
        patch: ResourcePatch,
    ) -> Result<Resource, EngineError> {
        self.check_available()?;
        let mut state = self.state.write();
        let resource = state
            .resources
            .get_mut(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or_else(|| EngineError::Forbidden("resource not owned by tenant".to_string()))?;

        if let Some(name) = patch.name {
            resource.name = name;
        }
        if let Some(description) = patch.description {
            resource.description = Some(description);
        }
        if let Some(summary) = patch.summary {
            resource.summary = Some(summary);
        }
        if let Some(tags) = patch.tags {
            resource.tags = tags;
        }
        resource.updated_at = Utc::now();
        Ok(resource.clone())
    }

    async fn get_by_uri(
        &self,
        tenant_id: &str,
        uri: &str,
    ) -> Result<Option<Resource>, EngineError> {
        self.check_available()?;
        let state = self.state.read();
        let id = state
            .by_uri
            .get(&(tenant_id.to_string(), uri.to_string()))
            .copied();
        Ok(id
            .and_then(|id| state.resources.get(&id))
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_by_id(&self, tenant_id: &str, id: Uuid) -> Result<Option<Resource>, EngineError> {
        self.check_available()?;
        let state = self.state.read();
        Ok(state
            .resources
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn delete_resource(&self, tenant_id: &str, id: Uuid) -> Result<(), EngineError> {
        self.check_available()?;
        let mut state = self.state.write();
        match state.resources.get(&id) {
            None => return Ok(()),
            Some(r) if r.tenant_id != tenant_id => {
                return Err(EngineError::Forbidden(
                    "resource not owned by tenant".to_string(),
                ))
            }
            Some(_) => {}
        }
        if let Some(resource) = state.resources.remove(&id) {
            state
                .by_uri
                .remove(&(resource.tenant_id.clone(), resource.uri.clone()));
        }
        let before = state.chunks.len();
        state.chunks.retain(|_, c| c.resource_id != id);
        tracing::debug!(
            resource_id = %id,
            chunks_deleted = before - state.chunks.len(),
            "deleted resource with cascade"
        );
        Ok(())
    }

    async fn create_chunks(&self, chunks: Vec<Chunk>) -> Result<(), EngineError> {
        self.check_available()?;
        let mut state = self.state.write();
        for chunk in chunks {
            state.chunks.insert(chunk.id, chunk);
        }
        Ok(())
    }

    async fn delete_chunks_by_resource(&self, resource_id: Uuid) -> Result<(), EngineError> {
        self.check_available()?;
        let mut state = self.state.write();
        state.chunks.retain(|_, c| c.resource_id != resource_id);
        Ok(())
    }

    async fn chunks_by_resource(
        &self,
        tenant_id: &str,
        resource_id: Uuid,
    ) -> Result<Vec<Chunk>, EngineError> {
        self.check_available()?;
        let state = self.state.read();
        let mut chunks: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|c| c.resource_id == resource_id && c.tenant_id == tenant_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn chunks_missing_embeddings(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<Chunk>, EngineError> {
        self.check_available()?;
        let state = self.state.read();
        Ok(state
            .chunks
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.embedding_missing)
            .cloned()
            .collect())
    }

    async fn update_chunk_embedding(
        &self,
        chunk_id: Uuid,
        embedding: Vec<f32>,
    ) -> Result<(), EngineError> {
        self.check_available()?;
        let mut state = self.state.write();
        let chunk = state.chunks.get_mut(&chunk_id).ok_or_else(|| {
            EngineError::StoreUnavailable("embedding update for unknown chunk".to_string())
        })?;
        chunk.text_embedding = Some(embedding);
        chunk.embedding_missing = false;
        Ok(())
    }

    async fn lexical_fallback_search(
        &self,
        tenant_id: &str,
        must: &[MustClause],
        query: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>, EngineError> {
        self.check_available()?;
        let tokens = text::tokenize(query);
        let state = self.state.read();

        let mut hits: Vec<IndexHit> = state
            .chunks
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .filter(|c| must.iter().all(|m| matches_must(c, m)))
            .filter_map(|chunk| {
                let keywords_joined = chunk.keywords.join(" ");
                let occurrences: usize = tokens
                    .iter()
                    .map(|t| {
                        chunk.searchable_text.matches(t.as_str()).count()
                            + keywords_joined.matches(t.as_str()).count()
                    })
                    .sum();
                // With no scannable tokens, must-only matches still count.
                if occurrences == 0 && !tokens.is_empty() {
                    return None;
                }
                Some(IndexHit {
                    chunk: chunk.clone(),
                    score: occurrences as f32,
                    highlights: Vec::new(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkKind, FileKind};

    fn resource(tenant: &str, uri: &str) -> Resource {
        let now = Utc::now();
        Resource {
            id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            owner_id: "owner-1".to_string(),
            uri: uri.to_string(),
            name: "doc.txt".to_string(),
            description: None,
            mime_type: "text/plain".to_string(),
            file_kind: FileKind::Text,
            size_bytes: 10,
            summary: None,
            content: None,
            tags: Vec::new(),
            vendor: None,
            currency: None,
            amounts_cents: Vec::new(),
            entities: Vec::new(),
            keywords: Vec::new(),
            dates: Vec::new(),
            invoice_no: None,
            file_id: None,
            file_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn chunk_for(resource: &Resource, searchable: &str) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            resource_id: resource.id,
            tenant_id: resource.tenant_id.clone(),
            kind: ChunkKind::Text,
            chunk_index: 0,
            page_number: None,
            row_index: None,
            col_index: None,
            bbox: None,
            text: Some(searchable.to_string()),
            ocr_text: None,
            caption: None,
            image_labels: Vec::new(),
            text_normalized: Some(searchable.to_string()),
            ocr_text_normalized: None,
            searchable_text: searchable.to_string(),
            vendor: None,
            currency: None,
            amounts_cents: Vec::new(),
            entities: Vec::new(),
            keywords: vec!["inv-2024-001".to_string()],
            dates: Vec::new(),
            file_kind: resource.file_kind,
            file_name: resource.name.clone(),
            text_embedding: None,
            caption_embedding: None,
            embedding_missing: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn uri_is_unique_per_tenant() {
        let store = MemoryStore::new();
        store.create_resource(resource("t1", "a.txt")).await.unwrap();
        let err = store
            .create_resource(resource("t1", "a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        // Same uri under another tenant is a separate row.
        store.create_resource(resource("t2", "a.txt")).await.unwrap();
    }

    #[tokio::test]
    async fn cross_tenant_reads_see_nothing() {
        let store = MemoryStore::new();
        let r = resource("t1", "a.txt");
        let id = r.id;
        store.create_resource(r).await.unwrap();

        assert!(store.get_by_id("t2", id).await.unwrap().is_none());
        assert!(store.get_by_uri("t2", "a.txt").await.unwrap().is_none());
        assert!(store.get_by_id("t1", id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cross_tenant_delete_is_forbidden() {
        let store = MemoryStore::new();
        let r = resource("t1", "a.txt");
        let id = r.id;
        store.create_resource(r).await.unwrap();

        let err = store.delete_resource("t2", id).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        assert_eq!(store.resource_count(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_chunks() {
        let store = MemoryStore::new();
        let r = resource("t1", "a.txt");
        let id = r.id;
        store.create_resource(r.clone()).await.unwrap();
        store
            .create_chunks(vec![chunk_for(&r, "alpha"), chunk_for(&r, "beta")])
            .await
            .unwrap();
        assert_eq!(store.chunk_count(), 2);

        store.delete_resource("t1", id).await.unwrap();
        assert_eq!(store.resource_count(), 0);
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn update_resource_touches_descriptive_fields_only() {
        let store = MemoryStore::new();
        let r = resource("t1", "a.txt");
        let id = r.id;
        store.create_resource(r).await.unwrap();

        let updated = store
            .update_resource(
                "t1",
                id,
                ResourcePatch {
                    name: Some("renamed.txt".to_string()),
                    tags: Some(vec!["invoices".to_string()]),
                    ..ResourcePatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed.txt");
        assert_eq!(updated.owner_id, "owner-1");

        let err = store
            .update_resource("t2", id, ResourcePatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn fallback_search_ranks_by_occurrences() {
        let store = MemoryStore::new();
        let r = resource("t1", "a.txt");
        store.create_resource(r.clone()).await.unwrap();
        store
            .create_chunks(vec![
                chunk_for(&r, "invoice invoice invoice details"),
                chunk_for(&r, "invoice once"),
                chunk_for(&r, "nothing relevant"),
            ])
            .await
            .unwrap();

        let hits = store
            .lexical_fallback_search("t1", &[], "invoice", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score > hits[1].score);
        assert!(hits.iter().all(|h| h.highlights.is_empty()));
    }

    #[tokio::test]
    async fn missing_embedding_listing_and_backfill() {
        let store = MemoryStore::new();
        let r = resource("t1", "a.txt");
        store.create_resource(r.clone()).await.unwrap();
        let mut chunk = chunk_for(&r, "alpha");
        chunk.embedding_missing = true;
        let chunk_id = chunk.id;
        store.create_chunks(vec![chunk]).await.unwrap();

        let missing = store.chunks_missing_embeddings("t1").await.unwrap();
        assert_eq!(missing.len(), 1);

        store
            .update_chunk_embedding(chunk_id, vec![1.0, 0.0])
            .await
            .unwrap();
        assert!(store
            .chunks_missing_embeddings("t1")
            .await
            .unwrap()
            .is_empty());
    }
}
