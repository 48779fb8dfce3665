//! Document store façade for Resources and Chunks. The store enforces
//! tenant ownership on every path; rows that cannot prove a tenant are
//! treated as invisible. Also provides the lexical fallback scan used
//! when the compound index is down.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineError;
use crate::index::{IndexHit, MustClause};
use crate::types::{Chunk, Resource};

pub use memory::MemoryStore;

/// Partial update for the mutable descriptive fields of a Resource.
/// Extracted fields and ownership are only ever rewritten by reingestion.
#[derive(Debug, Clone, Default)]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn create_resource(&self, resource: Resource) -> Result<(), EngineError>;

    /// Overwrite an existing resource row in place, keyed by id. Used by
    /// reingestion after the old chunk set is dropped.
    async fn replace_resource(&self, resource: Resource) -> Result<(), EngineError>;

    async fn update_resource(
        &self,
        tenant_id: &str,
        id: Uuid,
        patch: ResourcePatch,
    ) -> Result<Resource, EngineError>;

    async fn get_by_uri(&self, tenant_id: &str, uri: &str)
        -> Result<Option<Resource>, EngineError>;

    async fn get_by_id(&self, tenant_id: &str, id: Uuid) -> Result<Option<Resource>, EngineError>;

    /// Cascades to all chunks of the resource.
    async fn delete_resource(&self, tenant_id: &str, id: Uuid) -> Result<(), EngineError>;

    async fn create_chunks(&self, chunks: Vec<Chunk>) -> Result<(), EngineError>;

    async fn delete_chunks_by_resource(&self, resource_id: Uuid) -> Result<(), EngineError>;

    async fn chunks_by_resource(
        &self,
        tenant_id: &str,
        resource_id: Uuid,
    ) -> Result<Vec<Chunk>, EngineError>;

    /// Chunks flagged `embedding_missing`, for the backfill reconciler.
    async fn chunks_missing_embeddings(&self, tenant_id: &str)
        -> Result<Vec<Chunk>, EngineError>;

    async fn update_chunk_embedding(
        &self,
        chunk_id: Uuid,
        embedding: Vec<f32>,
    ) -> Result<(), EngineError>;

    /// Substring scan over `searchable_text`/`keywords`, ranked purely by
    /// counted occurrences. Used only when the compound index is
    /// unavailable; hits carry no highlights.
    async fn lexical_fallback_search(
        &self,
        tenant_id: &str,
        must: &[MustClause],
        query: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>, EngineError>;
}
