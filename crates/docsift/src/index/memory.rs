//! In-process reference backend for the compound index contract: exact
//! filters, token-overlap lexical scoring with boosts, cosine kNN over
//! stored vectors, and naive highlight fragments. Backs the test suite
//! and small single-node deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
    matches_must, text_field, IndexHit, IndexResponse, MustClause, SearchIndex, SearchRequest,
    ShouldClause,
};
use crate::embeddings::cosine;
use crate::error::EngineError;
use crate::text;
use crate::types::{Chunk, Highlight};

/// Raw-score contribution of a matched required phrase/text clause. Exact
/// matches must be able to saturate the executor's normalization ceiling.
const MUST_MATCH_SCORE: f32 = 10.0;

#[derive(Default)]
pub struct MemoryIndex {
    chunks: RwLock<HashMap<Uuid, Chunk>>,
    unavailable: AtomicBool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an index outage; every call fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), EngineError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::IndexUnavailable(
                "memory index marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), EngineError> {
        self.check_available()?;
        let mut store = self.chunks.write();
        for chunk in chunks {
            store.insert(chunk.id, chunk.clone());
        }
        Ok(())
    }

    async fn delete_resource(
        &self,
        tenant_id: &str,
        resource_id: Uuid,
    ) -> Result<(), EngineError> {
        self.check_available()?;
        let mut store = self.chunks.write();
        let before = store.len();
        store.retain(|_, c| !(c.resource_id == resource_id && c.tenant_id == tenant_id));
        let deleted = before - store.len();
        if deleted > 0 {
            tracing::debug!(%resource_id, deleted, "removed resource chunks from index");
        }
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<IndexResponse, EngineError> {
        self.check_available()?;
        let store = self.chunks.read();

        let candidates: Vec<&Chunk> = store
            .values()
            .filter(|chunk| request.must.iter().all(|m| matches_must(chunk, m)))
            .collect();

        // Required phrase/text clauses contribute to the score the way a
        // bool query's must leg does; pure filters (equals/range) do not.
        let must_score = MUST_MATCH_SCORE
            * request
                .must
                .iter()
                .filter(|m| matches!(m, MustClause::Phrase { .. } | MustClause::Text { .. }))
                .count() as f32;

        // Each kNN clause retains only its top-k candidates by cosine.
        let knn_pools: Vec<Option<HashMap<Uuid, f32>>> = request
            .should
            .iter()
            .map(|clause| match clause {
                ShouldClause::Knn { vector, path, k } => {
                    let mut scored: Vec<(Uuid, f32)> = candidates
                        .iter()
                        .filter_map(|chunk| {
                            vector_field(chunk, path)
                                .map(|v| (chunk.id, cosine(vector, v)))
                        })
                        .filter(|(_, sim)| *sim > 0.0)
                        .collect();
                    scored.sort_by(|a, b| {
                        b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    scored.truncate(*k);
                    Some(scored.into_iter().collect())
                }
                ShouldClause::Text { .. } => None,
            })
            .collect();

        let mut hits = Vec::new();
        for chunk in candidates {
            let mut score = must_score;
            let mut matched_should = 0usize;
            let mut highlights = Vec::new();

            for (clause, knn_pool) in request.should.iter().zip(&knn_pools) {
                match clause {
                    ShouldClause::Text {
                        query,
                        paths,
                        boost,
                    } => {
                        if let Some((coverage, highlight)) =
                            score_text_clause(chunk, query, paths, request.highlight)
                        {
                            score += boost * coverage;
                            matched_should += 1;
                            if let Some(mut h) = highlight {
                                h.score = *boost;
                                highlights.push(h);
                            }
                        }
                    }
                    ShouldClause::Knn { .. } => {
                        if let Some(sim) = knn_pool
                            .as_ref()
                            .and_then(|pool| pool.get(&chunk.id))
                        {
                            score += sim;
                            matched_should += 1;
                        }
                    }
                }
            }

            if !request.should.is_empty() && matched_should < request.min_should_match {
                continue;
            }

            hits.push(IndexHit {
                chunk: chunk.clone(),
                score,
                highlights,
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(request.limit);

        Ok(IndexResponse {
            hits,
            degraded: false,
        })
    }
}

fn vector_field<'a>(chunk: &'a Chunk, path: &str) -> Option<&'a [f32]> {
    match path {
        "text_embedding" => chunk.text_embedding.as_deref(),
        "caption_embedding" => chunk.caption_embedding.as_deref(),
        _ => None,
    }
}

/// Fraction of the query's tokens present in the clause's paths, plus an
/// optional fragment from the first matching field.
fn score_text_clause(
    chunk: &Chunk,
    query: &str,
    paths: &[String],
    want_highlight: bool,
) -> Option<(f32, Option<Highlight>)> {
    let tokens = text::tokenize(query);
    if tokens.is_empty() {
        return None;
    }

    let fields: Vec<(String, String)> = paths
        .iter()
        .filter_map(|p| text_field(chunk, p).map(|f| (p.clone(), f)))
        .collect();
    if fields.is_empty() {
        return None;
    }

    let mut matched = 0usize;
    let mut highlight = None;
    for token in &tokens {
        let hit = fields
            .iter()
            .find(|(_, field)| field.contains(token.as_str()));
        if let Some((path, field)) = hit {
            matched += 1;
            if want_highlight && highlight.is_none() {
                highlight = Some(Highlight {
                    path: path.clone(),
                    texts: vec![fragment_around(field, token)],
                    score: 0.0,
                });
            }
        }
    }

    if matched == 0 {
        return None;
    }
    Some((matched as f32 / tokens.len() as f32, highlight))
}

fn fragment_around(field: &str, token: &str) -> String {
    let pos = field.find(token).unwrap_or(0);
    let start = snap_to_char_boundary(field, pos.saturating_sub(30));
    let end = snap_to_char_boundary(field, (pos + token.len() + 50).min(field.len()));
    field[start..end].to_string()
}

fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbeddingClient, HashEmbedder};
    use crate::types::{ChunkKind, FileKind};
    use chrono::Utc;

    fn chunk(tenant: &str, searchable: &str, keywords: Vec<&str>) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            resource_id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
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
            keywords: keywords.into_iter().map(str::to_string).collect(),
            dates: Vec::new(),
            file_kind: FileKind::Text,
            file_name: "note.txt".to_string(),
            text_embedding: None,
            caption_embedding: None,
            embedding_missing: false,
            created_at: Utc::now(),
        }
    }

    fn tenant_must(tenant: &str) -> MustClause {
        MustClause::Equals {
            path: "tenant_id".to_string(),
            value: tenant.to_string(),
        }
    }

    fn request(must: Vec<MustClause>, should: Vec<ShouldClause>) -> SearchRequest {
        let min_should_match = usize::from(!should.is_empty());
        SearchRequest {
            must,
            should,
            limit: 10,
            min_should_match,
            fields: Vec::new(),
            highlight: true,
        }
    }

    #[tokio::test]
    async fn must_filters_by_tenant() {
        let index = MemoryIndex::new();
        index
            .index_chunks(&[
                chunk("t1", "shared content", vec![]),
                chunk("t2", "shared content", vec![]),
            ])
            .await
            .unwrap();

        let response = index
            .search(&request(
                vec![tenant_must("t1")],
                vec![ShouldClause::Text {
                    query: "shared content".to_string(),
                    paths: vec!["text".to_string()],
                    boost: 5.0,
                }],
            ))
            .await
            .unwrap();

        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].chunk.tenant_id, "t1");
    }

    #[tokio::test]
    async fn phrase_must_boosts_exact_hits_to_the_top() {
        let index = MemoryIndex::new();
        index
            .index_chunks(&[chunk(
                "t1",
                "invoice inv-2024-001 acme corp",
                vec!["inv-2024-001"],
            )])
            .await
            .unwrap();

        let response = index
            .search(&request(
                vec![
                    tenant_must("t1"),
                    MustClause::Phrase {
                        path: "keywords".to_string(),
                        value: "INV-2024-001".to_string(),
                    },
                ],
                vec![ShouldClause::Text {
                    query: "inv-2024-001".to_string(),
                    paths: vec!["keywords".to_string()],
                    boost: 3.0,
                }],
            ))
            .await
            .unwrap();

        assert_eq!(response.hits.len(), 1);
        assert!(response.hits[0].score >= MUST_MATCH_SCORE);
    }

    #[tokio::test]
    async fn knn_ranks_by_cosine_similarity() {
        let embedder = HashEmbedder::new(128, 128);
        let index = MemoryIndex::new();

        let mut close = chunk("t1", "google cloud invoice march", vec![]);
        close.text_embedding = Some(embedder.embed("google cloud invoice march").await.unwrap());
        let mut far = chunk("t1", "zebra migration patterns", vec![]);
        far.text_embedding = Some(embedder.embed("zebra migration patterns").await.unwrap());
        index.index_chunks(&[close.clone(), far]).await.unwrap();

        let query_vec = embedder.embed("google cloud invoice").await.unwrap();
        let response = index
            .search(&request(
                vec![tenant_must("t1")],
                vec![ShouldClause::Knn {
                    vector: query_vec,
                    path: "text_embedding".to_string(),
                    k: 10,
                }],
            ))
            .await
            .unwrap();

        assert!(!response.hits.is_empty());
        assert_eq!(response.hits[0].chunk.id, close.id);
    }

    #[tokio::test]
    async fn min_should_match_excludes_non_matching_hits() {
        let index = MemoryIndex::new();
        index
            .index_chunks(&[chunk("t1", "unrelated words entirely", vec![])])
            .await
            .unwrap();

        let response = index
            .search(&request(
                vec![tenant_must("t1")],
                vec![ShouldClause::Text {
                    query: "quarterly forecast".to_string(),
                    paths: vec!["text".to_string()],
                    boost: 5.0,
                }],
            ))
            .await
            .unwrap();

        assert!(response.hits.is_empty());
    }

    #[tokio::test]
    async fn scores_are_non_increasing_and_limited() {
        let index = MemoryIndex::new();
        let mut chunks = Vec::new();
        for i in 0..20 {
            let text = if i % 2 == 0 {
                "quarterly forecast report"
            } else {
                "forecast only"
            };
            chunks.push(chunk("t1", text, vec![]));
        }
        index.index_chunks(&chunks).await.unwrap();

        let mut req = request(
            vec![tenant_must("t1")],
            vec![ShouldClause::Text {
                query: "quarterly forecast".to_string(),
                paths: vec!["text".to_string()],
                boost: 5.0,
            }],
        );
        req.limit = 5;
        let response = index.search(&req).await.unwrap();

        assert_eq!(response.hits.len(), 5);
        for pair in response.hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn delete_resource_removes_only_that_resource() {
        let index = MemoryIndex::new();
        let keep = chunk("t1", "keep me", vec![]);
        let gone = chunk("t1", "drop me", vec![]);
        index.index_chunks(&[keep.clone(), gone.clone()]).await.unwrap();

        index
            .delete_resource("t1", gone.resource_id)
            .await
            .unwrap();
        assert_eq!(index.len(), 1);

        // Wrong tenant deletes nothing.
        index
            .delete_resource("t2", keep.resource_id)
            .await
            .unwrap();
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_index_surfaces_typed_error() {
        let index = MemoryIndex::new();
        index.set_unavailable(true);
        let err = index
            .search(&request(vec![tenant_must("t1")], vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IndexUnavailable(_)));
    }

    #[tokio::test]
    async fn highlights_carry_path_and_fragment() {
        let index = MemoryIndex::new();
        index
            .index_chunks(&[chunk("t1", "annual datova schranka report", vec![])])
            .await
            .unwrap();

        let response = index
            .search(&request(
                vec![tenant_must("t1")],
                vec![ShouldClause::Text {
                    query: "datova".to_string(),
                    paths: vec!["text".to_string()],
                    boost: 5.0,
                }],
            ))
            .await
            .unwrap();

        let highlights = &response.hits[0].highlights;
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].path, "text");
        assert!(highlights[0].texts[0].contains("datova"));
    }
}
