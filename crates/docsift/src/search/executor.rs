//! Compound search: one analyzed query becomes a single index request
//! with required filters (ACL, exact values) and scored relevance clauses
//! (kNN plus boosted lexical matches). Hits are grouped per resource,
//! classified by why they matched, normalized, and deep-linked.

use std::sync::Arc;

use crate::config::{DeadlineConfig, SearchConfig};
use crate::embeddings::EmbeddingClient;
use crate::error::{with_deadline, EngineError};
use crate::index::{IndexHit, MustClause, SearchIndex, SearchRequest, ShouldClause};
use crate::query::{QueryAnalysis, QueryAnalyzer};
use crate::store::ResourceStore;
use crate::text;
use crate::types::{
    build_open_url, Chunk, MatchType, SearchResponse, SearchResultItem, SearchStrategy,
};

const PREVIEW_MAX_CHARS: usize = 300;

/// Chunk fields the executor needs back from the index.
const PROJECTED_FIELDS: &[&str] = &[
    "resource_id",
    "file_name",
    "file_type",
    "text",
    "searchable_text",
    "keywords",
    "vendor",
    "currency",
    "amounts_cents",
    "page_number",
    "row_index",
    "bbox",
];

pub struct SearchExecutor {
    index: Arc<dyn SearchIndex>,
    store: Arc<dyn ResourceStore>,
    embedder: Arc<dyn EmbeddingClient>,
    analyzer: QueryAnalyzer,
    config: SearchConfig,
    deadlines: DeadlineConfig,
}

impl SearchExecutor {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        store: Arc<dyn ResourceStore>,
        embedder: Arc<dyn EmbeddingClient>,
        config: SearchConfig,
        deadlines: DeadlineConfig,
    ) -> Self {
        Self {
            index,
            store,
            embedder,
            analyzer: QueryAnalyzer::new(),
            config,
            deadlines,
        }
    }

    pub async fn compound_search(
        &self,
        query: &str,
        tenant_id: &str,
        limit: usize,
    ) -> Result<SearchResponse, EngineError> {
        if tenant_id.trim().is_empty() {
            return Err(EngineError::Forbidden(
                "tenant_id is required for search".to_string(),
            ));
        }
        if query.trim().is_empty() {
            return Err(EngineError::BadRequest("empty query".to_string()));
        }
        if limit == 0 {
            return Err(EngineError::BadRequest("limit must be positive".to_string()));
        }

        let analysis = self.analyzer.analyze(query);
        let normalized_query = text::normalize_query(query);

        let query_vector = if analysis.clean_text.is_empty() {
            None
        } else {
            match with_deadline(
                "embed_query",
                self.deadlines.embed_ms,
                self.embedder.embed(&analysis.clean_text),
            )
            .await
            {
                Ok(vector) => Some(vector),
                Err(e) => {
                    tracing::warn!(error = %e, "query embedding unavailable, lexical clauses only");
                    None
                }
            }
        };

        let must = self.build_must(&analysis, tenant_id);
        let should = self.build_should(&analysis, &normalized_query, query_vector);
        let over_fetch = limit * self.config.over_fetch_factor;
        let request = SearchRequest {
            must: must.clone(),
            should: should.clone(),
            limit: over_fetch,
            min_should_match: usize::from(!should.is_empty()),
            fields: PROJECTED_FIELDS.iter().map(|f| f.to_string()).collect(),
            highlight: true,
        };

        let (hits, strategy) = match with_deadline(
            "search",
            self.deadlines.search_ms,
            self.index.search(&request),
        )
        .await
        {
            Ok(response) => {
                let strategy = if response.degraded {
                    SearchStrategy::CompoundDegraded
                } else {
                    SearchStrategy::Compound
                };
                (response.hits, strategy)
            }
            Err(primary) => {
                tracing::warn!(
                    error = %primary,
                    "compound index unavailable, falling back to store lexical scan"
                );
                let fallback = with_deadline(
                    "fallback_search",
                    self.deadlines.store_ms,
                    self.store.lexical_fallback_search(
                        tenant_id,
                        &must,
                        &normalized_query,
                        over_fetch,
                    ),
                )
                .await
                .map_err(|fallback_err| {
                    EngineError::SearchUnavailable(format!(
                        "index: {}; fallback: {}",
                        primary, fallback_err
                    ))
                })?;
                (fallback, SearchStrategy::KeywordFallback)
            }
        };

        let grouped = group_by_resource(hits);
        let money_window = self.money_window(&analysis);

        let mut results: Vec<SearchResultItem> = grouped
            .into_iter()
            .map(|hit| {
                let score = (hit.score / self.config.score_ceiling).clamp(0.0, 1.0);
                let match_type =
                    self.classify(&analysis, &hit.chunk, &normalized_query, score, &money_window);
                build_result(hit, score, match_type)
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let total = results.len();
        results.truncate(limit);

        Ok(SearchResponse {
            query: query.to_string(),
            analysis,
            results,
            total,
            search_strategy: strategy,
        })
    }

    fn build_must(&self, analysis: &QueryAnalysis, tenant_id: &str) -> Vec<MustClause> {
        // The ACL clause is never omitted, whatever else the analysis found.
        let mut must = vec![MustClause::Equals {
            path: "tenant_id".to_string(),
            value: tenant_id.to_string(),
        }];

        for token in analysis
            .ids
            .iter()
            .chain(&analysis.emails)
            .chain(&analysis.ibans)
        {
            must.push(MustClause::Phrase {
                path: "keywords".to_string(),
                value: token.clone(),
            });
        }

        // Only the first money entry is required; the rest ride along in
        // the lexical should clauses.
        if let Some(money) = analysis.money.first() {
            if let Some(currency) = &money.currency {
                must.push(MustClause::Equals {
                    path: "currency".to_string(),
                    value: currency.clone(),
                });
            }
            let (gte, lte) = self.money_bounds(money.cents);
            must.push(MustClause::Range {
                path: "amounts_cents".to_string(),
                gte,
                lte,
            });
        }

        for file_type in &analysis.file_types {
            must.push(MustClause::Equals {
                path: "file_type".to_string(),
                value: file_type.as_str().to_string(),
            });
        }

        must
    }

    fn build_should(
        &self,
        analysis: &QueryAnalysis,
        normalized_query: &str,
        query_vector: Option<Vec<f32>>,
    ) -> Vec<ShouldClause> {
        let mut should = Vec::new();

        if let Some(vector) = query_vector {
            // kNN clauses stay un-boosted; boosts belong to text clauses
            // only.
            should.push(ShouldClause::Knn {
                vector: vector.clone(),
                path: "text_embedding".to_string(),
                k: self.config.knn_k,
            });
            should.push(ShouldClause::Knn {
                vector,
                path: "caption_embedding".to_string(),
                k: self.config.knn_k,
            });
        }

        should.push(ShouldClause::Text {
            query: normalized_query.to_string(),
            paths: ["text", "content", "summary", "entities", "vendor", "file_name"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            boost: 5.0,
        });
        should.push(ShouldClause::Text {
            query: normalized_query.to_string(),
            paths: [
                "ocr_text",
                "ocr_text_normalized",
                "caption",
                "image_description_normalized",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            boost: 10.0,
        });
        should.push(ShouldClause::Text {
            query: normalized_query.to_string(),
            paths: ["vendor", "entities", "keywords"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            boost: 3.0,
        });

        for entity in &analysis.entities {
            should.push(ShouldClause::Text {
                query: entity.clone(),
                paths: ["vendor", "entities", "file_name"]
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
                boost: 3.0,
            });
        }

        should
    }

    fn money_bounds(&self, cents: i64) -> (i64, i64) {
        let tolerance = self.config.money_tolerance;
        let gte = (cents as f64 * (1.0 - tolerance)).floor() as i64;
        let lte = (cents as f64 * (1.0 + tolerance)).ceil() as i64;
        (gte.max(0), lte)
    }

    fn money_window(&self, analysis: &QueryAnalysis) -> Option<(i64, i64, Option<String>)> {
        analysis.money.first().map(|m| {
            let (gte, lte) = self.money_bounds(m.cents);
            (gte, lte, m.currency.clone())
        })
    }

    fn classify(
        &self,
        analysis: &QueryAnalysis,
        chunk: &Chunk,
        normalized_query: &str,
        normalized_score: f32,
        money_window: &Option<(i64, i64, Option<String>)>,
    ) -> MatchType {
        if let Some((gte, lte, currency)) = money_window {
            let currency_matches = match currency {
                Some(wanted) => chunk
                    .currency
                    .as_deref()
                    .map(|c| c.eq_ignore_ascii_case(wanted))
                    .unwrap_or(false),
                None => true,
            };
            let amount_in_window = chunk
                .amounts_cents
                .iter()
                .any(|cents| cents >= gte && cents <= lte);
            if currency_matches && amount_in_window {
                return MatchType::ExactAmount;
            }
        }

        let exact_tokens = analysis
            .ids
            .iter()
            .chain(&analysis.emails)
            .chain(&analysis.ibans);
        for token in exact_tokens {
            let normalized = text::normalize(token, true);
            if chunk.keywords.iter().any(|k| *k == normalized) {
                return MatchType::ExactId;
            }
        }

        if !normalized_query.is_empty() && chunk.searchable_text.contains(normalized_query) {
            return MatchType::ExactPhrase;
        }

        if normalized_score >= self.config.semantic_strong_threshold {
            return MatchType::SemanticStrong;
        }

        MatchType::Hybrid
    }
}

/// Collapse hits to the best-scoring chunk per resource, preserving score
/// order among survivors.
fn group_by_resource(hits: Vec<IndexHit>) -> Vec<IndexHit> {
    let mut best: Vec<IndexHit> = Vec::new();
    for hit in hits {
        match best
            .iter_mut()
            .find(|existing| existing.chunk.resource_id == hit.chunk.resource_id)
        {
            Some(existing) => {
                if hit.score > existing.score {
                    *existing = hit;
                }
            }
            None => best.push(hit),
        }
    }
    best
}

fn build_result(hit: IndexHit, score: f32, match_type: MatchType) -> SearchResultItem {
    let chunk = hit.chunk;
    let preview = chunk
        .text
        .as_deref()
        .or(chunk.ocr_text.as_deref())
        .or(chunk.caption.as_deref())
        .map(|t| text::truncate_chars(t, PREVIEW_MAX_CHARS).to_string());

    SearchResultItem {
        id: chunk.id,
        resource_id: chunk.resource_id,
        file_name: chunk.file_name.clone(),
        file_type: chunk.file_kind,
        score,
        match_type,
        open_url: build_open_url(
            chunk.resource_id,
            chunk.page_number,
            chunk.row_index,
            chunk.bbox,
        ),
        highlights: hit.highlights,
        chunk_text: preview,
        page_number: chunk.page_number,
        row_index: chunk.row_index,
        bbox: chunk.bbox,
        vendor: chunk.vendor.clone(),
        currency: chunk.currency.clone(),
        amounts_cents: if chunk.amounts_cents.is_empty() {
            None
        } else {
            Some(chunk.amounts_cents.clone())
        },
    }
}
