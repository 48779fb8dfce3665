use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub ingest: IngestConfig,
    pub suggest: SuggestConfig,
    pub deadlines: DeadlineConfig,
    /// Vendor normalization map: lowercase variant -> canonical key.
    /// Deployment configuration, not learned.
    pub vendor_map: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Text embedding dimension D_t. Changing it invalidates every stored
    /// text embedding.
    pub dim_text: usize,
    /// Caption embedding dimension D_c. Same reindex constraint as dim_text.
    pub dim_caption: usize,
    pub endpoint: String,
    pub max_input_chars: usize,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Relative half-width of the amount range clause (0.10 = ±10%).
    pub money_tolerance: f64,
    /// Divisor used to normalize raw index scores into [0, 1].
    pub score_ceiling: f32,
    /// Post-normalization lower bound for a `semantic_strong` match.
    pub semantic_strong_threshold: f32,
    /// Multiplier on `limit` when querying the index, to leave headroom
    /// for per-resource grouping.
    pub over_fetch_factor: usize,
    pub index_name: String,
    /// Candidate pool size for each kNN clause.
    pub knn_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
    pub min_chunk_chars: usize,
    pub worker_concurrency: usize,
    pub per_tenant_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestConfig {
    /// Upper bound on content tokens a single resource pushes into the
    /// all_terms category.
    pub max_terms_per_resource: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    pub embed_ms: u64,
    pub ocr_ms: u64,
    pub caption_ms: u64,
    pub search_ms: u64,
    pub store_ms: u64,
}

impl EngineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dim_text == 0 {
            return Err("embedding.dim_text must be > 0".into());
        }
        if self.embedding.dim_caption == 0 {
            return Err("embedding.dim_caption must be > 0".into());
        }
        if self.embedding.max_input_chars == 0 || self.embedding.max_input_chars > 8000 {
            return Err("embedding.max_input_chars must be in 1..=8000".into());
        }
        if self.ingest.chunk_size_chars < 50 {
            return Err("ingest.chunk_size_chars must be >= 50".into());
        }
        if self.ingest.chunk_overlap_chars >= self.ingest.chunk_size_chars {
            return Err("ingest.chunk_overlap_chars must be < chunk_size_chars".into());
        }
        if self.ingest.worker_concurrency == 0 {
            return Err("ingest.worker_concurrency must be > 0".into());
        }
        if self.ingest.per_tenant_concurrency == 0 {
            return Err("ingest.per_tenant_concurrency must be > 0".into());
        }
        if !(0.0..1.0).contains(&self.search.money_tolerance) {
            return Err("search.money_tolerance must be in [0.0, 1.0)".into());
        }
        if self.search.score_ceiling <= 0.0 {
            return Err("search.score_ceiling must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.search.semantic_strong_threshold) {
            return Err("search.semantic_strong_threshold must be in [0.0, 1.0]".into());
        }
        if self.search.over_fetch_factor == 0 {
            return Err("search.over_fetch_factor must be > 0".into());
        }
        if self.search.knn_k == 0 {
            return Err("search.knn_k must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        // Small seed map so dev builds and tests resolve common vendors
        // deterministically. Deployments replace this wholesale.
        let vendor_map: HashMap<String, String> = [
            ("google", "google"),
            ("google cloud", "google"),
            ("google ireland limited", "google"),
            ("amazon web services", "aws"),
            ("aws", "aws"),
            ("microsoft", "microsoft"),
            ("microsoft azure", "microsoft"),
            ("t-mobile", "t-mobile"),
            ("t-mobile czech republic", "t-mobile"),
            ("acme corp", "acme"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            embedding: EmbeddingConfig {
                dim_text: 384,
                dim_caption: 384,
                endpoint: "http://localhost:8089/v1/embeddings".to_string(),
                max_input_chars: 8000,
                cache_size: 1000,
            },
            search: SearchConfig {
                money_tolerance: 0.10,
                score_ceiling: 10.0,
                semantic_strong_threshold: 0.8,
                over_fetch_factor: 3,
                index_name: "resource_chunks_compound".to_string(),
                knn_k: 100,
            },
            ingest: IngestConfig {
                chunk_size_chars: 2000,
                chunk_overlap_chars: 200,
                min_chunk_chars: 50,
                worker_concurrency: 4,
                per_tenant_concurrency: 2,
            },
            suggest: SuggestConfig {
                max_terms_per_resource: 256,
            },
            deadlines: DeadlineConfig {
                embed_ms: 2_000,
                ocr_ms: 10_000,
                caption_ms: 10_000,
                search_ms: 1_000,
                store_ms: 1_000,
            },
            vendor_map,
        }
    }
}
