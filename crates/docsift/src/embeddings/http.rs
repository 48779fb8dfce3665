//! HTTP client for the external embedding model. Inputs are truncated to
//! the model's character limit, responses are validated for dimension and
//! re-normalized when the model returns slightly off-norm vectors, and a
//! small LRU cache absorbs repeated inputs within one process.

use std::num::NonZeroUsize;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{l2_normalize, EmbeddingClient};
use crate::config::{DeadlineConfig, EmbeddingConfig};
use crate::error::EngineError;
use crate::text;

const RETRY_ATTEMPTS: usize = 2;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
    kind: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    config: EmbeddingConfig,
    embed_deadline: Duration,
    cache: Mutex<LruCache<(&'static str, String), Vec<f32>>>,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig, deadlines: &DeadlineConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| EngineError::EmbeddingUnavailable(e.to_string()))?;

        let cache_size = NonZeroUsize::new(config.cache_size.max(1))
            .expect("cache size clamped to at least 1");

        tracing::info!(
            endpoint = %config.endpoint,
            dim_text = config.dim_text,
            dim_caption = config.dim_caption,
            "Creating HttpEmbeddingClient"
        );

        Ok(Self {
            client,
            embed_deadline: Duration::from_millis(deadlines.embed_ms),
            cache: Mutex::new(LruCache::new(cache_size)),
            config,
        })
    }

    /// One round trip to the model endpoint, no deadline or retry policy.
    async fn post_once(&self, body: &EmbedRequest<'_>) -> anyhow::Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(body)
            .send()
            .await
            .context("embedding endpoint unreachable")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("model endpoint returned HTTP {}", status);
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .context("embedding response was not valid JSON")?;
        Ok(parsed.embedding)
    }

    async fn request_embedding(
        &self,
        input: &str,
        kind: &'static str,
        expected_dim: usize,
    ) -> Result<Vec<f32>, EngineError> {
        let truncated = text::truncate_chars(input, self.config.max_input_chars);

        if let Some(hit) = self
            .cache
            .lock()
            .get(&(kind, truncated.to_string()))
            .cloned()
        {
            return Ok(hit);
        }

        let body = EmbedRequest {
            input: truncated,
            kind,
        };

        let mut last_error = String::new();
        for attempt in 0..RETRY_ATTEMPTS {
            let vector = match tokio::time::timeout(self.embed_deadline, self.post_once(&body))
                .await
            {
                Err(_) => {
                    return Err(EngineError::Timeout {
                        operation: "embed",
                        ms: self.embed_deadline.as_millis() as u64,
                    })
                }
                Ok(Err(e)) => {
                    last_error = format!("{:#}", e);
                    tracing::warn!(attempt, error = %last_error, "embedding request failed");
                    continue;
                }
                Ok(Ok(vector)) => vector,
            };

            if vector.len() != expected_dim {
                return Err(EngineError::EmbeddingUnavailable(format!(
                    "expected {} dimensions, model returned {}",
                    expected_dim,
                    vector.len()
                )));
            }

            let mut vector = vector;
            let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            if (norm - 1.0).abs() > 1e-3 {
                l2_normalize(&mut vector);
            }

            self.cache
                .lock()
                .put((kind, truncated.to_string()), vector.clone());
            return Ok(vector);
        }

        Err(EngineError::EmbeddingUnavailable(last_error))
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, EngineError> {
        self.request_embedding(input, "text", self.config.dim_text)
            .await
    }

    async fn embed_caption(&self, input: &str) -> Result<Vec<f32>, EngineError> {
        self.request_embedding(input, "caption", self.config.dim_caption)
            .await
    }

    fn dim_text(&self) -> usize {
        self.config.dim_text
    }

    fn dim_caption(&self) -> usize {
        self.config.dim_caption
    }
}
