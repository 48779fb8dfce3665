//! Deterministic token-hash embedder for tests and offline development.
//! Token overlap translates into cosine similarity, which is enough to
//! exercise every retrieval path without a model server.

use async_trait::async_trait;

use super::{l2_normalize, EmbeddingClient};
use crate::error::EngineError;
use crate::text;

pub struct HashEmbedder {
    dim_text: usize,
    dim_caption: usize,
}

impl HashEmbedder {
    pub fn new(dim_text: usize, dim_caption: usize) -> Self {
        Self {
            dim_text,
            dim_caption,
        }
    }

    fn embed_into(&self, input: &str, dim: usize) -> Vec<f32> {
        let mut vector = vec![0.0f32; dim];
        for token in text::tokenize(input) {
            let bucket = (fnv1a(token.as_bytes()) % dim as u64) as usize;
            vector[bucket] += 1.0;
        }
        if vector.iter().all(|x| *x == 0.0) {
            vector[0] = 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, EngineError> {
        Ok(self.embed_into(input, self.dim_text))
    }

    async fn embed_caption(&self, input: &str) -> Result<Vec<f32>, EngineError> {
        Ok(self.embed_into(input, self.dim_caption))
    }

    fn dim_text(&self) -> usize {
        self.dim_text
    }

    fn dim_caption(&self) -> usize {
        self.dim_caption
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
