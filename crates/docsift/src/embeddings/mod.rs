pub mod http;
pub mod offline;

use async_trait::async_trait;

use crate::error::EngineError;

pub use http::HttpEmbeddingClient;
pub use offline::HashEmbedder;

/// Client for the external embedding model. Text and caption vectors may
/// come from different models; the core only assumes fixed dimensions and
/// unit norm.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;

    async fn embed_caption(&self, text: &str) -> Result<Vec<f32>, EngineError>;

    /// Text embedding dimension D_t.
    fn dim_text(&self) -> usize;

    /// Caption embedding dimension D_c.
    fn dim_caption(&self) -> usize;
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left alone.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity. For unit vectors this is just the dot product, but
/// the full form keeps the reference index honest about un-normalized input.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
