pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod extract;
pub mod image;
pub mod index;
pub mod ingest;
pub mod query;
pub mod search;
pub mod store;
pub mod suggest;
pub mod text;
pub mod types;

// Re-export primary types for convenience
pub use config::EngineConfig;
pub use engine::SearchEngine;
pub use error::EngineError;
pub use ingest::{IngestReceipt, IngestRequest};
pub use query::{QueryAnalysis, QueryAnalyzer};
pub use suggest::{Suggestion, SuggestionIndex, SuggestionKind};
pub use types::{
    Chunk, ChunkKind, FileKind, MatchType, Resource, SearchResponse, SearchResultItem,
    SearchStrategy,
};
