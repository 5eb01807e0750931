//! RagStore trait: abstract interface for chunk storage backends.
//!
//! Every chunk belongs to an owner (the user who uploaded it). All read and
//! delete operations are scoped to that owner.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// A stored chunk with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub content: String,
    /// Document the chunk was cut from (the uploaded filename).
    pub source: String,
    /// Username of the uploader.
    pub owner: String,
    /// `{source, chunk_index, total_chunks, start_offset}` for uploaded files.
    pub metadata: Option<serde_json::Value>,
}

impl StoredChunk {
    pub fn chunk_index(&self) -> Option<u64> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get("chunk_index"))
            .and_then(|value| value.as_u64())
    }
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSearchResult {
    pub chunk: StoredChunk,
    /// Cosine similarity (higher = better).
    pub score: f32,
}

/// Per-document summary for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: String,
    pub chunks: usize,
}

#[async_trait]
pub trait RagStore: Send + Sync {
    /// Insert chunks with their embedding vectors in one transaction.
    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError>;

    /// Replace every chunk of `(owner, source)` with `items` atomically.
    async fn replace_source(
        &self,
        owner: &str,
        source: &str,
        items: Vec<(StoredChunk, Vec<f32>)>,
    ) -> Result<(), ApiError>;

    /// The `limit` chunks of `owner` most similar to the query embedding.
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        owner: &str,
    ) -> Result<Vec<ChunkSearchResult>, ApiError>;

    /// Delete every chunk of one document; returns the number removed.
    async fn delete_source(&self, owner: &str, source: &str) -> Result<usize, ApiError>;

    async fn list_sources(&self, owner: &str) -> Result<Vec<SourceSummary>, ApiError>;

    async fn count(&self, owner: &str) -> Result<usize, ApiError>;
}
