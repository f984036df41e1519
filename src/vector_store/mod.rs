//! Vector-searchable chunk storage.

use anyhow::Result;
use async_trait::async_trait;

use crate::embeddings::{ContentChunk, RetrievedChunk};

pub mod memory;
pub mod pgvector;

pub use memory::MemoryStore;
pub use pgvector::PgVectorStore;

/// Backing store for embedded chunks.
///
/// Similarity is cosine in every implementation; indexer and service must
/// point at the same store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Appends rows, rejecting vectors whose dimension differs from the rows
    /// already stored.
    async fn insert(&self, chunks: &[ContentChunk]) -> Result<usize>;

    /// Returns up to `k` rows ordered by decreasing similarity to `query`.
    /// Equal scores keep insertion order.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>>;

    /// Returns up to `k` of the most recently inserted rows, newest first.
    async fn recent(&self, k: usize) -> Result<Vec<RetrievedChunk>>;

    /// Deletes every row whose generation differs from `keep`.
    async fn prune_generations(&self, keep: &str) -> Result<usize>;

    /// Distinct embedding model identifiers present in the store.
    async fn embedding_models(&self) -> Result<Vec<String>>;

    /// Number of stored rows.
    async fn len(&self) -> Result<usize>;
}

/// Cosine similarity; zero-length vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut norm_a = 0f32;
    let mut norm_b = 0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_vectors_is_one() {
        let sim = cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_with_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
