//! Embedding providers shared by the indexer and the chat service.
//!
//! Both processes must resolve the same provider and model; rows carry the
//! model identifier so a mismatch can be caught at startup.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

pub mod hashed;
pub mod openai;

pub use hashed::HashedEmbedder;
pub use openai::OpenAiEmbedder;

/// Maps text to fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier recorded next to every vector this provider produces.
    fn model_id(&self) -> &str;

    /// Maximum inputs accepted by a single `embed_batch` call.
    fn batch_size(&self) -> usize;

    /// Embeds each input, preserving order.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embeds a single string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| anyhow!("{} returned no embedding", self.model_id()))
    }
}
