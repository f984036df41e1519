//! Question → context lookup: embed, nearest-neighbor search, recency fallback.

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{Context, Result};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::embedder::EmbeddingProvider;
use crate::embeddings::RetrievedChunk;
use crate::vector_store::VectorStore;

/// Default number of chunks placed in the prompt.
pub const DEFAULT_TOP_K: usize = 5;

/// How a context set was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalPath {
    /// Ranked by similarity.
    Similarity,
    /// Most recent rows, used when search failed or matched nothing.
    Fallback,
}

/// Chunks selected for one question.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    /// Selected chunks in prompt order.
    pub chunks: Vec<RetrievedChunk>,
    /// Which path produced `chunks`.
    pub path: RetrievalPath,
}

impl RetrievedContext {
    /// Chunk texts in order.
    pub fn texts(&self) -> Vec<&str> {
        self.chunks.iter().map(|chunk| chunk.text.as_str()).collect()
    }
}

/// Joins an embedding provider with a vector store.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    top_k: usize,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl Retriever {
    /// Builds a retriever; `cache_size == 0` disables the query embedding cache.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        top_k: usize,
        cache_size: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            top_k: top_k.max(1),
            cache: NonZeroUsize::new(cache_size).map(|capacity| Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Configured result count.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Fails when the store holds rows embedded by a different model.
    pub async fn verify_model(&self) -> Result<()> {
        let expected = self.embedder.model_id();
        let models = self
            .store
            .embedding_models()
            .await
            .context("failed to inspect stored embedding models")?;
        if let Some(other) = models.iter().find(|model| model.as_str() != expected) {
            anyhow::bail!(
                "vector store holds rows embedded with '{}' but the service embeds with '{}'; re-run the indexer",
                other,
                expected
            );
        }
        Ok(())
    }

    /// Selects context for `question`.
    ///
    /// Embedding failures propagate. A failed or empty search falls back to
    /// the most recently inserted rows so the answer still gets some context.
    pub async fn retrieve(&self, question: &str) -> Result<RetrievedContext> {
        let embedding = self.embed_query(question).await?;
        match self.store.search(&embedding, self.top_k).await {
            Ok(chunks) if !chunks.is_empty() => {
                return Ok(RetrievedContext {
                    chunks,
                    path: RetrievalPath::Similarity,
                })
            }
            Ok(_) => debug!("similarity search matched nothing; using recent chunks"),
            Err(err) => warn!(error = %err, "similarity search failed; using recent chunks"),
        }
        let chunks = self
            .store
            .recent(self.top_k)
            .await
            .context("fallback chunk lookup failed")?;
        Ok(RetrievedContext {
            chunks,
            path: RetrievalPath::Fallback,
        })
    }

    async fn embed_query(&self, question: &str) -> Result<Vec<f32>> {
        let cached = match &self.cache {
            Some(cache) => cache.lock().await.get(question).cloned(),
            None => None,
        };
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let embedding = self
            .embedder
            .embed(question)
            .await
            .context("failed to embed question")?;

        if let Some(cache) = &self.cache {
            let mut guard = cache.lock().await;
            guard.put(question.to_string(), embedding.clone());
        }
        Ok(embedding)
    }
}
