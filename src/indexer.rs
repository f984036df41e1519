//! Offline corpus build: slice, embed, insert, prune.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info};

use crate::chunker::{chunk_text, TextSlice, DEFAULT_CHUNK_CHARS};
use crate::content::{Corpus, SourceTag};
use crate::embedder::EmbeddingProvider;
use crate::embeddings::ContentChunk;
use crate::vector_store::VectorStore;

/// Knobs for one indexer run.
#[derive(Debug, Clone)]
pub struct IndexPlan {
    /// Character ceiling per chunk.
    pub chunk_chars: usize,
    /// Tag written on every row of this run.
    pub generation: String,
    /// Delete rows from other generations once inserts succeed.
    pub prune_stale: bool,
    /// Embedding batches in flight at once.
    pub concurrency: usize,
}

impl Default for IndexPlan {
    fn default() -> Self {
        Self {
            chunk_chars: DEFAULT_CHUNK_CHARS,
            generation: new_generation(),
            prune_stale: true,
            concurrency: 2,
        }
    }
}

/// Generation tag derived from the wall clock.
pub fn new_generation() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("gen-{millis}")
}

/// Counts from a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    /// Generation written.
    pub generation: String,
    /// Model recorded on every row.
    pub embedding_model: String,
    /// Non-empty source documents.
    pub documents: usize,
    /// Rows inserted.
    pub inserted: usize,
    /// Stale rows deleted.
    pub pruned: usize,
}

struct PendingSlice {
    source: SourceTag,
    slice: TextSlice,
}

/// Embeds every corpus document into `store`.
///
/// Batches are embedded with bounded concurrency but inserted in corpus
/// order, so row order matches document order. Pruning runs only after every
/// insert succeeded; a failed run leaves the previous generation serving.
pub async fn run(
    corpus: &Corpus,
    embedder: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    plan: &IndexPlan,
) -> Result<IndexReport> {
    let started = Instant::now();
    let documents = corpus.documents()?;
    let pending: Vec<PendingSlice> = documents
        .iter()
        .flat_map(|doc| {
            chunk_text(&doc.text, plan.chunk_chars)
                .into_iter()
                .map(|slice| PendingSlice {
                    source: doc.source,
                    slice,
                })
        })
        .collect();
    info!(
        documents = documents.len(),
        slices = pending.len(),
        generation = %plan.generation,
        model = embedder.model_id(),
        "indexing corpus"
    );

    let batch_size = embedder.batch_size().max(1);
    let mut batches = stream::iter(pending.chunks(batch_size))
        .map(|batch| async move {
            let inputs: Vec<String> = batch.iter().map(|p| p.slice.text.clone()).collect();
            let embeddings = embedder
                .embed_batch(&inputs)
                .await
                .with_context(|| format!("failed to embed batch of {}", inputs.len()))?;
            anyhow::ensure!(
                embeddings.len() == batch.len(),
                "embedder returned {} vectors for {} inputs",
                embeddings.len(),
                batch.len()
            );
            Ok::<_, anyhow::Error>((batch, embeddings))
        })
        .buffered(plan.concurrency.max(1));

    let mut inserted = 0usize;
    while let Some(result) = batches.next().await {
        let (batch, embeddings) = result?;
        let rows: Vec<ContentChunk> = batch
            .iter()
            .zip(embeddings)
            .map(|(pending, embedding)| build_row(pending, embedding, embedder.model_id(), plan))
            .collect();
        inserted += store.insert(&rows).await.context("failed to insert chunks")?;
        debug!(inserted, "batch stored");
    }

    let pruned = if plan.prune_stale {
        store.prune_generations(&plan.generation).await?
    } else {
        0
    };
    info!(
        inserted,
        pruned,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "index run complete"
    );
    Ok(IndexReport {
        generation: plan.generation.clone(),
        embedding_model: embedder.model_id().to_string(),
        documents: documents.len(),
        inserted,
        pruned,
    })
}

fn build_row(
    pending: &PendingSlice,
    embedding: Vec<f32>,
    model: &str,
    plan: &IndexPlan,
) -> ContentChunk {
    let mut row = ContentChunk::new(
        pending.slice.text.clone(),
        pending.source,
        pending.slice.index,
        embedding,
        model,
        plan.generation.as_str(),
    );
    row.metadata
        .insert("chunk_index".into(), Value::from(pending.slice.index));
    row.metadata
        .insert("char_start".into(), Value::from(pending.slice.char_start));
    row.metadata
        .insert("char_end".into(), Value::from(pending.slice.char_end));
    row
}
