//! Shared chunk records passed between the indexer, vector stores, and retrieval.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::SourceTag;

/// Free-form per-chunk metadata.
pub type ChunkMetadata = BTreeMap<String, Value>;

/// Row emitted by indexer runs and persisted by vector stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    /// Chunk body text submitted to the embedding model.
    pub text: String,
    /// Which corpus section produced the chunk.
    pub source: SourceTag,
    /// Position of the chunk within its source document.
    pub chunk_index: usize,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
    /// Identifier of the embedding model that produced `embedding`.
    pub embedding_model: String,
    /// Indexer run that wrote the row.
    pub generation: String,
    /// CRC32 of `text`.
    pub checksum: u32,
    /// Optional extra fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: ChunkMetadata,
}

impl ContentChunk {
    /// Builds a row, stamping the text checksum.
    pub fn new(
        text: String,
        source: SourceTag,
        chunk_index: usize,
        embedding: Vec<f32>,
        embedding_model: impl Into<String>,
        generation: impl Into<String>,
    ) -> Self {
        let checksum = crc32fast::hash(text.as_bytes());
        Self {
            text,
            source,
            chunk_index,
            embedding,
            embedding_model: embedding_model.into(),
            generation: generation.into(),
            checksum,
            metadata: ChunkMetadata::new(),
        }
    }
}

/// Chunk returned from a store lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// Chunk body text.
    pub text: String,
    /// Which corpus section produced the chunk.
    pub source: SourceTag,
    /// Extra fields stored with the row.
    pub metadata: ChunkMetadata,
    /// Cosine similarity to the query; `None` for fallback rows.
    pub similarity: Option<f32>,
}

impl RetrievedChunk {
    /// Converts a stored row into a lookup result.
    pub fn from_chunk(chunk: &ContentChunk, similarity: Option<f32>) -> Self {
        Self {
            text: chunk.text.clone(),
            source: chunk.source,
            metadata: chunk.metadata.clone(),
            similarity,
        }
    }
}
