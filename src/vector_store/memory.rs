//! In-process vector store with brute-force cosine search and JSONL snapshots.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{cosine_similarity, VectorStore};
use crate::embeddings::{ContentChunk, RetrievedChunk};

/// Rows kept in insertion order; search scans every row.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<ContentChunk>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `chunks` (dimension checked).
    pub fn with_chunks(chunks: Vec<ContentChunk>) -> Result<Self> {
        check_dimensions(None, &chunks)?;
        Ok(Self {
            rows: RwLock::new(chunks),
        })
    }

    /// Loads a JSONL snapshot, one chunk per line.
    pub fn load_jsonl(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open snapshot {:?}", path))?;
        let reader = BufReader::new(file);
        let mut chunks = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk: ContentChunk = serde_json::from_str(&line)
                .with_context(|| format!("invalid chunk record at line {}", line_no + 1))?;
            chunks.push(chunk);
        }
        Self::with_chunks(chunks)
    }

    /// Loads `path` when it exists, otherwise starts empty.
    pub fn open_or_empty(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_jsonl(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Writes every row to `path` as JSONL, replacing the file.
    pub async fn save_jsonl(&self, path: &Path) -> Result<usize> {
        let rows = self.rows.read().await;
        let file =
            File::create(path).with_context(|| format!("failed to create snapshot {:?}", path))?;
        let mut writer = BufWriter::new(file);
        for row in rows.iter() {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(rows.len())
    }
}

fn check_dimensions(existing: Option<usize>, chunks: &[ContentChunk]) -> Result<()> {
    let mut expected = existing;
    for chunk in chunks {
        anyhow::ensure!(!chunk.embedding.is_empty(), "chunk embedding is empty");
        match expected {
            Some(dims) => anyhow::ensure!(
                chunk.embedding.len() == dims,
                "embedding dimension {} does not match store dimension {}",
                chunk.embedding.len(),
                dims
            ),
            None => expected = Some(chunk.embedding.len()),
        }
    }
    Ok(())
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn insert(&self, chunks: &[ContentChunk]) -> Result<usize> {
        let mut rows = self.rows.write().await;
        let existing = rows.first().map(|row| row.embedding.len());
        check_dimensions(existing, chunks)?;
        rows.extend_from_slice(chunks);
        Ok(chunks.len())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        let rows = self.rows.read().await;
        if let Some(first) = rows.first() {
            anyhow::ensure!(
                first.embedding.len() == query.len(),
                "query dimension {} does not match store dimension {}",
                query.len(),
                first.embedding.len()
            );
        }
        let mut scored: Vec<(usize, f32)> = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (idx, cosine_similarity(query, &row.embedding)))
            .collect();
        // stable sort keeps insertion order for ties
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(idx, score)| RetrievedChunk::from_chunk(&rows[idx], Some(score)))
            .collect())
    }

    async fn recent(&self, k: usize) -> Result<Vec<RetrievedChunk>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .rev()
            .take(k)
            .map(|row| RetrievedChunk::from_chunk(row, None))
            .collect())
    }

    async fn prune_generations(&self, keep: &str) -> Result<usize> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|row| row.generation == keep);
        Ok(before - rows.len())
    }

    async fn embedding_models(&self) -> Result<Vec<String>> {
        let rows = self.rows.read().await;
        let models: BTreeSet<&str> = rows.iter().map(|row| row.embedding_model.as_str()).collect();
        Ok(models.into_iter().map(str::to_string).collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.rows.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::SourceTag;

    fn chunk(text: &str, embedding: Vec<f32>, generation: &str) -> ContentChunk {
        ContentChunk::new(
            text.to_string(),
            SourceTag::Projects,
            0,
            embedding,
            "fixture",
            generation,
        )
    }

    fn at_similarity(sim: f32) -> Vec<f32> {
        vec![sim, (1.0 - sim * sim).sqrt()]
    }

    fn texts(chunks: &[RetrievedChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn search_orders_by_decreasing_similarity() {
        let store = MemoryStore::with_chunks(vec![
            chunk("A", at_similarity(0.9), "g1"),
            chunk("B", at_similarity(0.95), "g1"),
            chunk("C", at_similarity(0.3), "g1"),
        ])
        .unwrap();
        let hits = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(texts(&hits), vec!["B", "A"]);
        assert!((hits[0].similarity.unwrap() - 0.95).abs() < 1e-5);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ties_keep_insertion_order() {
        let store = MemoryStore::with_chunks(vec![
            chunk("first", vec![1.0, 0.0], "g1"),
            chunk("second", vec![2.0, 0.0], "g1"),
            chunk("third", vec![0.5, 0.0], "g1"),
        ])
        .unwrap();
        for _ in 0..3 {
            let hits = store.search(&[1.0, 0.0], 3).await.unwrap();
            assert_eq!(texts(&hits), vec!["first", "second", "third"]);
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn recent_returns_newest_first() {
        let store = MemoryStore::new();
        store
            .insert(&[chunk("old", vec![1.0], "g1"), chunk("mid", vec![1.0], "g1")])
            .await
            .unwrap();
        store.insert(&[chunk("new", vec![1.0], "g1")]).await.unwrap();
        let recent = store.recent(2).await.unwrap();
        assert_eq!(texts(&recent), vec!["new", "mid"]);
        assert!(recent.iter().all(|c| c.similarity.is_none()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn insert_rejects_mismatched_dimensions() {
        let store = MemoryStore::new();
        store.insert(&[chunk("a", vec![1.0, 0.0], "g1")]).await.unwrap();
        let err = store
            .insert(&[chunk("b", vec![1.0, 0.0, 0.0], "g1")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension"));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn search_with_wrong_query_dimension_errors() {
        let store = MemoryStore::with_chunks(vec![chunk("a", vec![1.0, 0.0], "g1")]).unwrap();
        assert!(store.search(&[1.0], 1).await.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn prune_keeps_only_current_generation() {
        let store = MemoryStore::with_chunks(vec![
            chunk("stale", vec![1.0], "g1"),
            chunk("fresh", vec![1.0], "g2"),
        ])
        .unwrap();
        assert_eq!(store.prune_generations("g2").await.unwrap(), 1);
        let rows = store.recent(10).await.unwrap();
        assert_eq!(texts(&rows), vec!["fresh"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn snapshot_round_trip_preserves_order_and_models() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        let store = MemoryStore::with_chunks(vec![
            chunk("one", vec![1.0, 0.0], "g1"),
            chunk("two", vec![0.0, 1.0], "g1"),
        ])
        .unwrap();
        assert_eq!(store.save_jsonl(&path).await.unwrap(), 2);

        let loaded = MemoryStore::load_jsonl(&path).unwrap();
        assert_eq!(texts(&loaded.recent(5).await.unwrap()), vec!["two", "one"]);
        assert_eq!(loaded.embedding_models().await.unwrap(), vec!["fixture"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_snapshot_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open_or_empty(&dir.path().join("absent.jsonl")).unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
        assert!(store.search(&[1.0], 5).await.unwrap().is_empty());
    }
}
