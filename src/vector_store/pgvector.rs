//! Postgres + pgvector store shared by the indexer and every service instance.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pgvector::Vector;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{Json, ToSql};
use tokio_postgres::{Client, Row};
use tracing::{info, warn};

use super::VectorStore;
use crate::content::SourceTag;
use crate::embeddings::{ChunkMetadata, ContentChunk, RetrievedChunk};
use crate::pg::TableName;

/// Rows per multi-value INSERT statement (8 parameters per row).
const INSERT_BATCH_ROWS: usize = 256;

/// pgvector-backed store. Search goes through the `match_<table>` SQL function.
#[derive(Clone)]
pub struct PgVectorStore {
    client: Arc<Client>,
    table: TableName,
}

impl PgVectorStore {
    /// Wraps an already-connected client.
    pub fn new(client: Arc<Client>, table: TableName) -> Self {
        Self { client, table }
    }

    /// Creates the extension, table, index, and match function for `dims`-wide vectors.
    pub async fn prepare(&self, dims: usize) -> Result<()> {
        anyhow::ensure!(dims > 0, "embedding dimension must be positive");
        self.client
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await
            .context("failed to ensure pgvector extension")?;
        self.client
            .batch_execute(&schema_sql(&self.table, dims))
            .await
            .context("failed to prepare pgvector table")?;
        info!(table = %self.table.qualified(), dims, "pgvector schema ready");
        Ok(())
    }

    /// Maps a missing table to `T::default()` so a store the indexer has not
    /// populated yet reads as empty.
    fn empty_if_missing<T: Default>(
        &self,
        result: Result<T, tokio_postgres::Error>,
        action: &str,
    ) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if is_missing_relation(err.code()) => {
                warn!(
                    table = %self.table.qualified(),
                    action,
                    "vector table does not exist yet; reading it as empty"
                );
                Ok(T::default())
            }
            Err(err) => Err(err).with_context(|| {
                format!("failed to {} {}", action, self.table.qualified())
            }),
        }
    }

    async fn insert_rows(&self, rows: &[ContentChunk]) -> Result<()> {
        let mut owned: Vec<Box<dyn ToSql + Sync + Send>> = Vec::with_capacity(rows.len() * 8);
        for row in rows {
            owned.push(Box::new(row.generation.clone()));
            owned.push(Box::new(row.source.as_str().to_string()));
            owned.push(Box::new(as_i64(row.chunk_index, "chunk_index")?));
            owned.push(Box::new(row.text.clone()));
            owned.push(Box::new(Json(row.metadata.clone())));
            owned.push(Box::new(Vector::from(row.embedding.clone())));
            owned.push(Box::new(row.embedding_model.clone()));
            owned.push(Box::new(i64::from(row.checksum)));
        }
        let params: Vec<&(dyn ToSql + Sync)> = owned
            .iter()
            .map(|value| &**value as &(dyn ToSql + Sync))
            .collect();
        self.client
            .execute(&insert_sql(&self.table, rows.len()), &params)
            .await
            .with_context(|| format!("failed to insert {} chunks", rows.len()))?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn insert(&self, chunks: &[ContentChunk]) -> Result<usize> {
        for batch in chunks.chunks(INSERT_BATCH_ROWS) {
            self.insert_rows(batch).await?;
        }
        Ok(chunks.len())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = Vector::from(query.to_vec());
        let limit = i32::try_from(k).map_err(|_| anyhow!("match count {k} exceeds i32 range"))?;
        let sql = format!(
            "SELECT content, source, metadata, similarity FROM {}($1, $2)",
            self.table.match_function()
        );
        let rows = self
            .client
            .query(&sql, &[&vector, &limit])
            .await
            .context("pgvector similarity search failed")?;
        rows.iter()
            .map(|row| {
                let similarity: f64 = row.get("similarity");
                chunk_from_row(row, Some(similarity as f32))
            })
            .collect()
    }

    async fn recent(&self, k: usize) -> Result<Vec<RetrievedChunk>> {
        let sql = format!(
            "SELECT content, source, metadata FROM {} ORDER BY id DESC LIMIT $1",
            self.table.qualified()
        );
        let limit = as_i64(k, "limit")?;
        let rows = self.empty_if_missing(
            self.client.query(&sql, &[&limit]).await,
            "load recent chunks from",
        )?;
        rows.iter().map(|row| chunk_from_row(row, None)).collect()
    }

    async fn prune_generations(&self, keep: &str) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {} WHERE generation <> $1",
            self.table.qualified()
        );
        let deleted = self
            .client
            .execute(&sql, &[&keep])
            .await
            .context("failed to prune stale generations")?;
        Ok(deleted as usize)
    }

    async fn embedding_models(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT embedding_model FROM {} ORDER BY embedding_model",
            self.table.qualified()
        );
        let rows = self.empty_if_missing(
            self.client.query(&sql, &[]).await,
            "read models from",
        )?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn len(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table.qualified());
        let rows = self.empty_if_missing(self.client.query(&sql, &[]).await, "count rows in")?;
        let count: i64 = rows.first().map(|row| row.get(0)).unwrap_or(0);
        Ok(count.max(0) as usize)
    }
}

fn is_missing_relation(code: Option<&SqlState>) -> bool {
    code == Some(&SqlState::UNDEFINED_TABLE)
}

fn chunk_from_row(row: &Row, similarity: Option<f32>) -> Result<RetrievedChunk> {
    let text: String = row.get("content");
    let source: String = row.get("source");
    let Json(metadata): Json<ChunkMetadata> = row.get("metadata");
    Ok(RetrievedChunk {
        text,
        source: source.parse::<SourceTag>()?,
        metadata,
        similarity,
    })
}

fn schema_sql(table: &TableName, dims: usize) -> String {
    let qualified = table.qualified();
    format!(
        "CREATE TABLE IF NOT EXISTS {qualified} (
            id BIGSERIAL PRIMARY KEY,
            generation TEXT NOT NULL,
            source TEXT NOT NULL,
            chunk_index BIGINT NOT NULL,
            content TEXT NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            embedding VECTOR({dims}) NOT NULL,
            embedding_model TEXT NOT NULL,
            checksum BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS {index} ON {qualified} (generation);
        CREATE OR REPLACE FUNCTION {function}(query_embedding VECTOR({dims}), match_count INT)
        RETURNS TABLE (content TEXT, source TEXT, metadata JSONB, similarity DOUBLE PRECISION)
        LANGUAGE sql STABLE AS $$
            SELECT c.content, c.source, c.metadata, 1 - (c.embedding <=> query_embedding)
            FROM {qualified} c
            ORDER BY c.embedding <=> query_embedding ASC, c.id ASC
            LIMIT match_count
        $$;",
        index = table.generation_index_name(),
        function = table.match_function(),
    )
}

fn insert_sql(table: &TableName, rows: usize) -> String {
    let mut sql = format!(
        "INSERT INTO {} \
            (generation, source, chunk_index, content, metadata, embedding, embedding_model, checksum) \
            VALUES ",
        table.qualified()
    );
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        let base = row * 8;
        let placeholders: Vec<String> = (1..=8).map(|col| format!("${}", base + col)).collect();
        sql.push('(');
        sql.push_str(&placeholders.join(", "));
        sql.push(')');
    }
    sql
}

fn as_i64<T>(value: T, field: &str) -> Result<i64>
where
    i64: TryFrom<T>,
    T: Copy + std::fmt::Display,
{
    i64::try_from(value).map_err(|_| anyhow!("{} value {} exceeds i64 range", field, value))
}
