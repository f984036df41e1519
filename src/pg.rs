//! Shared Postgres helpers reused by the pgvector store and the shared rate limiter.

use anyhow::{Context, Result};
use tokio_postgres::{Client, NoTls};
use tracing::error;

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        anyhow::ensure!(!schema.trim().is_empty(), "schema name is required");
        anyhow::ensure!(!table.trim().is_empty(), "table name is required");
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Schema-qualified name for the similarity search function paired with this table.
    pub fn match_function(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.schema),
            quote_ident(&format!("match_{}", sanitize_ident(&self.table)))
        )
    }

    /// Index name used for the generation lookup index.
    pub fn generation_index_name(&self) -> String {
        format!(
            "{}_{}_generation_idx",
            sanitize_ident(&self.schema),
            sanitize_ident(&self.table)
        )
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn sanitize_ident(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

/// Opens a client and drives its connection on a background task.
pub async fn connect(database_url: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls)
        .await
        .context("failed to connect to Postgres")?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(error = %err, "postgres connection error");
        }
    });
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_and_escapes_identifiers() {
        let table = TableName::new("public", "odd\"name").unwrap();
        assert_eq!(table.qualified(), "\"public\".\"odd\"\"name\"");
    }

    #[test]
    fn match_function_is_sanitized() {
        let table = TableName::new("public", "portfolio-chunks").unwrap();
        assert_eq!(table.match_function(), "\"public\".\"match_portfolio_chunks\"");
        assert_eq!(
            table.generation_index_name(),
            "public_portfolio_chunks_generation_idx"
        );
    }

    #[test]
    fn rejects_blank_names() {
        assert!(TableName::new(" ", "chunks").is_err());
        assert!(TableName::new("public", "").is_err());
    }
}
