//! Rate-limit table shared by every service instance through Postgres.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio_postgres::Client;
use tracing::info;

use super::{RateLimitPolicy, RateLimitStore};
use crate::pg::TableName;

/// One row per identity; each request is a single upsert.
pub struct PostgresRateLimiter {
    client: Arc<Client>,
    table: TableName,
    policy: RateLimitPolicy,
}

impl PostgresRateLimiter {
    /// Wraps an already-connected client.
    pub fn new(client: Arc<Client>, table: TableName, policy: RateLimitPolicy) -> Self {
        Self {
            client,
            table,
            policy,
        }
    }

    /// Creates the counter table when missing.
    pub async fn prepare(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                identity TEXT PRIMARY KEY,
                count INTEGER NOT NULL,
                window_start_ms BIGINT NOT NULL
            )",
            self.table.qualified()
        );
        self.client
            .batch_execute(&sql)
            .await
            .context("failed to prepare rate-limit table")?;
        info!(table = %self.table.qualified(), "rate-limit table ready");
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for PostgresRateLimiter {
    async fn admit(&self, identity: &str, now_ms: u64) -> Result<bool> {
        let now = i64::try_from(now_ms).map_err(|_| anyhow!("timestamp {now_ms} exceeds i64"))?;
        let window = i64::try_from(self.policy.window_ms)
            .map_err(|_| anyhow!("window {} exceeds i64", self.policy.window_ms))?;
        let limit = i32::try_from(self.policy.limit)
            .map_err(|_| anyhow!("limit {} exceeds i32", self.policy.limit))?;
        let row = self
            .client
            .query_one(&admit_sql(&self.table), &[&identity, &now, &window, &limit])
            .await
            .context("rate-limit upsert failed")?;
        let count: i32 = row.get(0);
        Ok(count <= limit)
    }

    async fn sweep(&self, now_ms: u64) -> Result<usize> {
        let cutoff = now_ms.saturating_sub(self.policy.window_ms);
        let cutoff = i64::try_from(cutoff).map_err(|_| anyhow!("cutoff {cutoff} exceeds i64"))?;
        let sql = format!(
            "DELETE FROM {} WHERE window_start_ms < $1",
            self.table.qualified()
        );
        let removed = self
            .client
            .execute(&sql, &[&cutoff])
            .await
            .context("rate-limit sweep failed")?;
        Ok(removed as usize)
    }
}

/// `count` saturates at `limit + 1` so rejected calls do not grow the row.
fn admit_sql(table: &TableName) -> String {
    format!(
        "INSERT INTO {} AS rl (identity, count, window_start_ms) VALUES ($1, 1, $2)
        ON CONFLICT (identity) DO UPDATE SET
            count = CASE
                WHEN $2 - rl.window_start_ms > $3 THEN 1
                ELSE LEAST(rl.count + 1, $4 + 1)
            END,
            window_start_ms = CASE
                WHEN $2 - rl.window_start_ms > $3 THEN $2
                ELSE rl.window_start_ms
            END
        RETURNING count",
        table.qualified()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_resets_only_after_window() {
        let table = TableName::new("public", "chat_rate_limits").unwrap();
        let sql = admit_sql(&table);
        assert!(sql.starts_with("INSERT INTO \"public\".\"chat_rate_limits\" AS rl"));
        assert!(sql.contains("ON CONFLICT (identity) DO UPDATE"));
        assert!(sql.contains("WHEN $2 - rl.window_start_ms > $3 THEN 1"));
        assert!(sql.contains("LEAST(rl.count + 1, $4 + 1)"));
        assert!(sql.trim_end().ends_with("RETURNING count"));
    }
}
