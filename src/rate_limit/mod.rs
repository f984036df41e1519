//! Fixed-window request quotas keyed by caller identity.
//!
//! A caller gets `limit` admitted requests per window. The window starts at
//! the first request after the previous one expired, so a caller can burst up
//! to twice the limit across a window boundary.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use axum::http::HeaderMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRateLimiter;
pub use postgres::PostgresRateLimiter;

/// Bucket shared by every request that carries no forwarding header.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Default admitted requests per window.
pub const DEFAULT_LIMIT: u32 = 10;

/// Default window length (one hour).
pub const DEFAULT_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Quota parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Admitted requests per window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

/// Per-identity counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests admitted in the current window.
    pub count: u32,
    /// Start of the current window, epoch milliseconds.
    pub window_start_ms: u64,
}

impl RateLimitEntry {
    /// Applies one request at `now_ms` and reports whether it was admitted.
    pub fn apply(entry: Option<&mut Self>, now_ms: u64, policy: RateLimitPolicy) -> Admission {
        match entry {
            Some(entry) if !entry.expired(now_ms, policy) => {
                if entry.count < policy.limit {
                    entry.count += 1;
                    Admission::Admitted
                } else {
                    Admission::Rejected
                }
            }
            Some(entry) => {
                *entry = Self::fresh(now_ms);
                Admission::Admitted
            }
            None => Admission::Started(Self::fresh(now_ms)),
        }
    }

    fn fresh(now_ms: u64) -> Self {
        Self {
            count: 1,
            window_start_ms: now_ms,
        }
    }

    /// True once strictly more than one window has elapsed.
    pub fn expired(&self, now_ms: u64, policy: RateLimitPolicy) -> bool {
        now_ms.saturating_sub(self.window_start_ms) > policy.window_ms
    }
}

/// Outcome of [`RateLimitEntry::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted; the caller had no entry, this is the new one.
    Started(RateLimitEntry),
    /// Admitted against an existing entry.
    Admitted,
    /// Over quota.
    Rejected,
}

impl Admission {
    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

/// Storage for rate-limit counters.
///
/// `admit` must be atomic per identity: concurrent calls for one identity
/// never admit more than the limit within a window.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Counts one request for `identity` at `now_ms`.
    async fn admit(&self, identity: &str, now_ms: u64) -> Result<bool>;

    /// Drops expired entries, returning how many were removed.
    async fn sweep(&self, now_ms: u64) -> Result<usize>;
}

/// Caller identity: the first `x-forwarded-for` address, else [`ANONYMOUS_IDENTITY`].
pub fn identity_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(ANONYMOUS_IDENTITY)
        .to_string()
}

/// Wall clock in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Periodically sweeps `store` until the task is aborted.
pub fn spawn_sweeper(store: Arc<dyn RateLimitStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.sweep(now_ms()).await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "swept expired rate-limit entries"),
                Err(err) => warn!(error = %err, "rate-limit sweep failed"),
            }
        }
    })
}
