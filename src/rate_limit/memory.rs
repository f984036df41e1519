//! Process-local rate-limit table.

use std::num::NonZeroUsize;

use anyhow::Result;
use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use super::{Admission, RateLimitEntry, RateLimitPolicy, RateLimitStore};

/// Default number of identities tracked at once.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// LRU-bounded counters behind one mutex.
///
/// When the table is full the least recently seen identity is evicted, which
/// gives that identity a fresh budget on its next request.
pub struct MemoryRateLimiter {
    entries: Mutex<LruCache<String, RateLimitEntry>>,
    policy: RateLimitPolicy,
}

impl MemoryRateLimiter {
    /// Creates a limiter tracking at most `capacity` identities.
    pub fn new(policy: RateLimitPolicy, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            policy,
        }
    }

    /// Number of tracked identities.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimiter {
    async fn admit(&self, identity: &str, now_ms: u64) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let outcome = RateLimitEntry::apply(entries.get_mut(identity), now_ms, self.policy);
        if let Admission::Started(entry) = outcome {
            entries.put(identity.to_string(), entry);
        }
        Ok(outcome.is_admitted())
    }

    async fn sweep(&self, now_ms: u64) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expired(now_ms, self.policy))
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in &expired {
            entries.pop(identity);
        }
        Ok(expired.len())
    }
}
