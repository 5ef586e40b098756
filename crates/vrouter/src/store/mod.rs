//! Coordination store client.
//!
//! The core only needs four linearizable primitives (create-if-absent, get,
//! compare-and-swap, delete) plus per-key TTL. Backends translate their own
//! replies into [`VrouterError`] so callers never see transport types.

use std::future::Future;
use std::time::Duration;

use vrouter_common::{Result, StoreEntry, VrouterError};

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Operations every coordination backend provides.
///
/// Revisions are store-wide and strictly increasing; every successful write
/// returns the revision it produced.
pub trait CoordinationStore: Clone + Send + Sync + 'static {
    /// Create `key` only if no live entry exists there.
    fn create(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<StoreEntry>> + Send;

    /// Replace `key` only if its current value and revision match.
    fn compare_and_swap(
        &self,
        key: &str,
        expected_value: &str,
        new_value: &str,
        ttl: Option<Duration>,
        expected_revision: u64,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Remove `key`, and every key below `key/` when `recursive`.
    fn delete(&self, key: &str, recursive: bool) -> impl Future<Output = Result<()>> + Send;

    /// Live entries below `dir/`, sorted by key
    fn list(&self, dir: &str) -> impl Future<Output = Result<Vec<StoreEntry>>> + Send;

    fn ping(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Backend selected from the store URL scheme
#[derive(Clone)]
pub enum Store {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl Store {
    /// Connect to the backend named by `url` (`redis://`, `rediss://`, `memory://`)
    pub async fn connect(url: &str, prefix: &str, request_timeout: Duration) -> Result<Self> {
        if url.starts_with("memory://") {
            tracing::warn!("Using in-process memory store; state is not shared with other hosts");
            return Ok(Self::Memory(MemoryStore::new()));
        }

        if url.starts_with("redis://") || url.starts_with("rediss://") {
            let store = RedisStore::connect(url, prefix, request_timeout).await?;
            return Ok(Self::Redis(store));
        }

        Err(VrouterError::Config(format!(
            "unsupported store URL '{url}' (expected redis://, rediss:// or memory://)"
        )))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Memory(_) => "memory",
        }
    }
}

impl CoordinationStore for Store {
    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<u64> {
        match self {
            Self::Redis(s) => s.create(key, value, ttl).await,
            Self::Memory(s) => s.create(key, value, ttl).await,
        }
    }

    async fn get(&self, key: &str) -> Result<StoreEntry> {
        match self {
            Self::Redis(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_value: &str,
        new_value: &str,
        ttl: Option<Duration>,
        expected_revision: u64,
    ) -> Result<u64> {
        match self {
            Self::Redis(s) => {
                s.compare_and_swap(key, expected_value, new_value, ttl, expected_revision)
                    .await
            }
            Self::Memory(s) => {
                s.compare_and_swap(key, expected_value, new_value, ttl, expected_revision)
                    .await
            }
        }
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        match self {
            Self::Redis(s) => s.delete(key, recursive).await,
            Self::Memory(s) => s.delete(key, recursive).await,
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<StoreEntry>> {
        match self {
            Self::Redis(s) => s.list(dir).await,
            Self::Memory(s) => s.list(dir).await,
        }
    }

    async fn ping(&self) -> Result<()> {
        match self {
            Self::Redis(s) => s.ping().await,
            Self::Memory(s) => s.ping().await,
        }
    }
}

/// TTL in milliseconds as sent to backends; 0 means no expiry
pub(crate) fn ttl_millis(ttl: Option<Duration>) -> u64 {
    ttl.map(|d| d.as_millis().max(1) as u64).unwrap_or(0)
}
