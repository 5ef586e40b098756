//! Redis-backed coordination store.
//!
//! Each entry is a hash `{value, rev}`. Revisions come from one counter key
//! under the registry prefix, and every conditional write runs as a Lua
//! script so the check and the write are atomic on the server.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use vrouter_common::constants::registry_keys;
use vrouter_common::{Result, StoreEntry, VrouterError};

use super::{CoordinationStore, ttl_millis};

/// KEYS: entry, counter. ARGV: value, ttl_ms. Returns the new revision, 0 if the key exists.
static CREATE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
local rev = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'value', ARGV[1], 'rev', rev)
if tonumber(ARGV[2]) > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return rev
"#,
    )
});

/// KEYS: entry, counter. ARGV: expected value, new value, expected rev, ttl_ms.
/// Returns the new revision, 0 on mismatch, -1 if the key is missing.
static CAS_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local cur = redis.call('HMGET', KEYS[1], 'value', 'rev')
if not cur[2] then
    return -1
end
if cur[1] ~= ARGV[1] or cur[2] ~= ARGV[3] then
    return 0
end
local rev = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'value', ARGV[2], 'rev', rev)
if tonumber(ARGV[4]) > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[4])
else
    redis.call('PERSIST', KEYS[1])
end
return rev
"#,
    )
});

const SCAN_BATCH: usize = 256;

/// Coordination store on top of a Redis connection manager (auto-reconnecting)
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    counter_key: String,
    request_timeout: Duration,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: &str, request_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| VrouterError::Config(format!("invalid Redis URL '{url}': {e}")))?;

        let conn = tokio::time::timeout(request_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| VrouterError::Connection(format!("timed out connecting to {url}")))?
            .map_err(map_redis_error)?;

        tracing::info!(url = %url, "Connected to Redis coordination store");

        Ok(Self {
            conn,
            counter_key: registry_keys::revision_counter(prefix),
            request_timeout,
        })
    }

    /// Run one request under the configured timeout
    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = std::result::Result<T, RedisError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(map_redis_error),
            Err(_) => Err(VrouterError::Connection(format!(
                "{op} timed out after {:?}",
                self.request_timeout
            ))),
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    "scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn read_entry(&self, key: &str) -> Result<Option<StoreEntry>> {
        let mut conn = self.conn.clone();
        let (value, rev): (Option<String>, Option<String>) = self
            .bounded(
                "get",
                redis::cmd("HMGET").arg(key).arg("value").arg("rev").query_async(&mut conn),
            )
            .await?;

        match (value, rev) {
            (Some(value), Some(rev)) => {
                let revision = rev
                    .parse::<u64>()
                    .map_err(|e| VrouterError::Store(format!("bad revision '{rev}' on {key}: {e}")))?;
                Ok(Some(StoreEntry {
                    key: key.to_string(),
                    value,
                    revision,
                }))
            }
            _ => Ok(None),
        }
    }
}

impl CoordinationStore for RedisStore {
    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<u64> {
        let mut conn = self.conn.clone();
        let rev: i64 = self
            .bounded(
                "create",
                CREATE_SCRIPT
                    .key(key)
                    .key(&self.counter_key)
                    .arg(value)
                    .arg(ttl_millis(ttl))
                    .invoke_async(&mut conn),
            )
            .await?;

        match rev {
            0 => Err(VrouterError::already_exists(key)),
            rev if rev > 0 => Ok(rev as u64),
            other => Err(VrouterError::Store(format!("unexpected create reply {other} for {key}"))),
        }
    }

    async fn get(&self, key: &str) -> Result<StoreEntry> {
        self.read_entry(key)
            .await?
            .ok_or_else(|| VrouterError::not_found(key))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_value: &str,
        new_value: &str,
        ttl: Option<Duration>,
        expected_revision: u64,
    ) -> Result<u64> {
        let mut conn = self.conn.clone();
        let rev: i64 = self
            .bounded(
                "compare_and_swap",
                CAS_SCRIPT
                    .key(key)
                    .key(&self.counter_key)
                    .arg(expected_value)
                    .arg(new_value)
                    .arg(expected_revision.to_string())
                    .arg(ttl_millis(ttl))
                    .invoke_async(&mut conn),
            )
            .await?;

        match rev {
            -1 => Err(VrouterError::not_found(key)),
            0 => Err(VrouterError::Conflict {
                key: key.to_string(),
                expected: expected_revision,
            }),
            rev if rev > 0 => Ok(rev as u64),
            other => Err(VrouterError::Store(format!("unexpected CAS reply {other} for {key}"))),
        }
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let mut targets = vec![key.to_string()];
        if recursive {
            targets.extend(self.scan_keys(&format!("{}/*", key.trim_end_matches('/'))).await?);
        }

        let mut conn = self.conn.clone();
        let removed: u64 = self
            .bounded("delete", redis::cmd("DEL").arg(&targets).query_async(&mut conn))
            .await?;

        if removed == 0 {
            return Err(VrouterError::not_found(key));
        }

        tracing::debug!(key = %key, removed, recursive, "Deleted keys");
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<StoreEntry>> {
        let keys = self
            .scan_keys(&format!("{}/*", dir.trim_end_matches('/')))
            .await?;

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            // Keys can expire between SCAN and HMGET
            if let Some(entry) = self.read_entry(&key).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}

/// Transport-level failures become `Connection`; anything else is a store error
fn map_redis_error(err: RedisError) -> VrouterError {
    if err.is_timeout()
        || err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_unrecoverable_error()
    {
        VrouterError::Connection(err.to_string())
    } else {
        VrouterError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_map_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = map_redis_error(RedisError::from(io));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_protocol_errors_map_to_store() {
        let err = map_redis_error(RedisError::from((
            redis::ErrorKind::TypeError,
            "WRONGTYPE",
        )));
        assert!(matches!(err, VrouterError::Store(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let result = RedisStore::connect("redis://[::1", "/vrouter", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(VrouterError::Config(_))));
    }
}
