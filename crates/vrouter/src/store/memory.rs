//! In-process coordination store.
//!
//! Same semantics as the Redis backend (store-wide revisions, lazy TTL
//! expiry) without a server. Time comes from `tokio::time` so tests can run
//! with a paused clock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use vrouter_common::{Result, StoreEntry, VrouterError};

use super::CoordinationStore;

#[derive(Debug)]
struct Slot {
    value: String,
    revision: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Slot>,
    revision: u64,
}

impl Inner {
    /// Drop expired entries so every operation sees only live state
    fn purge(&mut self, now: Instant) {
        self.entries.retain(|_, slot| slot.is_live(now));
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// Coordination store held in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| VrouterError::Store("memory store poisoned".to_string()))
    }

    /// Number of live entries
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock()
            .map(|mut inner| {
                inner.purge(Instant::now());
                inner.entries.len()
            })
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn deadline(ttl: Option<Duration>, now: Instant) -> Option<Instant> {
    ttl.map(|d| now + d)
}

fn under(dir: &str) -> String {
    format!("{}/", dir.trim_end_matches('/'))
}

impl CoordinationStore for MemoryStore {
    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<u64> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        inner.purge(now);

        if inner.entries.contains_key(key) {
            return Err(VrouterError::already_exists(key));
        }

        let revision = inner.next_revision();
        inner.entries.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                revision,
                expires_at: deadline(ttl, now),
            },
        );
        Ok(revision)
    }

    async fn get(&self, key: &str) -> Result<StoreEntry> {
        let mut inner = self.lock()?;
        inner.purge(Instant::now());

        inner
            .entries
            .get(key)
            .map(|slot| StoreEntry {
                key: key.to_string(),
                value: slot.value.clone(),
                revision: slot.revision,
            })
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
        let now = Instant::now();
        let mut inner = self.lock()?;
        inner.purge(now);

        let matches = match inner.entries.get(key) {
            None => return Err(VrouterError::not_found(key)),
            Some(slot) => slot.revision == expected_revision && slot.value == expected_value,
        };
        if !matches {
            return Err(VrouterError::Conflict {
                key: key.to_string(),
                expected: expected_revision,
            });
        }

        let revision = inner.next_revision();
        inner.entries.insert(
            key.to_string(),
            Slot {
                value: new_value.to_string(),
                revision,
                expires_at: deadline(ttl, now),
            },
        );
        Ok(revision)
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let mut inner = self.lock()?;
        inner.purge(Instant::now());

        let mut removed = usize::from(inner.entries.remove(key).is_some());
        if recursive {
            let subtree = under(key);
            let before = inner.entries.len();
            inner.entries.retain(|k, _| !k.starts_with(&subtree));
            removed += before - inner.entries.len();
        }

        if removed == 0 {
            return Err(VrouterError::not_found(key));
        }
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<StoreEntry>> {
        let mut inner = self.lock()?;
        inner.purge(Instant::now());

        let subtree = under(dir);
        Ok(inner
            .entries
            .range(subtree.clone()..)
            .take_while(|(k, _)| k.starts_with(&subtree))
            .map(|(k, slot)| StoreEntry {
                key: k.clone(),
                value: slot.value.clone(),
                revision: slot.revision,
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }
}
