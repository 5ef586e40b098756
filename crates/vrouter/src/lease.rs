//! Liveness lease management.
//!
//! A host proves it is alive by owning `{prefix}/host/{hostname}`. The key is
//! claimed once with create-if-absent and then renewed with compare-and-swap
//! against the revision this process last wrote. Any doubt about ownership
//! ends the lease as `Lost`, which the daemon treats as fatal:
//!
//! ```text
//! Unclaimed --claim--> Claimed --renew--> Claimed ...
//!                         |                  |
//!                         +--shutdown--> Released
//!                         +--conflict / deadline missed--> Lost
//! ```

use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use vrouter_common::constants::{DEFAULT_RETRY_BACKOFF_MS, MIN_RENEWAL_INTERVAL_SECS};
use vrouter_common::{LeaseSnapshot, LeaseState, Result, VrouterError};

use crate::store::CoordinationStore;

/// Renewal cadence for a given TTL.
///
/// A third of the TTL, computed exactly, never below one second. A TTL that
/// leaves no room for a one second interval is rejected.
pub fn renewal_interval(ttl: Duration) -> Result<Duration> {
    let floor = Duration::from_secs(MIN_RENEWAL_INTERVAL_SECS);
    if ttl <= floor {
        return Err(VrouterError::InvalidLease(format!(
            "ttl {ttl:?} must be longer than the {floor:?} renewal floor"
        )));
    }
    Ok((ttl / 3).max(floor))
}

/// Owns one liveness key for the lifetime of the process
pub struct LeaseManager<S: CoordinationStore> {
    store: S,
    key: String,
    value: String,
    ttl: Duration,
    renewal_interval: Duration,
    retry_backoff: Duration,
    state: LeaseState,
    revision: Option<u64>,
    /// When the request behind `revision` was sent
    last_write: Option<Instant>,
    status: watch::Sender<LeaseSnapshot>,
}

impl<S: CoordinationStore> LeaseManager<S> {
    pub fn new(store: S, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Result<Self> {
        let key = key.into();
        let renewal_interval = renewal_interval(ttl)?;
        let (status, _) = watch::channel(LeaseSnapshot {
            key: key.clone(),
            ..Default::default()
        });

        Ok(Self {
            store,
            key,
            value: value.into(),
            ttl,
            renewal_interval,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            state: LeaseState::Unclaimed,
            revision: None,
            last_write: None,
            status,
        })
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> LeaseState {
        self.state
    }

    /// Revision of the last write made by this process
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    pub fn renewal_interval(&self) -> Duration {
        self.renewal_interval
    }

    /// Follow lease transitions (used by the status endpoint)
    pub fn subscribe(&self) -> watch::Receiver<LeaseSnapshot> {
        self.status.subscribe()
    }

    fn transition(&mut self, state: LeaseState) {
        self.state = state;
        let renewed = matches!(state, LeaseState::Claimed).then(|| chrono::Utc::now().timestamp());
        self.status.send_modify(|snap| {
            snap.state = state;
            snap.revision = self.revision;
            if renewed.is_some() {
                snap.last_renewed = renewed;
            }
        });
    }

    /// Create the liveness key. `AlreadyExists` means another live process
    /// holds this identity; the state stays `Unclaimed`.
    pub async fn claim(&mut self) -> Result<()> {
        if self.state != LeaseState::Unclaimed {
            return Err(VrouterError::InvalidLease(format!(
                "cannot claim {} from state {}",
                self.key, self.state
            )));
        }

        let sent = Instant::now();
        match self.store.create(&self.key, &self.value, Some(self.ttl)).await {
            Ok(revision) => {
                self.revision = Some(revision);
                self.last_write = Some(sent);
                self.transition(LeaseState::Claimed);
                tracing::info!(
                    key = %self.key,
                    revision,
                    ttl = ?self.ttl,
                    interval = ?self.renewal_interval,
                    "Liveness lease claimed"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "Failed to claim liveness lease");
                Err(e)
            }
        }
    }

    /// Renew until shutdown or loss.
    ///
    /// Returns `Ok(Released)` after a graceful shutdown and `Err(LeaseLost)`
    /// once ownership can no longer be proven. A loss is never retried.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<LeaseState> {
        let Some(claimed_at) = self.last_write.filter(|_| self.state == LeaseState::Claimed) else {
            return Err(VrouterError::InvalidLease(format!(
                "renewal requires a claimed lease, {} is {}",
                self.key, self.state
            )));
        };

        // The store starts the TTL no earlier than the request was sent
        let mut deadline = claimed_at + self.ttl;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!(key = %self.key, "Shutdown requested, releasing lease");
                    self.release(deadline).await;
                    return Ok(LeaseState::Released);
                }
                _ = tokio::time::sleep(self.renewal_interval) => {}
            }

            match self.renew(deadline).await {
                Ok(sent) => deadline = sent + self.ttl,
                Err(e) => {
                    self.transition(LeaseState::Lost);
                    tracing::error!(key = %self.key, error = %e, "Unexpectedly lost liveness lease");
                    return Err(VrouterError::LeaseLost {
                        key: self.key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// One renewal round, returning when the successful request was sent.
    /// Connection errors are retried until the deadline; conflicts and
    /// missing keys fail at once.
    async fn renew(&mut self, deadline: Instant) -> Result<Instant> {
        loop {
            let expected = self
                .revision
                .ok_or_else(|| VrouterError::InvalidLease(format!("{} has no revision", self.key)))?;

            let sent = Instant::now();
            match self
                .store
                .compare_and_swap(&self.key, &self.value, &self.value, Some(self.ttl), expected)
                .await
            {
                Ok(revision) => {
                    self.revision = Some(revision);
                    self.last_write = Some(sent);
                    self.transition(LeaseState::Claimed);
                    tracing::debug!(key = %self.key, revision, "Lease renewed");
                    return Ok(sent);
                }
                Err(e) if e.is_retryable() && Instant::now() + self.retry_backoff < deadline => {
                    tracing::warn!(
                        key = %self.key,
                        error = %e,
                        remaining = ?deadline.saturating_duration_since(Instant::now()),
                        "Lease renewal failed, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort delete on graceful shutdown. Skipped once the key may
    /// already belong to someone else.
    async fn release(&mut self, deadline: Instant) {
        if Instant::now() >= deadline {
            tracing::warn!(key = %self.key, "Lease already past its deadline, not deleting");
        } else if let Err(e) = self.store.delete(&self.key, false).await {
            tracing::warn!(key = %self.key, error = %e, "Failed to release lease");
        }
        self.transition(LeaseState::Released);
    }
}
