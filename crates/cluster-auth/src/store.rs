//! Per-cluster credential cache with single-flight refresh
//!
//! The store maps an upstream identity to at most one cached `Credential`.
//! Staleness is derived at read time from the stored expiry;
//! nothing sweeps the map in the background. When concurrent callers find
//! the same entry missing or stale, exactly one refresh runs and every
//! caller receives its outcome, success or failure.
//!
//! The refresh itself executes in a spawned task, so a caller that
//! disconnects mid-wait does not abort the exchange for everyone else.
//! Locks guard map access only; no lock is held across network I/O.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use common::Secret;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};

/// A bearer token together with the instant it stops being usable.
///
/// Immutable once constructed; a refresh replaces the whole value.
#[derive(Debug, Clone)]
pub struct Credential {
    token: Secret<String>,
    expires_at: Instant,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            token: Secret::new(token.into()),
            expires_at,
        }
    }

    /// The bearer token itself. Goes into an Authorization header and
    /// nowhere else.
    pub fn token(&self) -> &str {
        self.token.expose()
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// A credential is fresh strictly before its expiry instant.
    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Outcome of one refresh, fanned out to every waiting caller.
type RefreshOutcome = Result<Credential>;

/// Concurrency-safe credential cache keyed by upstream identity.
///
/// `entries` holds the cached credentials. `in_flight` holds one broadcast
/// receiver per refresh currently running; the matching sender lives inside
/// the refresh task, so a task that dies unblocks its waiters instead of
/// stranding them.
pub struct CredentialStore {
    entries: RwLock<HashMap<String, Credential>>,
    in_flight: Mutex<HashMap<String, broadcast::Receiver<RefreshOutcome>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the credential for an upstream, filtering out stale entries.
    /// Stale entries stay in the map until a refresh replaces them; reads
    /// never mutate.
    pub async fn get_fresh(&self, upstream: &str) -> Option<Credential> {
        let entries = self.entries.read().await;
        entries.get(upstream).filter(|c| c.is_fresh()).cloned()
    }

    /// Insert or replace the credential for an upstream.
    pub async fn insert(&self, upstream: &str, credential: Credential) {
        let mut entries = self.entries.write().await;
        entries.insert(upstream.to_owned(), credential);
    }

    /// Drop an upstream's credential entirely, so the next lookup is forced
    /// to refresh. Returns whether an entry was present.
    pub async fn invalidate(&self, upstream: &str) -> bool {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(upstream).is_some();
        if removed {
            debug!(upstream, "credential invalidated");
        }
        removed
    }

    /// Number of cached credentials, fresh or stale.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Return the upstream's fresh credential, refreshing it first if the
    /// cache has nothing usable.
    ///
    /// Single-flight: the first caller to observe a missing/stale entry
    /// starts `refresh` in a detached task and registers it under the key;
    /// callers arriving while it runs subscribe to the same outcome. The
    /// exchange happens at most once per key per staleness window, and it
    /// completes even if every caller disconnects. A failed refresh leaves
    /// the cache untouched and is reported to all current waiters; the next
    /// caller after that starts over.
    pub async fn get_or_refresh<F, Fut>(
        self: &Arc<Self>,
        upstream: &str,
        refresh: F,
    ) -> Result<Credential>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Credential>> + Send + 'static,
    {
        if let Some(credential) = self.get_fresh(upstream).await {
            return Ok(credential);
        }

        let mut rx = {
            let mut in_flight = self.in_flight.lock().await;

            if let Some(flight) = in_flight.get(upstream) {
                debug!(upstream, "joining in-flight token refresh");
                flight.resubscribe()
            } else {
                // A refresh may have landed between the fast-path read and
                // taking this lock.
                if let Some(credential) = self.get_fresh(upstream).await {
                    return Ok(credential);
                }

                debug!(upstream, "starting token refresh");
                let (tx, rx) = broadcast::channel(1);
                in_flight.insert(upstream.to_owned(), rx.resubscribe());

                let store = Arc::clone(self);
                let key = upstream.to_owned();
                let fut = refresh();
                tokio::spawn(async move {
                    let outcome = fut.await;
                    if let Ok(credential) = &outcome {
                        store.insert(&key, credential.clone()).await;
                    }
                    // Deregister before broadcasting: anyone who saw this
                    // flight is already subscribed, and anyone arriving
                    // later must see the updated cache or start anew.
                    store.in_flight.lock().await.remove(&key);
                    let _ = tx.send(outcome);
                });
                rx
            }
        };

        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => {
                // The refresh task dropped its sender without reporting.
                // Clear the dead flight so the key can recover; a live
                // successor flight keeps its sender and stays registered.
                let mut in_flight = self.in_flight.lock().await;
                if let Some(flight) = in_flight.get_mut(upstream)
                    && matches!(
                        flight.try_recv(),
                        Err(broadcast::error::TryRecvError::Closed)
                    )
                {
                    in_flight.remove(upstream);
                }
                Err(Error::RefreshInterrupted)
            }
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
