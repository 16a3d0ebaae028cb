//! Generic optimistic command engine.
//!
//! A [`CommandEngine`] owns one resource kind and runs every command for it
//! through the same sequence:
//!
//! 1. **De-duplicate.** A command whose intent fingerprint matches the one
//!    already in flight for the same target is rejected with
//!    [`RecallError::Duplicate`]. A different intent proceeds and becomes
//!    the latest.
//! 2. **Snapshot** the stored projection (absence included).
//! 3. **Apply** the optimistic projection and write it to the store, which
//!    notifies every context.
//! 4. **Dispatch** the real operation.
//! 5. **Merge** on success, or
//! 6. **Roll back** to the exact snapshot on failure and surface the error.
//! 7. **Refresh** from the backend once no command for the target remains
//!    in flight.
//!
//! Every command carries a sequence number. Only the latest command for a
//! target may merge or roll back; results of superseded commands are
//! dropped and the settle-time refresh reconciles with the server.
//!
//! Resource kinds plug in through [`OptimisticResource`]; see
//! [`crate::resources`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{RecallError, Result};
use crate::models::ResourceKind;
use crate::store::{keys, SessionStore, SessionStoreExt};

/// Strategy for one resource kind.
///
/// `snapshot` and `rollback` default to "copy the stored value" and
/// "restore it verbatim"; `apply`, `dispatch`, `merge` and `refresh` are
/// resource-specific.
#[async_trait]
pub trait OptimisticResource: Send + Sync {
    /// The cached view stored under [`store_key`](Self::store_key).
    type Projection: Clone + Default + Serialize + DeserializeOwned + Send + Sync;
    /// What the caller asked for.
    type Intent: Send + Sync;
    /// What the backend confirmed.
    type Confirmed: Send;

    fn kind(&self) -> ResourceKind;

    fn store_key(&self, target: &str) -> String {
        keys::interaction(self.kind(), target)
    }

    /// Commands with equal fingerprints are duplicates of each other.
    fn fingerprint(&self, intent: &Self::Intent) -> String;

    fn snapshot(&self, current: Option<&Self::Projection>) -> Option<Self::Projection> {
        current.cloned()
    }

    /// The projection to show before the backend answers.
    fn apply(&self, current: &Self::Projection, intent: &Self::Intent) -> Self::Projection;

    /// Perform the real operation, retrying as the resource sees fit.
    async fn dispatch(&self, target: &str, intent: &Self::Intent) -> Result<Self::Confirmed>;

    /// Fold confirmed fields into the live projection.
    fn merge(
        &self,
        current: &Self::Projection,
        intent: &Self::Intent,
        confirmed: Self::Confirmed,
    ) -> Self::Projection;

    /// The value to restore after a failure. `None` removes the key.
    fn rollback(
        &self,
        _current: Option<&Self::Projection>,
        snapshot: Option<Self::Projection>,
    ) -> Option<Self::Projection> {
        snapshot
    }

    /// Read the authoritative projection. `Ok(None)` leaves the store as is.
    async fn refresh(&self, target: &str) -> Result<Option<Self::Projection>>;
}

struct InFlight {
    fingerprint: String,
    seq: u64,
}

/// Runs optimistic commands for a single resource kind.
pub struct CommandEngine<R: OptimisticResource> {
    resource: R,
    store: Arc<dyn SessionStore>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_seq: AtomicU64,
}

impl<R: OptimisticResource> CommandEngine<R> {
    pub fn new(resource: R, store: Arc<dyn SessionStore>) -> Self {
        Self {
            resource,
            store,
            in_flight: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn is_in_flight(&self, target: &str) -> bool {
        self.lock_in_flight().contains_key(target)
    }

    /// The stored projection for `target`, if any.
    pub async fn current(&self, target: &str) -> Result<Option<R::Projection>> {
        self.store.get_json(&self.resource.store_key(target)).await
    }

    /// Run one command to completion.
    ///
    /// Returns the settled projection on success. On failure the projection
    /// has been rolled back (unless a newer command owns it) and the
    /// dispatch error is returned.
    pub async fn execute(&self, target: &str, intent: R::Intent) -> Result<R::Projection> {
        let seq = self.begin(target, &intent)?;
        let key = self.resource.store_key(target);

        let outcome = self.run(target, &key, seq, &intent).await;

        if self.finish(target, seq) {
            self.refresh(target, &key).await;
        }
        outcome
    }

    async fn run(&self, target: &str, key: &str, seq: u64, intent: &R::Intent) -> Result<R::Projection> {
        let kind = self.resource.kind();
        let current: Option<R::Projection> = self.store.get_json(key).await?;
        let snapshot = self.resource.snapshot(current.as_ref());

        let optimistic = self
            .resource
            .apply(&current.unwrap_or_default(), intent);
        self.store.set_json(key, &optimistic).await?;
        debug!(%kind, target, seq, "applied optimistic projection");

        match self.resource.dispatch(target, intent).await {
            Ok(confirmed) => {
                let live: R::Projection = self.store.get_json(key).await?.unwrap_or_default();
                if !self.is_latest(target, seq) {
                    debug!(%kind, target, seq, "discarding result of superseded command");
                    return Ok(live);
                }
                let merged = self.resource.merge(&live, intent, confirmed);
                self.store.set_json(key, &merged).await?;
                Ok(merged)
            }
            Err(err) => {
                if !self.is_latest(target, seq) {
                    debug!(%kind, target, seq, error = %err, "superseded command failed");
                    return Err(err);
                }
                warn!(%kind, target, seq, error = %err, "command failed, rolling back");
                if let Err(store_err) = self.restore(key, snapshot).await {
                    error!(%kind, target, error = %store_err, "rollback could not be written");
                    return Err(store_err);
                }
                Err(err)
            }
        }
    }

    async fn restore(&self, key: &str, snapshot: Option<R::Projection>) -> Result<()> {
        let live: Option<R::Projection> = self.store.get_json(key).await?;
        match self.resource.rollback(live.as_ref(), snapshot) {
            Some(previous) => self.store.set_json(key, &previous).await,
            None => self.store.remove(&[key]).await,
        }
    }

    async fn refresh(&self, target: &str, key: &str) {
        let kind = self.resource.kind();
        match self.resource.refresh(target).await {
            Ok(Some(authoritative)) => {
                if self.is_in_flight(target) {
                    debug!(%kind, target, "newer command started, skipping refresh write");
                    return;
                }
                if let Err(err) = self.store.set_json(key, &authoritative).await {
                    warn!(%kind, target, error = %err, "failed to store refreshed projection");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%kind, target, error = %err, "failed to refresh projection"),
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self, target: &str, intent: &R::Intent) -> Result<u64> {
        let fingerprint = self.resource.fingerprint(intent);
        let mut in_flight = self.lock_in_flight();
        if let Some(existing) = in_flight.get(target) {
            if existing.fingerprint == fingerprint {
                debug!(kind = %self.resource.kind(), target, "rejecting duplicate command");
                return Err(RecallError::Duplicate {
                    kind: self.resource.kind(),
                    target: target.to_string(),
                });
            }
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        in_flight.insert(target.to_string(), InFlight { fingerprint, seq });
        Ok(seq)
    }

    fn is_latest(&self, target: &str, seq: u64) -> bool {
        self.lock_in_flight()
            .get(target)
            .is_some_and(|entry| entry.seq == seq)
    }

    /// Clear this command's slot. Returns `true` when nothing for `target`
    /// remains in flight.
    fn finish(&self, target: &str, seq: u64) -> bool {
        let mut in_flight = self.lock_in_flight();
        match in_flight.get(target) {
            Some(entry) if entry.seq == seq => {
                in_flight.remove(target);
                true
            }
            Some(_) => false,
            None => true,
        }
    }
}
