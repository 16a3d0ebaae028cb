//! Shared session store abstraction.
//!
//! The [`SessionStore`] trait is the single durable owner of rotation state
//! and cached interaction projections. Every execution context reads it and
//! observes it through [`SessionStore::subscribe`]; only the engines write
//! to it.
//!
//! # Contract
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get`](SessionStore::get) | Read a set of keys; absent keys are absent from the map |
//! | [`set`](SessionStore::set) | Write entries, last writer wins |
//! | [`remove`](SessionStore::remove) | Delete keys |
//! | [`subscribe`](SessionStore::subscribe) | Register a change listener |
//!
//! Every write fans out one [`ChangeRecord`] per written key to every
//! registered listener, the writer's own included, before the write call
//! returns. There are no transactions: two contexts doing read-modify-write
//! on the same key race, and the second write wins.
//!
//! Backends share the fan-out through [`ChangeHub`]. An unavailable backend
//! fails with [`RecallError::StoreUnavailable`].

pub mod memory;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{RecallError, Result};

pub use memory::InMemorySessionStore;

/// One key's transition, delivered to every listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// A change listener. Called synchronously from inside the write.
pub type Listener = Arc<dyn Fn(&ChangeRecord) + Send + Sync>;

/// Abstract session store backend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read the given keys. Keys without a value are omitted.
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

    /// Write every entry, then notify listeners in entry order.
    async fn set(&self, entries: Vec<(String, Value)>) -> Result<()>;

    /// Delete the given keys. Only keys that held a value are notified.
    async fn remove(&self, keys: &[&str]) -> Result<()>;

    /// Register a listener; it stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

/// Typed JSON helpers available on every [`SessionStore`].
#[async_trait]
pub trait SessionStoreExt: SessionStore {
    /// Read and deserialize one key. A stored JSON `null` reads as `None`.
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut values = self.get(&[key]).await?;
        match values.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Serialize and write one key.
    async fn set_json<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(vec![(key.to_string(), value)]).await
    }
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStoreExt for S {}

/// Resolve once `key` holds a non-null value, or fail with
/// [`RecallError::Timeout`].
///
/// The listener is registered before the initial read, so a write landing
/// between the two is still observed.
pub async fn wait_for_key(store: &dyn SessionStore, key: &str, timeout: Duration) -> Result<Value> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watched = key.to_string();
    let _subscription = store.subscribe(Arc::new(move |change: &ChangeRecord| {
        if change.key != watched {
            return;
        }
        if let Some(value) = change.new_value.as_ref().filter(|v| !v.is_null()) {
            let _ = tx.send(value.clone());
        }
    }));

    if let Some(value) = store.get(&[key]).await?.remove(key) {
        if !value.is_null() {
            return Ok(value);
        }
    }

    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(RecallError::internal("change subscription closed")),
        Err(_) => Err(RecallError::Timeout(timeout)),
    }
}

// ============ Change fan-out ============

struct HubInner {
    listeners: RwLock<BTreeMap<u64, Listener>>,
    next_id: AtomicU64,
}

/// Listener registry and synchronous fan-out shared by store backends.
///
/// Listeners are called in registration order, outside the registry lock,
/// so a listener may itself subscribe or unsubscribe.
#[derive(Clone)]
pub struct ChangeHub {
    inner: Arc<HubInner>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                listeners: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, listener);
        Subscription {
            id,
            hub: Arc::downgrade(&self.inner),
        }
    }

    pub fn emit(&self, records: &[ChangeRecord]) {
        if records.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for record in records {
            for listener in &listeners {
                listener(record);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    id: u64,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.listeners
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.id);
        }
    }
}

/// Persisted store keys.
pub mod keys {
    use crate::models::ResourceKind;

    /// The currently displayed [`Item`](crate::models::Item).
    pub const ACTIVE_LINK: &str = "activeLink";
    /// The [`VisitedSet`](crate::models::VisitedSet).
    pub const VISITED_LINKS: &str = "visitedLinks";
    /// The [`LinkPool`](crate::models::LinkPool): items plus page cursor.
    pub const LINK_POOL: &str = "linkPool";
    pub const TOTAL_VISITS: &str = "totalVisits";
    pub const AUTH_TOKEN: &str = "authToken";
    pub const USER_ID: &str = "userId";
    /// Tab ids that have asked the background for their identity.
    pub const TRACKED_TABS: &str = "trackedTabs";
    /// Window ids with an open side panel.
    pub const SIDE_PANEL_WINDOWS: &str = "sidePanelWindows";

    /// Cached projection for one `(kind, target)` pair.
    pub fn interaction(kind: ResourceKind, target: &str) -> String {
        format!("interaction:{}:{}", kind, target)
    }

    pub fn comments(link_id: &str) -> String {
        format!("comments:{}", link_id)
    }
}
