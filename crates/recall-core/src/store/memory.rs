//! In-memory [`SessionStore`] implementation for tests and embedded hosts.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. The lock is never held
//! while listeners run. [`InMemorySessionStore::close`] makes every later
//! call fail with [`RecallError::StoreUnavailable`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{RecallError, Result};

use super::{ChangeHub, ChangeRecord, Listener, SessionStore, Subscription};

/// In-memory store for tests and hosts without durable storage.
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<String, Value>>,
    hub: ChangeHub,
    closed: AtomicBool,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hub: ChangeHub::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate the backing storage going away.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RecallError::store_unavailable("in-memory store is closed"))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> RecallError {
    RecallError::store_unavailable("in-memory store lock poisoned")
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        self.ensure_open()?;
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, new_entries: Vec<(String, Value)>) -> Result<()> {
        self.ensure_open()?;
        let records: Vec<ChangeRecord> = {
            let mut entries = self.entries.write().map_err(poisoned)?;
            new_entries
                .into_iter()
                .map(|(key, value)| {
                    let old_value = entries.insert(key.clone(), value.clone());
                    ChangeRecord {
                        key,
                        old_value,
                        new_value: Some(value),
                    }
                })
                .collect()
        };
        self.hub.emit(&records);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        self.ensure_open()?;
        let records: Vec<ChangeRecord> = {
            let mut entries = self.entries.write().map_err(poisoned)?;
            keys.iter()
                .filter_map(|k| {
                    entries.remove(*k).map(|old| ChangeRecord {
                        key: k.to_string(),
                        old_value: Some(old),
                        new_value: None,
                    })
                })
                .collect()
        };
        self.hub.emit(&records);
        Ok(())
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.hub.subscribe(listener)
    }
}
