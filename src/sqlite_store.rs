//! Durable [`SessionStore`] over the SQLite `kv` table.
//!
//! Values are stored as JSON text. Change records fan out through a
//! [`ChangeHub`] to listeners in this process; out-of-process contexts
//! observe them through the HTTP bridge's `/changes` stream.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use recall_core::store::{ChangeHub, ChangeRecord, Listener, SessionStore, Subscription};
use recall_core::{RecallError, Result};

use crate::config::Config;
use crate::{db, migrate};

pub struct SqliteSessionStore {
    pool: SqlitePool,
    hub: ChangeHub,
}

fn unavailable(err: sqlx::Error) -> RecallError {
    RecallError::store_unavailable(err.to_string())
}

fn decode(key: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw)
        .map_err(|e| RecallError::Serialization(format!("corrupt value for '{}': {}", key, e)))
}

impl SqliteSessionStore {
    /// Open the configured database and ensure the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            hub: ChangeHub::new(),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Every stored key, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT key FROM kv ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
                .bind(*key)
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;
            if let Some(raw) = raw {
                values.insert(key.to_string(), decode(key, &raw)?);
            }
        }
        Ok(values)
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        let mut records = Vec::with_capacity(entries.len());

        for (key, value) in entries {
            let old: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
                .bind(&key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unavailable)?;

            sqlx::query(
                "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(&key)
            .bind(value.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

            records.push(ChangeRecord {
                old_value: old.as_deref().map(|raw| decode(&key, raw)).transpose()?,
                key,
                new_value: Some(value),
            });
        }

        tx.commit().await.map_err(unavailable)?;
        self.hub.emit(&records);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        let mut records = Vec::new();

        for key in keys {
            let old: Option<String> = sqlx::query_scalar("DELETE FROM kv WHERE key = ? RETURNING value")
                .bind(*key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unavailable)?;
            if let Some(raw) = old {
                records.push(ChangeRecord {
                    key: key.to_string(),
                    old_value: Some(decode(key, &raw)?),
                    new_value: None,
                });
            }
        }

        tx.commit().await.map_err(unavailable)?;
        self.hub.emit(&records);
        Ok(())
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.hub.subscribe(listener)
    }
}
