use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the session store schema. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per session key; values are JSON text
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create kv table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_updated_at ON kv(updated_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
