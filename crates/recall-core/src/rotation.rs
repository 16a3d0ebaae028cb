//! Link rotation: pick the next unvisited item.
//!
//! Each call to [`RotationEngine::rotate`] runs one rotation event:
//!
//! 1. **Ensure pool.** An empty pool is filled from page 1 (single shot
//!    with timeout; a failure aborts the rotation).
//! 2. **Filter.** `unvisited = pool \ visited`, by identity.
//! 3. **Exhaustion.** With nothing unvisited, fetch page `cursor + 1`. An
//!    empty page ends the rotation with [`RotationOutcome::Exhausted`]; a
//!    non-empty page replaces the pool and cursor and the filter runs again,
//!    so a page that is entirely visited triggers another fetch.
//! 4. **Select** uniformly at random among the unvisited items.
//! 5. **Commit.** The visited set is re-read immediately before it is
//!    written together with the active item and the visit counter. The
//!    visit is then reported to the backend in the background with bounded
//!    retry; a failed report is logged and never undoes the commit.
//!
//! The visited set is only written after a successful selection, so a
//! failed fetch leaves it untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{RecallError, Result};
use crate::models::{Item, LinkPool, VisitedSet};
use crate::retry::{call_once, call_with_retry, RetryPolicy};
use crate::store::{keys, SessionStore, SessionStoreExt};

#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Deadline for each page fetch.
    pub fetch_timeout: Duration,
    /// Bounded retry for visit reports.
    pub report_policy: RetryPolicy,
    /// Upper bound on page advances within one rotation.
    pub max_page_advances: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            report_policy: RetryPolicy::background(),
            max_page_advances: 20,
        }
    }
}

/// Result of one rotation event.
#[derive(Debug, Clone, PartialEq)]
pub enum RotationOutcome {
    /// The item that is now active.
    Selected(Item),
    /// The backend has no further items. Not an error.
    Exhausted,
}

pub struct RotationEngine {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn Backend>,
    config: RotationConfig,
    rng: Mutex<StdRng>,
    reports: Mutex<JoinSet<()>>,
}

impl RotationEngine {
    pub fn new(store: Arc<dyn SessionStore>, backend: Arc<dyn Backend>, config: RotationConfig) -> Self {
        Self {
            store,
            backend,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
            reports: Mutex::new(JoinSet::new()),
        }
    }

    /// Use a deterministic selection sequence.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub async fn rotate(&self) -> Result<RotationOutcome> {
        let mut pool = self.ensure_pool().await?;
        if pool.is_empty() {
            info!("no links available on the first page");
            return Ok(RotationOutcome::Exhausted);
        }

        let visited = self.visited().await?;
        let mut advances = 0;

        loop {
            let candidates: Vec<Item> = pool.unvisited(&visited).into_iter().cloned().collect();
            if let Some(chosen) = self.choose(&candidates) {
                self.commit(&chosen).await?;
                return Ok(RotationOutcome::Selected(chosen));
            }

            if advances >= self.config.max_page_advances {
                warn!(
                    page = pool.page,
                    advances, "every fetched page was already visited, giving up"
                );
                return Ok(RotationOutcome::Exhausted);
            }
            advances += 1;

            let next_page = pool.page + 1;
            debug!(page = next_page, "pool exhausted, fetching next page");
            let items = self.fetch_page(next_page).await?;
            if items.is_empty() {
                info!(page = next_page, "no more links to discover");
                return Ok(RotationOutcome::Exhausted);
            }
            pool = LinkPool::new(items, next_page);
            self.store.set_json(keys::LINK_POOL, &pool).await?;
        }
    }

    /// Record a visit to a link the user reached without rotating.
    ///
    /// Returns `false` if the link was already visited; the visit is
    /// reported either way.
    pub async fn mark_visited(&self, link_id: &str) -> Result<bool> {
        if link_id.is_empty() {
            return Err(RecallError::invalid("link id must not be empty"));
        }
        let (mut visited, total) = self.visit_state().await?;
        let inserted = visited.insert(link_id);
        if inserted {
            self.store
                .set(vec![
                    (keys::VISITED_LINKS.to_string(), serde_json::to_value(&visited)?),
                    (keys::TOTAL_VISITS.to_string(), Value::from(total + 1)),
                ])
                .await?;
        }
        self.spawn_report(link_id.to_string());
        Ok(inserted)
    }

    pub async fn active(&self) -> Result<Option<Item>> {
        self.store.get_json(keys::ACTIVE_LINK).await
    }

    pub async fn visited(&self) -> Result<VisitedSet> {
        Ok(self
            .store
            .get_json(keys::VISITED_LINKS)
            .await?
            .unwrap_or_default())
    }

    pub async fn pool(&self) -> Result<LinkPool> {
        Ok(self.store.get_json(keys::LINK_POOL).await?.unwrap_or_default())
    }

    pub async fn total_visits(&self) -> Result<u64> {
        Ok(self.store.get_json(keys::TOTAL_VISITS).await?.unwrap_or(0))
    }

    /// Forget the visited set, pool and active item.
    pub async fn reset(&self) -> Result<()> {
        self.store
            .remove(&[keys::VISITED_LINKS, keys::LINK_POOL, keys::ACTIVE_LINK])
            .await
    }

    /// Wait for every outstanding visit report. Reports still running when
    /// the engine is dropped are aborted.
    pub async fn flush_reports(&self) {
        let mut reports = std::mem::take(&mut *self.reports.lock().unwrap_or_else(|e| e.into_inner()));
        while reports.join_next().await.is_some() {}
    }

    async fn ensure_pool(&self) -> Result<LinkPool> {
        let pool = self.pool().await?;
        if !pool.is_empty() {
            return Ok(pool);
        }
        let items = self.fetch_page(1).await?;
        let pool = LinkPool::new(items, 1);
        if !pool.is_empty() {
            self.store.set_json(keys::LINK_POOL, &pool).await?;
        }
        Ok(pool)
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<Item>> {
        call_once(self.config.fetch_timeout, self.backend.fetch_links(page)).await
    }

    fn choose(&self, candidates: &[Item]) -> Option<Item> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        candidates.choose(&mut *rng).cloned()
    }

    /// Visited set and counter, read together to keep the
    /// read-modify-write window short.
    async fn visit_state(&self) -> Result<(VisitedSet, u64)> {
        let mut values: HashMap<String, Value> = self
            .store
            .get(&[keys::VISITED_LINKS, keys::TOTAL_VISITS])
            .await?;
        let visited = match values.remove(keys::VISITED_LINKS) {
            Some(Value::Null) | None => VisitedSet::new(),
            Some(v) => serde_json::from_value(v)?,
        };
        let total = values
            .remove(keys::TOTAL_VISITS)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok((visited, total))
    }

    async fn commit(&self, item: &Item) -> Result<()> {
        let (mut visited, total) = self.visit_state().await?;
        visited.insert(item.id.clone());
        self.store
            .set(vec![
                (keys::VISITED_LINKS.to_string(), serde_json::to_value(&visited)?),
                (keys::ACTIVE_LINK.to_string(), serde_json::to_value(item)?),
                (keys::TOTAL_VISITS.to_string(), Value::from(total + 1)),
            ])
            .await?;
        info!(link_id = %item.id, visited = visited.len(), "rotated to link");
        self.spawn_report(item.id.clone());
        Ok(())
    }

    fn spawn_report(&self, link_id: String) {
        let backend = self.backend.clone();
        let policy = self.config.report_policy.clone();
        let mut reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        while reports.try_join_next().is_some() {}
        reports.spawn(async move {
            let result = call_with_retry(&policy, RecallError::is_retryable, || {
                backend.report_visit(&link_id)
            })
            .await;
            if let Err(err) = result {
                warn!(link_id = %link_id, error = %err, "failed to report visit");
            }
        });
    }
}
