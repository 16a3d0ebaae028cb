//! In-memory backend shared by the engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;

use crate::backend::{Backend, ToggleResponse};
use crate::error::{RecallError, Result};
use crate::models::{Attachment, Comment, InteractionStatus, Item, Media, ToggleKind};

/// Simulated server. Mutations wait on `gate` so tests can observe the
/// optimistic state while a request is in flight.
pub(crate) struct MockBackend {
    pub gate: Semaphore,
    pub toggle_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub comment_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub fail_toggles: AtomicBool,
    pub fail_comments: AtomicBool,
    pub omit_count: AtomicBool,
    pub engagement: Mutex<HashMap<(ToggleKind, String), InteractionStatus>>,
    pub comments: Mutex<HashMap<String, Vec<Comment>>>,
}

impl MockBackend {
    /// Requests complete as soon as they are made.
    pub fn open() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    /// Every mutation blocks until the test adds a permit.
    pub fn gated() -> Self {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            gate: Semaphore::new(permits),
            toggle_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            comment_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            fail_toggles: AtomicBool::new(false),
            fail_comments: AtomicBool::new(false),
            omit_count: AtomicBool::new(false),
            engagement: Mutex::new(HashMap::new()),
            comments: Mutex::new(HashMap::new()),
        }
    }

    pub fn seed_status(&self, kind: ToggleKind, target: &str, status: InteractionStatus) {
        self.engagement
            .lock()
            .unwrap()
            .insert((kind, target.to_string()), status);
    }

    pub fn server_status(&self, kind: ToggleKind, target: &str) -> InteractionStatus {
        self.engagement
            .lock()
            .unwrap()
            .get(&(kind, target.to_string()))
            .copied()
            .unwrap_or(InteractionStatus::new(false, Some(0)))
    }

    async fn pass_gate(&self) {
        self.gate.acquire().await.unwrap().forget();
    }
}

pub(crate) fn comment(id: &str, content: &str) -> Comment {
    Comment {
        id: id.to_string(),
        user_id: "u-1".to_string(),
        content: content.to_string(),
        media: None,
        created_at: Utc::now(),
        like_status: None,
        replies: None,
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn fetch_links(&self, _page: u32) -> Result<Vec<Item>> {
        Ok(Vec::new())
    }

    async fn report_visit(&self, _link_id: &str) -> Result<()> {
        Ok(())
    }

    async fn set_engagement(
        &self,
        kind: ToggleKind,
        target_id: &str,
        engaged: bool,
    ) -> Result<ToggleResponse> {
        self.toggle_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        if self.fail_toggles.load(Ordering::SeqCst) {
            return Ok(ToggleResponse::failed("rate limited"));
        }
        let mut engagement = self.engagement.lock().unwrap();
        let status = engagement
            .entry((kind, target_id.to_string()))
            .or_insert(InteractionStatus::new(false, Some(0)));
        if status.engaged != engaged {
            status.engaged = engaged;
            status.count = status.count.map(|c| if engaged { c + 1 } else { c - 1 });
        }
        let count = if self.omit_count.load(Ordering::SeqCst) {
            None
        } else {
            status.count
        };
        Ok(ToggleResponse::ok(status.engaged, count))
    }

    async fn engagement_status(&self, kind: ToggleKind, target_id: &str) -> Result<ToggleResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let status = self.server_status(kind, target_id);
        Ok(ToggleResponse::ok(status.engaged, status.count))
    }

    async fn create_comment(
        &self,
        link_id: &str,
        content: &str,
        file: Option<&Attachment>,
    ) -> Result<Comment> {
        let n = self.comment_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        if self.fail_comments.load(Ordering::SeqCst) {
            return Err(RecallError::http(400, "comment rejected"));
        }
        let mut created = comment(&format!("c-{}", n + 1), content);
        created.media = file.map(|f| {
            vec![Media {
                id: format!("m-{}", n + 1),
                url: format!("https://cdn.example.com/{}", f.file_name),
                kind: f.media_kind().to_string(),
                created_at: Utc::now(),
            }]
        });
        self.comments
            .lock()
            .unwrap()
            .entry(link_id.to_string())
            .or_default()
            .insert(0, created.clone());
        Ok(created)
    }

    async fn list_comments(&self, link_id: &str) -> Result<Vec<Comment>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .comments
            .lock()
            .unwrap()
            .get(link_id)
            .cloned()
            .unwrap_or_default())
    }
}
