//! Resource strategies for the optimistic command engine.
//!
//! [`ToggleResource`] covers like, bookmark and comment-like; it is
//! instantiated once per [`ToggleKind`]. [`CommentResource`] covers comment
//! creation on a link's comment list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::backend::{Backend, ToggleData};
use crate::error::Result;
use crate::models::{Attachment, Comment, InteractionStatus, Media, ResourceKind, ToggleKind};
use crate::optimistic::OptimisticResource;
use crate::retry::RetryClient;
use crate::store::keys;

/// Desired engagement for a toggle command.
///
/// Commands fingerprint by their target value: a second command for the
/// same value while one is pending is a duplicate, an opposite one proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleIntent {
    pub engaged: bool,
}

impl ToggleIntent {
    pub fn set(engaged: bool) -> Self {
        Self { engaged }
    }

    /// The opposite of what is visible now.
    pub fn flip(current: &InteractionStatus) -> Self {
        Self {
            engaged: !current.engaged,
        }
    }
}

pub struct ToggleResource {
    kind: ToggleKind,
    backend: Arc<dyn Backend>,
    retry: RetryClient,
    read_timeout: Duration,
}

impl ToggleResource {
    pub fn new(kind: ToggleKind, backend: Arc<dyn Backend>, retry: RetryClient, read_timeout: Duration) -> Self {
        Self {
            kind,
            backend,
            retry,
            read_timeout,
        }
    }

    pub fn toggle_kind(&self) -> ToggleKind {
        self.kind
    }

    /// Single-shot read of the authoritative status.
    pub async fn fetch_status(&self, target: &str) -> Result<Option<InteractionStatus>> {
        let response = self
            .retry
            .call_once(
                self.read_timeout,
                self.backend.engagement_status(self.kind, target),
            )
            .await?;
        Ok(response.into_result()?.map(InteractionStatus::from))
    }
}

#[async_trait]
impl OptimisticResource for ToggleResource {
    type Projection = InteractionStatus;
    type Intent = ToggleIntent;
    type Confirmed = Option<ToggleData>;

    fn kind(&self) -> ResourceKind {
        self.kind.resource()
    }

    fn fingerprint(&self, intent: &ToggleIntent) -> String {
        format!("engaged={}", intent.engaged)
    }

    fn apply(&self, current: &InteractionStatus, intent: &ToggleIntent) -> InteractionStatus {
        if current.engaged == intent.engaged {
            return *current;
        }
        let count = current.count.map(|c| {
            if intent.engaged {
                c.saturating_add(1)
            } else {
                c.saturating_sub(1).max(0)
            }
        });
        InteractionStatus::new(intent.engaged, count)
    }

    async fn dispatch(&self, target: &str, intent: &ToggleIntent) -> Result<Option<ToggleData>> {
        let backend = &self.backend;
        let kind = self.kind;
        let engaged = intent.engaged;
        self.retry
            .call(|| async move {
                backend
                    .set_engagement(kind, target, engaged)
                    .await?
                    .into_result()
            })
            .await
    }

    fn merge(
        &self,
        current: &InteractionStatus,
        _intent: &ToggleIntent,
        confirmed: Option<ToggleData>,
    ) -> InteractionStatus {
        match confirmed {
            Some(data) => InteractionStatus::new(data.engaged, data.count.or(current.count)),
            None => *current,
        }
    }

    async fn refresh(&self, target: &str) -> Result<Option<InteractionStatus>> {
        self.fetch_status(target).await
    }
}

/// Where a placeholder comment is inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertAt {
    #[default]
    Head,
    Tail,
}

/// A comment the user is posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    /// Identity of the placeholder, replaced by the server's on success.
    pub temp_id: String,
    pub author_id: String,
    pub content: String,
    pub attachment: Option<Attachment>,
    pub position: InsertAt,
}

impl NewComment {
    pub fn new(author_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            temp_id: format!("temp-{}", Uuid::new_v4()),
            author_id: author_id.into(),
            content: content.into(),
            attachment: None,
            position: InsertAt::default(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn at(mut self, position: InsertAt) -> Self {
        self.position = position;
        self
    }

    fn placeholder(&self) -> Comment {
        let now = Utc::now();
        let media = self.attachment.as_ref().map(|file| {
            vec![Media {
                id: format!("{}-media", self.temp_id),
                url: data_url(file),
                kind: file.media_kind().to_string(),
                created_at: now,
            }]
        });
        Comment {
            id: self.temp_id.clone(),
            user_id: self.author_id.clone(),
            content: self.content.clone(),
            media,
            created_at: now,
            like_status: Some(InteractionStatus::new(false, Some(0))),
            replies: None,
        }
    }
}

fn data_url(file: &Attachment) -> String {
    format!("data:{};base64,{}", file.mime_type, STANDARD.encode(&file.bytes))
}

fn insert(list: &mut Vec<Comment>, comment: Comment, position: InsertAt) {
    match position {
        InsertAt::Head => list.insert(0, comment),
        InsertAt::Tail => list.push(comment),
    }
}

pub struct CommentResource {
    backend: Arc<dyn Backend>,
    retry: RetryClient,
    timeout: Duration,
}

impl CommentResource {
    pub fn new(backend: Arc<dyn Backend>, retry: RetryClient, timeout: Duration) -> Self {
        Self {
            backend,
            retry,
            timeout,
        }
    }

    /// Single-shot read of a link's comments.
    pub async fn fetch(&self, link_id: &str) -> Result<Vec<Comment>> {
        self.retry
            .call_once(self.timeout, self.backend.list_comments(link_id))
            .await
    }
}

#[async_trait]
impl OptimisticResource for CommentResource {
    type Projection = Vec<Comment>;
    type Intent = NewComment;
    type Confirmed = Comment;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Comment
    }

    fn store_key(&self, target: &str) -> String {
        keys::comments(target)
    }

    fn fingerprint(&self, intent: &NewComment) -> String {
        let mut hasher = Sha256::new();
        hasher.update(intent.content.as_bytes());
        if let Some(file) = &intent.attachment {
            hasher.update([0u8]);
            hasher.update(file.file_name.as_bytes());
            hasher.update(&file.bytes);
        }
        hex::encode(hasher.finalize())
    }

    fn apply(&self, current: &Vec<Comment>, intent: &NewComment) -> Vec<Comment> {
        let mut list = current.clone();
        insert(&mut list, intent.placeholder(), intent.position);
        list
    }

    async fn dispatch(&self, target: &str, intent: &NewComment) -> Result<Comment> {
        self.retry
            .call_once(
                self.timeout,
                self.backend
                    .create_comment(target, &intent.content, intent.attachment.as_ref()),
            )
            .await
    }

    fn merge(&self, current: &Vec<Comment>, intent: &NewComment, confirmed: Comment) -> Vec<Comment> {
        let mut list = current.clone();
        if list.iter().any(|c| c.id == confirmed.id) {
            list.retain(|c| c.id != intent.temp_id);
            return list;
        }
        match list.iter_mut().find(|c| c.id == intent.temp_id) {
            Some(slot) => *slot = confirmed,
            None => insert(&mut list, confirmed, intent.position),
        }
        list
    }

    async fn refresh(&self, target: &str) -> Result<Option<Vec<Comment>>> {
        self.fetch(target).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecallError;
    use crate::optimistic::CommandEngine;
    use crate::retry::RetryPolicy;
    use crate::store::{InMemorySessionStore, SessionStore, SessionStoreExt};
    use crate::test_support::{comment, MockBackend};
    use std::sync::atomic::Ordering;

    fn quick_retry() -> RetryClient {
        RetryClient::new(RetryPolicy::new(1, Duration::from_millis(1)).with_timeout(Duration::from_secs(5)))
    }

    fn like_engine(
        backend: Arc<MockBackend>,
    ) -> (Arc<CommandEngine<ToggleResource>>, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let resource = ToggleResource::new(ToggleKind::Like, backend, quick_retry(), Duration::from_secs(5));
        (Arc::new(CommandEngine::new(resource, store.clone())), store)
    }

    fn comment_engine(
        backend: Arc<MockBackend>,
    ) -> (Arc<CommandEngine<CommentResource>>, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let resource = CommentResource::new(backend, quick_retry(), Duration::from_secs(5));
        (Arc::new(CommandEngine::new(resource, store.clone())), store)
    }

    async fn wait_for(counter: &std::sync::atomic::AtomicUsize, n: usize) {
        while counter.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_apply_adjusts_count_and_saturates() {
        let resource = ToggleResource::new(
            ToggleKind::Like,
            Arc::new(MockBackend::open()),
            quick_retry(),
            Duration::from_secs(1),
        );
        let liked = resource.apply(&InteractionStatus::new(false, Some(4)), &ToggleIntent::set(true));
        assert_eq!(liked, InteractionStatus::new(true, Some(5)));

        let floor = resource.apply(&InteractionStatus::new(true, Some(0)), &ToggleIntent::set(false));
        assert_eq!(floor, InteractionStatus::new(false, Some(0)));

        let unknown = resource.apply(&InteractionStatus::new(false, None), &ToggleIntent::set(true));
        assert_eq!(unknown, InteractionStatus::new(true, None));
    }

    #[test]
    fn test_merge_keeps_fields_the_server_omits() {
        let resource = ToggleResource::new(
            ToggleKind::Bookmark,
            Arc::new(MockBackend::open()),
            quick_retry(),
            Duration::from_secs(1),
        );
        let current = InteractionStatus::new(true, Some(8));
        let merged = resource.merge(
            &current,
            &ToggleIntent::set(true),
            Some(ToggleData {
                engaged: true,
                count: None,
            }),
        );
        assert_eq!(merged, current);
    }

    #[tokio::test]
    async fn test_like_visible_before_server_responds() {
        let backend = Arc::new(MockBackend::gated());
        backend.seed_status(ToggleKind::Like, "L1", InteractionStatus::new(false, Some(2)));
        let (engine, store) = like_engine(backend.clone());
        let key = keys::interaction(ResourceKind::Like, "L1");
        store
            .set_json(&key, &InteractionStatus::new(false, Some(2)))
            .await
            .unwrap();

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("L1", ToggleIntent::set(true)).await })
        };
        wait_for(&backend.toggle_calls, 1).await;

        let visible: InteractionStatus = store.get_json(&key).await.unwrap().unwrap();
        assert_eq!(visible, InteractionStatus::new(true, Some(3)));

        backend.gate.add_permits(1);
        let settled = running.await.unwrap().unwrap();
        assert_eq!(settled, InteractionStatus::new(true, Some(3)));
    }

    #[tokio::test]
    async fn test_failed_like_restores_exact_status() {
        let backend = Arc::new(MockBackend::open());
        backend.fail_toggles.store(true, Ordering::SeqCst);
        let (engine, store) = like_engine(backend.clone());
        let key = keys::interaction(ResourceKind::Like, "L1");
        let before = InteractionStatus::new(false, Some(7));
        store.set_json(&key, &before).await.unwrap();
        // Refresh must agree with the snapshot for the assertion below.
        backend.seed_status(ToggleKind::Like, "L1", before);

        let err = engine.execute("L1", ToggleIntent::set(true)).await.unwrap_err();

        assert_eq!(err, RecallError::application("rate limited"));
        let after: InteractionStatus = store.get_json(&key).await.unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_opposite_flips_both_reach_the_server() {
        let backend = Arc::new(MockBackend::gated());
        let (engine, store) = like_engine(backend.clone());
        let key = keys::interaction(ResourceKind::Like, "L1");

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .execute("L1", ToggleIntent::flip(&InteractionStatus::default()))
                    .await
            })
        };
        wait_for(&backend.toggle_calls, 1).await;

        let visible: InteractionStatus = store.get_json(&key).await.unwrap().unwrap();
        assert!(visible.engaged);
        let second = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("L1", ToggleIntent::flip(&visible)).await })
        };
        wait_for(&backend.toggle_calls, 2).await;

        backend.gate.add_permits(1);
        first.await.unwrap().unwrap();
        backend.gate.add_permits(1);
        let settled = second.await.unwrap().unwrap();

        assert_eq!(backend.toggle_calls.load(Ordering::SeqCst), 2);
        assert!(!settled.engaged);
        let stored: InteractionStatus = store.get_json(&key).await.unwrap().unwrap();
        assert!(!stored.engaged);
        assert!(!backend.server_status(ToggleKind::Like, "L1").engaged);
    }

    #[tokio::test]
    async fn test_same_target_value_makes_one_network_call() {
        let backend = Arc::new(MockBackend::gated());
        let (engine, _store) = like_engine(backend.clone());

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("L1", ToggleIntent::set(true)).await })
        };
        wait_for(&backend.toggle_calls, 1).await;

        let err = engine
            .execute("L1", ToggleIntent::set(true))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());

        backend.gate.add_permits(1);
        first.await.unwrap().unwrap();
        assert_eq!(backend.toggle_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_opposite_explicit_intent_proceeds() {
        let backend = Arc::new(MockBackend::gated());
        let (engine, store) = like_engine(backend.clone());

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("L1", ToggleIntent::set(true)).await })
        };
        wait_for(&backend.toggle_calls, 1).await;
        let second = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("L1", ToggleIntent::set(false)).await })
        };
        wait_for(&backend.toggle_calls, 2).await;

        backend.gate.add_permits(2);
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(backend.toggle_calls.load(Ordering::SeqCst), 2);
        let key = keys::interaction(ResourceKind::Like, "L1");
        let last: InteractionStatus = store.get_json(&key).await.unwrap().unwrap();
        assert!(!last.engaged);
        assert!(!backend.server_status(ToggleKind::Like, "L1").engaged);
    }

    #[tokio::test]
    async fn test_comment_placeholder_replaced_in_place() {
        let backend = Arc::new(MockBackend::gated());
        backend
            .comments
            .lock()
            .unwrap()
            .insert("L1".to_string(), vec![comment("c-0", "older")]);
        let (engine, store) = comment_engine(backend.clone());
        let key = keys::comments("L1");
        store.set_json(&key, &vec![comment("c-0", "older")]).await.unwrap();

        let intent = NewComment::new("u-1", "hello").with_attachment(Attachment {
            file_name: "a.png".to_string(),
            mime_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        });
        let temp_id = intent.temp_id.clone();
        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("L1", intent).await })
        };
        wait_for(&backend.comment_calls, 1).await;

        let pending: Vec<Comment> = store.get_json(&key).await.unwrap().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, temp_id);
        assert!(temp_id.starts_with("temp-"));
        let media = pending[0].media.as_ref().unwrap();
        assert_eq!(media[0].url, "data:image/png;base64,AQID");
        assert_eq!(media[0].kind, "image");

        backend.gate.add_permits(1);
        let settled = running.await.unwrap().unwrap();
        assert_eq!(settled.len(), 2);
        assert_eq!(settled[0].id, "c-1");
        assert_eq!(settled[0].content, "hello");
        assert_eq!(settled[1].id, "c-0");
        assert!(settled.iter().all(|c| !c.id.starts_with("temp-")));
    }

    #[tokio::test]
    async fn test_failed_comment_removes_placeholder() {
        let backend = Arc::new(MockBackend::open());
        backend.fail_comments.store(true, Ordering::SeqCst);
        let (engine, store) = comment_engine(backend.clone());

        let err = engine
            .execute("L1", NewComment::new("u-1", "hello").at(InsertAt::Tail))
            .await
            .unwrap_err();

        assert_eq!(err, RecallError::http(400, "comment rejected"));
        // The settle-time refresh stores the (empty) server list.
        let stored: Vec<Comment> = store.get_json(&keys::comments("L1")).await.unwrap().unwrap();
        assert!(stored.is_empty());
        assert_eq!(backend.comment_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_identical_comment_is_deduplicated() {
        let backend = Arc::new(MockBackend::gated());
        let (engine, _store) = comment_engine(backend.clone());

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("L1", NewComment::new("u-1", "same")).await })
        };
        wait_for(&backend.comment_calls, 1).await;

        let err = engine
            .execute("L1", NewComment::new("u-1", "same"))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());

        backend.gate.add_permits(1);
        first.await.unwrap().unwrap();
        assert_eq!(backend.comment_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rollback_to_absent_key() {
        let backend = Arc::new(MockBackend::open());
        backend.fail_toggles.store(true, Ordering::SeqCst);
        let store = Arc::new(InMemorySessionStore::new());
        // Refresh fails too, so nothing rewrites the key after rollback.
        struct NoRefresh(ToggleResource);
        #[async_trait]
        impl OptimisticResource for NoRefresh {
            type Projection = InteractionStatus;
            type Intent = ToggleIntent;
            type Confirmed = Option<ToggleData>;
            fn kind(&self) -> ResourceKind {
                self.0.kind()
            }
            fn fingerprint(&self, intent: &ToggleIntent) -> String {
                self.0.fingerprint(intent)
            }
            fn apply(&self, current: &InteractionStatus, intent: &ToggleIntent) -> InteractionStatus {
                self.0.apply(current, intent)
            }
            async fn dispatch(&self, target: &str, intent: &ToggleIntent) -> Result<Option<ToggleData>> {
                self.0.dispatch(target, intent).await
            }
            fn merge(&self, c: &InteractionStatus, i: &ToggleIntent, d: Option<ToggleData>) -> InteractionStatus {
                self.0.merge(c, i, d)
            }
            async fn refresh(&self, _target: &str) -> Result<Option<InteractionStatus>> {
                Err(RecallError::network("offline"))
            }
        }
        let resource = NoRefresh(ToggleResource::new(
            ToggleKind::Like,
            backend,
            quick_retry(),
            Duration::from_secs(1),
        ));
        let engine = CommandEngine::new(resource, store.clone());

        assert!(engine.execute("L9", ToggleIntent::set(true)).await.is_err());
        let key = keys::interaction(ResourceKind::Like, "L9");
        assert!(store.get(&[key.as_str()]).await.unwrap().is_empty());
    }
}
