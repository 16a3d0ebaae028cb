//! Social actions on links and comments.
//!
//! [`Interactions`] owns one [`CommandEngine`] per resource kind and is the
//! only code path that mutates cached interaction projections.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::backend::Backend;
use crate::error::Result;
use crate::models::{Attachment, Comment, InteractionStatus, ToggleKind};
use crate::optimistic::CommandEngine;
use crate::resources::{CommentResource, InsertAt, NewComment, ToggleIntent, ToggleResource};
use crate::retry::RetryClient;
use crate::store::{keys, SessionStore, SessionStoreExt};

pub struct Interactions {
    store: Arc<dyn SessionStore>,
    likes: CommandEngine<ToggleResource>,
    bookmarks: CommandEngine<ToggleResource>,
    comment_likes: CommandEngine<ToggleResource>,
    comments: CommandEngine<CommentResource>,
}

impl Interactions {
    /// `retry` drives toggle dispatch; `read_timeout` bounds status reads
    /// and comment requests.
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn Backend>,
        retry: RetryClient,
        read_timeout: Duration,
    ) -> Self {
        let toggle = |kind| {
            CommandEngine::new(
                ToggleResource::new(kind, backend.clone(), retry.clone(), read_timeout),
                store.clone(),
            )
        };
        Self {
            likes: toggle(ToggleKind::Like),
            bookmarks: toggle(ToggleKind::Bookmark),
            comment_likes: toggle(ToggleKind::CommentLike),
            comments: CommandEngine::new(
                CommentResource::new(backend.clone(), retry.clone(), read_timeout),
                store.clone(),
            ),
            store,
        }
    }

    fn engine(&self, kind: ToggleKind) -> &CommandEngine<ToggleResource> {
        match kind {
            ToggleKind::Like => &self.likes,
            ToggleKind::Bookmark => &self.bookmarks,
            ToggleKind::CommentLike => &self.comment_likes,
        }
    }

    /// Flip the engagement of `target` relative to what is visible now.
    pub async fn toggle(&self, kind: ToggleKind, target: &str) -> Result<InteractionStatus> {
        let current = self.status(kind, target).await?;
        self.engine(kind)
            .execute(target, ToggleIntent::flip(&current))
            .await
    }

    pub async fn set(&self, kind: ToggleKind, target: &str, engaged: bool) -> Result<InteractionStatus> {
        self.engine(kind)
            .execute(target, ToggleIntent::set(engaged))
            .await
    }

    /// Cached status, or a single-shot fetch that populates the cache.
    pub async fn status(&self, kind: ToggleKind, target: &str) -> Result<InteractionStatus> {
        let engine = self.engine(kind);
        if let Some(cached) = engine.current(target).await? {
            return Ok(cached);
        }
        let fetched = engine
            .resource()
            .fetch_status(target)
            .await?
            .unwrap_or_default();
        if engine.is_in_flight(target) {
            // A command started while we were reading; its projection wins.
            return Ok(engine.current(target).await?.unwrap_or(fetched));
        }
        debug!(%kind, target, "caching fetched status");
        self.store
            .set_json(&keys::interaction(kind.resource(), target), &fetched)
            .await?;
        Ok(fetched)
    }

    /// Post a comment as the signed-in user. Returns the settled list.
    pub async fn create_comment(
        &self,
        link_id: &str,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<Vec<Comment>> {
        let author: Option<String> = self.store.get_json(keys::USER_ID).await?;
        let mut intent = NewComment::new(author.unwrap_or_default(), content).at(InsertAt::Head);
        if let Some(file) = attachment {
            intent = intent.with_attachment(file);
        }
        self.comments.execute(link_id, intent).await
    }

    /// Cached comment list, or a single-shot fetch that populates the cache.
    pub async fn comments(&self, link_id: &str) -> Result<Vec<Comment>> {
        if let Some(cached) = self.comments.current(link_id).await? {
            return Ok(cached);
        }
        let fetched = self.comments.resource().fetch(link_id).await?;
        if !self.comments.is_in_flight(link_id) {
            self.store.set_json(&keys::comments(link_id), &fetched).await?;
        }
        Ok(fetched)
    }
}
