//! Remote backend contract.
//!
//! The engines never talk to the network directly; they call a
//! [`Backend`]. The `recall` crate provides an HTTP implementation; tests
//! provide in-memory ones.
//!
//! | Method | Request | Response |
//! |--------|---------|----------|
//! | [`fetch_links`](Backend::fetch_links) | `{ currentPage }` | `{ recall_links }`, empty = exhausted |
//! | [`report_visit`](Backend::report_visit) | `{ linkId }` | acknowledgement |
//! | [`set_engagement`](Backend::set_engagement) | `{ linkId, engaged }` | [`ToggleResponse`] |
//! | [`engagement_status`](Backend::engagement_status) | `{ linkId }` | [`ToggleResponse`] |
//! | [`create_comment`](Backend::create_comment) | multipart `{ linkId, content, file? }` | `{ comment }` |
//! | [`list_comments`](Backend::list_comments) | `{ linkId }` | `{ comments }` |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RecallError, Result};
use crate::models::{Attachment, Comment, InteractionStatus, Item, ToggleKind};

/// Wire shape of a pagination response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinksPage {
    #[serde(default)]
    pub recall_links: Vec<Item>,
}

/// Wire shape of a toggle or status response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ToggleData>,
}

/// Server-confirmed toggle fields. `count` may be omitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleData {
    pub engaged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

impl ToggleResponse {
    pub fn ok(engaged: bool, count: Option<i64>) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(ToggleData { engaged, count }),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
        }
    }

    /// Turn `{ success: false }` into [`RecallError::Application`].
    ///
    /// A successful response without `data` confirms nothing and yields
    /// `Ok(None)`; the caller keeps its optimistic fields.
    pub fn into_result(self) -> Result<Option<ToggleData>> {
        if self.success {
            Ok(self.data)
        } else {
            let message = self.error.unwrap_or_else(|| "request failed".to_string());
            if message.to_lowercase().contains("unauthenticated") {
                Err(RecallError::unauthenticated(message))
            } else {
                Err(RecallError::application(message))
            }
        }
    }
}

impl From<ToggleData> for InteractionStatus {
    fn from(data: ToggleData) -> Self {
        InteractionStatus::new(data.engaged, data.count)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentCreated {
    pub comment: Comment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentList {
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// Remote operations the core depends on.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch one page of candidate items (1-based).
    async fn fetch_links(&self, page: u32) -> Result<Vec<Item>>;

    /// Record that the current user was shown `link_id`.
    async fn report_visit(&self, link_id: &str) -> Result<()>;

    /// Set the engagement of `target_id` (a link or a comment).
    async fn set_engagement(
        &self,
        kind: ToggleKind,
        target_id: &str,
        engaged: bool,
    ) -> Result<ToggleResponse>;

    /// Read the authoritative engagement of `target_id`.
    async fn engagement_status(&self, kind: ToggleKind, target_id: &str) -> Result<ToggleResponse>;

    async fn create_comment(
        &self,
        link_id: &str,
        content: &str,
        file: Option<&Attachment>,
    ) -> Result<Comment>;

    async fn list_comments(&self, link_id: &str) -> Result<Vec<Comment>>;
}
