//! The background process: message handlers over the core engines.
//!
//! [`Background`] answers every [`Message`] type. Per-tab and per-window
//! bookkeeping (`trackedTabs`, `sidePanelWindows`) lives in the session
//! store rather than in process memory, so a restarted background sees the
//! same state.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use recall_core::backend::Backend;
use recall_core::bus::{Envelope, Handler, Message, MessageBus, Sender};
use recall_core::interactions::Interactions;
use recall_core::models::ToggleKind;
use recall_core::retry::RetryClient;
use recall_core::rotation::{RotationEngine, RotationOutcome};
use recall_core::store::{keys, SessionStore, SessionStoreExt};
use recall_core::{RecallError, Result};

use crate::config::Config;

/// The host that owns windows and side panels.
#[async_trait]
pub trait Shell: Send + Sync {
    async fn open_side_panel(&self, window_id: i64) -> Result<()>;
}

/// Shell for headless hosts: records the request and does nothing else.
pub struct LoggingShell;

#[async_trait]
impl Shell for LoggingShell {
    async fn open_side_panel(&self, window_id: i64) -> Result<()> {
        info!(window_id, "side panel requested");
        Ok(())
    }
}

pub struct Background {
    store: Arc<dyn SessionStore>,
    rotation: RotationEngine,
    interactions: Interactions,
    shell: Arc<dyn Shell>,
}

impl Background {
    pub fn new(
        config: &Config,
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn Backend>,
        shell: Arc<dyn Shell>,
    ) -> Self {
        let rotation = RotationEngine::new(store.clone(), backend.clone(), config.rotation_config());
        let interactions = Interactions::new(
            store.clone(),
            backend,
            RetryClient::new(config.retry_policy()),
            config.request_timeout(),
        );
        Self {
            store,
            rotation,
            interactions,
            shell,
        }
    }

    pub fn rotation(&self) -> &RotationEngine {
        &self.rotation
    }

    pub fn interactions(&self) -> &Interactions {
        &self.interactions
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// A bus with this background registered for every message type.
    pub fn bus(self: &Arc<Self>) -> MessageBus {
        Message::TYPES.iter().fold(MessageBus::new(), |bus, message_type| {
            let handler: Arc<dyn Handler> = self.clone();
            bus.register(*message_type, handler)
        })
    }

    pub async fn dispatch(&self, sender: &Sender, message: Message) -> Result<Value> {
        match message {
            Message::GetCurrentTabId => {
                let tab_id = sender
                    .tab_id
                    .ok_or_else(|| RecallError::invalid("sender is not a tab"))?;
                self.remember(keys::TRACKED_TABS, tab_id).await?;
                Ok(json!({ "tabId": tab_id }))
            }
            Message::OpenSidePanel => {
                let window_id = sender
                    .window_id
                    .ok_or_else(|| RecallError::invalid("sender has no window"))?;
                self.shell.open_side_panel(window_id).await?;
                self.remember(keys::SIDE_PANEL_WINDOWS, window_id).await?;
                Ok(json!({ "windowId": window_id }))
            }
            Message::MarkLinkAsVisited { link_id } => {
                let added = self.rotation.mark_visited(&link_id).await?;
                Ok(json!({ "added": added }))
            }
            Message::ToggleLike { link_id } => self.toggle(ToggleKind::Like, &link_id).await,
            Message::GetLikeStatus { link_id } => self.status(ToggleKind::Like, &link_id).await,
            Message::ToggleBookmark { link_id } => self.toggle(ToggleKind::Bookmark, &link_id).await,
            Message::GetBookmarkStatus { link_id } => {
                self.status(ToggleKind::Bookmark, &link_id).await
            }
            Message::LikeComment { comment_id } => {
                self.toggle(ToggleKind::CommentLike, &comment_id).await
            }
            Message::GetCommentLikeStatus { comment_id } => {
                self.status(ToggleKind::CommentLike, &comment_id).await
            }
            Message::NextLink => match self.rotation.rotate().await? {
                RotationOutcome::Selected(item) => Ok(json!({ "status": "selected", "link": item })),
                RotationOutcome::Exhausted => Ok(json!({ "status": "exhausted" })),
            },
            Message::GetActiveLink => Ok(serde_json::to_value(self.rotation.active().await?)?),
            Message::CreateComment {
                link_id,
                content,
                file,
            } => {
                let comments = self
                    .interactions
                    .create_comment(&link_id, &content, file)
                    .await?;
                Ok(serde_json::to_value(comments)?)
            }
            Message::GetComments { link_id } => {
                Ok(serde_json::to_value(self.interactions.comments(&link_id).await?)?)
            }
        }
    }

    async fn toggle(&self, kind: ToggleKind, target: &str) -> Result<Value> {
        let status = self.interactions.toggle(kind, target).await?;
        Ok(serde_json::to_value(status)?)
    }

    async fn status(&self, kind: ToggleKind, target: &str) -> Result<Value> {
        let status = self.interactions.status(kind, target).await?;
        Ok(serde_json::to_value(status)?)
    }

    async fn remember(&self, key: &str, id: i64) -> Result<()> {
        let mut ids: Vec<i64> = self.store.get_json(key).await?.unwrap_or_default();
        if !ids.contains(&id) {
            ids.push(id);
            self.store.set_json(key, &ids).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for Background {
    async fn handle(&self, envelope: Envelope) -> Result<Value> {
        let message = envelope.parse()?;
        self.dispatch(&envelope.sender, message).await
    }
}
