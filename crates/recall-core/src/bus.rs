//! Request/response message bus between UI contexts and the background.
//!
//! UI contexts hold a cloneable [`BusClient`]. The background builds a
//! [`MessageBus`], registers one [`Handler`] per message `type`, and spawns
//! it. Each envelope is handled in its own task; the handler's
//! `Result<Value>` is adapted into exactly one resolve or reject on a
//! [`Responder`]. A responder dropped without answering rejects, so no
//! caller waits forever.
//!
//! Two failure classes reach the caller:
//!
//! - [`RecallError::Transport`] from [`BusClient::send`] when the bus is
//!   stopped or the reply channel is lost.
//! - `Response { success: false, error }` for anything the background
//!   rejected, including unknown message types.
//!   [`BusClient::request`] turns it into [`RecallError::Application`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RecallError, Result};
use crate::models::Attachment;

/// Every message a UI context may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    GetCurrentTabId,
    OpenSidePanel,
    MarkLinkAsVisited { link_id: String },
    ToggleLike { link_id: String },
    GetLikeStatus { link_id: String },
    ToggleBookmark { link_id: String },
    GetBookmarkStatus { link_id: String },
    LikeComment { comment_id: String },
    GetCommentLikeStatus { comment_id: String },
    NextLink,
    GetActiveLink,
    CreateComment {
        link_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<Attachment>,
    },
    GetComments { link_id: String },
}

impl Message {
    /// Every message `type` tag, in declaration order.
    pub const TYPES: &'static [&'static str] = &[
        "GET_CURRENT_TAB_ID",
        "OPEN_SIDE_PANEL",
        "MARK_LINK_AS_VISITED",
        "TOGGLE_LIKE",
        "GET_LIKE_STATUS",
        "TOGGLE_BOOKMARK",
        "GET_BOOKMARK_STATUS",
        "LIKE_COMMENT",
        "GET_COMMENT_LIKE_STATUS",
        "NEXT_LINK",
        "GET_ACTIVE_LINK",
        "CREATE_COMMENT",
        "GET_COMMENTS",
    ];

    /// The `type` tag this message serializes with.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::GetCurrentTabId => "GET_CURRENT_TAB_ID",
            Self::OpenSidePanel => "OPEN_SIDE_PANEL",
            Self::MarkLinkAsVisited { .. } => "MARK_LINK_AS_VISITED",
            Self::ToggleLike { .. } => "TOGGLE_LIKE",
            Self::GetLikeStatus { .. } => "GET_LIKE_STATUS",
            Self::ToggleBookmark { .. } => "TOGGLE_BOOKMARK",
            Self::GetBookmarkStatus { .. } => "GET_BOOKMARK_STATUS",
            Self::LikeComment { .. } => "LIKE_COMMENT",
            Self::GetCommentLikeStatus { .. } => "GET_COMMENT_LIKE_STATUS",
            Self::NextLink => "NEXT_LINK",
            Self::GetActiveLink => "GET_ACTIVE_LINK",
            Self::CreateComment { .. } => "CREATE_COMMENT",
            Self::GetComments { .. } => "GET_COMMENTS",
        }
    }
}

/// Which kind of execution context sent a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Background,
    Overlay,
    SidePanel,
    Popup,
    #[default]
    External,
}

/// Metadata attached to every message by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    #[serde(default)]
    pub context: ContextKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i64>,
}

impl Sender {
    pub fn new(context: ContextKind) -> Self {
        Self {
            context,
            tab_id: None,
            window_id: None,
        }
    }

    pub fn tab(mut self, tab_id: i64, window_id: i64) -> Self {
        self.tab_id = Some(tab_id);
        self.window_id = Some(window_id);
        self
    }
}

/// A message as it travels over the bus.
///
/// The payload stays untyped until a handler parses it, so a message whose
/// `type` no handler knows can still be answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub sender: Sender,
    pub message: Value,
}

impl Envelope {
    pub fn new(sender: Sender, message: &Message) -> Result<Self> {
        Ok(Self {
            sender,
            message: serde_json::to_value(message)?,
        })
    }

    pub fn message_type(&self) -> Option<&str> {
        self.message.get("type").and_then(Value::as_str)
    }

    /// Parse the payload into a [`Message`].
    pub fn parse(&self) -> Result<Message> {
        serde_json::from_value(self.message.clone())
            .map_err(|e| RecallError::invalid(format!("malformed message: {}", e)))
    }
}

/// The single answer to an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error code, see [`RecallError::code`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            error: None,
            code: None,
            data: Some(data),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            code: None,
            data: None,
        }
    }

    pub fn from_error(err: &RecallError) -> Self {
        Self {
            code: Some(err.code().to_string()),
            ..Self::failure(err.to_string())
        }
    }

    pub fn into_result(self) -> Result<Value> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(RecallError::application(
                self.error.unwrap_or_else(|| "request rejected".to_string()),
            ))
        }
    }
}

/// Consumed by exactly one of [`resolve`](Self::resolve) or
/// [`reject`](Self::reject). Dropping it unanswered rejects.
pub struct Responder {
    reply: Option<oneshot::Sender<Response>>,
}

impl Responder {
    fn new(reply: oneshot::Sender<Response>) -> Self {
        Self { reply: Some(reply) }
    }

    pub fn resolve(mut self, data: Value) {
        self.answer(Response::ok(data));
    }

    pub fn reject(mut self, err: &RecallError) {
        self.answer(Response::from_error(err));
    }

    fn answer(&mut self, response: Response) {
        if let Some(reply) = self.reply.take() {
            if reply.send(response).is_err() {
                debug!("caller went away before the response was ready");
            }
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.reply.is_some() {
            warn!("handler finished without responding");
            self.answer(Response::failure("handler did not respond"));
        }
    }
}

/// Handles one message type in the background.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> Result<Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn handle(&self, envelope: Envelope) -> Result<Value> {
        (self.0)(envelope).await
    }
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct Routed {
    envelope: Envelope,
    reply: oneshot::Sender<Response>,
}

const DEFAULT_CAPACITY: usize = 64;

/// Handler registry for the background side of the bus.
pub struct MessageBus {
    handlers: HashMap<String, Arc<dyn Handler>>,
    capacity: usize,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Route messages whose `type` is `message_type` to `handler`.
    pub fn register(mut self, message_type: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(message_type.into(), handler);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn handles(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    /// Start the dispatch loop. It runs until every client is dropped or
    /// the handle is stopped.
    pub fn spawn(self) -> (BusClient, BusHandle) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let handlers = Arc::new(self.handlers);
        let task = tokio::spawn(dispatch_loop(handlers, rx));
        (BusClient { tx }, BusHandle { task })
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch_loop(handlers: Arc<HashMap<String, Arc<dyn Handler>>>, mut rx: mpsc::Receiver<Routed>) {
    while let Some(Routed { envelope, reply }) = rx.recv().await {
        let responder = Responder::new(reply);
        let message_type = envelope.message_type().map(str::to_string);
        let handler = message_type.as_deref().and_then(|t| handlers.get(t)).cloned();

        let Some(handler) = handler else {
            let err = RecallError::application(format!(
                "unknown message type: {}",
                message_type.as_deref().unwrap_or("<missing>")
            ));
            debug!(error = %err, "rejecting message");
            responder.reject(&err);
            continue;
        };

        tokio::spawn(async move {
            match handler.handle(envelope).await {
                Ok(data) => responder.resolve(data),
                Err(err) => {
                    debug!(message_type = ?message_type, error = %err, "handler rejected message");
                    responder.reject(&err);
                }
            }
        });
    }
    debug!("message bus stopped");
}

/// Owner handle for the dispatch loop.
pub struct BusHandle {
    task: JoinHandle<()>,
}

impl BusHandle {
    /// Stop accepting messages. In-flight handlers still answer.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Sending side of the bus, held by UI contexts.
#[derive(Clone)]
pub struct BusClient {
    tx: mpsc::Sender<Routed>,
}

impl BusClient {
    /// Deliver an envelope and wait for its single response.
    pub async fn send(&self, envelope: Envelope) -> Result<Response> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(Routed { envelope, reply })
            .await
            .map_err(|_| RecallError::transport("message bus is not running"))?;
        answer
            .await
            .map_err(|_| RecallError::transport("response channel closed"))
    }

    /// Send a typed message; `success: false` becomes
    /// [`RecallError::Application`].
    pub async fn request(&self, sender: Sender, message: &Message) -> Result<Value> {
        self.send(Envelope::new(sender, message)?).await?.into_result()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
