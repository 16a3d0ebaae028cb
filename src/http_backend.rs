//! `reqwest` implementation of [`Backend`].
//!
//! Every request carries `Authorization: Bearer <token>` when the
//! `authToken` key is set in the session store. Status handling:
//!
//! - 2xx → body parsed as JSON
//! - 401 → [`RecallError::Unauthenticated`] (never retried)
//! - other non-2xx → [`RecallError::Http`] with the response body
//! - connect/reset/timeout → [`RecallError::Network`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use recall_core::backend::{Backend, CommentCreated, CommentList, LinksPage, ToggleResponse};
use recall_core::models::{Attachment, Comment, Item, ToggleKind};
use recall_core::store::{keys, SessionStore, SessionStoreExt};
use recall_core::{RecallError, Result};

use crate::config::{BackendConfig, BackendPaths};

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    paths: BackendPaths,
    store: Arc<dyn SessionStore>,
}

fn network(err: reqwest::Error) -> RecallError {
    if err.is_timeout() {
        RecallError::network(format!("request timed out: {}", err))
    } else {
        RecallError::network(err.to_string())
    }
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, store: Arc<dyn SessionStore>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            paths: config.paths.clone(),
            store,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn kind_url(&self, template: &str, kind: ToggleKind) -> String {
        self.url(&template.replace("{kind}", kind.resource().as_str()))
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token: Option<String> = self.store.get_json(keys::AUTH_TOKEN).await?;
        Ok(match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = self.authorized(request).await?.send().await.map_err(network)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "backend rejected request");
        if status == StatusCode::UNAUTHORIZED {
            return Err(RecallError::unauthenticated(if body.is_empty() {
                "unauthenticated".to_string()
            } else {
                body
            }));
        }
        Err(RecallError::http(status.as_u16(), body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RecallError::Serialization(format!("unexpected backend response: {}", e)))
    }
}

fn file_part(file: &Attachment) -> Result<Part> {
    Part::bytes(file.bytes.clone())
        .file_name(file.file_name.clone())
        .mime_str(&file.mime_type)
        .map_err(|e| RecallError::invalid(format!("bad attachment MIME type: {}", e)))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_links(&self, page: u32) -> Result<Vec<Item>> {
        let request = self
            .client
            .post(self.url(&self.paths.links))
            .json(&json!({ "currentPage": page }));
        let page: LinksPage = self.send_json(request).await?;
        Ok(page.recall_links)
    }

    async fn report_visit(&self, link_id: &str) -> Result<()> {
        let request = self
            .client
            .post(self.url(&self.paths.visit))
            .json(&json!({ "linkId": link_id }));
        self.send(request).await?;
        Ok(())
    }

    async fn set_engagement(
        &self,
        kind: ToggleKind,
        target_id: &str,
        engaged: bool,
    ) -> Result<ToggleResponse> {
        let request = self
            .client
            .post(self.kind_url(&self.paths.toggle, kind))
            .json(&json!({ "linkId": target_id, "engaged": engaged }));
        self.send_json(request).await
    }

    async fn engagement_status(&self, kind: ToggleKind, target_id: &str) -> Result<ToggleResponse> {
        let request = self
            .client
            .post(self.kind_url(&self.paths.status, kind))
            .json(&json!({ "linkId": target_id }));
        self.send_json(request).await
    }

    async fn create_comment(
        &self,
        link_id: &str,
        content: &str,
        file: Option<&Attachment>,
    ) -> Result<Comment> {
        let mut form = Form::new()
            .text("linkId", link_id.to_string())
            .text("content", content.to_string());
        if let Some(file) = file {
            form = form.part("file", file_part(file)?);
        }
        let request = self
            .client
            .post(self.url(&self.paths.create_comment))
            .multipart(form);
        let created: CommentCreated = self.send_json(request).await?;
        Ok(created.comment)
    }

    async fn list_comments(&self, link_id: &str) -> Result<Vec<Comment>> {
        let request = self
            .client
            .post(self.url(&self.paths.list_comments))
            .json(&json!({ "linkId": link_id }));
        let list: CommentList = self.send_json(request).await?;
        Ok(list.comments)
    }
}
