//! An in-process stand-in for the Recall REST backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use recall_core::backend::ToggleResponse;
use recall_core::models::{Comment, Item, Media};

#[derive(Default)]
pub struct MockState {
    /// When set, requests without `Authorization: Bearer <token>` get 401.
    pub token: Mutex<Option<String>>,
    pub pages: Mutex<HashMap<u32, Vec<Item>>>,
    pub fetched_pages: Mutex<Vec<u32>>,
    pub visits: Mutex<Vec<String>>,
    pub engagement: Mutex<HashMap<(String, String), (bool, i64)>>,
    pub comments: Mutex<HashMap<String, Vec<Comment>>>,
    pub uploads: Mutex<Vec<(String, Option<String>)>>,
}

pub struct MockServer {
    pub base_url: String,
    pub state: Arc<MockState>,
}

pub fn item(id: &str) -> Item {
    Item {
        id: id.to_string(),
        domain: "example.net".to_string(),
        url: format!("https://example.net/{}", id),
        title: format!("Title {}", id),
        description: String::new(),
        screenshot_url: None,
    }
}

type Rejection = (StatusCode, String);

fn check_auth(state: &MockState, headers: &HeaderMap) -> Result<(), Rejection> {
    let expected = state.token.lock().unwrap().clone();
    let Some(expected) = expected else {
        return Ok(());
    };
    let given = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if given == format!("Bearer {}", expected) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "unauthenticated".to_string()))
    }
}

fn link_id(body: &Value) -> String {
    body["linkId"].as_str().unwrap_or_default().to_string()
}

async fn links(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Rejection> {
    check_auth(&state, &headers)?;
    let page = body["currentPage"].as_u64().unwrap_or(1) as u32;
    state.fetched_pages.lock().unwrap().push(page);
    let items = state.pages.lock().unwrap().get(&page).cloned().unwrap_or_default();
    Ok(Json(json!({ "recall_links": items })))
}

async fn visit(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Rejection> {
    check_auth(&state, &headers)?;
    state.visits.lock().unwrap().push(link_id(&body));
    Ok(Json(json!({ "ok": true })))
}

async fn toggle(
    State(state): State<Arc<MockState>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<ToggleResponse>, Rejection> {
    check_auth(&state, &headers)?;
    let engaged = body["engaged"].as_bool().unwrap_or(false);
    let mut engagement = state.engagement.lock().unwrap();
    let entry = engagement.entry((kind, link_id(&body))).or_insert((false, 0));
    if entry.0 != engaged {
        entry.0 = engaged;
        entry.1 += if engaged { 1 } else { -1 };
    }
    Ok(Json(ToggleResponse::ok(entry.0, Some(entry.1))))
}

async fn status(
    State(state): State<Arc<MockState>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<ToggleResponse>, Rejection> {
    check_auth(&state, &headers)?;
    let (engaged, count) = state
        .engagement
        .lock()
        .unwrap()
        .get(&(kind, link_id(&body)))
        .copied()
        .unwrap_or((false, 0));
    Ok(Json(ToggleResponse::ok(engaged, Some(count))))
}

async fn create_comment(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, Rejection> {
    check_auth(&state, &headers)?;
    let mut link = String::new();
    let mut content = String::new();
    let mut file: Option<(String, String)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "linkId" => link = field.text().await.unwrap_or_default(),
            "content" => content = field.text().await.unwrap_or_default(),
            "file" => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let mime = field.content_type().unwrap_or("application/octet-stream").to_string();
                let _bytes = field.bytes().await.unwrap_or_default();
                file = Some((name, mime));
            }
            _ => {}
        }
    }

    let mut comments = state.comments.lock().unwrap();
    let list = comments.entry(link).or_default();
    let id = format!("srv-{}", list.len() + 1);
    let comment = Comment {
        id: id.clone(),
        user_id: "u-1".to_string(),
        content: content.clone(),
        media: file.as_ref().map(|(name, mime)| {
            vec![Media {
                id: format!("{}-m", id),
                url: format!("https://cdn.example.net/{}", name),
                kind: if mime.starts_with("image/") { "image" } else { "file" }.to_string(),
                created_at: Utc::now(),
            }]
        }),
        created_at: Utc::now(),
        like_status: None,
        replies: None,
    };
    list.insert(0, comment.clone());
    state
        .uploads
        .lock()
        .unwrap()
        .push((content, file.map(|(name, _)| name)));
    Ok(Json(json!({ "comment": comment })))
}

async fn list_comments(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Rejection> {
    check_auth(&state, &headers)?;
    let comments = state
        .comments
        .lock()
        .unwrap()
        .get(&link_id(&body))
        .cloned()
        .unwrap_or_default();
    Ok(Json(json!({ "comments": comments })))
}

pub async fn spawn(state: Arc<MockState>) -> MockServer {
    let app = Router::new()
        .route("/links/page", post(links))
        .route("/links/visit", post(visit))
        .route("/interactions/{kind}/toggle", post(toggle))
        .route("/interactions/{kind}/status", post(status))
        .route("/comments/create", post(create_comment))
        .route("/comments/list", post(list_comments))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockServer {
        base_url: format!("http://{}", addr),
        state,
    }
}
