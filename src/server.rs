//! HTTP bridge for out-of-process UI contexts.
//!
//! Overlays, side panels and popups that do not share the background's
//! process reach it over loopback HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/messages` | Deliver an [`Envelope`] to the message bus; answers with its [`Response`] |
//! | `GET`  | `/changes` | Server-sent events, one `change` event per store [`ChangeRecord`] |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Application failures are part of the bus contract and come back as
//! `200` with `{ "success": false, "error": ... }`. Failures of the bridge
//! itself use:
//!
//! ```json
//! { "error": { "code": "transport", "message": "message bus is not running" } }
//! ```
//!
//! Error codes: `bad_request` (400), `transport` (503), `internal` (500).

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response as HttpResponse,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use recall_core::bus::{BusClient, Envelope, Response};
use recall_core::store::{ChangeRecord, SessionStore, Subscription};
use recall_core::RecallError;

use crate::background::{Background, LoggingShell};
use crate::config::Config;
use crate::http_backend::HttpBackend;
use crate::sqlite_store::SqliteSessionStore;

const CHANGE_BUFFER: usize = 256;

#[derive(Clone)]
struct AppState {
    bus: BusClient,
    changes: broadcast::Sender<ChangeRecord>,
}

/// Forward every change in `store` into a broadcast channel.
///
/// The feed stops when the returned [`Subscription`] is dropped.
pub fn change_feed(store: &dyn SessionStore) -> (broadcast::Sender<ChangeRecord>, Subscription) {
    let (tx, _) = broadcast::channel(CHANGE_BUFFER);
    let sink = tx.clone();
    let subscription = store.subscribe(Arc::new(move |change: &ChangeRecord| {
        // No receivers is fine: nobody is streaming right now.
        let _ = sink.send(change.clone());
    }));
    (tx, subscription)
}

pub fn build_router(bus: BusClient, changes: broadcast::Sender<ChangeRecord>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/messages", post(handle_message))
        .route("/changes", get(handle_changes))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { bus, changes })
}

/// Run the background process and its HTTP bridge until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SqliteSessionStore::open(config).await?);
    let backend = Arc::new(HttpBackend::new(&config.backend, store.clone())?);
    let background = Arc::new(Background::new(
        config,
        store.clone(),
        backend,
        Arc::new(LoggingShell),
    ));

    let (bus, bus_handle) = background.bus().spawn();
    let (changes, subscription) = change_feed(store.as_ref());
    let app = build_router(bus, changes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "recall bridge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    drop(subscription);
    bus_handle.stop().await;
    background.rotation().flush_reports().await;
    store.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> HttpResponse {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<RecallError> for AppError {
    fn from(err: RecallError) -> Self {
        let status = if err.is_transport() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /messages ============

async fn handle_message(
    State(state): State<AppState>,
    payload: Result<Json<Envelope>, JsonRejection>,
) -> Result<Json<Response>, AppError> {
    let Json(envelope) = payload.map_err(|e| bad_request(e.body_text()))?;
    let response = state.bus.send(envelope).await?;
    Ok(Json(response))
}

// ============ GET /changes ============

async fn handle_changes(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.changes.subscribe()).filter_map(|change| match change {
        Ok(change) => Event::default().event("change").json_data(&change).ok().map(Ok),
        Err(lagged) => {
            warn!(error = %lagged, "change stream subscriber fell behind");
            Some(Ok(Event::default().event("lagged").data(lagged.to_string())))
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
