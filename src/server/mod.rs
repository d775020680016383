//! HTTP proxy boundary.
//!
//! `POST /api/chat` takes `{message}` and answers with the upstream
//! completion document verbatim, or `{error}` with HTTP 500 once the
//! dispatcher has given up. Usage and health endpoints are read-only.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::RateLimiter;
use crate::dispatch::{CallerIdentity, DispatchRequest, Dispatcher};
use crate::usage::SqliteUsageRecorder;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const USER_ID_HEADER: &str = "x-user-id";
const USER_EMAIL_HEADER: &str = "x-user-email";

const DEFAULT_USAGE_LIMIT: u32 = 100;
const MAX_USAGE_LIMIT: u32 = 1000;

// ── State ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    usage: Arc<SqliteUsageRecorder>,
    rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        usage: Arc<SqliteUsageRecorder>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self { dispatcher, usage, rate_limiter }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/usage", get(usage_recent))
        .route("/api/usage/summary", get(usage_summary))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ── Chat ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
}

async fn chat(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let caller = CallerIdentity {
        user_id: header_str(&headers, USER_ID_HEADER),
        user_email: header_str(&headers, USER_EMAIL_HEADER),
    };

    // Client headers are self-asserted, so the limiter keys on the connection.
    let limiter_key = peer
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown-peer".to_string());

    if let Err(retry_secs) = state.rate_limiter.check(&limiter_key) {
        warn!(caller = %limiter_key, "Rate limited");
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            format!("Rate limited — retry after {} seconds", retry_secs),
        );
    }

    let message = match serde_json::from_slice::<ChatBody>(&body) {
        Ok(b) if !b.message.trim().is_empty() => b.message,
        Ok(_) => return error_response(StatusCode::BAD_REQUEST, "message must not be empty"),
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e)),
    };

    let req = DispatchRequest::new(message).with_caller(caller);
    match state.dispatcher.dispatch(&req).await {
        Ok(done) => {
            let mut resp = (
                [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                done.body,
            )
                .into_response();
            if let Ok(v) = HeaderValue::from_str(&done.request_id) {
                resp.headers_mut().insert(REQUEST_ID_HEADER, v);
            }
            resp
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ── Usage ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UsageQuery {
    limit: Option<u32>,
}

async fn usage_recent(State(state): State<AppState>, Query(q): Query<UsageQuery>) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_USAGE_LIMIT).clamp(1, MAX_USAGE_LIMIT);
    let usage = Arc::clone(&state.usage);
    match tokio::task::spawn_blocking(move || usage.recent(limit)).await {
        Ok(Ok(entries)) => Json(entries).into_response(),
        Ok(Err(e)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn usage_summary(State(state): State<AppState>) -> Response {
    let usage = Arc::clone(&state.usage);
    match tokio::task::spawn_blocking(move || usage.summary_last_24h()).await {
        Ok(Ok(rows)) => Json(json!({ "window_hours": 24, "endpoints": rows })).into_response(),
        Ok(Err(e)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ── Health ──────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "secondary_configured": state.dispatcher.config().secondary.is_some(),
        "alerted_today": state.dispatcher.alerts().alerted_today(),
    }))
}
