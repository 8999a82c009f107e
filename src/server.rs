//! HTTP server for the chat and analysis API.
//!
//! Routes are declared once at startup in a single router table:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/v1/chat` | Create a session |
//! | `GET`  | `/v1/chat` | List the caller's sessions |
//! | `GET`  | `/v1/chat/{session_id}` | Get one session |
//! | `DELETE` | `/v1/chat/{session_id}` | Soft-delete a session |
//! | `POST` | `/v1/chat/{session_id}/messages` | Send a message |
//! | `GET`  | `/v1/chat/{session_id}/messages` | List messages |
//! | `POST` | `/v1/analysis` | Analyze text for violations |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Response Envelope
//!
//! Every response shares one envelope:
//!
//! ```json
//! { "success": true, "data": {}, "timestamp": "...", "requestId": "req_..." }
//! ```
//!
//! Failures carry `error: { code, message }` with a stable code from
//! [`crate::error::AppError`]. Paginated lists add a
//! `pagination: { total, page, limit, hasNext, hasPrev, nextToken? }` block;
//! `nextToken` feeds back in as `?token=`.
//!
//! # Caller Identity
//!
//! The upstream authorizer populates the `x-user-id` header. Its absence is
//! a 401 on every user-scoped operation.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::analysis::{AnalysisContext, AnalysisService};
use crate::chat::ChatService;
use crate::config::Config;
use crate::db;
use crate::error::AppError;
use crate::llm;
use crate::migrate;
use crate::models::new_id;
use crate::search_index::SearchIndex;
use crate::store::{decode_continuation, Page, Store};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    chat: Arc<ChatService>,
    analysis: Arc<AnalysisService>,
    config: Arc<Config>,
}

/// Starts the HTTP server.
///
/// Connects the store, applies the (idempotent) schema, constructs the
/// language model from configuration, and serves until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let model = llm::create_model(&config.llm)?;
    let store = Store::new(pool.clone());
    let search = SearchIndex::new(pool);

    let state = AppState {
        chat: Arc::new(ChatService::new(
            store.clone(),
            search,
            model.clone(),
            config.retrieval.clone(),
        )),
        analysis: Arc::new(AnalysisService::new(store, model)),
        config: Arc::new(config.clone()),
    };

    let app = build_router(state);

    info!(bind = %bind_addr, "caseline server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat", post(handle_create_session).get(handle_list_sessions))
        .route(
            "/v1/chat/{session_id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route(
            "/v1/chat/{session_id}/messages",
            post(handle_send_message).get(handle_list_messages),
        )
        .route("/v1/analysis", post(handle_analyze))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Response envelope ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail>,
    timestamp: DateTime<Utc>,
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    total: i64,
    page: u32,
    limit: u32,
    has_next: bool,
    has_prev: bool,
    /// Opaque token for the next page, echoed back via `?token=`.
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

impl Pagination {
    fn from_page(page: Page, total: i64, next_token: Option<String>) -> Self {
        let page_no = page.page.max(1);
        Self {
            total,
            page: page_no,
            limit: page.limit,
            has_next: (page_no as i64) * (page.limit as i64) < total,
            has_prev: page_no > 1,
            next_token,
        }
    }
}

fn ok<T: Serialize>(request_id: &str, data: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            pagination: None,
        }),
    )
        .into_response()
}

fn ok_paginated<T: Serialize>(request_id: &str, data: T, pagination: Pagination) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            pagination: Some(pagination),
        }),
    )
        .into_response()
}

fn fail(request_id: &str, err: AppError) -> Response {
    match &err {
        AppError::Upstream { .. } | AppError::ModelOutputMalformed(_) => {
            error!(request_id, error = %err, "request failed");
        }
        _ => {
            info!(request_id, error = %err, "request rejected");
        }
    }

    (
        err.status(),
        Json(Envelope::<()> {
            success: false,
            data: None,
            error: Some(ErrorDetail {
                code: err.code().to_string(),
                message: err.to_string(),
                details: None,
            }),
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            pagination: None,
        }),
    )
        .into_response()
}

// ============ Request shapes ============

#[derive(Deserialize)]
struct CreateSessionBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SendMessageBody {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeBody {
    text: String,
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    context: Option<AnalysisContext>,
}

#[derive(Deserialize, Default)]
struct PageParams {
    page: Option<u32>,
    limit: Option<u32>,
    /// Opaque continuation token from a previous page.
    token: Option<String>,
}

impl PageParams {
    fn resolve(&self) -> Result<Page, AppError> {
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        if let Some(token) = &self.token {
            let offset = decode_continuation(token)?;
            return Ok(Page {
                page: (offset / limit as i64) as u32 + 1,
                limit,
            });
        }
        Ok(Page {
            page: self.page.unwrap_or(1).max(1),
            limit,
        })
    }
}

/// Decode an extracted JSON body, folding axum's rejection into the
/// envelope as a validation error.
fn decode_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(AppError::Validation(rejection.body_text())),
    }
}

/// Resolve the authorizer-populated caller identity.
fn caller_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or(AppError::Unauthorized)
}

fn request_id() -> String {
    new_id("req")
}

// ============ Handlers ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateSessionBody>, JsonRejection>,
) -> Response {
    let request_id = request_id();
    let user_id = match caller_id(&headers) {
        Ok(id) => id,
        Err(e) => return fail(&request_id, e),
    };
    let body = match decode_body(body) {
        Ok(b) => b,
        Err(e) => return fail(&request_id, e),
    };

    let title = body.title.unwrap_or_else(|| "New Conversation".to_string());
    if title.chars().count() > 200 {
        return fail(
            &request_id,
            AppError::Validation("title must be at most 200 characters".into()),
        );
    }
    let metadata = body
        .metadata
        .unwrap_or(serde_json::Value::Object(Default::default()));

    match state.chat.create_session(&user_id, &title, metadata).await {
        Ok(session) => {
            info!(request_id, session_id = %session.id, "session created");
            ok(&request_id, session)
        }
        Err(e) => fail(&request_id, e),
    }
}

async fn handle_list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Response {
    let request_id = request_id();
    let user_id = match caller_id(&headers) {
        Ok(id) => id,
        Err(e) => return fail(&request_id, e),
    };
    let page = match params.resolve() {
        Ok(p) => p,
        Err(e) => return fail(&request_id, e),
    };

    match state.chat.list_sessions(&user_id, page).await {
        Ok(result) => {
            let pagination = Pagination::from_page(page, result.total, result.continuation);
            ok_paginated(&request_id, result.items, pagination)
        }
        Err(e) => fail(&request_id, e),
    }
}

async fn handle_get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response {
    let request_id = request_id();
    let user_id = match caller_id(&headers) {
        Ok(id) => id,
        Err(e) => return fail(&request_id, e),
    };

    match state.chat.get_session(&session_id, &user_id).await {
        Ok(session) => ok(&request_id, session),
        Err(e) => fail(&request_id, e),
    }
}

async fn handle_delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response {
    let request_id = request_id();
    let user_id = match caller_id(&headers) {
        Ok(id) => id,
        Err(e) => return fail(&request_id, e),
    };

    match state.chat.delete_session(&session_id, &user_id).await {
        Ok(()) => {
            info!(request_id, session_id, "session deactivated");
            ok(&request_id, serde_json::json!({ "deleted": true }))
        }
        Err(e) => fail(&request_id, e),
    }
}

async fn handle_send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    body: Result<Json<SendMessageBody>, JsonRejection>,
) -> Response {
    let request_id = request_id();
    let user_id = match caller_id(&headers) {
        Ok(id) => id,
        Err(e) => return fail(&request_id, e),
    };
    let body = match decode_body(body) {
        Ok(b) => b,
        Err(e) => return fail(&request_id, e),
    };

    let text = body.message.trim();
    if text.is_empty() {
        return fail(
            &request_id,
            AppError::Validation("message must not be empty".into()),
        );
    }
    if text.chars().count() > 10_000 {
        return fail(
            &request_id,
            AppError::Validation("message must be at most 10000 characters".into()),
        );
    }

    match state.chat.send_message(&session_id, &user_id, text).await {
        Ok(reply) => {
            info!(
                request_id,
                session_id,
                tokens_used = reply.metadata.tokens_used,
                "message exchange completed"
            );
            ok(&request_id, reply)
        }
        Err(e) => fail(&request_id, e),
    }
}

async fn handle_list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Response {
    let request_id = request_id();
    let user_id = match caller_id(&headers) {
        Ok(id) => id,
        Err(e) => return fail(&request_id, e),
    };
    let page = match params.resolve() {
        Ok(p) => p,
        Err(e) => return fail(&request_id, e),
    };

    match state.chat.get_messages(&session_id, &user_id, page).await {
        Ok(result) => {
            let pagination = Pagination::from_page(page, result.total, result.continuation);
            ok_paginated(&request_id, result.items, pagination)
        }
        Err(e) => fail(&request_id, e),
    }
}

async fn handle_analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Response {
    let request_id = request_id();
    // Analysis is user-scoped like everything else behind the authorizer.
    if let Err(e) = caller_id(&headers) {
        return fail(&request_id, e);
    }
    let body = match decode_body(body) {
        Ok(b) => b,
        Err(e) => return fail(&request_id, e),
    };

    let bounds = &state.config.analysis;
    let len = body.text.chars().count();
    if len < bounds.min_text_len || len > bounds.max_text_len {
        return fail(
            &request_id,
            AppError::Validation(format!(
                "text length must be between {} and {} characters",
                bounds.min_text_len, bounds.max_text_len
            )),
        );
    }

    match state
        .analysis
        .analyze_text(&body.text, body.document_id.as_deref(), body.context.as_ref())
        .await
    {
        Ok(result) => {
            info!(
                request_id,
                violations = result.violations.len(),
                risk_score = result.risk_score,
                "analysis completed"
            );
            ok(&request_id, result)
        }
        Err(e) => fail(&request_id, e),
    }
}
