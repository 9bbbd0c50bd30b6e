//! HTTP control surface.
//!
//! `POST /start` (multipart), `POST /stop`, `GET /status`, plus health and
//! session history. Every route honours the optional bearer token.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use wadispatch_core::{
    config::{Config, CredentialsConfig, DeliveryConfig},
    credentials,
    error::DispatchError,
    policy::DeliveryPolicy,
    target::TargetKind,
};
use wadispatch_memory::SessionStatus;

use crate::dispatcher::{DispatchRequest, Dispatcher};

type ApiError = (StatusCode, Json<Value>);

/// Default page size for `GET /sessions/recent`.
const DEFAULT_RECENT_LIMIT: i64 = 20;
const MAX_RECENT_LIMIT: i64 = 200;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    dispatcher: Arc<Dispatcher>,
    credentials: CredentialsConfig,
    delivery: DeliveryConfig,
    api_key: Option<String>,
    uptime: Instant,
}

impl ApiState {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &Config) -> Self {
        let api_key = if config.api.api_key.is_empty() {
            None
        } else {
            Some(config.api.api_key.clone())
        };
        Self {
            dispatcher,
            credentials: config.credentials.clone(),
            delivery: config.delivery.clone(),
            api_key,
            uptime: Instant::now(),
        }
    }
}

/// Constant-time string comparison for token checks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check bearer token auth. `None` means authorized.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Option<ApiError> {
    let key = api_key.as_ref()?;

    let Some(header) = headers.get("authorization") else {
        return Some(unauthorized("missing Authorization header"));
    };
    let Ok(value) = header.to_str() else {
        return Some(unauthorized("invalid Authorization header"));
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => None,
        _ => Some(unauthorized("invalid token")),
    }
}

fn unauthorized(msg: &str) -> ApiError {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"success": false, "error": msg})),
    )
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"success": false, "error": msg.into()})),
    )
}

/// Map a dispatch error onto a status code and `{success: false, error}` body.
fn error_response(err: DispatchError) -> ApiError {
    let (status, msg) = match err {
        DispatchError::Validation(msg) | DispatchError::Credentials(msg) => {
            (StatusCode::BAD_REQUEST, msg)
        }
        DispatchError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    };
    (status, Json(json!({"success": false, "error": msg})))
}

/// Raw multipart fields of a start request.
#[derive(Debug, Default)]
struct StartForm {
    creds: Option<String>,
    message_text: Option<String>,
    message_file: Option<String>,
    user_phone: Option<String>,
    target_type: Option<String>,
    target_phones: Option<String>,
    message_delay: Option<String>,
    enable_retry: Option<String>,
    max_retries: Option<String>,
}

impl StartForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| bad_request(format!("malformed multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_request(format!("failed to read field '{name}': {e}")))?;
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|_| bad_request(format!("field '{name}' must be UTF-8 text")))?;

            let slot = match name.as_str() {
                "creds" => &mut form.creds,
                "messageText" => &mut form.message_text,
                "messageFile" => &mut form.message_file,
                "userPhone" => &mut form.user_phone,
                "targetType" => &mut form.target_type,
                "targetPhones" => &mut form.target_phones,
                "messageDelay" => &mut form.message_delay,
                "enableRetry" => &mut form.enable_retry,
                "maxRetries" => &mut form.max_retries,
                other => {
                    warn!("ignoring unknown start field '{other}'");
                    continue;
                }
            };
            *slot = Some(text);
        }
        Ok(form)
    }
}

/// A present, non-blank form value.
fn filled(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_policy(form: &StartForm, defaults: &DeliveryConfig) -> Result<DeliveryPolicy, ApiError> {
    let delay_ms = match filled(&form.message_delay) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| bad_request("messageDelay must be a non-negative integer"))?,
        None => defaults.default_delay_ms,
    };
    if delay_ms < defaults.min_recommended_delay_ms {
        warn!(
            "messageDelay {delay_ms}ms is below the recommended {}ms",
            defaults.min_recommended_delay_ms
        );
    }

    let retry_enabled = filled(&form.enable_retry).is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let max_retries = match filled(&form.max_retries) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| bad_request("maxRetries must be an integer"))?,
        None => defaults.default_max_retries,
    };

    DeliveryPolicy::new(delay_ms, retry_enabled, max_retries).map_err(error_response)
}

/// `POST /start`: validate the form and launch a dispatch.
async fn start(
    headers: HeaderMap,
    State(state): State<ApiState>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let form = StartForm::read(multipart).await?;

    if form.creds.is_none() && !credentials::server_side_available(&state.credentials) {
        return Err(bad_request("Missing credentials file"));
    }

    // Direct text wins over an uploaded file.
    let message = match (filled(&form.message_text), &form.message_file) {
        (Some(_), _) => form.message_text.clone().unwrap_or_default(),
        (None, Some(file)) => file.clone(),
        (None, None) => return Err(bad_request("Message content is required")),
    };

    let Some(user_phone) = filled(&form.user_phone).map(str::to_string) else {
        return Err(bad_request("Phone number is required"));
    };

    let target_kind = match filled(&form.target_type) {
        Some(raw) => raw.parse::<TargetKind>().map_err(error_response)?,
        None => TargetKind::default(),
    };
    let policy = parse_policy(&form, &state.delivery)?;

    let credentials =
        credentials::resolve(&state.credentials, form.creds.as_deref()).map_err(error_response)?;

    let handle = state
        .dispatcher
        .start(DispatchRequest {
            credentials,
            user_phone,
            target_kind,
            target_phones: form.target_phones.clone().unwrap_or_default(),
            message,
            policy,
        })
        .await
        .map_err(error_response)?;

    info!("dispatch {} accepted", handle.session_id());
    Ok(Json(json!({
        "success": true,
        "message": "WhatsApp messaging started successfully",
        "sessionId": handle.session_id(),
    })))
}

/// `POST /stop`: stop active sessions and drop the connection.
async fn stop(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let outcome = state.dispatcher.stop().await.map_err(error_response)?;
    Ok(Json(json!({
        "success": true,
        "message": "WhatsApp messaging stopped successfully",
        "stoppedSessions": outcome.stopped_sessions,
    })))
}

/// `GET /status`: live connection state.
async fn status(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let status = state.dispatcher.status().await;
    Ok(Json(json!({"success": true, "status": status})))
}

/// `GET /health`
async fn health(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    Ok(Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime.elapsed().as_secs(),
        "connection": state.dispatcher.status().await,
        "dispatching": state.dispatcher.is_dispatching().await,
    })))
}

/// `GET /sessions`: sessions currently `active`.
async fn active_sessions(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let sessions = state
        .dispatcher
        .active_sessions()
        .await
        .map_err(error_response)?;
    Ok(Json(json!({"success": true, "sessions": sessions})))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<i64>,
}

/// `GET /sessions/recent?limit=N`: newest first.
async fn recent_sessions(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_RECENT_LIMIT);
    let sessions = state
        .dispatcher
        .store()
        .recent_sessions(limit)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({"success": true, "sessions": sessions})))
}

/// `GET /sessions/{id}`
async fn session_by_id(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    match state
        .dispatcher
        .store()
        .get_session(&id)
        .await
        .map_err(error_response)?
    {
        Some(session) => Ok(Json(json!({"success": true, "session": session}))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": format!("session {id} not found")})),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    status: String,
}

/// `PUT /sessions/{id}/status`: set a session's status by hand.
async fn update_session_status(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<StatusUpdate>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let status: SessionStatus = body
        .status
        .parse()
        .map_err(|_| bad_request(format!("unknown session status '{}'", body.status)))?;
    match state
        .dispatcher
        .update_status(&id, status)
        .await
        .map_err(error_response)?
    {
        Some(session) => Ok(Json(json!({"success": true, "session": session}))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": format!("session {id} not found")})),
        )),
    }
}

/// Build the axum router with shared state.
pub fn build_router(state: ApiState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/sessions", get(active_sessions))
        .route("/sessions/recent", get(recent_sessions))
        .route("/sessions/{id}", get(session_by_id))
        .route("/sessions/{id}/status", put(update_session_status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: &Config, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let state = ApiState::new(dispatcher.clone(), config);
    let app = build_router(state, config.api.max_upload_bytes);
    let addr = format!("{}:{}", config.api.host, config.api.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    info!("API server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    if let Err(e) = dispatcher.stop().await {
        warn!("stop on shutdown failed: {e}");
    }
    Ok(())
}
