//! Webhook ingress, endpoint info, request log and replay.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use rand::RngCore;
use serde_json::{Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{ApiError, AppState, CurrentUser, PageQuery};
use crate::error::PipelineError;
use crate::logs::webhook::WebhookLogEntry;
use crate::pipeline::signature::{self, SIGNATURE_HEADER, SignatureHeader};
use crate::pipeline::EventPayload;
use crate::store::Webhook;

/// Header added to replayed requests.
pub const REPLAY_HEADER: &str = "x-webhook-replay";

/// Headers not copied onto a replayed request.
const HOP_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhook/{endpoint}", post(receive_webhook))
        .route("/api/webhook-info", get(webhook_info))
        .route("/api/webhook-logs", get(list_webhook_logs))
        .route("/api/webhook-logs/{id}", get(get_webhook_log))
        .route("/api/webhook-logs/{id}/replay", post(replay_webhook))
}

// ── Ingress ─────────────────────────────────────────────────────────

/// POST /webhook/{endpoint}
///
/// Logs the request, verifies the signature, classifies the event and
/// hands matching Sons to the dispatcher. Answers before any action runs.
async fn receive_webhook(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let webhook = match state.db.get_webhook_by_endpoint(&endpoint).await {
        Ok(Some(w)) => w,
        Ok(None) => {
            return ApiError::NotFound("Webhook not found".into()).into_response();
        }
        Err(e) => {
            error!(endpoint = %endpoint, error = %e, "Failed to look up webhook");
            return ApiError::Internal("Internal server error".into()).into_response();
        }
    };

    let log_id = match state
        .webhook_logs
        .start(&webhook.user_id, method.as_str(), uri.path(), &headers, &body)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!(endpoint = %endpoint, error = %e, "Failed to log webhook");
            return ApiError::Internal("Failed to log webhook".into()).into_response();
        }
    };

    let (status, response) = handle_event(&state, &webhook, log_id, &headers, &body).await;

    if let Err(e) = state
        .webhook_logs
        .finish(log_id, status.as_u16(), &response, started.elapsed())
        .await
    {
        warn!(webhook_log_id = %log_id, error = %e, "Failed to update webhook log");
    }

    (status, Json(response)).into_response()
}

/// Verify, decode and process one delivery. Returns the status and JSON body.
async fn handle_event(
    state: &AppState,
    webhook: &Webhook,
    log_id: Uuid,
    headers: &HeaderMap,
    body: &[u8],
) -> (StatusCode, Value) {
    let sig_header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !signature::verify(sig_header, body, &webhook.secret) {
        warn!(endpoint = %webhook.endpoint, webhook_log_id = %log_id, "Invalid webhook signature");
        return (StatusCode::UNAUTHORIZED, json!({"error": "Invalid signature"}));
    }

    if let Some(max_age) = state.webhook_max_age {
        let fresh = SignatureHeader::parse(sig_header)
            .is_some_and(|h| signature::is_timestamp_fresh(h.timestamp, max_age, Utc::now()));
        if !fresh {
            warn!(endpoint = %webhook.endpoint, webhook_log_id = %log_id, "Stale webhook signature");
            return (StatusCode::UNAUTHORIZED, json!({"error": "Signature timestamp expired"}));
        }
    }

    let payload = match EventPayload::from_slice(body) {
        Ok(p) => p,
        Err(e) => {
            warn!(webhook_log_id = %log_id, error = %e, "Undecodable webhook body");
            return (StatusCode::BAD_REQUEST, json!({"error": "Invalid webhook data"}));
        }
    };

    match state
        .processor
        .process(&webhook.user_id, payload, Some(log_id))
        .await
    {
        Ok(outcome) => {
            info!(
                user_id = %webhook.user_id,
                trigger = %outcome.trigger,
                sons_executed = outcome.sons_executed,
                "Webhook processed"
            );
            (
                StatusCode::OK,
                json!({
                    "message": "Webhook processed successfully",
                    "sons_executed": outcome.sons_executed,
                }),
            )
        }
        Err(PipelineError::UnknownTriggerType) => (
            StatusCode::BAD_REQUEST,
            json!({"error": "Unable to determine trigger type"}),
        ),
        Err(PipelineError::InvalidPayload(msg)) => {
            warn!(webhook_log_id = %log_id, error = %msg, "Invalid webhook payload");
            (StatusCode::BAD_REQUEST, json!({"error": "Invalid webhook data"}))
        }
        Err(PipelineError::Storage(e)) => {
            error!(user_id = %webhook.user_id, error = %e, "Failed to list sons");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "Failed to list Sons"}),
            )
        }
    }
}

// ── Endpoint info ───────────────────────────────────────────────────

/// GET /api/webhook-info
///
/// Returns the caller's webhook, creating it on first use.
async fn webhook_info(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let webhook = match state.db.get_webhook_for_user(&user_id).await? {
        Some(w) => w,
        None => {
            let now = Utc::now();
            let webhook = Webhook {
                id: Uuid::new_v4(),
                user_id: user_id.clone(),
                endpoint: Uuid::new_v4().to_string(),
                secret: generate_secret(),
                created_at: now,
                updated_at: now,
            };
            state.db.insert_webhook(&webhook).await?;
            info!(user_id = %user_id, endpoint = %webhook.endpoint, "Created webhook");
            webhook
        }
    };

    let base = state.frontend_url.as_deref().unwrap_or_default();
    let url = format!("{base}/webhook/{}", webhook.endpoint);
    Ok(Json(json!({
        "data": {
            "id": webhook.id,
            "user_id": webhook.user_id,
            "endpoint": url,
            "secret": webhook.secret,
            "created_at": webhook.created_at,
            "updated_at": webhook.updated_at,
        }
    })))
}

/// 32 random bytes, hex encoded.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ── Request log ─────────────────────────────────────────────────────

/// GET /api/webhook-logs?limit&offset
async fn list_webhook_logs(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let (limit, offset) = page.resolve();
    let (logs, total) = state.webhook_logs.list(&user_id, limit, offset).await?;
    let next_offset = if offset + limit >= total { -1 } else { offset + limit };

    Ok(Json(json!({
        "logs": logs,
        "pagination": {
            "total": total,
            "limit": limit,
            "offset": offset,
            "next_offset": next_offset,
        }
    })))
}

/// Load a log entry the caller owns.
async fn owned_log(state: &AppState, user_id: &str, raw_id: &str) -> Result<WebhookLogEntry, ApiError> {
    let id = Uuid::parse_str(raw_id)
        .map_err(|_| ApiError::BadRequest("Invalid webhook log ID".into()))?;
    let entry = state
        .webhook_logs
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Webhook log not found".into()))?;
    if entry.user_id != user_id {
        return Err(ApiError::Forbidden("Access denied".into()));
    }
    Ok(entry)
}

/// GET /api/webhook-logs/{id}
async fn get_webhook_log(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<WebhookLogEntry>, ApiError> {
    Ok(Json(owned_log(&state, &user_id, &id).await?))
}

// ── Replay ──────────────────────────────────────────────────────────

/// POST /api/webhook-logs/{id}/replay
///
/// Re-sends the stored request to this server and relays the response.
async fn replay_webhook(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let entry = owned_log(&state, &user_id, &id).await?;

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Host header".into()))?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("http");
    let url = format!("{scheme}://{host}{}", entry.path);

    let method = Method::from_bytes(entry.method.as_bytes()).unwrap_or(Method::POST);
    let stored: BTreeMap<String, String> = serde_json::from_str(&entry.headers).map_err(|e| {
        error!(webhook_log_id = %entry.id, error = %e, "Stored headers are not a JSON map");
        ApiError::Internal("Failed to process headers".into())
    })?;

    let mut req = state.http.request(method, &url);
    for (name, value) in &stored {
        if !HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            req = req.header(name.as_str(), value.as_str());
        }
    }
    req = req.header(REPLAY_HEADER, "true").body(entry.body.clone());

    info!(webhook_log_id = %entry.id, url = %url, "Replaying webhook");
    let resp = req.send().await.map_err(|e| {
        error!(webhook_log_id = %entry.id, error = %e, "Replay request failed");
        ApiError::Internal("Failed to replay webhook".into())
    })?;

    let status = resp.status();
    let content_type = resp.headers().get(header::CONTENT_TYPE).cloned();
    let bytes = resp.bytes().await.map_err(|e| {
        error!(webhook_log_id = %entry.id, error = %e, "Failed to read replay response");
        ApiError::Internal("Failed to process replay response".into())
    })?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    if let Some(ct) = content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, ct);
    }
    Ok(response)
}
