//! Execution history, stats, activity feed and Listmonk lookups.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{ApiError, AppState, CurrentUser, PageQuery};
use crate::logs::execution::SonStats;
use crate::store::RecentActivity;

/// Entries returned by the activity feed.
const RECENT_ACTIVITY_LIMIT: i64 = 10;

const DEFAULT_TIMEFRAME: &str = "24h";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/son-execution-logs", get(execution_logs))
        .route(
            "/api/son-executions/{execution_id}/action-logs",
            get(action_logs),
        )
        .route("/api/son-stats", get(son_stats))
        .route("/api/recent-activity", get(recent_activity))
        .route("/api/lists", get(lists))
        .route("/api/templates", get(templates))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "ghost-listmonk-connector"
    }))
}

/// GET /api/son-execution-logs?limit&offset
async fn execution_logs(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let (limit, offset) = page.resolve();
    let (logs, total) = state
        .executions
        .get_execution_logs(&user_id, limit, offset)
        .await?;
    Ok(Json(json!({
        "logs": logs,
        "pagination": {"total": total, "limit": limit, "offset": offset}
    })))
}

/// GET /api/son-executions/{execution_id}/action-logs
async fn action_logs(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(execution_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = Uuid::parse_str(&execution_id)
        .map_err(|_| ApiError::BadRequest("Invalid execution ID".into()))?;
    let record = state
        .executions
        .get_execution(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Execution not found".into()))?;
    if record.user_id != user_id {
        return Err(ApiError::Forbidden("Access denied".into()));
    }
    let logs = state.executions.get_action_logs(id).await?;
    Ok(Json(json!({ "logs": logs })))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    timeframe: Option<String>,
}

/// GET /api/son-stats?timeframe=24h
async fn son_stats(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<SonStats>>, ApiError> {
    let timeframe = query
        .timeframe
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TIMEFRAME.to_string());
    Ok(Json(state.executions.get_stats(&user_id, &timeframe).await?))
}

/// GET /api/recent-activity
async fn recent_activity(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<RecentActivity>>, ApiError> {
    Ok(Json(
        state
            .activity
            .recent(&user_id, RECENT_ACTIVITY_LIMIT)
            .await?,
    ))
}

/// GET /api/lists
async fn lists(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let lists = state.listmonk.get_lists().await?;
    Ok(Json(json!({ "data": lists })))
}

/// GET /api/templates
async fn templates(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let templates = state.listmonk.get_templates().await?;
    Ok(Json(json!({ "data": templates })))
}
