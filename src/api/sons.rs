//! REST endpoints for Son CRUD.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use uuid::Uuid;

use super::{ApiError, AppState, CurrentUser};
use crate::sons::{NewSon, Son};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/sons", get(list_sons).post(create_son))
        .route(
            "/api/sons/{id}",
            get(get_son).put(update_son).delete(delete_son),
        )
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("Invalid Son ID".into()))
}

fn body(payload: Result<Json<NewSon>, JsonRejection>) -> Result<NewSon, ApiError> {
    payload
        .map(|Json(son)| son)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// POST /api/sons
async fn create_son(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    payload: Result<Json<NewSon>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let son = state.sons.create(&user_id, body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(son)))
}

/// GET /api/sons
async fn list_sons(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<Son>>, ApiError> {
    Ok(Json(state.sons.list(&user_id).await?))
}

/// GET /api/sons/{id}
async fn get_son(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Son>, ApiError> {
    Ok(Json(state.sons.get(&user_id, parse_id(&id)?).await?))
}

/// PUT /api/sons/{id}
async fn update_son(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    payload: Result<Json<NewSon>, JsonRejection>,
) -> Result<Json<Son>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.sons.update(&user_id, id, body(payload)?).await?))
}

/// DELETE /api/sons/{id}
async fn delete_son(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.sons.delete(&user_id, parse_id(&id)?).await?;
    Ok(Json(json!({"message": "Son deleted successfully"})))
}
