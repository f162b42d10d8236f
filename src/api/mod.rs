//! HTTP surface: webhook ingress, replay, Son CRUD and observability.
//!
//! Every `/api/*` route is scoped to the caller named in the `x-user-id`
//! header, which the fronting auth layer sets after authenticating.

pub mod observability;
pub mod sons;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, warn};

use crate::error::{DatabaseError, ListmonkError, SonError, StatsError};
use crate::listmonk::MarketingApi;
use crate::logs::{ActivityLog, ExecutionLogger, WebhookLogger};
use crate::pipeline::WebhookProcessor;
use crate::sons::SonService;
use crate::store::Database;

/// Header carrying the authenticated caller's id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub processor: Arc<WebhookProcessor>,
    pub sons: Arc<SonService>,
    pub webhook_logs: Arc<WebhookLogger>,
    pub executions: Arc<ExecutionLogger>,
    pub activity: Arc<ActivityLog>,
    pub listmonk: Arc<dyn MarketingApi>,
    /// Client used to replay stored webhook requests.
    pub http: reqwest::Client,
    /// Public base URL of the web UI; prefixes webhook URLs.
    pub frontend_url: Option<String>,
    /// Signature freshness window. `None` accepts any timestamp.
    pub webhook_max_age: Option<Duration>,
}

/// Build the full router with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(state.frontend_url.as_deref());
    Router::new()
        .merge(webhook::routes())
        .merge(sons::routes())
        .merge(observability::routes())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    let origin = match frontend_url.map(HeaderValue::from_str) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(e)) => {
            warn!(error = %e, "FRONTEND_URL is not a valid origin, allowing any origin");
            AllowOrigin::any()
        }
        None => AllowOrigin::any(),
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(USER_ID_HEADER),
        ])
}

// ── Caller identity ─────────────────────────────────────────────────

/// The authenticated caller, read from [`USER_ID_HEADER`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CurrentUser(v.to_string()))
            .ok_or_else(|| ApiError::Unauthorized("User not authenticated".into()))
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// Handler error, rendered as `{"error": "..."}` with a matching status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        error!(error = %e, "Database error");
        ApiError::Internal("Internal server error".into())
    }
}

impl From<SonError> for ApiError {
    fn from(e: SonError) -> Self {
        match e {
            SonError::NotFound(_) => ApiError::NotFound("Son not found".into()),
            SonError::Forbidden(_) => ApiError::Forbidden("Unauthorized access to Son".into()),
            SonError::Invalid(msg) => ApiError::BadRequest(msg),
            SonError::Database(e) => e.into(),
        }
    }
}

impl From<StatsError> for ApiError {
    fn from(e: StatsError) -> Self {
        match e {
            StatsError::InvalidTimeframe(e) => ApiError::BadRequest(format!("invalid timeframe: {e}")),
            StatsError::Database(e) => e.into(),
        }
    }
}

impl From<ListmonkError> for ApiError {
    fn from(e: ListmonkError) -> Self {
        error!(error = %e, "Listmonk request failed");
        ApiError::Internal(e.to_string())
    }
}

// ── Pagination ──────────────────────────────────────────────────────

/// `?limit=&offset=` query parameters.
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    pub const DEFAULT_LIMIT: i64 = 10;
    pub const MAX_LIMIT: i64 = 100;

    /// `(limit, offset)` with defaults applied and bounds enforced.
    pub fn resolve(self) -> (i64, i64) {
        let limit = self
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(Self::DEFAULT_LIMIT)
            .min(Self::MAX_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}
