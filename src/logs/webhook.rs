//! Inbound webhook request log, used for auditing and replay.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::Database;

/// A stored inbound request and the response it received.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    /// JSON object of header name → first value.
    pub headers: String,
    pub body: String,
    pub status_code: u16,
    pub response_body: Option<String>,
    /// Handling time in milliseconds.
    pub duration: i64,
}

/// List view without headers and bodies.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookLogSummary {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub duration: i64,
}

impl From<WebhookLogEntry> for WebhookLogSummary {
    fn from(e: WebhookLogEntry) -> Self {
        Self {
            id: e.id,
            timestamp: e.timestamp,
            method: e.method,
            path: e.path,
            status_code: e.status_code,
            duration: e.duration,
        }
    }
}

pub struct WebhookLogger {
    db: Arc<dyn Database>,
}

impl WebhookLogger {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Log a request as received. Status starts at 200 until [`finish`](Self::finish).
    pub async fn start(
        &self,
        user_id: &str,
        method: &str,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Uuid, DatabaseError> {
        let entry = WebhookLogEntry {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            method: method.to_string(),
            path: path.to_string(),
            headers: headers_to_json(headers),
            body: String::from_utf8_lossy(body).into_owned(),
            status_code: 200,
            response_body: None,
            duration: 0,
        };
        self.db.insert_webhook_log(&entry).await?;
        Ok(entry.id)
    }

    pub async fn finish(
        &self,
        id: Uuid,
        status_code: u16,
        response: &serde_json::Value,
        elapsed: Duration,
    ) -> Result<(), DatabaseError> {
        self.db
            .complete_webhook_log(
                id,
                status_code,
                &response.to_string(),
                elapsed.as_millis() as i64,
            )
            .await
    }

    pub async fn list(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<WebhookLogSummary>, i64), DatabaseError> {
        let (entries, total) = self.db.list_webhook_logs(user_id, limit, offset).await?;
        Ok((entries.into_iter().map(Into::into).collect(), total))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<WebhookLogEntry>, DatabaseError> {
        self.db.get_webhook_log(id).await
    }
}

/// Serialize headers as a JSON object keeping the first value of each name.
pub fn headers_to_json(headers: &HeaderMap) -> String {
    let mut map = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            map.entry(name.as_str().to_string())
                .or_insert_with(|| v.to_string());
        }
    }
    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
}
