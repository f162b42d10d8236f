//! `Database` trait: the async persistence interface shared by every component.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::logs::execution::{ActionLog, ExecutionRecord, ExecutionStatus, SonStats};
use crate::logs::webhook::WebhookLogEntry;
use crate::queue::{NewTask, TaskRecord};
use crate::sons::model::Son;

/// A user's inbound webhook endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Webhook {
    pub id: Uuid,
    pub user_id: String,
    /// Opaque path segment: `/webhook/{endpoint}`.
    pub endpoint: String,
    /// Shared HMAC secret configured in Ghost.
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An entry in a user's activity feed.
#[derive(Debug, Clone, Serialize)]
pub struct RecentActivity {
    pub id: Uuid,
    pub user_id: String,
    pub action_type: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Backend-agnostic database trait covering rules, logs and the task queue.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Sons ────────────────────────────────────────────────────────

    async fn insert_son(&self, son: &Son) -> Result<(), DatabaseError>;

    async fn get_son(&self, id: Uuid) -> Result<Option<Son>, DatabaseError>;

    /// All Sons owned by a user, oldest first. Rows that fail to decode are skipped.
    async fn list_sons(&self, user_id: &str) -> Result<Vec<Son>, DatabaseError>;

    /// Replace a Son's mutable fields. Returns false if no row matched `id` + owner.
    async fn update_son(&self, son: &Son) -> Result<bool, DatabaseError>;

    /// Returns false if no row matched `id` + owner.
    async fn delete_son(&self, user_id: &str, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Webhooks ────────────────────────────────────────────────────

    async fn insert_webhook(&self, webhook: &Webhook) -> Result<(), DatabaseError>;

    async fn get_webhook_for_user(&self, user_id: &str) -> Result<Option<Webhook>, DatabaseError>;

    async fn get_webhook_by_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<Option<Webhook>, DatabaseError>;

    // ── Webhook request log ─────────────────────────────────────────

    async fn insert_webhook_log(&self, entry: &WebhookLogEntry) -> Result<(), DatabaseError>;

    /// Record the response sent for a logged request.
    async fn complete_webhook_log(
        &self,
        id: Uuid,
        status_code: u16,
        response_body: &str,
        duration_ms: i64,
    ) -> Result<(), DatabaseError>;

    /// Newest first. Returns the page plus the user's total count.
    async fn list_webhook_logs(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<WebhookLogEntry>, i64), DatabaseError>;

    async fn get_webhook_log(&self, id: Uuid) -> Result<Option<WebhookLogEntry>, DatabaseError>;

    // ── Execution log ───────────────────────────────────────────────

    async fn insert_execution_record(&self, record: &ExecutionRecord)
    -> Result<(), DatabaseError>;

    /// Overwrite an execution's status. No read-modify-write; last write wins.
    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError>;

    async fn get_execution_record(&self, id: Uuid)
    -> Result<Option<ExecutionRecord>, DatabaseError>;

    /// Newest first. Returns the page plus the user's total count.
    async fn list_execution_records(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExecutionRecord>, i64), DatabaseError>;

    /// Append an action log. Fails if the parent execution does not exist.
    async fn insert_action_log(&self, log: &ActionLog) -> Result<(), DatabaseError>;

    /// Oldest first.
    async fn list_action_logs(&self, execution_id: Uuid) -> Result<Vec<ActionLog>, DatabaseError>;

    /// Per-Son execution counts since `since`.
    async fn son_stats(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SonStats>, DatabaseError>;

    // ── Recent activity ─────────────────────────────────────────────

    async fn insert_activity(&self, activity: &RecentActivity) -> Result<(), DatabaseError>;

    async fn list_recent_activity(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<RecentActivity>, DatabaseError>;

    // ── Task queue ──────────────────────────────────────────────────

    async fn insert_task(&self, task: &NewTask) -> Result<(), DatabaseError>;

    /// Atomically move the most urgent due task to `active` and return it.
    async fn claim_next_task(&self, now_ms: i64) -> Result<Option<TaskRecord>, DatabaseError>;

    async fn get_task(&self, id: Uuid) -> Result<Option<TaskRecord>, DatabaseError>;

    async fn complete_task(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Put a failed task back to `pending` at `run_at_ms`, bumping its retry count.
    async fn retry_task(&self, id: Uuid, run_at_ms: i64, error: &str)
    -> Result<(), DatabaseError>;

    /// Mark a task permanently failed.
    async fn bury_task(&self, id: Uuid, error: &str) -> Result<(), DatabaseError>;

    /// Return tasks stuck in `active` (from a previous process) to `pending`.
    async fn reset_active_tasks(&self) -> Result<u64, DatabaseError>;
}
