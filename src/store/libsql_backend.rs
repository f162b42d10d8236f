//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 (microseconds, `Z`) so text ordering is time ordering.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::logs::execution::{ActionLog, ExecutionRecord, ExecutionStatus, SonStats};
use crate::logs::webhook::WebhookLogEntry;
use crate::queue::{NewTask, TaskRecord, TaskState};
use crate::sons::model::{Action, Son};
use crate::store::migrations;
use crate::store::traits::{Database, RecentActivity, Webhook};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a `SELECT COUNT(*) ...` and return the count.
    async fn count(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("{op}: {e}"))),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

#[cfg(test)]
impl LibSqlBackend {
    /// Make every pending task due now, skipping retry backoff.
    pub(crate) async fn make_pending_due(&self) -> Result<u64, DatabaseError> {
        self.conn()
            .execute("UPDATE tasks SET run_at = 0 WHERE state = 'pending'", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("make_pending_due: {e}")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format for timestamps.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, column: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn row_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{op} row parse: {e}"))
}

/// Column order matches SON_COLUMNS.
fn row_to_son(row: &libsql::Row) -> Result<Son, DatabaseError> {
    let err = row_err("son");
    let id: String = row.get(0).map_err(&err)?;
    let trigger: String = row.get(3).map_err(&err)?;
    let actions: String = row.get(5).map_err(&err)?;
    let created: String = row.get(7).map_err(&err)?;
    let updated: String = row.get(8).map_err(&err)?;

    Ok(Son {
        id: parse_uuid(&id, "sons.id")?,
        user_id: row.get(1).map_err(&err)?,
        name: row.get(2).map_err(&err)?,
        trigger: trigger
            .parse()
            .map_err(|e: String| DatabaseError::Serialization(format!("son {id}: {e}")))?,
        delay: row.get(4).map_err(&err)?,
        actions: serde_json::from_str::<Vec<Action>>(&actions)
            .map_err(|e| DatabaseError::Serialization(format!("son {id} actions: {e}")))?,
        enabled: row.get::<i64>(6).map_err(&err)? != 0,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_webhook(row: &libsql::Row) -> Result<Webhook, DatabaseError> {
    let err = row_err("webhook");
    let id: String = row.get(0).map_err(&err)?;
    let created: String = row.get(4).map_err(&err)?;
    let updated: String = row.get(5).map_err(&err)?;
    Ok(Webhook {
        id: parse_uuid(&id, "webhooks.id")?,
        user_id: row.get(1).map_err(&err)?,
        endpoint: row.get(2).map_err(&err)?,
        secret: row.get(3).map_err(&err)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_webhook_log(row: &libsql::Row) -> Result<WebhookLogEntry, DatabaseError> {
    let err = row_err("webhook_log");
    let id: String = row.get(0).map_err(&err)?;
    let timestamp: String = row.get(2).map_err(&err)?;
    let status: i64 = row.get(7).map_err(&err)?;
    Ok(WebhookLogEntry {
        id: parse_uuid(&id, "webhook_logs.id")?,
        user_id: row.get(1).map_err(&err)?,
        timestamp: parse_datetime(&timestamp),
        method: row.get(3).map_err(&err)?,
        path: row.get(4).map_err(&err)?,
        headers: row.get(5).map_err(&err)?,
        body: row.get(6).map_err(&err)?,
        status_code: u16::try_from(status).unwrap_or(0),
        response_body: row.get(8).ok(),
        duration: row.get(9).map_err(&err)?,
    })
}

fn row_to_execution(row: &libsql::Row) -> Result<ExecutionRecord, DatabaseError> {
    let err = row_err("execution");
    let id: String = row.get(0).map_err(&err)?;
    let son_id: String = row.get(1).map_err(&err)?;
    let webhook_log_id: Option<String> = row.get(3).ok();
    let status: String = row.get(4).map_err(&err)?;
    let executed: String = row.get(5).map_err(&err)?;
    Ok(ExecutionRecord {
        id: parse_uuid(&id, "son_execution_logs.id")?,
        son_id: parse_uuid(&son_id, "son_execution_logs.son_id")?,
        user_id: row.get(2).map_err(&err)?,
        webhook_log_id: webhook_log_id.and_then(|s| Uuid::parse_str(&s).ok()),
        status: status.parse().map_err(DatabaseError::Serialization)?,
        executed_at: parse_datetime(&executed),
        error_message: row.get(6).ok(),
    })
}

fn row_to_action_log(row: &libsql::Row) -> Result<ActionLog, DatabaseError> {
    let err = row_err("action_log");
    let id: String = row.get(0).map_err(&err)?;
    let parent: String = row.get(1).map_err(&err)?;
    let status: String = row.get(3).map_err(&err)?;
    let executed: String = row.get(4).map_err(&err)?;
    Ok(ActionLog {
        id: parse_uuid(&id, "son_execution_action_logs.id")?,
        execution_log_id: parse_uuid(&parent, "son_execution_action_logs.son_execution_log_id")?,
        action_type: row.get(2).map_err(&err)?,
        status: status.parse().map_err(DatabaseError::Serialization)?,
        executed_at: parse_datetime(&executed),
        error_message: row.get(5).ok(),
    })
}

fn row_to_activity(row: &libsql::Row) -> Result<RecentActivity, DatabaseError> {
    let err = row_err("activity");
    let id: String = row.get(0).map_err(&err)?;
    let timestamp: String = row.get(4).map_err(&err)?;
    Ok(RecentActivity {
        id: parse_uuid(&id, "recent_activity.id")?,
        user_id: row.get(1).map_err(&err)?,
        action_type: row.get(2).map_err(&err)?,
        description: row.get(3).map_err(&err)?,
        timestamp: parse_datetime(&timestamp),
    })
}

fn row_to_task(row: &libsql::Row) -> Result<TaskRecord, DatabaseError> {
    let err = row_err("task");
    let id: String = row.get(0).map_err(&err)?;
    let queue: String = row.get(2).map_err(&err)?;
    let state: String = row.get(4).map_err(&err)?;
    let retried: i64 = row.get(5).map_err(&err)?;
    let max_retry: i64 = row.get(6).map_err(&err)?;
    Ok(TaskRecord {
        id: parse_uuid(&id, "tasks.id")?,
        kind: row.get(1).map_err(&err)?,
        queue: queue.parse().unwrap_or_default(),
        payload: row.get(3).map_err(&err)?,
        state: state.parse::<TaskState>().map_err(DatabaseError::Serialization)?,
        retried: u32::try_from(retried).unwrap_or(0),
        max_retry: u32::try_from(max_retry).unwrap_or(0),
        run_at: row.get(7).map_err(&err)?,
        last_error: row.get(8).ok(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const SON_COLUMNS: &str =
    "id, user_id, name, trigger_event, delay, actions, enabled, created_at, updated_at";

const WEBHOOK_COLUMNS: &str = "id, user_id, endpoint, secret, created_at, updated_at";

const WEBHOOK_LOG_COLUMNS: &str =
    "id, user_id, timestamp, method, path, headers, body, status_code, response_body, duration";

const EXECUTION_COLUMNS: &str =
    "id, son_id, user_id, webhook_log_id, execution_status, executed_at, error_message";

const ACTION_LOG_COLUMNS: &str =
    "id, son_execution_log_id, action_type, action_status, executed_at, error_message";

const ACTIVITY_COLUMNS: &str = "id, user_id, action_type, description, timestamp";

const TASK_COLUMNS: &str =
    "id, kind, queue, payload, state, retried, max_retry, run_at, last_error";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.conn()
            .execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(|e| DatabaseError::Migration(format!("Failed to enable foreign keys: {e}")))?;
        migrations::run_migrations(self.conn()).await
    }

    // ── Sons ────────────────────────────────────────────────────────

    async fn insert_son(&self, son: &Son) -> Result<(), DatabaseError> {
        let actions = serde_json::to_string(&son.actions)
            .map_err(|e| DatabaseError::Serialization(format!("son actions: {e}")))?;
        self.conn()
            .execute(
                &format!("INSERT INTO sons ({SON_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    son.id.to_string(),
                    son.user_id.as_str(),
                    son.name.as_str(),
                    son.trigger.as_str(),
                    son.delay.as_str(),
                    actions,
                    son.enabled as i64,
                    ts(&son.created_at),
                    ts(&son.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_son: {e}")))?;
        debug!(son_id = %son.id, "Inserted son");
        Ok(())
    }

    async fn get_son(&self, id: Uuid) -> Result<Option<Son>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SON_COLUMNS} FROM sons WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_son: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_son(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_son: {e}"))),
        }
    }

    async fn list_sons(&self, user_id: &str) -> Result<Vec<Son>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SON_COLUMNS} FROM sons WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_sons: {e}")))?;

        let mut sons = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_son(&row) {
                Ok(son) => sons.push(son),
                Err(e) => {
                    tracing::warn!("Skipping son row: {e}");
                }
            }
        }
        Ok(sons)
    }

    async fn update_son(&self, son: &Son) -> Result<bool, DatabaseError> {
        let actions = serde_json::to_string(&son.actions)
            .map_err(|e| DatabaseError::Serialization(format!("son actions: {e}")))?;
        let n = self
            .conn()
            .execute(
                "UPDATE sons SET name = ?1, trigger_event = ?2, delay = ?3, actions = ?4, enabled = ?5, updated_at = ?6 WHERE id = ?7 AND user_id = ?8",
                params![
                    son.name.as_str(),
                    son.trigger.as_str(),
                    son.delay.as_str(),
                    actions,
                    son.enabled as i64,
                    ts(&son.updated_at),
                    son.id.to_string(),
                    son.user_id.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_son: {e}")))?;
        Ok(n > 0)
    }

    async fn delete_son(&self, user_id: &str, id: Uuid) -> Result<bool, DatabaseError> {
        let n = self
            .conn()
            .execute(
                "DELETE FROM sons WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_son: {e}")))?;
        Ok(n > 0)
    }

    // ── Webhooks ────────────────────────────────────────────────────

    async fn insert_webhook(&self, webhook: &Webhook) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO webhooks ({WEBHOOK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    webhook.id.to_string(),
                    webhook.user_id.as_str(),
                    webhook.endpoint.as_str(),
                    webhook.secret.as_str(),
                    ts(&webhook.created_at),
                    ts(&webhook.updated_at),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE") {
                    DatabaseError::Constraint(format!("insert_webhook: {msg}"))
                } else {
                    DatabaseError::Query(format!("insert_webhook: {msg}"))
                }
            })?;
        Ok(())
    }

    async fn get_webhook_for_user(&self, user_id: &str) -> Result<Option<Webhook>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE user_id = ?1 ORDER BY created_at ASC LIMIT 1"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_webhook_for_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_webhook(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_webhook_for_user: {e}"))),
        }
    }

    async fn get_webhook_by_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<Option<Webhook>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE endpoint = ?1"),
                params![endpoint],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_webhook_by_endpoint: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_webhook(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_webhook_by_endpoint: {e}"))),
        }
    }

    // ── Webhook request log ─────────────────────────────────────────

    async fn insert_webhook_log(&self, entry: &WebhookLogEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO webhook_logs ({WEBHOOK_LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    entry.id.to_string(),
                    entry.user_id.as_str(),
                    ts(&entry.timestamp),
                    entry.method.as_str(),
                    entry.path.as_str(),
                    entry.headers.as_str(),
                    entry.body.as_str(),
                    i64::from(entry.status_code),
                    opt_text(entry.response_body.as_deref()),
                    entry.duration,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_webhook_log: {e}")))?;
        Ok(())
    }

    async fn complete_webhook_log(
        &self,
        id: Uuid,
        status_code: u16,
        response_body: &str,
        duration_ms: i64,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE webhook_logs SET status_code = ?1, response_body = ?2, duration = ?3 WHERE id = ?4",
                params![
                    i64::from(status_code),
                    response_body,
                    duration_ms,
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_webhook_log: {e}")))?;
        Ok(())
    }

    async fn list_webhook_logs(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<WebhookLogEntry>, i64), DatabaseError> {
        let total = self
            .count(
                "list_webhook_logs",
                "SELECT COUNT(*) FROM webhook_logs WHERE user_id = ?1",
                params![user_id],
            )
            .await?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WEBHOOK_LOG_COLUMNS} FROM webhook_logs WHERE user_id = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT ?2 OFFSET ?3"
                ),
                params![user_id, limit, offset],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_webhook_logs: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_webhook_log(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Skipping webhook log row: {e}");
                }
            }
        }
        Ok((entries, total))
    }

    async fn get_webhook_log(&self, id: Uuid) -> Result<Option<WebhookLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {WEBHOOK_LOG_COLUMNS} FROM webhook_logs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_webhook_log: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_webhook_log(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_webhook_log: {e}"))),
        }
    }

    // ── Execution log ───────────────────────────────────────────────

    async fn insert_execution_record(
        &self,
        record: &ExecutionRecord,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO son_execution_logs ({EXECUTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    record.id.to_string(),
                    record.son_id.to_string(),
                    record.user_id.as_str(),
                    opt_text(record.webhook_log_id.map(|id| id.to_string()).as_deref()),
                    record.status.to_string(),
                    ts(&record.executed_at),
                    opt_text(record.error_message.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_execution_record: {e}")))?;
        Ok(())
    }

    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let n = self
            .conn()
            .execute(
                "UPDATE son_execution_logs SET execution_status = ?1, error_message = ?2 WHERE id = ?3",
                params![status.to_string(), opt_text(error_message), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_execution_status: {e}")))?;
        if n == 0 {
            return Err(DatabaseError::NotFound {
                entity: "son_execution_log".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_execution_record(
        &self,
        id: Uuid,
    ) -> Result<Option<ExecutionRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EXECUTION_COLUMNS} FROM son_execution_logs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_execution_record: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_execution(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_execution_record: {e}"))),
        }
    }

    async fn list_execution_records(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExecutionRecord>, i64), DatabaseError> {
        let total = self
            .count(
                "list_execution_records",
                "SELECT COUNT(*) FROM son_execution_logs WHERE user_id = ?1",
                params![user_id],
            )
            .await?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EXECUTION_COLUMNS} FROM son_execution_logs WHERE user_id = ?1 ORDER BY executed_at DESC, rowid DESC LIMIT ?2 OFFSET ?3"
                ),
                params![user_id, limit, offset],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_execution_records: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_execution(&row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping execution row: {e}");
                }
            }
        }
        Ok((records, total))
    }

    async fn insert_action_log(&self, log: &ActionLog) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO son_execution_action_logs ({ACTION_LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    log.id.to_string(),
                    log.execution_log_id.to_string(),
                    log.action_type.as_str(),
                    log.status.to_string(),
                    ts(&log.executed_at),
                    opt_text(log.error_message.as_deref()),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("FOREIGN KEY") {
                    DatabaseError::Constraint(format!("insert_action_log: {msg}"))
                } else {
                    DatabaseError::Query(format!("insert_action_log: {msg}"))
                }
            })?;
        Ok(())
    }

    async fn list_action_logs(&self, execution_id: Uuid) -> Result<Vec<ActionLog>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACTION_LOG_COLUMNS} FROM son_execution_action_logs WHERE son_execution_log_id = ?1 ORDER BY executed_at ASC, rowid ASC"
                ),
                params![execution_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_action_logs: {e}")))?;

        let mut logs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_action_log(&row) {
                Ok(log) => logs.push(log),
                Err(e) => {
                    tracing::warn!("Skipping action log row: {e}");
                }
            }
        }
        Ok(logs)
    }

    async fn son_stats(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SonStats>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT s.id, s.name, COUNT(l.id), \
                    COALESCE(SUM(CASE WHEN l.execution_status = 'success' THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN l.execution_status = 'failure' THEN 1 ELSE 0 END), 0) \
                 FROM son_execution_logs l JOIN sons s ON s.id = l.son_id \
                 WHERE l.user_id = ?1 AND l.executed_at >= ?2 \
                 GROUP BY s.id, s.name \
                 ORDER BY COUNT(l.id) DESC, s.name ASC",
                params![user_id, ts(&since)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("son_stats: {e}")))?;

        let err = row_err("son_stats");
        let mut stats = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row.get(0).map_err(&err)?;
            stats.push(SonStats {
                son_id: parse_uuid(&id, "sons.id")?,
                name: row.get(1).map_err(&err)?,
                executions: row.get(2).map_err(&err)?,
                success: row.get(3).map_err(&err)?,
                failure: row.get(4).map_err(&err)?,
            });
        }
        Ok(stats)
    }

    // ── Recent activity ─────────────────────────────────────────────

    async fn insert_activity(&self, activity: &RecentActivity) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO recent_activity ({ACTIVITY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                params![
                    activity.id.to_string(),
                    activity.user_id.as_str(),
                    activity.action_type.as_str(),
                    activity.description.as_str(),
                    ts(&activity.timestamp),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_activity: {e}")))?;
        Ok(())
    }

    async fn list_recent_activity(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<RecentActivity>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACTIVITY_COLUMNS} FROM recent_activity WHERE user_id = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT ?2"
                ),
                params![user_id, limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_recent_activity: {e}")))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_activity(&row) {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::warn!("Skipping activity row: {e}");
                }
            }
        }
        Ok(items)
    }

    // ── Task queue ──────────────────────────────────────────────────

    async fn insert_task(&self, task: &NewTask) -> Result<(), DatabaseError> {
        let now = ts(&Utc::now());
        self.conn()
            .execute(
                "INSERT INTO tasks (id, kind, queue, priority, payload, state, retried, max_retry, run_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?7, ?8, ?8)",
                params![
                    task.id.to_string(),
                    task.kind.as_str(),
                    task.queue.as_str(),
                    task.queue.priority(),
                    task.payload.as_str(),
                    i64::from(task.max_retry),
                    task.run_at,
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_task: {e}")))?;
        Ok(())
    }

    async fn claim_next_task(&self, now_ms: i64) -> Result<Option<TaskRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE tasks SET state = 'active', updated_at = ?2 \
                     WHERE id = (SELECT id FROM tasks WHERE state = 'pending' AND run_at <= ?1 \
                                 ORDER BY priority DESC, run_at ASC, rowid ASC LIMIT 1) \
                     RETURNING {TASK_COLUMNS}"
                ),
                params![now_ms, ts(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_next_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("claim_next_task: {e}"))),
        }
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<TaskRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task: {e}"))),
        }
    }

    async fn complete_task(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE tasks SET state = 'completed', updated_at = ?1 WHERE id = ?2",
                params![ts(&Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_task: {e}")))?;
        Ok(())
    }

    async fn retry_task(
        &self,
        id: Uuid,
        run_at_ms: i64,
        error: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE tasks SET state = 'pending', retried = retried + 1, run_at = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
                params![run_at_ms, error, ts(&Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("retry_task: {e}")))?;
        Ok(())
    }

    async fn bury_task(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE tasks SET state = 'dead', last_error = ?1, updated_at = ?2 WHERE id = ?3",
                params![error, ts(&Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("bury_task: {e}")))?;
        Ok(())
    }

    async fn reset_active_tasks(&self) -> Result<u64, DatabaseError> {
        self.conn()
            .execute(
                "UPDATE tasks SET state = 'pending', updated_at = ?1 WHERE state = 'active'",
                params![ts(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reset_active_tasks: {e}")))
    }
}
