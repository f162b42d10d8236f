//! Schema migrations for the libSQL backend.
//!
//! The applied version lives in `PRAGMA user_version`. Each pending step runs
//! inside its own transaction together with the version bump.

use libsql::Connection;
use tracing::info;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS sons (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                trigger_event TEXT NOT NULL,
                delay TEXT NOT NULL DEFAULT '0',
                actions TEXT NOT NULL DEFAULT '[]',
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sons_user ON sons(user_id);

            CREATE TABLE IF NOT EXISTS webhooks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                endpoint TEXT NOT NULL UNIQUE,
                secret TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_webhooks_user ON webhooks(user_id);

            CREATE TABLE IF NOT EXISTS webhook_logs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                method TEXT NOT NULL,
                path TEXT NOT NULL,
                headers TEXT NOT NULL DEFAULT '{}',
                body TEXT NOT NULL DEFAULT '',
                status_code INTEGER NOT NULL DEFAULT 200,
                response_body TEXT,
                duration INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_webhook_logs_user_time
                ON webhook_logs(user_id, timestamp);

            CREATE TABLE IF NOT EXISTS son_execution_logs (
                id TEXT PRIMARY KEY,
                son_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                webhook_log_id TEXT,
                execution_status TEXT NOT NULL,
                executed_at TEXT NOT NULL,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_son_execution_logs_user_time
                ON son_execution_logs(user_id, executed_at);
            CREATE INDEX IF NOT EXISTS idx_son_execution_logs_son
                ON son_execution_logs(son_id);

            CREATE TABLE IF NOT EXISTS son_execution_action_logs (
                id TEXT PRIMARY KEY,
                son_execution_log_id TEXT NOT NULL
                    REFERENCES son_execution_logs(id) ON DELETE CASCADE,
                action_type TEXT NOT NULL,
                action_status TEXT NOT NULL,
                executed_at TEXT NOT NULL,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_action_logs_execution
                ON son_execution_action_logs(son_execution_log_id);

            CREATE TABLE IF NOT EXISTS recent_activity (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                description TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_recent_activity_user_time
                ON recent_activity(user_id, timestamp);
        "#,
    },
    Migration {
        version: 2,
        name: "task_queue",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                queue TEXT NOT NULL DEFAULT 'default',
                priority INTEGER NOT NULL,
                payload TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                retried INTEGER NOT NULL DEFAULT 0,
                max_retry INTEGER NOT NULL DEFAULT 3,
                run_at INTEGER NOT NULL,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_due
                ON tasks(state, priority, run_at);
        "#,
    },
];

/// Latest schema version.
fn latest_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Apply every migration newer than the database's `user_version`.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let from = schema_version(conn).await?;

    for step in MIGRATIONS.iter().filter(|m| m.version > from) {
        info!(version = step.version, name = step.name, "Applying migration");
        let batch = format!(
            "BEGIN;\n{}\nPRAGMA user_version = {};\nCOMMIT;",
            step.sql, step.version
        );
        if let Err(e) = conn.execute_batch(&batch).await {
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::Migration(format!(
                "{} (v{}): {e}",
                step.name, step.version
            )));
        }
    }

    let to = schema_version(conn).await?;
    if to < latest_version() {
        return Err(DatabaseError::Migration(format!(
            "schema at v{to}, expected v{}",
            latest_version()
        )));
    }
    if to != from {
        info!(from, to, "Schema migrated");
    }
    Ok(())
}

/// Current `user_version`; 0 for a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("PRAGMA user_version", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read user_version: {e}")))?;
    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("parse user_version: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Migration(format!("read user_version: {e}"))),
    }
}
