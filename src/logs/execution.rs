//! Durable record of Son executions and their per-action outcomes.
//!
//! One `ExecutionRecord` per Son firing, starting as `success` and flipped
//! to `failure` by any failed child `ActionLog`. The flip is a plain
//! overwrite without a lock; concurrent failures all write the same value.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::duration::parse_duration;
use crate::error::{DatabaseError, StatsError};
use crate::store::Database;

/// Aggregate outcome of one Son firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failure" => Ok(ExecutionStatus::Failure),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Outcome of one action within a firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Queued,
    Success,
    Failure,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Queued => write!(f, "queued"),
            ActionStatus::Success => write!(f, "success"),
            ActionStatus::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ActionStatus::Queued),
            "success" => Ok(ActionStatus::Success),
            "failure" => Ok(ActionStatus::Failure),
            other => Err(format!("unknown action status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub son_id: Uuid,
    #[serde(skip)]
    pub user_id: String,
    pub webhook_log_id: Option<Uuid>,
    pub status: ExecutionStatus,
    pub executed_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionLog {
    pub id: Uuid,
    pub execution_log_id: Uuid,
    pub action_type: String,
    pub status: ActionStatus,
    pub executed_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// Execution counts for one Son over a timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SonStats {
    pub son_id: Uuid,
    pub name: String,
    pub executions: i64,
    pub success: i64,
    pub failure: i64,
}

/// Writes and reads execution records; caches stats per user + timeframe.
pub struct ExecutionLogger {
    db: Arc<dyn Database>,
    stats_cache: Cache<String, Vec<SonStats>>,
}

impl ExecutionLogger {
    pub fn new(db: Arc<dyn Database>, stats_ttl: Duration) -> Self {
        let stats_cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(stats_ttl)
            .build();
        Self { db, stats_cache }
    }

    /// Create the record for one Son firing and return its id.
    pub async fn log_son_execution(
        &self,
        son_id: Uuid,
        user_id: &str,
        webhook_log_id: Option<Uuid>,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<Uuid, DatabaseError> {
        let record = ExecutionRecord {
            id: Uuid::new_v4(),
            son_id,
            user_id: user_id.to_string(),
            webhook_log_id,
            status,
            executed_at: Utc::now(),
            error_message: error_message.map(str::to_string),
        };
        self.db.insert_execution_record(&record).await?;
        debug!(execution_id = %record.id, son_id = %son_id, "Logged son execution");
        Ok(record.id)
    }

    /// Append an action outcome. A failure also marks the parent execution failed.
    pub async fn log_action_execution(
        &self,
        execution_id: Uuid,
        action_type: &str,
        status: ActionStatus,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let log = ActionLog {
            id: Uuid::new_v4(),
            execution_log_id: execution_id,
            action_type: action_type.to_string(),
            status,
            executed_at: Utc::now(),
            error_message: error_message.map(str::to_string),
        };
        self.db.insert_action_log(&log).await?;

        if status == ActionStatus::Failure {
            self.db
                .update_execution_status(execution_id, ExecutionStatus::Failure, error_message)
                .await?;
        }
        Ok(())
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>, DatabaseError> {
        self.db.get_execution_record(id).await
    }

    pub async fn get_execution_logs(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExecutionRecord>, i64), DatabaseError> {
        self.db.list_execution_records(user_id, limit, offset).await
    }

    pub async fn get_action_logs(&self, execution_id: Uuid) -> Result<Vec<ActionLog>, DatabaseError> {
        self.db.list_action_logs(execution_id).await
    }

    /// Per-Son counts over `timeframe` (e.g. `24h`, `7d`), cached for the TTL.
    pub async fn get_stats(
        &self,
        user_id: &str,
        timeframe: &str,
    ) -> Result<Vec<SonStats>, StatsError> {
        let key = format!("son_stats:{user_id}:{timeframe}");
        if let Some(stats) = self.stats_cache.get(&key).await {
            return Ok(stats);
        }

        let window = parse_duration(timeframe)?;
        let since = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stats = self.db.son_stats(user_id, since).await?;
        self.stats_cache.insert(key, stats.clone()).await;
        Ok(stats)
    }
}

/// Record an action outcome, logging instead of propagating storage errors.
pub async fn record_action_best_effort(
    logger: &ExecutionLogger,
    execution_id: Uuid,
    action_type: &str,
    status: ActionStatus,
    error_message: Option<&str>,
) {
    if let Err(e) = logger
        .log_action_execution(execution_id, action_type, status, error_message)
        .await
    {
        warn!(
            execution_id = %execution_id,
            action_type,
            status = %status,
            error = %e,
            "Failed to record action execution"
        );
    }
}
