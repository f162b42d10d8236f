//! Persistent delayed work queue.
//!
//! Tasks live in the `tasks` table so scheduled actions survive restarts.
//! Claims pick the highest-priority named queue first, then the oldest
//! `run_at`. Failed tasks are retried with backoff until `max_retry` is
//! exhausted, after which they are buried as `dead`.

pub mod persistent;
pub mod worker;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::QueueError;

pub use persistent::PersistentQueue;
pub use worker::WorkerPool;

/// Named queues with their weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueName {
    Critical,
    #[default]
    Default,
    Low,
}

impl QueueName {
    pub fn priority(&self) -> i64 {
        match self {
            QueueName::Critical => 6,
            QueueName::Default => 3,
            QueueName::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Critical => "critical",
            QueueName::Default => "default",
            QueueName::Low => "low",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(QueueName::Critical),
            "default" => Ok(QueueName::Default),
            "low" => Ok(QueueName::Low),
            other => Err(format!("unknown queue: {other}")),
        }
    }
}

/// Lifecycle of a stored task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Active,
    Completed,
    Dead,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Active => write!(f, "active"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Dead => write!(f, "dead"),
        }
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "active" => Ok(TaskState::Active),
            "completed" => Ok(TaskState::Completed),
            "dead" => Ok(TaskState::Dead),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

/// Scheduling options for [`TaskQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub queue: QueueName,
    pub max_retry: u32,
    /// Earliest time from now the task may run.
    pub process_in: Duration,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            queue: QueueName::Default,
            max_retry: 3,
            process_in: Duration::ZERO,
        }
    }
}

/// A task about to be inserted.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: Uuid,
    pub kind: String,
    pub queue: QueueName,
    pub payload: String,
    pub max_retry: u32,
    /// Unix milliseconds.
    pub run_at: i64,
}

/// A stored task as claimed by a worker.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: Uuid,
    pub kind: String,
    pub queue: QueueName,
    pub payload: String,
    pub state: TaskState,
    /// Attempts already made and failed.
    pub retried: u32,
    pub max_retry: u32,
    pub run_at: i64,
    pub last_error: Option<String>,
}

impl TaskRecord {
    /// Whether a failure of the current attempt exhausts the retry budget.
    pub fn is_final_attempt(&self) -> bool {
        self.retried >= self.max_retry
    }
}

/// Failure reported by a [`TaskHandler`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    pub retryable: bool,
}

impl TaskError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Submission side of the queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(
        &self,
        kind: &str,
        payload: String,
        options: TaskOptions,
    ) -> Result<Uuid, QueueError>;
}

/// Executes claimed tasks.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &TaskRecord) -> Result<(), TaskError>;
}

/// Delay before the next attempt after `retried` failures.
///
/// `retried^4 + 15 + rand(0..30) * (retried + 1)` seconds.
pub fn retry_delay(retried: u32) -> Duration {
    use rand::Rng;

    let n = u64::from(retried);
    let jitter: u64 = rand::thread_rng().gen_range(0..30);
    Duration::from_secs(
        n.saturating_pow(4)
            .saturating_add(15)
            .saturating_add(jitter.saturating_mul(n + 1)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_priorities() {
        assert!(QueueName::Critical.priority() > QueueName::Default.priority());
        assert!(QueueName::Default.priority() > QueueName::Low.priority());
        assert_eq!("default".parse::<QueueName>().unwrap(), QueueName::default());
    }

    #[test]
    fn retry_delay_bounds() {
        for retried in 0..4u32 {
            let n = u64::from(retried);
            let d = retry_delay(retried).as_secs();
            let min = n.pow(4) + 15;
            let max = min + 29 * (n + 1);
            assert!(d >= min && d <= max, "retried={retried} delay={d}");
        }
    }

    #[test]
    fn final_attempt_after_max_retry() {
        let mut task = TaskRecord {
            id: Uuid::new_v4(),
            kind: "create_campaign".into(),
            queue: QueueName::Default,
            payload: "{}".into(),
            state: TaskState::Active,
            retried: 0,
            max_retry: 3,
            run_at: 0,
            last_error: None,
        };
        assert!(!task.is_final_attempt());
        task.retried = 3;
        assert!(task.is_final_attempt());
    }
}
