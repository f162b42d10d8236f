//! `TaskQueue` backed by the `tasks` table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DatabaseError, QueueError};
use crate::queue::{NewTask, TaskOptions, TaskQueue, TaskRecord};
use crate::store::Database;

pub struct PersistentQueue {
    db: Arc<dyn Database>,
}

impl PersistentQueue {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Claim the most urgent task that is due now.
    pub async fn claim(&self) -> Result<Option<TaskRecord>, QueueError> {
        Ok(self.db.claim_next_task(Utc::now().timestamp_millis()).await?)
    }

    pub async fn complete(&self, id: Uuid) -> Result<(), QueueError> {
        Ok(self.db.complete_task(id).await?)
    }

    /// Schedule another attempt `delay` from now.
    pub async fn retry(
        &self,
        id: Uuid,
        delay: Duration,
        error: &str,
    ) -> Result<(), QueueError> {
        Ok(self.db.retry_task(id, due_at(delay), error).await?)
    }

    pub async fn bury(&self, id: Uuid, error: &str) -> Result<(), QueueError> {
        Ok(self.db.bury_task(id, error).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<TaskRecord>, QueueError> {
        Ok(self.db.get_task(id).await?)
    }

    /// Recover tasks left `active` by a process that stopped mid-run.
    pub async fn recover_stale(&self) -> Result<u64, QueueError> {
        let n = self.db.reset_active_tasks().await?;
        if n > 0 {
            info!(count = n, "Reset stale active tasks to pending");
        }
        Ok(n)
    }
}

/// Unix millis `delay` from now. Saturates instead of wrapping.
fn due_at(delay: Duration) -> i64 {
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_add(delay_ms)
}

#[async_trait]
impl TaskQueue for PersistentQueue {
    async fn enqueue(
        &self,
        kind: &str,
        payload: String,
        options: TaskOptions,
    ) -> Result<Uuid, QueueError> {
        let task = NewTask {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            queue: options.queue,
            payload,
            max_retry: options.max_retry,
            run_at: due_at(options.process_in),
        };
        self.db
            .insert_task(&task)
            .await
            .map_err(|e: DatabaseError| QueueError::Enqueue {
                kind: kind.to_string(),
                reason: e.to_string(),
            })?;
        debug!(task_id = %task.id, kind, queue = %task.queue, run_at = task.run_at, "Enqueued task");
        Ok(task.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::parse_duration;
    use crate::queue::{QueueName, TaskState};
    use crate::store::LibSqlBackend;

    async fn queue() -> PersistentQueue {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        PersistentQueue::new(db)
    }

    #[tokio::test]
    async fn delayed_tasks_are_not_claimed_early() {
        let q = queue().await;
        q.enqueue(
            "create_campaign",
            "{}".into(),
            TaskOptions {
                process_in: Duration::from_secs(3600),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(q.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_prefers_higher_priority_queue() {
        let q = queue().await;
        let low = q
            .enqueue(
                "a",
                "{}".into(),
                TaskOptions {
                    queue: QueueName::Low,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let critical = q
            .enqueue(
                "b",
                "{}".into(),
                TaskOptions {
                    queue: QueueName::Critical,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let first = q.claim().await.unwrap().unwrap();
        assert_eq!(first.id, critical);
        assert_eq!(first.state, TaskState::Active);
        let second = q.claim().await.unwrap().unwrap();
        assert_eq!(second.id, low);
        assert!(q.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_bumps_count_and_reschedules() {
        let q = queue().await;
        let id = q
            .enqueue("a", "{}".into(), TaskOptions::default())
            .await
            .unwrap();
        let task = q.claim().await.unwrap().unwrap();
        assert_eq!(task.retried, 0);
        assert_eq!(task.max_retry, 3);

        q.retry(id, Duration::ZERO, "timeout").await.unwrap();
        let again = q.claim().await.unwrap().unwrap();
        assert_eq!(again.retried, 1);
        assert_eq!(again.last_error.as_deref(), Some("timeout"));

        q.bury(id, "gave up").await.unwrap();
        let dead = q.get(id).await.unwrap().unwrap();
        assert_eq!(dead.state, TaskState::Dead);
        assert!(q.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_active_tasks_are_recovered() {
        let q = queue().await;
        q.enqueue("a", "{}".into(), TaskOptions::default())
            .await
            .unwrap();
        q.claim().await.unwrap().unwrap();
        assert!(q.claim().await.unwrap().is_none());

        assert_eq!(q.recover_stale().await.unwrap(), 1);
        assert!(q.claim().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn huge_delay_saturates_instead_of_wrapping() {
        let q = queue().await;
        let id = q
            .enqueue(
                "send_transactional_email",
                "{}".into(),
                TaskOptions {
                    process_in: parse_duration("20000000000w").unwrap(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(q.claim().await.unwrap().is_none());
        let task = q.get(id).await.unwrap().unwrap();
        assert_eq!(task.run_at, i64::MAX);

        q.retry(id, Duration::MAX, "boom").await.unwrap();
        assert!(q.claim().await.unwrap().is_none());
    }

    #[test]
    fn due_at_is_monotonic_in_delay() {
        let soon = due_at(Duration::from_secs(1));
        let later = due_at(Duration::from_secs(3600));
        assert!(later > soon);
        assert_eq!(due_at(Duration::MAX), i64::MAX);
    }
}
