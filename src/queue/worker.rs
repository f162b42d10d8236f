//! Worker pool draining the persistent queue.

use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::queue::{PersistentQueue, TaskHandler, TaskRecord, retry_delay};

pub struct WorkerPool {
    queue: Arc<PersistentQueue>,
    handler: Arc<dyn TaskHandler>,
    config: QueueConfig,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<PersistentQueue>,
        handler: Arc<dyn TaskHandler>,
        config: QueueConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency));
        Self {
            queue,
            handler,
            config,
            permits,
        }
    }

    /// Poll for due tasks until `shutdown` flips to `true`, then wait for
    /// in-flight tasks to finish.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                concurrency = self.config.concurrency,
                poll_ms = self.config.poll_interval.as_millis() as u64,
                "Worker pool started"
            );
            let mut ticker = tokio::time::interval(self.config.poll_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.dispatch_due().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            let all = self.config.concurrency as u32;
            if let Ok(_drained) = self.permits.acquire_many(all).await {
                info!("Worker pool stopped");
            }
        })
    }

    /// Claim due tasks while permits are free, running each on its own task.
    async fn dispatch_due(self: &Arc<Self>) {
        loop {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                return;
            };
            let task = match self.queue.claim().await {
                Ok(Some(task)) => task,
                Ok(None) => return,
                Err(e) => {
                    error!(error = %e, "Failed to claim task");
                    return;
                }
            };
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                pool.run_task(task).await;
                drop(permit);
            });
        }
    }

    /// Run every task that is currently due, one after another.
    ///
    /// Returns how many tasks were executed.
    pub async fn drain(&self) -> Result<usize, QueueError> {
        let mut count = 0;
        while let Some(task) = self.queue.claim().await? {
            self.run_task(task).await;
            count += 1;
        }
        Ok(count)
    }

    /// Execute one claimed task and settle its state.
    async fn run_task(&self, task: TaskRecord) {
        debug!(task_id = %task.id, kind = %task.kind, attempt = task.retried + 1, "Running task");

        let settled = match self.handler.handle(&task).await {
            Ok(()) => self.queue.complete(task.id).await,
            Err(e) if !e.retryable || task.is_final_attempt() => {
                warn!(
                    task_id = %task.id,
                    kind = %task.kind,
                    retried = task.retried,
                    error = %e,
                    "Task failed permanently"
                );
                self.queue.bury(task.id, &e.message).await
            }
            Err(e) => {
                let delay = retry_delay(task.retried);
                warn!(
                    task_id = %task.id,
                    kind = %task.kind,
                    retried = task.retried,
                    retry_in_secs = delay.as_secs(),
                    error = %e,
                    "Task failed, scheduling retry"
                );
                self.queue.retry(task.id, delay, &e.message).await
            }
        };

        if let Err(e) = settled {
            error!(task_id = %task.id, error = %e, "Failed to update task state");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::queue::{TaskError, TaskOptions, TaskQueue, TaskState};
    use crate::store::{Database, LibSqlBackend};

    struct Flaky {
        calls: AtomicUsize,
        fail_first: usize,
        retryable: bool,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn handle(&self, _task: &TaskRecord) -> Result<(), TaskError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(TaskError {
                    message: format!("attempt {n} failed"),
                    retryable: self.retryable,
                })
            } else {
                Ok(())
            }
        }
    }

    async fn pool(handler: Arc<Flaky>) -> (Arc<PersistentQueue>, WorkerPool) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let queue = Arc::new(PersistentQueue::new(db));
        let pool = WorkerPool::new(queue.clone(), handler, QueueConfig::default());
        (queue, pool)
    }

    #[tokio::test]
    async fn successful_task_completes() {
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            retryable: true,
        });
        let (queue, pool) = pool(handler.clone()).await;
        let id = queue
            .enqueue("a", "{}".into(), TaskOptions::default())
            .await
            .unwrap();

        assert_eq!(pool.drain().await.unwrap(), 1);
        let task = queue.get(id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn retryable_failure_is_rescheduled_with_backoff() {
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 1,
            retryable: true,
        });
        let (queue, pool) = pool(handler.clone()).await;
        let id = queue
            .enqueue("a", "{}".into(), TaskOptions::default())
            .await
            .unwrap();

        assert_eq!(pool.drain().await.unwrap(), 1);
        let task = queue.get(id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.retried, 1);
        assert!(task.run_at >= chrono::Utc::now().timestamp_millis() + 10_000);
        assert_eq!(task.last_error.as_deref(), Some("attempt 0 failed"));
    }

    #[tokio::test]
    async fn permanent_failure_is_buried() {
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 1,
            retryable: false,
        });
        let (queue, pool) = pool(handler).await;
        let id = queue
            .enqueue("a", "{}".into(), TaskOptions::default())
            .await
            .unwrap();

        pool.drain().await.unwrap();
        assert_eq!(queue.get(id).await.unwrap().unwrap().state, TaskState::Dead);
    }

    #[tokio::test]
    async fn zero_retry_budget_buries_on_first_failure() {
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 5,
            retryable: true,
        });
        let (queue, pool) = pool(handler).await;
        let id = queue
            .enqueue(
                "a",
                "{}".into(),
                TaskOptions {
                    max_retry: 0,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        pool.drain().await.unwrap();
        assert_eq!(queue.get(id).await.unwrap().unwrap().state, TaskState::Dead);
    }

    #[tokio::test]
    async fn spawned_pool_processes_and_stops() {
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            retryable: true,
        });
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let queue = Arc::new(PersistentQueue::new(db));
        let config = QueueConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
        };
        let pool = Arc::new(WorkerPool::new(queue.clone(), handler.clone(), config));
        for _ in 0..3 {
            queue
                .enqueue("a", "{}".into(), TaskOptions::default())
                .await
                .unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let handle = pool.spawn(rx);

        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.calls.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("tasks were not processed");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pool did not stop")
            .unwrap();
    }
}
