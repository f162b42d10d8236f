//! Expands a matched Son into queued action tasks.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::executor::unit::ExecutionUnit;
use crate::logs::execution::{ActionStatus, ExecutionStatus, record_action_best_effort};
use crate::logs::ExecutionLogger;
use crate::pipeline::types::EventPayload;
use crate::queue::{QueueName, TaskOptions, TaskQueue};
use crate::sons::model::Son;

/// Retry budget for every action task.
pub const ACTION_MAX_RETRY: u32 = 3;

pub struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
    logger: Arc<ExecutionLogger>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>, logger: Arc<ExecutionLogger>) -> Self {
        Self { queue, logger }
    }

    /// Record an execution for `son` and enqueue one task per action.
    ///
    /// Every action gets its own `queued` or `failure` log. An enqueue failure
    /// does not stop the remaining actions. Returns the execution id.
    pub async fn dispatch(
        &self,
        son: &Son,
        payload: &EventPayload,
        webhook_log_id: Option<Uuid>,
    ) -> Result<Uuid, DatabaseError> {
        let execution_id = self
            .logger
            .log_son_execution(son.id, &son.user_id, webhook_log_id, ExecutionStatus::Success, None)
            .await?;

        let delay = son.parsed_delay().unwrap_or_else(|e| {
            warn!(son_id = %son.id, delay = %son.delay, error = %e, "Invalid son delay, running now");
            Duration::ZERO
        });

        for action in &son.actions {
            let kind = action.type_tag();
            let unit = ExecutionUnit {
                action: action.clone(),
                data: payload.clone(),
                execution_id,
            };

            let encoded = match serde_json::to_string(&unit) {
                Ok(s) => s,
                Err(e) => {
                    error!(son_id = %son.id, action = kind, error = %e, "Failed to encode action");
                    record_action_best_effort(
                        &self.logger,
                        execution_id,
                        kind,
                        ActionStatus::Failure,
                        Some(&e.to_string()),
                    )
                    .await;
                    continue;
                }
            };

            let options = TaskOptions {
                queue: QueueName::Default,
                max_retry: ACTION_MAX_RETRY,
                process_in: delay,
            };

            match self.queue.enqueue(kind, encoded, options).await {
                Ok(task_id) => {
                    info!(
                        son_id = %son.id,
                        task_id = %task_id,
                        action = kind,
                        delay_secs = delay.as_secs(),
                        "Queued action"
                    );
                    record_action_best_effort(
                        &self.logger,
                        execution_id,
                        kind,
                        ActionStatus::Queued,
                        None,
                    )
                    .await;
                }
                Err(e) => {
                    error!(son_id = %son.id, action = kind, error = %e, "Failed to enqueue action");
                    record_action_best_effort(
                        &self.logger,
                        execution_id,
                        kind,
                        ActionStatus::Failure,
                        Some(&e.to_string()),
                    )
                    .await;
                }
            }
        }

        Ok(execution_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::error::QueueError;
    use crate::pipeline::types::TriggerType;
    use crate::sons::model::Action;
    use crate::store::{Database, LibSqlBackend};

    /// Accepts enqueues except for the call numbers in `fail_on` (1-based).
    #[derive(Default)]
    struct FakeQueue {
        calls: Mutex<Vec<(String, String, TaskOptions)>>,
        fail_on: Vec<usize>,
    }

    #[async_trait]
    impl TaskQueue for FakeQueue {
        async fn enqueue(
            &self,
            kind: &str,
            payload: String,
            options: TaskOptions,
        ) -> Result<Uuid, QueueError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((kind.to_string(), payload, options));
            if self.fail_on.contains(&calls.len()) {
                return Err(QueueError::Enqueue {
                    kind: kind.to_string(),
                    reason: "queue unavailable".into(),
                });
            }
            Ok(Uuid::new_v4())
        }
    }

    fn son(delay: &str) -> Son {
        Son {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            name: "Onboarding".into(),
            trigger: TriggerType::MemberCreated,
            delay: delay.into(),
            actions: vec![
                Action::ManageSubscriber(Default::default()),
                Action::SendTransactionalEmail(
                    json!({"template_id": 3}).as_object().cloned().unwrap(),
                ),
                Action::CreateCampaign(Default::default()),
            ],
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn payload() -> EventPayload {
        serde_json::from_value(json!({"member": {"current": {"email": "a@example.com"}}})).unwrap()
    }

    async fn logger() -> Arc<ExecutionLogger> {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        Arc::new(ExecutionLogger::new(db, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn enqueues_one_task_per_action_with_delay() {
        let queue = Arc::new(FakeQueue::default());
        let logger = logger().await;
        let dispatcher = Dispatcher::new(queue.clone(), logger.clone());
        let webhook_log = Uuid::new_v4();

        let exec = dispatcher
            .dispatch(&son("2h"), &payload(), Some(webhook_log))
            .await
            .unwrap();

        let calls = queue.calls.lock().unwrap();
        let kinds: Vec<_> = calls.iter().map(|(k, _, _)| k.as_str()).collect();
        assert_eq!(kinds, ["manage_subscriber", "send_transactional_email", "create_campaign"]);
        for (_, _, opts) in calls.iter() {
            assert_eq!(opts.process_in, Duration::from_secs(7200));
            assert_eq!(opts.max_retry, ACTION_MAX_RETRY);
            assert_eq!(opts.queue, QueueName::Default);
        }

        let unit: ExecutionUnit = serde_json::from_str(&calls[1].1).unwrap();
        assert_eq!(unit.execution_id, exec);
        assert_eq!(unit.action.params()["template_id"], json!(3));
        assert_eq!(unit.data, payload());

        let record = logger.get_execution(exec).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.webhook_log_id, Some(webhook_log));
        let logs = logger.get_action_logs(exec).await.unwrap();
        assert!(logs.iter().all(|l| l.status == ActionStatus::Queued));
        assert_eq!(logs.len(), 3);
    }

    #[tokio::test]
    async fn enqueue_failure_is_logged_and_remaining_actions_continue() {
        let queue = Arc::new(FakeQueue {
            fail_on: vec![2],
            ..Default::default()
        });
        let logger = logger().await;
        let dispatcher = Dispatcher::new(queue.clone(), logger.clone());

        let exec = dispatcher.dispatch(&son("0"), &payload(), None).await.unwrap();

        assert_eq!(queue.calls.lock().unwrap().len(), 3);
        let statuses: Vec<_> = logger
            .get_action_logs(exec)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.status)
            .collect();
        assert_eq!(
            statuses,
            [ActionStatus::Queued, ActionStatus::Failure, ActionStatus::Queued]
        );

        let record = logger.get_execution(exec).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failure);
        assert!(record.error_message.unwrap().contains("queue unavailable"));
    }

    #[tokio::test]
    async fn invalid_delay_runs_immediately() {
        let queue = Arc::new(FakeQueue::default());
        let dispatcher = Dispatcher::new(queue.clone(), logger().await);

        dispatcher.dispatch(&son("soon"), &payload(), None).await.unwrap();

        let calls = queue.calls.lock().unwrap();
        assert!(calls.iter().all(|(_, _, o)| o.process_in == Duration::ZERO));
    }

    #[tokio::test]
    async fn son_without_actions_still_records_execution() {
        let queue = Arc::new(FakeQueue::default());
        let logger = logger().await;
        let dispatcher = Dispatcher::new(queue.clone(), logger.clone());
        let mut s = son("0");
        s.actions.clear();

        let exec = dispatcher.dispatch(&s, &payload(), None).await.unwrap();

        assert!(queue.calls.lock().unwrap().is_empty());
        assert!(logger.get_execution(exec).await.unwrap().is_some());
        assert!(logger.get_action_logs(exec).await.unwrap().is_empty());
    }
}
