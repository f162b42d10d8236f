//! Webhook processor: classify an event, match Sons, dispatch each match.
//!
//! Dispatch runs off the request path. The returned count is the number of
//! Sons handed to the spawner, not the number that finished enqueueing.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::executor::{Dispatcher, TaskSpawner};
use crate::pipeline::classify::classify;
use crate::pipeline::rules::match_sons;
use crate::pipeline::types::{EventPayload, TriggerType};
use crate::store::Database;

/// Result of processing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub trigger: TriggerType,
    pub sons_executed: usize,
}

pub struct WebhookProcessor {
    db: Arc<dyn Database>,
    dispatcher: Arc<Dispatcher>,
    spawner: Arc<dyn TaskSpawner>,
}

impl WebhookProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        dispatcher: Arc<Dispatcher>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        Self {
            db,
            dispatcher,
            spawner,
        }
    }

    /// Process one event for `user_id`.
    ///
    /// Replaying the same payload dispatches again; there is no deduplication.
    pub async fn process(
        &self,
        user_id: &str,
        payload: EventPayload,
        webhook_log_id: Option<Uuid>,
    ) -> Result<ProcessOutcome, PipelineError> {
        let trigger = classify(&payload)?;
        let sons = self.db.list_sons(user_id).await?;
        let matched = match_sons(trigger, &sons);

        info!(
            user_id,
            trigger = %trigger,
            matched = matched.len(),
            "Dispatching sons"
        );

        let payload = Arc::new(payload);
        for son in &matched {
            let dispatcher = Arc::clone(&self.dispatcher);
            let payload = Arc::clone(&payload);
            let son = son.clone();
            self.spawner.spawn(
                async move {
                    if let Err(e) = dispatcher.dispatch(&son, &payload, webhook_log_id).await {
                        error!(son_id = %son.id, error = %e, "Failed to dispatch son");
                    }
                }
                .boxed(),
            );
        }

        Ok(ProcessOutcome {
            trigger,
            sons_executed: matched.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::error::QueueError;
    use crate::executor::DeferredSpawner;
    use crate::logs::ExecutionLogger;
    use crate::queue::{TaskOptions, TaskQueue};
    use crate::sons::model::{Action, Son};
    use crate::store::LibSqlBackend;

    #[derive(Default)]
    struct CountingQueue {
        kinds: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskQueue for CountingQueue {
        async fn enqueue(
            &self,
            kind: &str,
            _payload: String,
            _options: TaskOptions,
        ) -> Result<Uuid, QueueError> {
            self.kinds.lock().unwrap().push(kind.to_string());
            Ok(Uuid::new_v4())
        }
    }

    struct Harness {
        db: Arc<dyn Database>,
        queue: Arc<CountingQueue>,
        spawner: Arc<DeferredSpawner>,
        processor: WebhookProcessor,
    }

    async fn harness() -> Harness {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let queue = Arc::new(CountingQueue::default());
        let logger = Arc::new(ExecutionLogger::new(db.clone(), Duration::from_secs(60)));
        let dispatcher = Arc::new(Dispatcher::new(queue.clone(), logger));
        let spawner = Arc::new(DeferredSpawner::new());
        let processor = WebhookProcessor::new(db.clone(), dispatcher, spawner.clone());
        Harness {
            db,
            queue,
            spawner,
            processor,
        }
    }

    async fn add_son(db: &Arc<dyn Database>, user: &str, trigger: TriggerType, enabled: bool) {
        db.insert_son(&Son {
            id: Uuid::new_v4(),
            user_id: user.into(),
            name: format!("{trigger} son"),
            trigger,
            delay: "0".into(),
            actions: vec![Action::ManageSubscriber(Default::default())],
            enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
    }

    fn member_created() -> EventPayload {
        serde_json::from_value(json!({
            "member": {"current": {"email": "new@example.com"}, "previous": {}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn dispatches_matching_enabled_sons_only() {
        let h = harness().await;
        add_son(&h.db, "u1", TriggerType::MemberCreated, true).await;
        add_son(&h.db, "u1", TriggerType::MemberCreated, false).await;
        add_son(&h.db, "u1", TriggerType::PostPublished, true).await;
        add_son(&h.db, "u2", TriggerType::MemberCreated, true).await;

        let outcome = h.processor.process("u1", member_created(), None).await.unwrap();
        assert_eq!(outcome.trigger, TriggerType::MemberCreated);
        assert_eq!(outcome.sons_executed, 1);

        assert!(h.queue.kinds.lock().unwrap().is_empty());
        assert_eq!(h.spawner.run_pending().await, 1);
        assert_eq!(*h.queue.kinds.lock().unwrap(), vec!["manage_subscriber".to_string()]);
    }

    #[tokio::test]
    async fn replay_dispatches_again() {
        let h = harness().await;
        add_son(&h.db, "u1", TriggerType::MemberCreated, true).await;
        add_son(&h.db, "u1", TriggerType::MemberCreated, true).await;

        let first = h.processor.process("u1", member_created(), None).await.unwrap();
        let second = h.processor.process("u1", member_created(), None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.sons_executed, 2);

        assert_eq!(h.spawner.run_pending().await, 4);
        assert_eq!(h.queue.kinds.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn unclassifiable_event_is_rejected_before_dispatch() {
        let h = harness().await;
        add_son(&h.db, "u1", TriggerType::MemberCreated, true).await;

        let payload: EventPayload = serde_json::from_value(json!({"tag": {"current": {}}})).unwrap();
        let err = h.processor.process("u1", payload, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownTriggerType));
        assert!(h.spawner.is_empty());
    }

    #[tokio::test]
    async fn no_matching_sons_is_not_an_error() {
        let h = harness().await;
        let outcome = h.processor.process("u1", member_created(), None).await.unwrap();
        assert_eq!(outcome.sons_executed, 0);
        assert!(h.spawner.is_empty());
    }
}
