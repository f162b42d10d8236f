//! Queue handler that executes action units and records their outcome.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::ActionError;
use crate::executor::actions::{
    ActionHandler, CampaignHandler, SubscriberHandler, TransactionalEmailHandler,
};
use crate::executor::unit::ExecutionUnit;
use crate::listmonk::MarketingApi;
use crate::logs::ExecutionLogger;
use crate::logs::execution::{ActionStatus, record_action_best_effort};
use crate::queue::{TaskError, TaskHandler, TaskRecord};
use crate::sons::model::Action;

pub struct ActionRunner {
    transactional: TransactionalEmailHandler,
    subscriber: SubscriberHandler,
    campaign: CampaignHandler,
    logger: Arc<ExecutionLogger>,
}

impl ActionRunner {
    pub fn new(api: Arc<dyn MarketingApi>, logger: Arc<ExecutionLogger>) -> Self {
        Self {
            transactional: TransactionalEmailHandler::new(api.clone()),
            subscriber: SubscriberHandler::new(api.clone()),
            campaign: CampaignHandler::new(api),
            logger,
        }
    }

    fn handler_for(&self, action: &Action) -> &dyn ActionHandler {
        match action {
            Action::SendTransactionalEmail(_) => &self.transactional,
            Action::ManageSubscriber(_) => &self.subscriber,
            Action::CreateCampaign(_) => &self.campaign,
        }
    }

    /// Execute one unit without touching the execution log.
    pub async fn run_unit(&self, unit: &ExecutionUnit) -> Result<(), ActionError> {
        self.handler_for(&unit.action).execute(unit).await
    }
}

#[async_trait]
impl TaskHandler for ActionRunner {
    async fn handle(&self, task: &TaskRecord) -> Result<(), TaskError> {
        let unit: ExecutionUnit = serde_json::from_str(&task.payload).map_err(|e| {
            let err = ActionError::InvalidUnit(e.to_string());
            error!(task_id = %task.id, kind = %task.kind, error = %err, "Dropping task");
            TaskError::permanent(err.to_string())
        })?;
        let kind = unit.action.type_tag();

        match self.run_unit(&unit).await {
            Ok(()) => {
                info!(execution_id = %unit.execution_id, action = kind, "Action succeeded");
                record_action_best_effort(
                    &self.logger,
                    unit.execution_id,
                    kind,
                    ActionStatus::Success,
                    None,
                )
                .await;
                Ok(())
            }
            Err(err @ ActionError::StatusTransition { .. }) => {
                // The campaign exists; only the scheduling step failed.
                let message = err.to_string();
                error!(execution_id = %unit.execution_id, error = %message, "Campaign left unscheduled");
                record_action_best_effort(
                    &self.logger,
                    unit.execution_id,
                    kind,
                    ActionStatus::Success,
                    None,
                )
                .await;
                record_action_best_effort(
                    &self.logger,
                    unit.execution_id,
                    "update_campaign_status",
                    ActionStatus::Failure,
                    Some(&message),
                )
                .await;
                Err(TaskError::permanent(message))
            }
            Err(err) => {
                let message = err.to_string();
                let retryable = err.is_retryable();
                if retryable && !task.is_final_attempt() {
                    warn!(
                        execution_id = %unit.execution_id,
                        action = kind,
                        attempt = task.retried + 1,
                        error = %message,
                        "Action failed, will retry"
                    );
                } else {
                    error!(execution_id = %unit.execution_id, action = kind, error = %message, "Action failed");
                    record_action_best_effort(
                        &self.logger,
                        unit.execution_id,
                        kind,
                        ActionStatus::Failure,
                        Some(&message),
                    )
                    .await;
                }
                Err(TaskError { message, retryable })
            }
        }
    }
}
