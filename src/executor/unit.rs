//! The queued unit of work: one action plus the event that triggered it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::types::EventPayload;
use crate::sons::model::Action;

/// Task payload, serialized as `{"action", "data", "execution_id"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    pub action: Action,
    pub data: EventPayload,
    pub execution_id: Uuid,
}
