//! Error types for the connector.

use uuid::Uuid;

use crate::duration::ParseDurationError;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised while turning an inbound event into dispatched rules.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("UnknownTriggerType: unable to determine trigger type from webhook data")]
    UnknownTriggerType,

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Work queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to enqueue task {kind}: {reason}")]
    Enqueue { kind: String, reason: String },

    #[error("Queue storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Errors from executing a single action unit.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid or missing {0} parameter")]
    MissingParameter(&'static str),

    #[error("invalid {name} parameter: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("invalid or missing {0} in event payload")]
    MissingField(&'static str),

    #[error("failed to render campaign template: {0}")]
    Template(String),

    #[error(transparent)]
    Api(#[from] ListmonkError),

    #[error("campaign {campaign_id} created but status transition failed: {source}")]
    StatusTransition {
        campaign_id: i64,
        #[source]
        source: ListmonkError,
    },

    #[error("malformed execution unit: {0}")]
    InvalidUnit(String),
}

impl ActionError {
    /// Whether the queue should schedule another attempt for this failure.
    ///
    /// A failed status transition happens after the campaign already exists,
    /// so another attempt would create a duplicate.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ActionError::StatusTransition { .. } | ActionError::InvalidUnit(_)
        )
    }
}

/// Errors from Son management.
#[derive(Debug, thiserror::Error)]
pub enum SonError {
    #[error("Son not found")]
    NotFound(Uuid),

    #[error("Son belongs to another user")]
    Forbidden(Uuid),

    #[error("invalid Son: {0}")]
    Invalid(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Errors from the aggregate stats query.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("invalid timeframe: {0}")]
    InvalidTimeframe(#[from] ParseDurationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Marketing API client errors.
#[derive(Debug, thiserror::Error)]
pub enum ListmonkError {
    #[error("request to {endpoint} failed: {reason}")]
    Request { endpoint: String, reason: String },

    #[error("unexpected status code: {status}, body: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}
