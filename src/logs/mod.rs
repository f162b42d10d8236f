//! Execution, webhook-request and activity logs.

pub mod activity;
pub mod execution;
pub mod webhook;

pub use activity::ActivityLog;
pub use execution::{ActionStatus, ExecutionLogger, ExecutionStatus};
pub use webhook::WebhookLogger;
