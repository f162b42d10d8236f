//! Inbound Ghost webhook pipeline.
//!
//! Every delivery flows through:
//! 1. `signature::verify()` against the endpoint's shared secret
//! 2. `classify::classify()` to a single [`types::TriggerType`]
//! 3. `rules::match_sons()` over the owner's enabled Sons
//! 4. `processor::WebhookProcessor` handing each match to the dispatcher

pub mod classify;
pub mod processor;
pub mod rules;
pub mod signature;
pub mod types;

pub use processor::{ProcessOutcome, WebhookProcessor};
pub use types::{EventPayload, TriggerType};
