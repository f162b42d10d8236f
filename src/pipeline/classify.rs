//! Trigger classification for Ghost webhook payloads.
//!
//! First match wins, in this order:
//! 1. `member` object: `current` + non-empty `previous` → updated,
//!    `current` alone → created, no `current` → deleted.
//! 2. `post.current.status`: `published` / `scheduled`.
//! 3. `page.current.status == "published"`.
//!
//! A payload carrying both `member` and `post` is always a member event.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::pipeline::types::{EventPayload, TriggerType};

/// Determine which trigger an event payload represents.
pub fn classify(payload: &EventPayload) -> Result<TriggerType, PipelineError> {
    if let Some(member) = payload.object("member") {
        let trigger = match member.get("current").and_then(Value::as_object) {
            Some(_) if has_non_empty_object(member.get("previous")) => TriggerType::MemberUpdated,
            Some(_) => TriggerType::MemberCreated,
            None => TriggerType::MemberDeleted,
        };
        info!(trigger = %trigger, "Classified member event");
        return Ok(trigger);
    }

    if let Some(status) = status_of(payload, "post") {
        match status {
            "published" => return Ok(TriggerType::PostPublished),
            "scheduled" => return Ok(TriggerType::PostScheduled),
            other => debug!(status = other, "Post event with unhandled status"),
        }
    }

    if status_of(payload, "page") == Some("published") {
        return Ok(TriggerType::PagePublished);
    }

    let raw = serde_json::to_string(payload).unwrap_or_default();
    warn!(payload = %raw, "Unable to determine trigger type");
    Err(PipelineError::UnknownTriggerType)
}

fn status_of<'a>(payload: &'a EventPayload, root: &str) -> Option<&'a str> {
    payload.current(root)?.get("status").and_then(Value::as_str)
}

fn has_non_empty_object(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_object)
        .is_some_and(|obj| !obj.is_empty())
}
