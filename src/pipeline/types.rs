//! Shared types for the webhook pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;

// ── Trigger type ────────────────────────────────────────────────────

/// Category of a Ghost event a Son can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    MemberCreated,
    MemberDeleted,
    MemberUpdated,
    PagePublished,
    PostPublished,
    PostScheduled,
}

impl TriggerType {
    pub const ALL: [TriggerType; 6] = [
        TriggerType::MemberCreated,
        TriggerType::MemberDeleted,
        TriggerType::MemberUpdated,
        TriggerType::PagePublished,
        TriggerType::PostPublished,
        TriggerType::PostScheduled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::MemberCreated => "member_created",
            TriggerType::MemberDeleted => "member_deleted",
            TriggerType::MemberUpdated => "member_updated",
            TriggerType::PagePublished => "page_published",
            TriggerType::PostPublished => "post_published",
            TriggerType::PostScheduled => "post_scheduled",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TriggerType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown trigger type: {s}"))
    }
}

// ── Event payload ───────────────────────────────────────────────────

/// Decoded webhook body.
///
/// Ghost sends differently shaped documents per event, so fields are probed
/// rather than deserialized into a fixed struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPayload(Map<String, Value>);

impl EventPayload {
    /// Decode a raw request body. Only JSON objects are accepted.
    pub fn from_slice(body: &[u8]) -> Result<Self, PipelineError> {
        serde_json::from_slice(body).map_err(|e| PipelineError::InvalidPayload(e.to_string()))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The nested object at `root` (e.g. `member`), if it is an object.
    pub fn object(&self, root: &str) -> Option<&Map<String, Value>> {
        self.0.get(root).and_then(Value::as_object)
    }

    /// `{root}.current` as an object.
    pub fn current(&self, root: &str) -> Option<&Map<String, Value>> {
        self.object(root)?.get("current").and_then(Value::as_object)
    }

    /// A string field inside `{root}.current`. Empty strings count as absent.
    pub fn current_str(&self, root: &str, field: &str) -> Option<&str> {
        self.current(root)?
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

impl From<Map<String, Value>> for EventPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
