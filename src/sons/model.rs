//! Son (automation rule) data model.
//!
//! A Son fires on one trigger type, waits its configured delay, then runs
//! its actions in order against Listmonk.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::duration::{ParseDurationError, parse_duration};
use crate::pipeline::types::TriggerType;

/// Free-form action parameters; validated when the action runs.
pub type Params = Map<String, Value>;

/// One side-effecting step of a Son.
///
/// Serialized as `{"type": "...", "parameters": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "snake_case")]
pub enum Action {
    SendTransactionalEmail(Params),
    ManageSubscriber(Params),
    CreateCampaign(Params),
}

impl Action {
    /// Type tag, also used as the queue task name.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Action::SendTransactionalEmail(_) => "send_transactional_email",
            Action::ManageSubscriber(_) => "manage_subscriber",
            Action::CreateCampaign(_) => "create_campaign",
        }
    }

    pub fn params(&self) -> &Params {
        match self {
            Action::SendTransactionalEmail(p)
            | Action::ManageSubscriber(p)
            | Action::CreateCampaign(p) => p,
        }
    }
}

/// A stored automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Son {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub trigger: TriggerType,
    /// Delay before the actions become eligible to run (e.g. `"1h"`).
    pub delay: String,
    pub actions: Vec<Action>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Son {
    pub fn parsed_delay(&self) -> Result<Duration, ParseDurationError> {
        parse_duration(&self.delay)
    }
}

/// Longest delay a Son may be saved with.
pub const MAX_DELAY: Duration = Duration::from_secs(365 * 86_400);

/// Parse `delay` and require it to be within [`MAX_DELAY`].
pub fn check_delay(delay: &str) -> Result<Duration, String> {
    let d = parse_duration(delay).map_err(|e| e.to_string())?;
    if d > MAX_DELAY {
        return Err(format!("delay {delay:?} exceeds 365 days"));
    }
    Ok(d)
}

/// Client-supplied fields for creating or replacing a Son.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSon {
    pub name: String,
    pub trigger: TriggerType,
    #[serde(default = "zero_delay", deserialize_with = "deserialize_delay")]
    pub delay: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn zero_delay() -> String {
    "0".to_string()
}

fn default_enabled() -> bool {
    true
}

/// Accept a delay as a JSON number of minutes or a duration string.
fn deserialize_delay<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => {
            let minutes = n
                .as_f64()
                .filter(|m| m.is_finite() && *m >= 0.0)
                .ok_or_else(|| D::Error::custom("delay must be a non-negative number of minutes"))?;
            if minutes > (MAX_DELAY.as_secs() / 60) as f64 {
                return Err(D::Error::custom("delay exceeds 365 days"));
            }
            let delay = format!("{}m", minutes.trunc() as u64);
            check_delay(&delay).map_err(D::Error::custom)?;
            Ok(delay)
        }
        Value::String(s) => {
            check_delay(&s).map_err(D::Error::custom)?;
            Ok(s.trim().to_string())
        }
        Value::Null => Ok(zero_delay()),
        _ => Err(D::Error::custom("invalid duration")),
    }
}
