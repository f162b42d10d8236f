//! One handler per action variant, each making Listmonk calls for a unit.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::ActionError;
use crate::executor::template::render_campaign_body;
use crate::executor::unit::ExecutionUnit;
use crate::listmonk::{MarketingApi, NewCampaign, SubscriberUpsert, TransactionalEmail};
use crate::pipeline::types::EventPayload;
use crate::sons::model::Params;

/// Status every managed subscriber is given; `params.status` is not consulted.
pub const SUBSCRIBER_STATUS: &str = "enabled";

/// Campaigns without a usable future `send_at` go out this far from now.
pub const DEFAULT_SEND_DELAY_MINUTES: i64 = 5;

const GEO_FIELDS: [&str; 5] = ["city", "country", "latitude", "longitude", "timezone"];

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, unit: &ExecutionUnit) -> Result<(), ActionError>;
}

// ── send_transactional_email ────────────────────────────────────────

pub struct TransactionalEmailHandler {
    api: Arc<dyn MarketingApi>,
}

impl TransactionalEmailHandler {
    pub fn new(api: Arc<dyn MarketingApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ActionHandler for TransactionalEmailHandler {
    async fn execute(&self, unit: &ExecutionUnit) -> Result<(), ActionError> {
        let params = unit.action.params();
        let template_id = int_param(params, "template_id")?;
        let email = member_email(&unit.data)?;

        let headers = match params.get("headers") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|h| {
                    h.as_object().cloned().ok_or(ActionError::InvalidParameter {
                        name: "headers",
                        reason: "expected a list of objects".into(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(ActionError::InvalidParameter {
                    name: "headers",
                    reason: "expected a list of objects".into(),
                });
            }
        };

        let extra = match params.get("data") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(ActionError::InvalidParameter {
                    name: "data",
                    reason: "expected an object".into(),
                });
            }
        };

        let mut data = unit.data.as_map().clone();
        data.extend(extra);

        info!(to = %email, template_id, "Sending transactional email");
        self.api
            .send_transactional(&TransactionalEmail {
                subscriber_email: email.to_string(),
                template_id,
                data,
                headers,
            })
            .await?;
        Ok(())
    }
}

// ── manage_subscriber ───────────────────────────────────────────────

pub struct SubscriberHandler {
    api: Arc<dyn MarketingApi>,
}

impl SubscriberHandler {
    pub fn new(api: Arc<dyn MarketingApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ActionHandler for SubscriberHandler {
    async fn execute(&self, unit: &ExecutionUnit) -> Result<(), ActionError> {
        let params = unit.action.params();
        let email = member_email(&unit.data)?;
        let name = unit.data.current_str("member", "name").unwrap_or_default();

        if let Some(requested) = params.get("status").and_then(Value::as_str) {
            if requested != SUBSCRIBER_STATUS {
                debug!(requested, "Ignoring subscriber status parameter");
            }
        }

        let lists: Vec<i64> = params
            .get("lists")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(as_int).collect())
            .unwrap_or_default();

        let subscriber = SubscriberUpsert {
            email: email.to_string(),
            name: name.to_string(),
            status: SUBSCRIBER_STATUS.to_string(),
            lists,
            attribs: geolocation_attribs(&unit.data),
            preconfirm_subscriptions: true,
        };
        info!(email = %subscriber.email, lists = ?subscriber.lists, "Managing subscriber");
        self.api.upsert_subscriber(&subscriber).await?;
        Ok(())
    }
}

/// Parse `member.current.geolocation` (a JSON string) into subscriber attributes.
///
/// Returns an empty map when the field is absent or unparsable.
pub fn geolocation_attribs(payload: &EventPayload) -> Map<String, Value> {
    let Some(raw) = payload.current("member").and_then(|m| m.get("geolocation")) else {
        return Map::new();
    };

    let geo = match raw {
        Value::String(s) => match serde_json::from_str::<Map<String, Value>>(s) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "Error parsing geolocation data");
                return Map::new();
            }
        },
        Value::Object(map) => map.clone(),
        _ => return Map::new(),
    };

    GEO_FIELDS
        .iter()
        .map(|k| (k.to_string(), geo.get(*k).cloned().unwrap_or(Value::Null)))
        .collect()
}

// ── create_campaign ─────────────────────────────────────────────────

pub struct CampaignHandler {
    api: Arc<dyn MarketingApi>,
}

impl CampaignHandler {
    pub fn new(api: Arc<dyn MarketingApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ActionHandler for CampaignHandler {
    async fn execute(&self, unit: &ExecutionUnit) -> Result<(), ActionError> {
        let params = unit.action.params();
        let now = Utc::now();

        let name = str_param(params, "name")?;
        let subject = str_param(params, "subject")?;
        let lists = id_list_param(params, "lists")?;
        let template_id = int_param(params, "template_id")?;
        let content_type = params
            .get("content_type")
            .and_then(Value::as_str)
            .unwrap_or("html");
        let body_template = params.get("body").and_then(Value::as_str).unwrap_or_default();

        let campaign = NewCampaign {
            name: unique_campaign_name(name, now),
            subject: subject.to_string(),
            lists,
            template_id,
            send_at: resolve_send_at(params.get("send_at"), now),
            body: render_campaign_body(body_template, &unit.data)?,
            content_type: content_type.to_string(),
        };

        info!(name = %campaign.name, send_at = %campaign.send_at, "Creating campaign");
        let campaign_id = self.api.create_campaign(&campaign).await?;

        self.api
            .update_campaign_status(campaign_id, "scheduled")
            .await
            .map_err(|source| ActionError::StatusTransition {
                campaign_id,
                source,
            })?;
        Ok(())
    }
}

/// `{name}_YYYYMMDD_HHMMSS_{5 random alphanumerics}`.
pub fn unique_campaign_name(name: &str, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(char::from)
        .collect();
    format!("{name}_{}_{suffix}", now.format("%Y%m%d_%H%M%S"))
}

/// Keep a future RFC 3339 `send_at` as given; otherwise schedule for now + 5 minutes.
pub fn resolve_send_at(requested: Option<&Value>, now: DateTime<Utc>) -> String {
    if let Some(raw) = requested.and_then(Value::as_str) {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(at) if at.with_timezone(&Utc) > now => return raw.to_string(),
            Ok(_) => debug!(send_at = raw, "send_at is in the past, rescheduling"),
            Err(e) => warn!(send_at = raw, error = %e, "Malformed send_at, rescheduling"),
        }
    }
    (now + chrono::Duration::minutes(DEFAULT_SEND_DELAY_MINUTES))
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ── Parameter helpers ───────────────────────────────────────────────

fn member_email(payload: &EventPayload) -> Result<&str, ActionError> {
    payload
        .current_str("member", "email")
        .ok_or(ActionError::MissingField("member email"))
}

fn str_param<'a>(params: &'a Params, name: &'static str) -> Result<&'a str, ActionError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or(ActionError::MissingParameter(name))
}

/// Integer-valued JSON number (`3` or `3.0`) or numeric string.
fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn int_param(params: &Params, name: &'static str) -> Result<i64, ActionError> {
    match params.get(name) {
        None | Some(Value::Null) => Err(ActionError::MissingParameter(name)),
        Some(v) => as_int(v).ok_or_else(|| ActionError::InvalidParameter {
            name,
            reason: format!("expected an integer, got {v}"),
        }),
    }
}

fn id_list_param(params: &Params, name: &'static str) -> Result<Vec<i64>, ActionError> {
    let items = params
        .get(name)
        .and_then(Value::as_array)
        .ok_or(ActionError::MissingParameter(name))?;
    items
        .iter()
        .enumerate()
        .map(|(i, v)| {
            as_int(v).ok_or_else(|| ActionError::InvalidParameter {
                name,
                reason: format!("invalid list ID at index {i}"),
            })
        })
        .collect()
}
