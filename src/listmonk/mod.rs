//! Listmonk marketing API: the operations actions need, behind a trait.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ListmonkError;

pub use client::ListmonkClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListmonkList {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListmonkTemplate {
    pub id: i64,
    pub name: String,
}

/// Body of `POST /api/tx`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionalEmail {
    pub subscriber_email: String,
    pub template_id: i64,
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Map<String, Value>>,
}

/// Body of `POST /api/subscribers`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriberUpsert {
    pub email: String,
    pub name: String,
    pub status: String,
    pub lists: Vec<i64>,
    pub attribs: Map<String, Value>,
    pub preconfirm_subscriptions: bool,
}

/// Body of `POST /api/campaigns`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCampaign {
    pub name: String,
    pub subject: String,
    pub lists: Vec<i64>,
    pub template_id: i64,
    /// RFC 3339.
    pub send_at: String,
    pub body: String,
    pub content_type: String,
}

#[async_trait]
pub trait MarketingApi: Send + Sync {
    async fn get_lists(&self) -> Result<Vec<ListmonkList>, ListmonkError>;

    async fn get_templates(&self) -> Result<Vec<ListmonkTemplate>, ListmonkError>;

    async fn send_transactional(&self, email: &TransactionalEmail) -> Result<(), ListmonkError>;

    async fn upsert_subscriber(&self, subscriber: &SubscriberUpsert) -> Result<(), ListmonkError>;

    /// Create a campaign and return its id.
    async fn create_campaign(&self, campaign: &NewCampaign) -> Result<i64, ListmonkError>;

    async fn update_campaign_status(&self, id: i64, status: &str) -> Result<(), ListmonkError>;
}
