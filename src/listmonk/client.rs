//! `reqwest` implementation of [`MarketingApi`].

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::ListmonkConfig;
use crate::error::ListmonkError;
use crate::listmonk::{
    ListmonkList, ListmonkTemplate, MarketingApi, NewCampaign, SubscriberUpsert,
    TransactionalEmail,
};

/// Listmonk wraps every response as `{"data": ...}`.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct Page<T> {
    results: Vec<T>,
}

#[derive(Deserialize)]
struct Created {
    id: i64,
}

pub struct ListmonkClient {
    base_url: String,
    username: Option<String>,
    password: Option<SecretString>,
    client: reqwest::Client,
}

impl ListmonkClient {
    pub fn new(config: &ListmonkConfig) -> Result<Self, ListmonkError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| ListmonkError::Request {
            endpoint: config.base_url.clone(),
            reason: format!("failed to build HTTP client: {e}"),
        })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.client.request(method, format!("{}{path}", self.base_url));
        match &self.username {
            Some(user) => req.basic_auth(
                user,
                self.password.as_ref().map(|p| p.expose_secret().to_string()),
            ),
            None => req,
        }
    }

    /// Send a request and decode the `data` field of a 200 response.
    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        req: RequestBuilder,
    ) -> Result<T, ListmonkError> {
        let resp = req.send().await.map_err(|e| ListmonkError::Request {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| ListmonkError::Request {
            endpoint: endpoint.to_string(),
            reason: format!("failed to read response body: {e}"),
        })?;

        if status != StatusCode::OK {
            return Err(ListmonkError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str::<Envelope<T>>(&body)
            .map(|env| env.data)
            .map_err(|e| ListmonkError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl MarketingApi for ListmonkClient {
    async fn get_lists(&self) -> Result<Vec<ListmonkList>, ListmonkError> {
        let page: Page<ListmonkList> = self
            .send(
                "/api/lists",
                self.request(Method::GET, "/api/lists?page=1&per_page=100"),
            )
            .await?;
        Ok(page.results)
    }

    async fn get_templates(&self) -> Result<Vec<ListmonkTemplate>, ListmonkError> {
        self.send(
            "/api/templates",
            self.request(Method::GET, "/api/templates?page=1&per_page=100"),
        )
        .await
    }

    async fn send_transactional(&self, email: &TransactionalEmail) -> Result<(), ListmonkError> {
        let _: serde_json::Value = self
            .send("/api/tx", self.request(Method::POST, "/api/tx").json(email))
            .await?;
        info!(
            to = %email.subscriber_email,
            template_id = email.template_id,
            "Sent transactional email"
        );
        Ok(())
    }

    async fn upsert_subscriber(&self, subscriber: &SubscriberUpsert) -> Result<(), ListmonkError> {
        debug!(email = %subscriber.email, lists = ?subscriber.lists, "Upserting subscriber");
        let _: serde_json::Value = self
            .send(
                "/api/subscribers",
                self.request(Method::POST, "/api/subscribers").json(subscriber),
            )
            .await?;
        info!(email = %subscriber.email, status = %subscriber.status, "Managed subscriber");
        Ok(())
    }

    async fn create_campaign(&self, campaign: &NewCampaign) -> Result<i64, ListmonkError> {
        let created: Created = self
            .send(
                "/api/campaigns",
                self.request(Method::POST, "/api/campaigns").json(campaign),
            )
            .await?;
        info!(
            campaign_id = created.id,
            name = %campaign.name,
            send_at = %campaign.send_at,
            "Created campaign"
        );
        Ok(created.id)
    }

    async fn update_campaign_status(&self, id: i64, status: &str) -> Result<(), ListmonkError> {
        let path = format!("/api/campaigns/{id}/status");
        let _: serde_json::Value = self
            .send(
                &path,
                self.request(Method::PUT, &path)
                    .json(&serde_json::json!({ "status": status })),
            )
            .await?;
        info!(campaign_id = id, status, "Updated campaign status");
        Ok(())
    }
}
