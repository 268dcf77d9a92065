// Server-side actions invoked on behalf of the chat UI: connect an Instagram
// handle and get a chat reply. Both are proxied to the data backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument};

use crate::constants;

/// Result of connecting a handle. `data` is whatever the backend returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOutcome {
    pub message: Option<String>,
    pub data: Value,
}

impl ConnectOutcome {
    pub fn from_backend(data: Value) -> Self {
        let message = data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self { message, data }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub data: Value,
}

impl ChatReply {
    pub fn from_backend(data: Value) -> Self {
        let response = data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(constants::NO_RESPONSE_RECEIVED)
            .to_string();
        Self { response, data }
    }
}

#[async_trait]
pub trait Actions: Send + Sync {
    /// Hand the handle to the data service so its content can be queried later.
    async fn process_identity(&self, handle: &str) -> Result<ConnectOutcome>;

    /// Ask a question. `social_data` is what `process_identity` returned, if anything.
    async fn chat_reply(&self, query: &str, social_data: Option<&Value>) -> Result<ChatReply>;
}

#[derive(Serialize)]
struct ProcessDataRequest<'a> {
    instagram_id: &'a str,
}

#[derive(Serialize)]
struct ProcessQueryRequest<'a> {
    query: &'a str,
}

/// Actions backed by the HTTP data backend (`/process_data`, `/process_query`).
#[derive(Debug, Clone)]
pub struct BackendActions {
    client: Client,
    base_url: String,
}

impl BackendActions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<T: Serialize + ?Sized>(&self, route: &str, body: &T) -> Result<Value> {
        let url = format!("{}{}", self.base_url, route);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .context(format!("Failed to send request to backend at {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, route, "Backend request failed");
            return Err(anyhow::anyhow!(
                "Backend request to {} failed with status {}: {}",
                route,
                status,
                error_body
            ));
        }

        response
            .json::<Value>()
            .await
            .context(format!("Failed to parse JSON response from {}", route))
    }
}

#[async_trait]
impl Actions for BackendActions {
    #[instrument(skip(self))]
    async fn process_identity(&self, handle: &str) -> Result<ConnectOutcome> {
        let data = self
            .post_json("/process_data", &ProcessDataRequest { instagram_id: handle })
            .await?;
        debug!(?data, "Backend processed Instagram data");
        Ok(ConnectOutcome::from_backend(data))
    }

    #[instrument(skip(self, _social_data))]
    async fn chat_reply(&self, query: &str, _social_data: Option<&Value>) -> Result<ChatReply> {
        let data = self
            .post_json("/process_query", &ProcessQueryRequest { query })
            .await?;
        Ok(ChatReply::from_backend(data))
    }
}
