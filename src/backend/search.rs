// Runs a query through the hosted retrieval flow (Langflow run endpoint) and
// pulls the answer text out of its response.

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument};

use super::ServiceError;

#[derive(Debug, Clone, Default)]
pub struct FlowConfig {
    pub base_api_url: Option<String>,
    pub langflow_id: Option<String>,
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

#[derive(Serialize)]
struct RunRequest<'a> {
    input_value: &'a str,
    output_type: &'a str,
    input_type: &'a str,
}

#[derive(Debug, Clone)]
pub struct FlowSearch {
    client: Client,
    url: String,
    token: String,
}

impl FlowSearch {
    pub fn from_config(config: &FlowConfig) -> Result<Self, ServiceError> {
        match (
            config.base_api_url.as_deref(),
            config.langflow_id.as_deref(),
            config.endpoint.as_deref(),
            config.token.as_deref(),
        ) {
            (Some(base), Some(id), Some(endpoint), Some(token))
                if ![base, id, endpoint, token].iter().any(|v| v.is_empty()) =>
            {
                Ok(Self {
                    client: Client::new(),
                    url: format!(
                        "{}/lf/{}/api/v1/run/{}",
                        base.trim_end_matches('/'),
                        id,
                        endpoint
                    ),
                    token: token.to_string(),
                })
            }
            _ => Err(ServiceError::Runtime(
                "Please ensure BASE_API_URL, LANGFLOW_ID, ENDPOINT, and ASTRA_DB_APPLICATION_TOKEN are set as environment variables."
                    .to_string(),
            )),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self))]
    pub async fn run(&self, query: &str) -> Result<Value, ServiceError> {
        info!("Sending vector search request to: {}", self.url);
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&RunRequest {
                input_value: query,
                output_type: "chat",
                input_type: "chat",
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!("API request failed: {}", e);
                ServiceError::Runtime(format!(
                    "An error occurred while performing the vector search: {}",
                    e
                ))
            })?;

        let value = response.json::<Value>().await.map_err(|e| {
            ServiceError::Runtime(format!("An unexpected error occurred: {}", e))
        })?;
        info!("Vector search request successful.");
        Ok(value)
    }
}

/// The flow's chat answer, if present and non-empty.
pub fn extract_message(response: &Value) -> Option<&str> {
    response
        .pointer("/outputs/0/outputs/0/results/message/data/text")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_message() {
        let response = json!({
            "outputs": [{"outputs": [{"results": {"message": {"data": {"text": "Reels do best."}}}}]}]
        });
        assert_eq!(extract_message(&response), Some("Reels do best."));
    }

    #[test]
    fn test_extract_message_missing_or_empty() {
        assert_eq!(extract_message(&json!({"outputs": []})), None);
        let empty = json!({
            "outputs": [{"outputs": [{"results": {"message": {"data": {"text": ""}}}}]}]
        });
        assert_eq!(extract_message(&empty), None);
    }

    #[test]
    fn test_from_config_builds_run_url() {
        let search = FlowSearch::from_config(&FlowConfig {
            base_api_url: Some("https://api.langflow.example/".to_string()),
            langflow_id: Some("abc".to_string()),
            endpoint: Some("insta".to_string()),
            token: Some("t".to_string()),
        })
        .unwrap();
        assert_eq!(search.url(), "https://api.langflow.example/lf/abc/api/v1/run/insta");
    }

    #[test]
    fn test_from_config_requires_every_value() {
        let result = FlowSearch::from_config(&FlowConfig {
            base_api_url: Some("https://api.langflow.example".to_string()),
            ..Default::default()
        });
        assert!(matches!(result, Err(ServiceError::Runtime(_))));
    }
}
