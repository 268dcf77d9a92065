// Client for an Astra-style Data API: collection lookup/creation and chunked
// document inserts.

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use super::ServiceError;

#[derive(Debug, Clone)]
pub struct VectorStore {
    client: Client,
    endpoint: String,
    token: String,
    keyspace: String,
}

impl VectorStore {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>, keyspace: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
            keyspace: keyspace.into(),
        }
    }

    fn keyspace_url(&self) -> String {
        format!("{}/api/json/v1/{}", self.endpoint, self.keyspace)
    }

    async fn command(&self, url: &str, body: Value) -> Result<Value, ServiceError> {
        let response = self
            .client
            .post(url)
            .header("Token", &self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Runtime(format!("Data API request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::Runtime(format!(
                "Data API returned status {}: {}",
                status, text
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Runtime(format!("Invalid Data API response: {}", e)))?;

        // The Data API reports command failures in the body of a 200 response.
        if let Some(errors) = value.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(ServiceError::Runtime(format!(
                    "Data API command failed: {}",
                    Value::Array(errors.clone())
                )));
            }
        }
        Ok(value)
    }

    pub async fn collection_names(&self) -> Result<Vec<String>, ServiceError> {
        let value = self
            .command(&self.keyspace_url(), json!({"findCollections": {}}))
            .await?;
        let names = value
            .pointer("/status/collections")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    /// Creates the collection with a cosine vector metric unless it already exists.
    #[instrument(skip(self))]
    pub async fn ensure_collection(&self, name: &str) -> Result<(), ServiceError> {
        if self.collection_names().await?.iter().any(|n| n == name) {
            info!("Collection '{}' already exists.", name);
            return Ok(());
        }

        warn!("Collection '{}' does not exist. Creating a new one.", name);
        self.command(
            &self.keyspace_url(),
            json!({
                "createCollection": {
                    "name": name,
                    "options": {"vector": {"metric": "cosine"}}
                }
            }),
        )
        .await
        .map_err(|e| {
            error!("Failed to create collection '{}': {}", name, e);
            ServiceError::Runtime(format!("Failed to create collection '{}': {}", name, e))
        })?;
        info!("Created collection '{}' with COSINE metric.", name);
        Ok(())
    }

    /// Inserts documents `chunk_size` at a time. A failing chunk is logged and
    /// skipped; the return value counts documents the store acknowledged.
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub async fn insert_documents(&self, collection: &str, documents: &[Value], chunk_size: usize) -> usize {
        let url = format!("{}/{}", self.keyspace_url(), collection);
        let mut total_inserted = 0;

        for (index, chunk) in documents.chunks(chunk_size.max(1)).enumerate() {
            let body = json!({"insertMany": {"documents": chunk}});
            match self.command(&url, body).await {
                Ok(value) => {
                    let inserted = value
                        .pointer("/status/insertedIds")
                        .and_then(Value::as_array)
                        .map_or(0, Vec::len);
                    total_inserted += inserted;
                    info!("Inserted {} items in chunk {}.", inserted, index + 1);
                }
                Err(e) => {
                    error!("Error inserting chunk {}: {}", index + 1, e);
                }
            }
        }

        info!("Successfully inserted {} items into the collection.", total_inserted);
        total_inserted
    }
}
