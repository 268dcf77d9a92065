//! Data backend: ingests a profile's posts into the vector collection and
//! answers questions about them through the retrieval flow.
//!
//! `POST /process_data` and `POST /process_query` are the two endpoints the
//! chat front-end's actions call.

pub mod instagram;
pub mod search;
pub mod vector_store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::constants;
use instagram::InstagramClient;
use search::{FlowConfig, FlowSearch};
use vector_store::VectorStore;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Value(String),

    #[error("{0}")]
    Runtime(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidInput(_) | ServiceError::Value(_) => StatusCode::BAD_REQUEST,
            ServiceError::Runtime(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        error!("{}", self);
        (self.status(), Json(json!({"error": self.to_string()}))).into_response()
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub instagram_base_url: String,
    pub astra_endpoint: Option<String>,
    pub astra_token: Option<String>,
    pub collection_name: Option<String>,
    pub keyspace: String,
    pub flow: FlowConfig,
}

impl BackendConfig {
    pub fn from_env() -> Self {
        Self {
            instagram_base_url: constants::INSTAGRAM_BASE_URL.clone(),
            astra_endpoint: constants::ASTRA_DB_API_ENDPOINT.clone(),
            astra_token: constants::ASTRA_DB_APPLICATION_TOKEN.clone(),
            collection_name: constants::ASTRA_DB_COLLECTION_NAME.clone(),
            keyspace: constants::ASTRA_DB_KEYSPACE.clone(),
            flow: FlowConfig {
                base_api_url: constants::BASE_API_URL.clone(),
                langflow_id: constants::LANGFLOW_ID.clone(),
                endpoint: constants::LANGFLOW_ENDPOINT.clone(),
                token: constants::ASTRA_DB_APPLICATION_TOKEN.clone(),
            },
        }
    }

    fn collection_name(&self) -> Result<&str, ServiceError> {
        self.collection_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                ServiceError::Value(
                    "ASTRA_DB_COLLECTION_NAME environment variable is not set.".to_string(),
                )
            })
    }

    fn vector_store(&self) -> Result<VectorStore, ServiceError> {
        match (self.astra_endpoint.as_deref(), self.astra_token.as_deref()) {
            (Some(endpoint), Some(token)) if !endpoint.is_empty() && !token.is_empty() => {
                Ok(VectorStore::new(endpoint, token, self.keyspace.as_str()))
            }
            _ => Err(ServiceError::Value(
                "Missing environment variables: Both ASTRA_DB_API_ENDPOINT and ASTRA_DB_APPLICATION_TOKEN environment variables must be set."
                    .to_string(),
            )),
        }
    }
}

#[derive(Clone)]
pub struct BackendState {
    config: Arc<BackendConfig>,
    instagram: InstagramClient,
}

impl BackendState {
    pub fn new(config: BackendConfig) -> Self {
        let instagram = InstagramClient::new(config.instagram_base_url.as_str());
        Self {
            config: Arc::new(config),
            instagram,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProcessDataRequest {
    instagram_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProcessQueryRequest {
    query: Option<String>,
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

async fn process_data_handler(
    State(state): State<BackendState>,
    Json(request): Json<ProcessDataRequest>,
) -> Result<Response, ServiceError> {
    let Some(instagram_id) = request.instagram_id.filter(|id| !id.is_empty()) else {
        return Ok(bad_request("Instagram ID is required."));
    };

    let collection = state.config.collection_name()?;
    let store = state.config.vector_store()?;
    store.ensure_collection(collection).await?;

    let fetched = state.instagram.fetch_posts(&instagram_id).await?;
    let documents: Vec<Value> = fetched.posts.iter().map(|post| post.to_document()).collect();
    store
        .insert_documents(collection, &documents, constants::UPLOAD_CHUNK_SIZE)
        .await;

    Ok(Json(json!({
        "message": format!("Data processed successfully for Instagram ID {}.", instagram_id),
        "posts_fetched": fetched.posts.len(),
        "posts_total": fetched.total,
    }))
    .into_response())
}

async fn process_query_handler(
    State(state): State<BackendState>,
    Json(request): Json<ProcessQueryRequest>,
) -> Result<Response, ServiceError> {
    let Some(query) = request.query.filter(|q| !q.is_empty()) else {
        return Ok(bad_request("Query string is required."));
    };

    let search = FlowSearch::from_config(&state.config.flow)?;
    let response = search.run(&query).await?;
    let message = search::extract_message(&response)
        .ok_or_else(|| {
            ServiceError::Runtime(
                "The response format is invalid or does not contain the expected 'message' field."
                    .to_string(),
            )
        })?
        .to_string();

    Ok(Json(json!({"response": response, "message": message})).into_response())
}

pub fn build_router(state: BackendState) -> Router {
    Router::new()
        .route("/process_data", post(process_data_handler))
        .route("/process_query", post(process_query_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_backend(port: u16, config: BackendConfig) -> Result<()> {
    let app = build_router(BackendState::new(config));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Data backend listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    axum::serve(listener, app.into_make_service())
        .await
        .context("Data backend failed")?;

    Ok(())
}
