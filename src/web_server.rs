use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    serve, Form, Json, Router,
};
use minijinja::{context, path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actions::{Actions, BackendActions};
use crate::completion::CompletionClient;
use crate::constants;
use crate::markdown;
use crate::session::{ChatSession, SessionStore};
use crate::Message;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub backend_url: String,
    pub template_dir: String,
    pub static_dir: String,
    pub completion_base_url: String,
    pub completion_api_key: String,
    pub completion_model: String,
}

impl WebConfig {
    pub fn from_env(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            template_dir: constants::TEMPLATE_DIR.clone(),
            static_dir: constants::STATIC_DIR.clone(),
            completion_base_url: constants::OPENAI_BASE_URL.clone(),
            completion_api_key: constants::OPENAI_API_KEY.clone(),
            completion_model: constants::OPENAI_MODEL.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match self {
            WebError::Template(e) => {
                error!("Failed to get or render template: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Html(format!("Internal Server Error: {}", e)),
                )
                    .into_response()
            }
        }
    }
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    actions: Arc<dyn Actions>,
    completion: Arc<CompletionClient>,
    sessions: Arc<Mutex<SessionStore>>,
    static_dir: String,
}

impl AppState {
    pub fn new(config: &WebConfig, actions: Arc<dyn Actions>) -> Self {
        let completion = CompletionClient::new(
            config.completion_base_url.as_str(),
            config.completion_api_key.as_str(),
            config.completion_model.as_str(),
        );
        Self {
            templates: Arc::new(create_minijinja_env(&config.template_dir)),
            actions,
            completion: Arc::new(completion),
            sessions: Arc::new(Mutex::new(SessionStore::new())),
            static_dir: config.static_dir.clone(),
        }
    }

    pub fn from_config(config: &WebConfig) -> Self {
        if config.completion_api_key.is_empty() {
            warn!("OPENAI_API_KEY is not set; /api/chat requests will be rejected by the provider");
        }
        Self::new(config, Arc::new(BackendActions::new(config.backend_url.as_str())))
    }

    /// Number of chat sessions currently held in memory.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<Html<String>, WebError> {
        let env = self.templates.acquire_env()?;
        let tmpl = env.get_template(name)?;
        Ok(Html(tmpl.render(ctx)?))
    }
}

fn create_minijinja_env(template_dir: &str) -> AutoReloader {
    let template_dir = template_dir.to_string();
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&template_dir));
        notifier.watch_path(&template_dir, true);
        Ok(env)
    })
}

#[derive(Serialize)]
struct Feature {
    icon: &'static str,
    title: &'static str,
    description: &'static str,
}

const FEATURES: [Feature; 3] = [
    Feature {
        icon: "instagram",
        title: "Connect Instagram",
        description: "Optionally connect your Instagram account for personalized insights",
    },
    Feature {
        icon: "message",
        title: "Chat with AI",
        description: "Ask questions and get instant insights about social media content",
    },
    Feature {
        icon: "chart",
        title: "Get Analytics",
        description: "Receive detailed analytics and recommendations for improvement",
    },
];

#[derive(Serialize)]
struct RenderedMessage<'a> {
    role: &'a str,
    html: String,
}

fn render_messages(messages: &[Message]) -> Vec<RenderedMessage<'_>> {
    messages
        .iter()
        .map(|m| RenderedMessage {
            role: if m.is_user() { "user" } else { "assistant" },
            html: markdown::render(&m.content),
        })
        .collect()
}

async fn landing_handler(State(state): State<AppState>) -> Result<Html<String>, WebError> {
    state.render(
        "landing.html",
        context! {
            title => "InstaIQ",
            features => FEATURES,
        },
    )
}

// Hands out a fresh id only; the session itself is stored on its first POST.
async fn new_chat_handler() -> Redirect {
    chat_location(Uuid::new_v4())
}

fn chat_context(id: Uuid, session: &ChatSession, now: Instant) -> minijinja::Value {
    context! {
        title => "Social Pulse Chat",
        session_id => id.to_string(),
        connected => session.is_connected(),
        processing => session.is_connecting(),
        loading => session.is_awaiting_reply(),
        handle => session.handle(),
        error_message => session.banner(now),
        messages => render_messages(session.messages()),
    }
}

async fn chat_page_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, WebError> {
    let now = Instant::now();
    let ctx = {
        let mut sessions = state.sessions.lock().await;
        match sessions.get_mut(&id, now) {
            Some(session) => {
                session.clear_expired_banner(now);
                chat_context(id, session, now)
            }
            None => chat_context(id, &ChatSession::new(), now),
        }
    };
    state.render("chat.html", ctx)
}

#[derive(Debug, Deserialize)]
pub struct ConnectForm {
    #[serde(default)]
    pub handle: String,
}

#[derive(Debug, Deserialize)]
pub struct SendForm {
    #[serde(default)]
    pub message: String,
}

fn chat_location(id: Uuid) -> Redirect {
    Redirect::to(&format!("/chat/{}", id))
}

// The action call and its finish step run in their own task, so a session
// never stays Connecting or AwaitingReply when the request is dropped.
async fn connect_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Form(form): Form<ConnectForm>,
) -> Redirect {
    let handle = state
        .sessions
        .lock()
        .await
        .get_or_create(id, Instant::now())
        .begin_connect(&form.handle);

    if let Some(handle) = handle {
        info!(%id, %handle, "Processing Instagram handle");
        let actions = state.actions.clone();
        let sessions = state.sessions.clone();
        let task = tokio::spawn(async move {
            let result = actions.process_identity(&handle).await;
            let now = Instant::now();
            if let Some(session) = sessions.lock().await.get_mut(&id, now) {
                session.finish_connect(handle, result, now);
            }
        });
        if let Err(e) = task.await {
            error!(%id, "Connect task failed: {}", e);
        }
    }
    chat_location(id)
}

async fn skip_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Redirect {
    state
        .sessions
        .lock()
        .await
        .get_or_create(id, Instant::now())
        .skip();
    chat_location(id)
}

async fn reset_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Redirect {
    if let Some(session) = state.sessions.lock().await.get_mut(&id, Instant::now()) {
        session.reset();
    }
    chat_location(id)
}

async fn send_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Form(form): Form<SendForm>,
) -> Redirect {
    let pending = {
        let mut sessions = state.sessions.lock().await;
        let session = sessions.get_or_create(id, Instant::now());
        session
            .begin_submit(&form.message)
            .map(|query| (query, session.social_data().cloned()))
    };

    if let Some((query, social_data)) = pending {
        let actions = state.actions.clone();
        let sessions = state.sessions.clone();
        let task = tokio::spawn(async move {
            let result = actions.chat_reply(&query, social_data.as_ref()).await;
            if let Some(session) = sessions.lock().await.get_mut(&id, Instant::now()) {
                session.finish_submit(result);
            }
        });
        if let Err(e) = task.await {
            error!(%id, "Reply task failed: {}", e);
        }
    }
    chat_location(id)
}

#[derive(Debug, Deserialize)]
pub struct ProcessDataBody {
    pub instagram_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub message: String,
    #[serde(default)]
    pub instagram_data: Option<Value>,
}

fn action_failed(e: anyhow::Error) -> Response {
    warn!("Action failed: {:#}", e);
    (StatusCode::BAD_GATEWAY, Json(json!({"error": e.to_string()}))).into_response()
}

async fn process_data_action(
    State(state): State<AppState>,
    Json(body): Json<ProcessDataBody>,
) -> Response {
    match state.actions.process_identity(&body.instagram_id).await {
        Ok(outcome) => Json(outcome.data).into_response(),
        Err(e) => action_failed(e),
    }
}

async fn chat_action(State(state): State<AppState>, Json(body): Json<ChatRequestBody>) -> Response {
    match state
        .actions
        .chat_reply(&body.message, body.instagram_data.as_ref())
        .await
    {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => action_failed(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatStreamRequest {
    pub messages: Vec<Message>,
}

async fn chat_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatStreamRequest>,
) -> Response {
    match state.completion.stream(request.messages).await {
        Ok(tokens) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(tokens),
        )
            .into_response(),
        Err(e) => {
            error!("Completion request failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let static_files_service = ServeDir::new(&state.static_dir);

    Router::new()
        .route("/", get(landing_handler))
        .route("/chat", get(new_chat_handler))
        .route("/chat/:session_id", get(chat_page_handler))
        .route("/chat/:session_id/connect", post(connect_handler))
        .route("/chat/:session_id/skip", post(skip_handler))
        .route("/chat/:session_id/reset", post(reset_handler))
        .route("/chat/:session_id/send", post(send_handler))
        .route("/actions/process_data", post(process_data_action))
        .route("/actions/chat", post(chat_action))
        .route("/api/chat", post(chat_stream_handler))
        // Route for static files must be nested under a path like /static
        // or it will conflict with other routes.
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

pub async fn start_web_server(port: u16, config: WebConfig) -> Result<()> {
    let app = build_router(AppState::from_config(&config));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);
    info!("Forwarding actions to backend at {}", config.backend_url);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
