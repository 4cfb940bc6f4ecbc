pub mod composer;
pub mod config;
pub mod context;
pub mod db;
pub mod emotion;
pub mod error;
pub mod generation;
pub mod intent;
pub mod knowledge;
pub mod logging;
pub mod model;
pub mod ollama;
pub mod openai;
pub mod orchestrator;
pub mod persona;
pub mod sanitize;
pub mod store;
pub mod stream;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use composer::ResponseComposer;
use config::{BackendKind, Config, StorageKind};
use context::ContextExtractor;
use db::SqliteStore;
use emotion::{EmotionClassifier, EmotionResult};
use generation::{GenerationAdapter, GenerationBackend};
use knowledge::{KnowledgeReply, StaticKnowledge};
use logging::{log_error, log_pipeline};
use model::LexiconModel;
use ollama::{OllamaClient, DEFAULT_OLLAMA_URL};
use openai::{OpenAIClient, OPENAI_API_URL};
use orchestrator::{Orchestrator, Reply};
use persona::{ProfileUpdate, UserProfile};
use sanitize::Sanitizer;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use store::{InMemoryStore, MemoryStore, ProfileStore};
use stream::StreamSettings;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub const MAX_MESSAGE_CHARS: usize = 4000;
const DEFAULT_SESSION: &str = "default";

// ============ Wire Types ============

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(rename = "sessionId", alias = "session_id", default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

impl ChatRequest {
    /// The session id doubles as the user id.
    fn user_id(&self) -> &str {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SESSION)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectRequest {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeQuery {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub model_loaded: bool,
    pub backend: String,
}

// ============ Errors ============

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidMessage(String),

    /// Detail is logged, not returned.
    #[error("{0} is unavailable")]
    Unavailable(&'static str),
}

impl ApiError {
    fn unavailable(what: &'static str, err: impl std::fmt::Display) -> Self {
        log_error(None, &format!("{} failed: {}", what, err));
        ApiError::Unavailable(what)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::InvalidMessage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

fn validate_message(text: &str, allow_empty: bool) -> Result<(), ApiError> {
    if !allow_empty && text.trim().is_empty() {
        return Err(ApiError::InvalidMessage("message must not be empty".to_string()));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::InvalidMessage(format!(
            "message must be at most {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

// ============ Handlers ============

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model_loaded: state.orchestrator.classifier().model_loaded(),
        backend: state.orchestrator.backend_name().to_string(),
    })
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Result<Json<Reply>, ApiError> {
    validate_message(&request.message, false)?;
    let reply = state
        .orchestrator
        .respond(request.user_id(), &request.message, request.context.as_deref())
        .await;
    Ok(Json(reply))
}

async fn chat_stream(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Result<Response, ApiError> {
    validate_message(&request.message, false)?;
    let reply = state
        .orchestrator
        .respond(request.user_id(), &request.message, request.context.as_deref())
        .await;

    // Dropping the response body drops the receiver, which stops the emitter.
    let (rx, _emitter) = state.orchestrator.stream(&reply);
    let events = ReceiverStream::new(rx).map(|chunk| Event::default().json_data(&chunk));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}

async fn detect_emotion(
    State(state): State<AppState>,
    Json(request): Json<DetectRequest>,
) -> Result<Json<EmotionResult>, ApiError> {
    validate_message(&request.text, true)?;
    Ok(Json(state.orchestrator.classifier().classify(&request.text, None)))
}

/// Same classification as detect, for quick checks from a browser.
async fn analyze_emotion(
    State(state): State<AppState>,
    Path(text): Path<String>,
) -> Result<Json<EmotionResult>, ApiError> {
    validate_message(&text, true)?;
    Ok(Json(state.orchestrator.classifier().classify(&text, None)))
}

async fn knowledge_query(
    State(state): State<AppState>,
    Json(request): Json<KnowledgeQuery>,
) -> Result<Json<KnowledgeReply>, ApiError> {
    validate_message(&request.query, false)?;
    let reply = state
        .orchestrator
        .query_knowledge(&request.query)
        .await
        .map_err(|e| ApiError::unavailable("knowledge service", e))?;
    Ok(Json(reply))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state
        .orchestrator
        .profile(&user_id)
        .await
        .map_err(|e| ApiError::unavailable("profile store", e))?;
    Ok(Json(profile))
}

async fn update_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state
        .orchestrator
        .update_profile(&user_id, &update)
        .await
        .map_err(|e| ApiError::unavailable("profile store", e))?;
    Ok(Json(profile))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/chat/stream", post(chat_stream))
        .route("/api/v1/emotion/detect", post(detect_emotion))
        .route("/api/v1/emotion/analyze/{text}", get(analyze_emotion))
        .route("/api/v1/knowledge/query", post(knowledge_query))
        .route("/api/v1/profile/{user_id}", get(get_profile).put(update_profile))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============ Startup ============

fn build_backend(config: &Config) -> Result<Arc<dyn GenerationBackend>, Box<dyn Error + Send + Sync>> {
    let settings = &config.backend;
    let timeout = Duration::from_secs(config.pipeline.generation_timeout_secs);
    let backend: Arc<dyn GenerationBackend> = match settings.kind {
        BackendKind::Ollama => {
            let url = settings.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
            Arc::new(OllamaClient::new(url, &settings.model, settings.temperature, timeout)?)
        }
        BackendKind::OpenAI => {
            let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| "OPENAI_API_KEY is not set")?;
            let url = settings.url.as_deref().unwrap_or(OPENAI_API_URL);
            Arc::new(OpenAIClient::new(url, &api_key, &settings.model, settings.temperature, timeout)?)
        }
    };
    Ok(backend)
}

/// Wire every component from config around the given backend.
pub fn build_orchestrator(
    config: &Config,
    backend: Arc<dyn GenerationBackend>,
) -> Result<Orchestrator, Box<dyn Error + Send + Sync>> {
    let pipeline = &config.pipeline;
    let sanitizer = Sanitizer::new(&pipeline.agent_name, &pipeline.fallback_message)?;

    let classifier = match LexiconModel::load(config.classifier.lexicon_path.as_deref()) {
        Ok(model) => EmotionClassifier::new(model),
        Err(e) => {
            log_error(None, &format!("Emotion model not loaded, running rules only: {}", e));
            EmotionClassifier::without_model()
        }
    };

    let (profiles, memory): (Arc<dyn ProfileStore>, Arc<dyn MemoryStore>) = match config.storage.kind {
        StorageKind::Memory => {
            let store = Arc::new(InMemoryStore::new());
            (store.clone() as Arc<dyn ProfileStore>, store as Arc<dyn MemoryStore>)
        }
        StorageKind::Sqlite => {
            let store = Arc::new(SqliteStore::open(&config.storage.resolved_database_path())?);
            (store.clone() as Arc<dyn ProfileStore>, store as Arc<dyn MemoryStore>)
        }
    };

    let composer = ResponseComposer::new(
        &pipeline.agent_name,
        pipeline.salience_threshold,
        pipeline.knowledge_precedence,
        sanitizer.clone(),
    );
    let generator = GenerationAdapter::new(
        backend,
        sanitizer,
        Duration::from_secs(pipeline.generation_timeout_secs),
    );
    let extractor = ContextExtractor {
        max_chars: config.context.max_chars,
        max_turns: config.context.max_turns,
        self_contained_min_chars: config.context.self_contained_min_chars,
    };
    let stream_settings = StreamSettings {
        chunk_words: config.stream.chunk_words,
        delay: Duration::from_millis(config.stream.chunk_delay_ms),
    };

    Ok(Orchestrator::new(
        Arc::new(classifier),
        composer,
        generator,
        profiles,
        memory,
        Arc::new(StaticKnowledge::new()),
    )
    .with_extractor(extractor)
    .with_stream_settings(stream_settings))
}

pub fn build_state(config: &Config) -> Result<AppState, Box<dyn Error + Send + Sync>> {
    let backend = build_backend(config)?;
    let orchestrator = build_orchestrator(config, backend)?;
    Ok(AppState {
        orchestrator: Arc::new(orchestrator),
    })
}

/// Serve until ctrl-c.
pub async fn run(config: Config) -> Result<(), Box<dyn Error + Send + Sync>> {
    let state = build_state(&config)?;
    log_pipeline(
        None,
        &format!(
            "Backend {} ({}), emotion model {}, storage {:?}",
            config.backend.kind.as_str(),
            config.backend.model,
            state.orchestrator.classifier().model_name(),
            config.storage.kind
        ),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(target: "attune::pipeline", "Listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
