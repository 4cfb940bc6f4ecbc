//! Structured logging for Attune
//!
//! Events are emitted through `tracing` with one target per category:
//! - CLASSIFIER: emotion rule hits, model inference, disambiguation
//! - CONTEXT: memory lookups and context extraction
//! - GENERATION: prompt composition and backend calls
//! - STREAM: chunk emission and client disconnects
//! - PIPELINE: request lifecycle and stage transitions
//! - ERROR: recovered failures

use tracing_subscriber::EnvFilter;

/// Log categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Classifier,
    Context,
    Generation,
    Stream,
    Pipeline,
    Error,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Classifier => "CLASSIFIER",
            LogCategory::Context => "CONTEXT",
            LogCategory::Generation => "GENERATION",
            LogCategory::Stream => "STREAM",
            LogCategory::Pipeline => "PIPELINE",
            LogCategory::Error => "ERROR",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
/// A second call is a no-op so tests can call it freely.
pub fn init_logging(default_level: &str, json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if installed.is_ok() {
        log(LogCategory::Pipeline, None, "Attune logging initialized");
    }
    Ok(())
}

/// First 8 chars of a request id, enough to correlate lines.
fn short_id(request_id: Option<&str>) -> String {
    request_id
        .map(|id| id.chars().take(8).collect())
        .unwrap_or_default()
}

/// Log a message with category and optional request context
pub fn log(category: LogCategory, request_id: Option<&str>, message: &str) {
    let request = short_id(request_id);
    match category {
        LogCategory::Classifier => tracing::info!(target: "attune::classifier", request = %request, "{}", message),
        LogCategory::Context => tracing::info!(target: "attune::context", request = %request, "{}", message),
        LogCategory::Generation => tracing::info!(target: "attune::generation", request = %request, "{}", message),
        LogCategory::Stream => tracing::debug!(target: "attune::stream", request = %request, "{}", message),
        LogCategory::Pipeline => tracing::debug!(target: "attune::pipeline", request = %request, "{}", message),
        LogCategory::Error => tracing::warn!(target: "attune::error", request = %request, "{}", message),
    }
}

/// Log a classification event (rule hit, model result, disambiguation)
pub fn log_classifier(request_id: Option<&str>, message: &str) {
    log(LogCategory::Classifier, request_id, message);
}

/// Log a context lookup event
pub fn log_context(request_id: Option<&str>, message: &str) {
    log(LogCategory::Context, request_id, message);
}

/// Log a composition or backend event
pub fn log_generation(request_id: Option<&str>, message: &str) {
    log(LogCategory::Generation, request_id, message);
}

/// Log a streaming event
pub fn log_stream(request_id: Option<&str>, message: &str) {
    log(LogCategory::Stream, request_id, message);
}

/// Log a pipeline lifecycle event
pub fn log_pipeline(request_id: Option<&str>, message: &str) {
    log(LogCategory::Pipeline, request_id, message);
}

/// Log a recovered error
pub fn log_error(request_id: Option<&str>, message: &str) {
    log(LogCategory::Error, request_id, message);
}
