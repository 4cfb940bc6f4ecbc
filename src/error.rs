use thiserror::Error;

/// Failures inside the reply pipeline. Every variant is recovered locally;
/// none of them reaches the user-facing layer verbatim.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("emotion model unavailable: {0}")]
    ClassificationUnavailable(String),

    #[error("conversation context unavailable: {0}")]
    ContextUnavailable(#[from] StoreError),

    #[error("generation failed: {0}")]
    GenerationFailure(#[from] BackendError),

    #[error("sanitizer tripped: {0}")]
    SanitizationTrip(String),
}

impl PipelineError {
    /// SanitizationTrip is handled exactly like a backend failure.
    pub fn is_generation_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::GenerationFailure(_) | PipelineError::SanitizationTrip(_)
        )
    }
}

/// Errors from profile and memory collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Unavailable(String),
}

/// Errors from a generation backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend returned no text")]
    Empty,

    #[error("backend timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

/// Startup and configuration errors. These are the only ones allowed to end
/// the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitization_trip_counts_as_generation_failure() {
        assert!(PipelineError::SanitizationTrip("leak".into()).is_generation_failure());
        assert!(PipelineError::GenerationFailure(BackendError::Empty).is_generation_failure());
        assert!(!PipelineError::ContextUnavailable(StoreError::Poisoned).is_generation_failure());
    }

    #[test]
    fn messages_carry_detail_for_operators() {
        let err = PipelineError::GenerationFailure(BackendError::Status {
            status: 503,
            body: "overloaded".into(),
        });
        assert_eq!(err.to_string(), "generation failed: backend returned 503: overloaded");
    }
}
