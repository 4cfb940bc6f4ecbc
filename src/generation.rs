use crate::composer::GenerationRequest;
use crate::error::{BackendError, PipelineError};
use crate::logging::{log_error, log_generation};
use crate::sanitize::Sanitizer;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Opaque text generator. Implementations may time out or fail; the adapter
/// is the only caller and never lets those errors reach a user.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, BackendError>;
}

/// Wraps a backend with a hard deadline and the output sanitizer.
#[derive(Clone)]
pub struct GenerationAdapter {
    backend: Arc<dyn GenerationBackend>,
    sanitizer: Sanitizer,
    timeout: Duration,
}

impl GenerationAdapter {
    pub fn new(backend: Arc<dyn GenerationBackend>, sanitizer: Sanitizer, timeout: Duration) -> Self {
        Self {
            backend,
            sanitizer,
            timeout,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Raw backend text. Timeouts and errors come back as GenerationFailure.
    pub async fn generate(&self, request: &GenerationRequest, request_id: Option<&str>) -> Result<String, PipelineError> {
        let start = Instant::now();
        log_generation(
            request_id,
            &format!(
                "Calling {} ({} chars, max {} tokens)",
                self.backend.name(),
                request.prompt.chars().count(),
                request.max_tokens
            ),
        );

        let outcome = tokio::time::timeout(
            self.timeout,
            self.backend.generate(&request.prompt, request.max_tokens),
        )
        .await;

        let raw = match outcome {
            Ok(Ok(text)) if text.trim().is_empty() => Err(BackendError::Empty),
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.timeout.as_secs())),
        };

        match raw {
            Ok(text) => {
                log_generation(
                    request_id,
                    &format!("{} replied in {}ms", self.backend.name(), start.elapsed().as_millis()),
                );
                Ok(text)
            }
            Err(e) => {
                log_error(request_id, &format!("Backend {} failed: {}", self.backend.name(), e));
                Err(PipelineError::GenerationFailure(e))
            }
        }
    }

    /// Clean text, or SanitizationTrip when the output cannot be shown.
    pub fn sanitize(&self, raw: &str) -> Result<String, PipelineError> {
        self.sanitizer.clean(raw)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::composer::{RequestKind, ResponseType};
    use crate::sanitize::FALLBACK_MESSAGE;
    use std::sync::Mutex;

    /// Replies with a fixed result and remembers the last prompt it saw.
    pub(crate) struct ScriptedBackend {
        pub reply: Result<String, String>,
        pub delay: Duration,
        pub last_prompt: Mutex<Option<(String, u32)>>,
    }

    impl ScriptedBackend {
        pub(crate) fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                delay: Duration::ZERO,
                last_prompt: Mutex::new(None),
            })
        }

        pub(crate) fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                delay: Duration::ZERO,
                last_prompt: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, BackendError> {
            *self.last_prompt.lock().unwrap() = Some((prompt.to_string(), max_tokens));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone().map_err(BackendError::Other)
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "Message: hi".to_string(),
            max_tokens: 300,
            response_type: ResponseType::CasualChat,
            kind: RequestKind::Casual,
        }
    }

    fn adapter(backend: Arc<ScriptedBackend>, timeout: Duration) -> GenerationAdapter {
        let sanitizer = Sanitizer::new("Attune", FALLBACK_MESSAGE).unwrap();
        GenerationAdapter::new(backend, sanitizer, timeout)
    }

    #[tokio::test]
    async fn passes_prompt_and_ceiling_through() {
        let backend = ScriptedBackend::replying("Hello!");
        let adapter = adapter(backend.clone(), Duration::from_secs(5));
        assert_eq!(adapter.generate(&request(), None).await.unwrap(), "Hello!");
        let seen = backend.last_prompt.lock().unwrap().clone();
        assert_eq!(seen, Some(("Message: hi".to_string(), 300)));
    }

    #[tokio::test]
    async fn backend_error_is_a_generation_failure() {
        let adapter = adapter(ScriptedBackend::failing("connection refused"), Duration::from_secs(5));
        let err = adapter.generate(&request(), None).await.unwrap_err();
        assert!(err.is_generation_failure());
    }

    #[tokio::test]
    async fn blank_output_is_a_generation_failure() {
        let adapter = adapter(ScriptedBackend::replying("   "), Duration::from_secs(5));
        let err = adapter.generate(&request(), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationFailure(BackendError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let backend = Arc::new(ScriptedBackend {
            reply: Ok("too late".to_string()),
            delay: Duration::from_secs(120),
            last_prompt: Mutex::new(None),
        });
        let adapter = adapter(backend, Duration::from_secs(60));
        let err = adapter.generate(&request(), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationFailure(BackendError::Timeout(60))));
    }

    #[test]
    fn sanitize_strips_artifacts() {
        let adapter = adapter(ScriptedBackend::replying("x"), Duration::from_secs(1));
        assert_eq!(adapter.sanitize("<|assistant|> Hello there").unwrap(), "Hello there");
        assert!(adapter.sanitize("<|end|>").is_err());
    }
}
