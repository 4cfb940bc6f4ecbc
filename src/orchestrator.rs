use crate::composer::{ResponseComposer, ResponseType};
use crate::context::{truncate_chars, ContextExtractor, ConversationTurn, Role};
use crate::emotion::{Distribution, Emotion, EmotionClassifier, EmotionResult};
use crate::error::{BackendError, StoreError};
use crate::generation::GenerationAdapter;
use crate::knowledge::{KnowledgeCollaborator, KnowledgeReply};
use crate::logging::{log_error, log_pipeline};
use crate::persona::{derive, ProfileUpdate, UserProfile};
use crate::store::{MemoryStore, ProfileStore};
use crate::stream::{spawn_stream, Delivery, StreamChunk, StreamSettings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

// ============ Pipeline State ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Classifying,
    ContextLookup,
    Personalizing,
    Composing,
    Generating,
    Sanitizing,
    Streaming,
    Done,
    Fallback,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Classifying => "classifying",
            PipelineStage::ContextLookup => "context_lookup",
            PipelineStage::Personalizing => "personalizing",
            PipelineStage::Composing => "composing",
            PipelineStage::Generating => "generating",
            PipelineStage::Sanitizing => "sanitizing",
            PipelineStage::Streaming => "streaming",
            PipelineStage::Done => "done",
            PipelineStage::Fallback => "fallback",
        }
    }
}

// ============ Reply Types ============

/// Emotion as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionSummary {
    pub primary: Emotion,
    pub confidence: f64,
    pub intensity: f64,
    pub all_emotions: Distribution,
}

impl From<&EmotionResult> for EmotionSummary {
    fn from(result: &EmotionResult) -> Self {
        Self {
            primary: result.primary,
            confidence: result.confidence,
            intensity: result.intensity,
            all_emotions: result.distribution.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyMetadata {
    pub request_id: String,
    pub processing_time: f64,         // seconds
    pub response_type: ResponseType,
    pub model_used: String,
    pub knowledge_used: bool,
    pub context_used: bool,
    pub fallback: bool,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl ReplyMetadata {
    pub fn new(request_id: &str, response_type: ResponseType, model_used: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            processing_time: 0.0,
            response_type,
            model_used: model_used.to_string(),
            knowledge_used: false,
            context_used: false,
            fallback: response_type == ResponseType::Fallback,
            reasoning: String::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Finished reply, ready to be returned whole or streamed.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    #[serde(rename = "response")]
    pub text: String,
    pub emotion: EmotionSummary,
    pub response_type: ResponseType,
    pub tone: String,
    pub metadata: ReplyMetadata,
    #[serde(skip)]
    pub trace: Vec<PipelineStage>,
}

impl Reply {
    pub fn is_fallback(&self) -> bool {
        self.response_type == ResponseType::Fallback
    }
}

// ============ Orchestrator ============

/// Runs one pipeline per request. Holds only shared read-only parts and
/// handles to the external stores.
pub struct Orchestrator {
    classifier: Arc<EmotionClassifier>,
    extractor: ContextExtractor,
    composer: ResponseComposer,
    generator: GenerationAdapter,
    profiles: Arc<dyn ProfileStore>,
    memory: Arc<dyn MemoryStore>,
    knowledge: Arc<dyn KnowledgeCollaborator>,
    stream_settings: StreamSettings,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<EmotionClassifier>,
        composer: ResponseComposer,
        generator: GenerationAdapter,
        profiles: Arc<dyn ProfileStore>,
        memory: Arc<dyn MemoryStore>,
        knowledge: Arc<dyn KnowledgeCollaborator>,
    ) -> Self {
        Self {
            classifier,
            extractor: ContextExtractor::default(),
            composer,
            generator,
            profiles,
            memory,
            knowledge,
            stream_settings: StreamSettings::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: ContextExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_stream_settings(mut self, settings: StreamSettings) -> Self {
        self.stream_settings = settings;
        self
    }

    pub fn classifier(&self) -> &EmotionClassifier {
        &self.classifier
    }

    pub fn backend_name(&self) -> &str {
        self.generator.backend_name()
    }

    pub async fn profile(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        self.profiles.get(user_id).await
    }

    /// Merge `update` over the stored profile and save the result.
    pub async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<UserProfile, StoreError> {
        let current = self.profiles.get(user_id).await?;
        let updated = update.apply(&current);
        self.profiles.save(user_id, &updated).await?;
        log_pipeline(
            None,
            &format!(
                "Profile for {}: empathy={} humor={} formality={} verbosity={}",
                user_id,
                updated.empathy_level,
                updated.humor_level,
                updated.formality_level,
                updated.verbosity_level
            ),
        );
        Ok(updated)
    }

    pub async fn query_knowledge(&self, query: &str) -> Result<KnowledgeReply, BackendError> {
        self.knowledge.classify_and_answer(query).await
    }

    /// Run the whole pipeline for one message. Never fails: any stage error
    /// turns into the fixed fallback reply.
    pub async fn respond(&self, user_id: &str, message: &str, client_context: Option<&str>) -> Reply {
        let request_id = Uuid::new_v4().to_string();
        let rid = Some(request_id.as_str());
        let start = Instant::now();
        let mut trace = vec![PipelineStage::Idle];
        log_pipeline(rid, &format!("New message from {} ({} chars)", user_id, message.chars().count()));

        // Classification, history, profile and knowledge have no data
        // dependency on each other.
        trace.extend([PipelineStage::Classifying, PipelineStage::ContextLookup]);
        let classifier = Arc::clone(&self.classifier);
        let owned = message.to_string();
        let classify = async move {
            tokio::task::spawn_blocking(move || classifier.classify_text(&owned))
                .await
                .unwrap_or_else(|e| {
                    log_error(None, &format!("Classifier task failed: {}", e));
                    EmotionResult::fallback("classifier task failed")
                })
        };
        let (emotion, (history, stored_context), profile, knowledge) = tokio::join!(
            classify,
            self.extractor.lookup(self.memory.as_ref(), user_id, message),
            self.profiles.get(user_id),
            self.knowledge.classify_and_answer(message),
        );
        let emotion = self.classifier.with_prior(emotion, message, &history);
        let context = stored_context.or_else(|| {
            client_context
                .map(|c| truncate_chars(c.trim(), self.extractor.max_chars))
                .filter(|c| !c.is_empty())
        });

        trace.push(PipelineStage::Personalizing);
        let profile = profile.unwrap_or_else(|e| {
            log_error(rid, &format!("Profile store unavailable, using defaults: {}", e));
            UserProfile::default()
        });
        let salient = emotion.is_salient(self.composer.salience_threshold());
        let knowledge_answer = match knowledge {
            Ok(reply) if reply.is_knowledge_query => reply.answer,
            Ok(_) => None,
            Err(e) => {
                log_error(rid, &format!("Knowledge collaborator failed: {}", e));
                None
            }
        };
        // Length follows the strategy, so knowledge-led replies keep verbosity length.
        let strategy = self.composer.strategy(&emotion, knowledge_answer.as_deref());
        let directives = derive(&profile, strategy.uses_empathy_length());

        trace.push(PipelineStage::Composing);
        let request = self.composer.compose(
            message,
            &emotion,
            context.as_deref(),
            &directives,
            knowledge_answer.as_deref(),
        );
        log_pipeline(
            rid,
            &format!(
                "Strategy {} for {} ({:.2}), salient={}",
                request.response_type.as_str(),
                emotion.primary.as_str(),
                emotion.confidence,
                salient
            ),
        );

        trace.push(PipelineStage::Generating);
        let generated = match self.generator.generate(&request, rid).await {
            Ok(raw) => {
                trace.push(PipelineStage::Sanitizing);
                self.generator.sanitize(&raw)
            }
            Err(e) => Err(e),
        };

        let (text, response_type, tone) = match generated {
            Ok(text) => {
                trace.push(PipelineStage::Streaming);
                (text, request.response_type, emotion.primary.as_str().to_string())
            }
            Err(e) => {
                log_error(rid, &format!("Falling back: {}", e));
                trace.push(PipelineStage::Fallback);
                (
                    self.generator.sanitizer().fallback().to_string(),
                    ResponseType::Fallback,
                    Emotion::Neutral.as_str().to_string(),
                )
            }
        };
        trace.push(PipelineStage::Done);

        self.remember(user_id, message, &emotion, &text, response_type, rid).await;

        let mut metadata = ReplyMetadata::new(&request_id, response_type, self.generator.backend_name());
        metadata.knowledge_used = knowledge_answer.is_some() && response_type != ResponseType::Fallback;
        metadata.context_used = context.is_some();
        metadata.reasoning = emotion.reasoning.clone();
        metadata.processing_time = start.elapsed().as_secs_f64();

        log_pipeline(
            rid,
            &format!("Reply ready in {:.3}s via {}", metadata.processing_time, response_type.as_str()),
        );

        Reply {
            text,
            emotion: EmotionSummary::from(&emotion),
            response_type,
            tone,
            metadata,
            trace,
        }
    }

    /// Hand both turns to the memory store. Failures are logged only.
    async fn remember(
        &self,
        user_id: &str,
        message: &str,
        emotion: &EmotionResult,
        reply: &str,
        response_type: ResponseType,
        rid: Option<&str>,
    ) {
        let user_turn = ConversationTurn::new(Role::User, message, Some(emotion.primary));
        if let Err(e) = self.memory.append(user_id, user_turn).await {
            log_error(rid, &format!("Could not store user turn: {}", e));
            return;
        }
        if response_type == ResponseType::Fallback {
            return;
        }
        let reply_turn = ConversationTurn::new(Role::Assistant, reply, None);
        if let Err(e) = self.memory.append(user_id, reply_turn).await {
            log_error(rid, &format!("Could not store reply turn: {}", e));
        }
    }

    /// Start chunked delivery of a finished reply. The fallback message goes
    /// out as a single text chunk.
    pub fn stream(&self, reply: &Reply) -> (mpsc::Receiver<StreamChunk>, JoinHandle<Delivery>) {
        let mut settings = self.stream_settings;
        if reply.is_fallback() {
            settings.chunk_words = usize::MAX;
        }
        spawn_stream(reply.text.clone(), reply.emotion.clone(), reply.metadata.clone(), settings)
    }
}
