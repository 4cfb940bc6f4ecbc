// Built-in knowledge collaborator: recognizes factual/how-to questions and
// answers the common ones from a small fixed table without a backend call.

use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeReply {
    pub is_knowledge_query: bool,
    pub answer: Option<String>,
}

#[async_trait]
pub trait KnowledgeCollaborator: Send + Sync {
    async fn classify_and_answer(&self, message: &str) -> Result<KnowledgeReply, BackendError>;
}

/// Knowledge about Attune itself, answered when users ask what it is.
pub const ATTUNE_KNOWLEDGE: &str = "Attune is an emotion-aware companion. It reads the feeling behind each \
message, remembers the last few turns of the conversation, and shapes how long, how warm, how formal \
and how playful its replies are from four sliders in your profile: empathy, humor, formality and verbosity.";

/// (any of these phrases, answer)
const FACTS: &[(&[&str], &str)] = &[
    (
        &["improve communication skills", "improve my communication"],
        "To improve communication: listen actively without interrupting, speak clearly and concisely, \
         watch body language, ask questions to understand better, and practice with friends.",
    ),
    (
        &["stop overthinking", "overcome overthinking"],
        "To ease overthinking: set a time limit for decisions, write your thoughts down, focus on what \
         you can act on, and bring your attention back to the present with a short breathing exercise.",
    ),
    (
        &["build confidence", "become more confident"],
        "To build confidence: set small achievable goals, practice positive self-talk, face fears \
         gradually, and celebrate small wins.",
    ),
    (
        &["time management", "manage time better", "manage my time"],
        "For better time management: separate urgent from important work, time-block your calendar, \
         work in focused 25 minute sessions with short breaks, and say no to non-essential tasks.",
    ),
    (
        &["stop procrastinating", "overcome procrastination"],
        "To stop procrastinating: start with just two minutes, break the task into tiny steps, remove \
         distractions, and work during your peak energy hours.",
    ),
    (
        &["deal with stress", "manage stress", "reduce stress"],
        "To manage stress: try slow deep breathing, move your body even for ten minutes, protect your \
         sleep, talk to someone you trust, and take real breaks.",
    ),
    (
        &["study effectively", "how to study"],
        "To study effectively: test yourself instead of rereading, space your reviews out over days, \
         teach the idea to someone else, and study in short focused sessions.",
    ),
    (
        &["what is an api", "what is api"],
        "An API (Application Programming Interface) is a defined way for programs to talk to each other: \
         one side sends a request in an agreed format and the other sends back data or performs an action.",
    ),
    (
        &["what is attune", "who are you", "what are you", "how do you work"],
        ATTUNE_KNOWLEDGE,
    ),
];

const KNOWLEDGE_OPENERS: &[&str] = &[
    "what is", "what are", "what's", "who is", "who was", "when did", "when was", "where is",
    "how do", "how does", "how to", "how can", "why is", "why does", "explain", "define",
    "tell me about", "can you explain", "what does",
];
const KNOWLEDGE_MARKERS: &[&str] = &[
    "how to ", "steps to", "tips for", "ways to", "difference between", "meaning of", "?",
];

/// Fixed-table collaborator. Never fails.
#[derive(Debug, Default, Clone)]
pub struct StaticKnowledge;

impl StaticKnowledge {
    pub fn new() -> Self {
        Self
    }

    /// Check if a message is a factual or how-to question
    pub fn is_knowledge_query(message: &str) -> bool {
        let lower = message.trim().to_lowercase();
        if lower.is_empty() {
            return false;
        }
        // Opener can follow a short emotional lead-in ("I'm scared, what is ...").
        let opens = lower
            .split([',', '.', '!', ';'])
            .map(str::trim)
            .any(|clause| KNOWLEDGE_OPENERS.iter().any(|o| clause.starts_with(o)));
        let marked = lower.ends_with('?') && KNOWLEDGE_MARKERS.iter().any(|m| lower.contains(m));
        opens || (marked && lower.split_whitespace().count() > 3)
    }

    pub fn lookup(message: &str) -> Option<&'static str> {
        let lower = message.to_lowercase();
        FACTS
            .iter()
            .find(|(triggers, _)| triggers.iter().any(|t| lower.contains(t)))
            .map(|(_, answer)| *answer)
    }
}

#[async_trait]
impl KnowledgeCollaborator for StaticKnowledge {
    async fn classify_and_answer(&self, message: &str) -> Result<KnowledgeReply, BackendError> {
        let answer = Self::lookup(message).map(str::to_string);
        Ok(KnowledgeReply {
            is_knowledge_query: answer.is_some() || Self::is_knowledge_query(message),
            answer,
        })
    }
}
