use crate::context::truncate_chars;
use crate::emotion::{tokenize, Emotion, EmotionResult};
use crate::persona::{GenerationDirectives, LengthBand};
use crate::sanitize::Sanitizer;
use serde::{Deserialize, Serialize};

// ============ Strategy ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    EmotionalSupport,
    KnowledgeFocused,
    Hybrid,
    CasualChat,
    Fallback,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::EmotionalSupport => "emotional_support",
            ResponseType::KnowledgeFocused => "knowledge_focused",
            ResponseType::Hybrid => "hybrid",
            ResponseType::CasualChat => "casual_chat",
            ResponseType::Fallback => "fallback",
        }
    }

    pub fn from_str(s: &str) -> Option<ResponseType> {
        match s.to_lowercase().as_str() {
            "emotional_support" => Some(ResponseType::EmotionalSupport),
            "knowledge_focused" => Some(ResponseType::KnowledgeFocused),
            "hybrid" => Some(ResponseType::Hybrid),
            "casual_chat" => Some(ResponseType::CasualChat),
            "fallback" => Some(ResponseType::Fallback),
            _ => None,
        }
    }

    /// Support-led replies take their length from the empathy slider.
    pub fn uses_empathy_length(&self) -> bool {
        matches!(self, ResponseType::EmotionalSupport | ResponseType::Hybrid)
    }
}

/// What wins when a message is both a knowledge query and emotionally salient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgePrecedence {
    /// Support-led, knowledge answer embedded.
    #[default]
    EmpathyFirst,
    /// Knowledge-led, one line acknowledging the feeling.
    KnowledgeFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Casual,
    Structured,
    Code,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub response_type: ResponseType,
    pub kind: RequestKind,
}

// ============ Prompt Text ============

const PERSONA_LINE: &str = "a warm and attentive companion";
const OPENING: &str = "Write only your reply to the message below, in plain conversational sentences.";
const SUPPORT_LINE: &str = "Acknowledge that feeling before anything else.";
const GROUNDING_LINE: &str = "Ground your answer in this reference:";
const WEAVE_LINE: &str = "Once you have acknowledged the feeling, answer their question using this reference:";
const CONTEXT_LINE: &str = "Recent conversation for context:";

/// Pieces of the instruction text that must never appear in a reply. The
/// sanitizer treats any of them in backend output as a leak.
pub const PROMPT_FRAGMENTS: &[&str] = &[
    "Write only your reply to the message below",
    "Acknowledge that feeling before anything else",
    "Ground your answer in this reference",
    "answer their question using this reference",
    "Recent conversation for context",
    PERSONA_LINE,
];

/// Matched against whole tokens, so "rustic" is not "rust".
const CODE_KEYWORDS: &[&str] = &[
    "code", "function", "functions", "script", "scripts", "program", "debug", "compile",
    "python", "javascript", "typescript", "rust", "java", "sql", "regex", "algorithm",
    "algorithms", "snippet", "snippets",
];
const STRUCTURED_KEYWORDS: &[&str] = &[
    "how to", "how do", "steps", "explain", "list", "lists", "guide", "plan", "plans",
    "compare", "difference", "tips", "ways to", "what is", "what are",
];

/// Room for the requested sentence count with margin, never the limiting factor.
pub fn token_ceiling(kind: RequestKind, band: LengthBand) -> u32 {
    match kind {
        RequestKind::Code => 2000,
        RequestKind::Structured => match band {
            LengthBand::Long => 800,
            LengthBand::Short | LengthBand::Medium => 600,
        },
        RequestKind::Casual => match band {
            LengthBand::Short => 300,
            LengthBand::Medium => 400,
            LengthBand::Long => 500,
        },
    }
}

pub fn request_kind(message: &str, response_type: ResponseType) -> RequestKind {
    let padded = format!(" {} ", tokenize(message).join(" "));
    let has = |kw: &&str| padded.contains(&format!(" {} ", kw));
    if CODE_KEYWORDS.iter().any(has) {
        RequestKind::Code
    } else if matches!(response_type, ResponseType::KnowledgeFocused | ResponseType::Hybrid)
        || STRUCTURED_KEYWORDS.iter().any(has)
    {
        RequestKind::Structured
    } else {
        RequestKind::Casual
    }
}

fn feeling_phrase(emotion: Emotion) -> &'static str {
    match emotion {
        Emotion::Joy => "happy or excited",
        Emotion::Sadness => "sad or down",
        Emotion::Anger => "frustrated or angry",
        Emotion::Fear => "anxious or afraid",
        Emotion::Surprise => "surprised",
        Emotion::Neutral => "calm",
    }
}

// ============ Composer ============

const MAX_MESSAGE_CHARS: usize = 4000;
const MAX_KNOWLEDGE_CHARS: usize = 1200;

#[derive(Debug, Clone)]
pub struct ResponseComposer {
    agent_name: String,
    salience_threshold: f64,
    precedence: KnowledgePrecedence,
    sanitizer: Sanitizer,
}

impl ResponseComposer {
    pub fn new(
        agent_name: &str,
        salience_threshold: f64,
        precedence: KnowledgePrecedence,
        sanitizer: Sanitizer,
    ) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            salience_threshold,
            precedence,
            sanitizer,
        }
    }

    pub fn salience_threshold(&self) -> f64 {
        self.salience_threshold
    }

    pub fn select_strategy(&self, emotion: &EmotionResult, has_knowledge: bool) -> ResponseType {
        let salient = emotion.is_salient(self.salience_threshold);
        match (salient, has_knowledge) {
            (true, true) => match self.precedence {
                KnowledgePrecedence::EmpathyFirst => ResponseType::Hybrid,
                KnowledgePrecedence::KnowledgeFirst => ResponseType::KnowledgeFocused,
            },
            (true, false) => ResponseType::EmotionalSupport,
            (false, true) => ResponseType::KnowledgeFocused,
            (false, false) => ResponseType::CasualChat,
        }
    }

    /// Strategy for a raw knowledge answer, judged after cleaning so a
    /// blank answer counts as none.
    pub fn strategy(&self, emotion: &EmotionResult, knowledge_answer: Option<&str>) -> ResponseType {
        self.select_strategy(emotion, self.usable_knowledge(knowledge_answer).is_some())
    }

    /// Embedded text loses any control markup it carried in.
    fn clean_input(&self, text: &str, max_chars: usize) -> String {
        let stripped = self.sanitizer.strip_control(text);
        truncate_chars(stripped.trim(), max_chars)
    }

    fn usable_knowledge(&self, knowledge_answer: Option<&str>) -> Option<String> {
        knowledge_answer
            .map(|k| self.clean_input(k, MAX_KNOWLEDGE_CHARS))
            .filter(|k| !k.is_empty())
    }

    /// Flat instruction block, optional context, then the message. No chat
    /// template or bracketed control markup is ever emitted. `directives`
    /// should come from `derive` with `strategy(..).uses_empathy_length()`.
    pub fn compose(
        &self,
        message: &str,
        emotion: &EmotionResult,
        context: Option<&str>,
        directives: &GenerationDirectives,
        knowledge_answer: Option<&str>,
    ) -> GenerationRequest {
        let knowledge = self.usable_knowledge(knowledge_answer);
        let response_type = self.select_strategy(emotion, knowledge.is_some());
        let salient = emotion.is_salient(self.salience_threshold);
        let feeling = feeling_phrase(emotion.primary);

        let mut lines: Vec<String> = vec![format!("You are {}, {}. {}", self.agent_name, PERSONA_LINE, OPENING)];
        lines.push(format!("Length: {}.", directives.length_instruction));

        match response_type {
            ResponseType::KnowledgeFocused => {
                push_nonempty(&mut lines, &directives.formality_instruction);
                push_nonempty(&mut lines, &directives.humor_instruction);
                if salient {
                    lines.push(format!(
                        "Open with one short sentence acknowledging that they seem {}.",
                        feeling
                    ));
                }
                if let Some(answer) = &knowledge {
                    lines.push(format!("{} {}", GROUNDING_LINE, answer));
                }
            }
            ResponseType::EmotionalSupport | ResponseType::Hybrid => {
                lines.push(format!("Tone: {}.", directives.tone_instruction));
                push_nonempty(&mut lines, &directives.formality_instruction);
                lines.push(format!("They seem to be feeling {}. {}", feeling, SUPPORT_LINE));
                if let Some(answer) = &knowledge {
                    lines.push(format!("{} {}", WEAVE_LINE, answer));
                }
            }
            ResponseType::CasualChat | ResponseType::Fallback => {
                lines.push(format!("Tone: {}.", directives.tone_instruction));
                push_nonempty(&mut lines, &directives.formality_instruction);
                push_nonempty(&mut lines, &directives.humor_instruction);
            }
        }

        if let Some(context) = context.map(|c| self.clean_input(c, MAX_MESSAGE_CHARS)).filter(|c| !c.is_empty()) {
            lines.push(String::new());
            lines.push(CONTEXT_LINE.to_string());
            lines.push(context);
        }

        lines.push(String::new());
        lines.push(format!("Message: {}", self.clean_input(message, MAX_MESSAGE_CHARS)));

        let kind = request_kind(message, response_type);
        GenerationRequest {
            prompt: lines.join("\n"),
            max_tokens: token_ceiling(kind, directives.length_band),
            response_type,
            kind,
        }
    }
}

fn push_nonempty(lines: &mut Vec<String>, instruction: &str) {
    if !instruction.trim().is_empty() {
        lines.push(instruction.to_string());
    }
}
