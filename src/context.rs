use crate::emotion::{tokenize, Emotion};
use crate::logging::{log_context, log_error};
use crate::store::MemoryStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Turns kept per user. Oldest are evicted first.
pub const MAX_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Option<Role> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub emotion: Option<Emotion>,
}

impl ConversationTurn {
    pub fn new(role: Role, text: &str, emotion: Option<Emotion>) -> Self {
        Self {
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
            emotion,
        }
    }
}

/// Bounded, insertion-ordered snapshot of recent turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    turns: VecDeque<ConversationTurn>,
}

impl ConversationContext {
    pub fn from_turns(turns: impl IntoIterator<Item = ConversationTurn>) -> Self {
        let mut context = Self::default();
        for turn in turns {
            context.push(turn);
        }
        context
    }

    /// Append, evicting the oldest turn past `MAX_TURNS`.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > MAX_TURNS {
            self.turns.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Oldest first.
    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn last_user_emotion(&self) -> Option<Emotion> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .and_then(|t| t.emotion)
    }
}

// ============ Extraction ============

/// Words and phrases that point back at earlier turns.
const REFERENTIAL_WORDS: &[&str] = &[
    "it", "its", "that", "this", "those", "these", "they", "them", "their", "he", "him",
    "his", "she", "her", "there", "above", "earlier", "previous", "again", "also", "too",
    "same", "one", "else",
];
const REFERENTIAL_PHRASES: &[&str] = &[
    "what about", "how about", "which one", "say what", "give what", "what to",
    "include what", "need what", "and then", "the other",
];

#[derive(Debug, Clone)]
pub struct ContextExtractor {
    pub max_chars: usize,
    pub max_turns: usize,
    pub self_contained_min_chars: usize,
}

impl Default for ContextExtractor {
    fn default() -> Self {
        Self {
            max_chars: 300,
            max_turns: 3,
            self_contained_min_chars: 40,
        }
    }
}

impl ContextExtractor {
    /// Long, punctuated, and free of back-references.
    pub fn is_self_contained(&self, message: &str) -> bool {
        let trimmed = message.trim();
        if trimmed.chars().count() < self.self_contained_min_chars {
            return false;
        }
        if !trimmed.ends_with(['.', '?', '!']) {
            return false;
        }
        let words = tokenize(trimmed);
        if words.iter().any(|w| REFERENTIAL_WORDS.contains(&w.as_str())) {
            return false;
        }
        let padded = format!(" {} ", words.join(" "));
        !REFERENTIAL_PHRASES
            .iter()
            .any(|p| padded.contains(&format!(" {} ", p)))
    }

    /// Short summary of the newest turns, or None when history would not help.
    pub fn extract(&self, history: &ConversationContext, current_message: &str) -> Option<String> {
        if history.is_empty() || self.is_self_contained(current_message) {
            return None;
        }

        // Newest first until the turn count or char budget runs out. The
        // oldest line that only partly fits keeps its label and its tail.
        let mut selected: Vec<String> = Vec::new();
        let mut remaining = self.max_chars;
        for turn in history.turns().rev().take(self.max_turns) {
            let separator = usize::from(!selected.is_empty());
            if remaining <= separator {
                break;
            }
            let budget = remaining - separator;
            let label = format!("{}: ", turn.role.label());
            let text = turn.text.trim();
            let cost = label.chars().count() + text.chars().count();
            if cost <= budget {
                remaining = budget - cost;
                selected.push(format!("{}{}", label, text));
                continue;
            }
            let room = budget.saturating_sub(label.chars().count() + 1);
            if room > 0 {
                selected.push(format!("{}…{}", label, tail_chars(text, room)));
            }
            break;
        }
        selected.reverse();

        let summary = selected.join("\n");
        if summary.trim().is_empty() {
            None
        } else {
            Some(summary)
        }
    }

    /// Store-backed lookup. An unreachable store means "no context".
    pub async fn lookup(
        &self,
        store: &dyn MemoryStore,
        user_id: &str,
        current_message: &str,
    ) -> (ConversationContext, Option<String>) {
        match store.get(user_id).await {
            Ok(history) => {
                let summary = self.extract(&history, current_message);
                log_context(
                    None,
                    &format!(
                        "{} turns on record, context {}",
                        history.len(),
                        if summary.is_some() { "attached" } else { "skipped" }
                    ),
                );
                (history, summary)
            }
            Err(e) => {
                log_error(None, &format!("Memory store unavailable, continuing without context: {}", e));
                (ConversationContext::default(), None)
            }
        }
    }
}

/// Cut to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Keep the last `max_chars` characters.
fn tail_chars(text: &str, max_chars: usize) -> &str {
    let skip = text.chars().count().saturating_sub(max_chars);
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(lines: &[(Role, &str)]) -> ConversationContext {
        ConversationContext::from_turns(lines.iter().map(|(r, t)| ConversationTurn::new(*r, t, None)))
    }

    #[test]
    fn context_never_exceeds_ten_turns() {
        let mut context = ConversationContext::default();
        for i in 0..25 {
            context.push(ConversationTurn::new(Role::User, &format!("turn {}", i), None));
        }
        assert_eq!(context.len(), MAX_TURNS);
        assert_eq!(context.turns().next().map(|t| t.text.as_str()), Some("turn 15"));
        assert_eq!(context.turns().last().map(|t| t.text.as_str()), Some("turn 24"));
    }

    #[test]
    fn empty_history_yields_nothing() {
        let extractor = ContextExtractor::default();
        assert_eq!(extractor.extract(&ConversationContext::default(), "what about it"), None);
    }

    #[test]
    fn self_contained_question_skips_history() {
        let extractor = ContextExtractor::default();
        let h = history(&[(Role::User, "I love hiking"), (Role::Assistant, "Nice!")]);
        let message = "What is the boiling point of water at sea level?";
        assert!(extractor.is_self_contained(message));
        assert_eq!(extractor.extract(&h, message), None);
    }

    #[test]
    fn referential_message_pulls_recent_turns() {
        let extractor = ContextExtractor::default();
        let h = history(&[
            (Role::User, "first message that should be dropped"),
            (Role::User, "My sister is visiting next week"),
            (Role::Assistant, "That sounds lovely. Any plans?"),
            (Role::User, "We might go to the coast"),
        ]);
        let summary = extractor.extract(&h, "what should we do there?").unwrap();
        assert!(summary.ends_with("User: We might go to the coast"));
        assert!(summary.starts_with("User: My sister"));
        assert!(!summary.contains("dropped"));
    }

    #[test]
    fn short_messages_are_never_self_contained() {
        let extractor = ContextExtractor::default();
        assert!(!extractor.is_self_contained("and then?"));
        assert!(!extractor.is_self_contained("Tell me more about the history of Rome"));
        assert!(!extractor.is_self_contained("Can you tell me how that thing works in practice?"));
    }

    #[test]
    fn summary_respects_char_budget() {
        let extractor = ContextExtractor::default();
        let long = "é".repeat(500);
        let h = history(&[(Role::User, &long), (Role::Assistant, &long), (Role::User, &long)]);
        let summary = extractor.extract(&h, "why?").unwrap();
        assert!(summary.chars().count() <= 300);
    }

    #[test]
    fn overflow_drops_the_oldest_text_first() {
        let extractor = ContextExtractor::default();
        let older = "x".repeat(290);
        let h = history(&[(Role::User, &older), (Role::User, "NEWEST: my dog is called Rex")]);
        let summary = extractor.extract(&h, "what about him?").unwrap();
        assert!(summary.ends_with("\nUser: NEWEST: my dog is called Rex"), "{}", summary);
        assert!(summary.starts_with("User: …xxx"));
        assert_eq!(summary.chars().count(), 300);
    }

    #[test]
    fn older_turns_stop_once_the_budget_is_spent() {
        let h = history(&[(Role::User, "first"), (Role::Assistant, "second"), (Role::User, "third")]);
        let exact = ContextExtractor {
            max_chars: 41,
            ..ContextExtractor::default()
        };
        assert_eq!(
            exact.extract(&h, "so?").as_deref(),
            Some("User: first\nAssistant: second\nUser: third")
        );

        let short = ContextExtractor {
            max_chars: 40,
            ..ContextExtractor::default()
        };
        assert_eq!(
            short.extract(&h, "so?").as_deref(),
            Some("User: …rst\nAssistant: second\nUser: third")
        );

        let tight = ContextExtractor {
            max_chars: 12,
            ..ContextExtractor::default()
        };
        assert_eq!(tight.extract(&h, "so?").as_deref(), Some("User: third"));
    }

    #[test]
    fn tail_keeps_the_end_on_char_boundaries() {
        assert_eq!(tail_chars("héllo", 4), "éllo");
        assert_eq!(tail_chars("hi", 10), "hi");
        assert_eq!(tail_chars("hi", 0), "");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn last_user_emotion_skips_assistant_turns() {
        let mut context = ConversationContext::default();
        context.push(ConversationTurn::new(Role::User, "ugh", Some(Emotion::Anger)));
        context.push(ConversationTurn::new(Role::Assistant, "sorry", None));
        assert_eq!(context.last_user_emotion(), Some(Emotion::Anger));
    }
}
