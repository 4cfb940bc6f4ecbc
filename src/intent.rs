// What kind of message this is, independent of the feeling in it.
// Reported next to the emotion so clients can tell a greeting from a vent.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Question,
    EmotionalExpression,
    PracticalRequest,
    #[default]
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Question => "question",
            Intent::EmotionalExpression => "emotional_expression",
            Intent::PracticalRequest => "practical_request",
            Intent::General => "general",
        }
    }
}

/// Checked in order; the first intent with a matching pattern wins.
const PATTERNS: &[(Intent, &[&str])] = &[
    (
        Intent::Greeting,
        &[
            r"^(hi|hello|hey|hiya|howdy|good morning|good afternoon|good evening)$",
            r"^(hi|hello|hey)\s*(there|friend|buddy)?[!.]*$",
            r"^(what's up|how are you|how's it going)[?!.]*$",
        ],
    ),
    (
        Intent::Question,
        &[
            r"^(what|who|when|where|why|how)\s+",
            r"\?$",
            r"^(can you|could you|would you|will you)",
            r"^(explain|tell me|show me|help me)",
        ],
    ),
    (
        Intent::EmotionalExpression,
        &[
            r"(i'm|i am|feeling|feel)\s+(so|very|really|extremely)?\s*(happy|sad|angry|scared|excited|worried|frustrated)",
            r"(love|hate|adore|despise)\s+(this|that|it)",
            r"(amazing|terrible|awful|wonderful|fantastic|horrible)",
            r"(makes me|i feel|feeling so)",
        ],
    ),
    (
        Intent::PracticalRequest,
        &[
            r"(how to|steps to|way to|process to)",
            r"\b(change|reset|update|fix|solve|setup)\b",
            r"\b(bank|account|upi|pin|payment|card)\b",
            r"(problem|issue|trouble|error|help with)",
        ],
    ),
];

/// One alternation per intent, compiled once.
static COMPILED: Lazy<Vec<(Intent, Regex)>> = Lazy::new(|| {
    PATTERNS
        .iter()
        .filter_map(|(intent, patterns)| {
            let joined = patterns
                .iter()
                .map(|p| format!("(?:{})", p))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&joined).ok().map(|re| (*intent, re))
        })
        .collect()
});

pub fn detect(text: &str) -> Intent {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return Intent::General;
    }
    COMPILED
        .iter()
        .find(|(_, re)| re.is_match(&lower))
        .map(|(intent, _)| *intent)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pattern_group_compiles() {
        assert_eq!(COMPILED.len(), PATTERNS.len());
    }

    #[test]
    fn detects_each_intent() {
        assert_eq!(detect("Hello there!"), Intent::Greeting);
        assert_eq!(detect("how's it going?"), Intent::Greeting);
        assert_eq!(detect("What is an API"), Intent::Question);
        assert_eq!(detect("could you look at this"), Intent::Question);
        assert_eq!(detect("I'm so sad today"), Intent::EmotionalExpression);
        assert_eq!(detect("this movie was awful"), Intent::EmotionalExpression);
        assert_eq!(detect("I need to reset my card pin"), Intent::PracticalRequest);
        assert_eq!(detect("the weather turned"), Intent::General);
        assert_eq!(detect("   "), Intent::General);
    }

    #[test]
    fn questions_win_over_feelings() {
        assert_eq!(detect("why am I feeling so sad?"), Intent::Question);
    }
}
