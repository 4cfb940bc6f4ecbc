use crate::composer::PROMPT_FRAGMENTS;
use crate::error::PipelineError;
use regex::{Regex, RegexBuilder};

pub const FALLBACK_MESSAGE: &str =
    "I'm sorry, I couldn't put together a proper reply just now. Could you say that again?";

const ROLE_LABELS: &[&str] = &["assistant", "user", "human", "ai", "system", "bot"];

/// Leaked-instruction fragments seen in backend output, matched case-insensitively.
const LEAK_DENYLIST: &[&str] = &[
    "as an ai language model",
    "system prompt",
    "my instructions are",
    "[inst]",
    "[/inst]",
    "<<sys>>",
];

/// Cleans raw backend text. Every transformation here is idempotent, so
/// sanitizing twice gives the same result as sanitizing once.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    control: Regex,
    role_prefix: Regex,
    dialogue: Regex,
    spaces: Regex,
    denylist: Vec<String>,
    fallback: String,
}

impl Sanitizer {
    pub fn new(agent_name: &str, fallback: &str) -> Result<Self, regex::Error> {
        let mut labels: Vec<String> = ROLE_LABELS.iter().map(|l| regex::escape(l)).collect();
        let agent = agent_name.trim();
        if !agent.is_empty() {
            labels.push(regex::escape(&agent.to_lowercase()));
        }
        let labels = labels.join("|");

        let denylist = LEAK_DENYLIST
            .iter()
            .chain(PROMPT_FRAGMENTS.iter())
            .map(|f| f.to_lowercase())
            .collect();

        Ok(Self {
            control: Regex::new(r"(?s)<\|.*?\|>")?,
            role_prefix: RegexBuilder::new(&format!(r"^\s*(?:{})\s*:", labels))
                .case_insensitive(true)
                .build()?,
            dialogue: RegexBuilder::new(&format!(r"\n[ \t]*(?:{})[ \t]*:", labels))
                .case_insensitive(true)
                .build()?,
            spaces: Regex::new(r"[ \t]{2,}")?,
            denylist,
            fallback: fallback.to_string(),
        })
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Remove `<|...|>` control tokens until none are left.
    pub fn strip_control(&self, text: &str) -> String {
        let mut current = text.to_string();
        while self.control.is_match(&current) {
            current = self.control.replace_all(&current, "").into_owned();
        }
        current
    }

    fn strip_role_prefixes(&self, text: &str) -> String {
        let mut current = text.trim().to_string();
        while let Some(found) = self.role_prefix.find(&current) {
            current = current[found.end()..].trim().to_string();
        }
        current
    }

    fn cut_at_dialogue(&self, text: &str) -> String {
        match self.dialogue.find(text) {
            Some(found) => text[..found.start()].trim_end().to_string(),
            None => text.to_string(),
        }
    }

    fn leaked_fragment(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.denylist
            .iter()
            .find(|fragment| lower.contains(fragment.as_str()))
            .map(String::as_str)
    }

    /// Clean text, or SanitizationTrip when nothing safe is left to show.
    pub fn clean(&self, raw: &str) -> Result<String, PipelineError> {
        let stripped = self.strip_control(raw);
        let collapsed = self.spaces.replace_all(&stripped, " ");
        let unprefixed = self.strip_role_prefixes(&collapsed);
        let cleaned = self.cut_at_dialogue(&unprefixed).trim().to_string();

        if let Some(fragment) = self.leaked_fragment(&cleaned) {
            return Err(PipelineError::SanitizationTrip(format!("leaked fragment '{}'", fragment)));
        }
        if cleaned.is_empty() {
            return Err(PipelineError::SanitizationTrip("nothing left after cleaning".to_string()));
        }
        Ok(cleaned)
    }

    /// Like `clean`, but a trip yields the fixed fallback message.
    pub fn sanitize(&self, raw: &str) -> String {
        self.clean(raw).unwrap_or_else(|_| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> Sanitizer {
        Sanitizer::new("Attune", FALLBACK_MESSAGE).unwrap()
    }

    #[test]
    fn strips_leading_control_token() {
        assert_eq!(sanitizer().sanitize("<|assistant|> Hello there"), "Hello there");
    }

    #[test]
    fn strips_nested_and_interior_tokens() {
        let s = sanitizer();
        assert_eq!(s.sanitize("Hi <|eot_id|>friend<|end|>"), "Hi friend");
        assert_eq!(s.sanitize("<<|x|>|y|>ok"), "ok");
        assert_eq!(s.sanitize("a <|multi\nline|> b"), "a b");
    }

    #[test]
    fn strips_role_prefixes_including_agent_name() {
        let s = sanitizer();
        assert_eq!(s.sanitize("Assistant: Sure thing."), "Sure thing.");
        assert_eq!(s.sanitize("AI: User: nested"), "nested");
        assert_eq!(s.sanitize("attune: hello"), "hello");
        assert_eq!(s.sanitize("  Human :  hey"), "hey");
    }

    #[test]
    fn cuts_at_embedded_dialogue() {
        let s = sanitizer();
        assert_eq!(
            s.sanitize("That sounds hard.\nUser: thanks\nAssistant: anytime"),
            "That sounds hard."
        );
    }

    #[test]
    fn denylisted_output_becomes_fallback() {
        let s = sanitizer();
        assert_eq!(s.sanitize("As an AI language model I cannot feel."), FALLBACK_MESSAGE);
        assert!(matches!(
            s.clean("Sure. Write only your reply to the message below"),
            Err(PipelineError::SanitizationTrip(_))
        ));
    }

    #[test]
    fn empty_output_trips() {
        let s = sanitizer();
        assert!(s.clean("<|end|>").is_err());
        assert_eq!(s.sanitize("   "), FALLBACK_MESSAGE);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let s = sanitizer();
        let samples = [
            "<|assistant|> Hello there",
            "Assistant:   Hi  there <|x|>  friend\nUser: more",
            "plain text",
            "<<||>|>",
            "<|",
            "User:",
            "AI:\n\nAssistant: deep\n nested",
            "As an AI language model",
            FALLBACK_MESSAGE,
            "Good morning!\n\nHow did you sleep?",
        ];
        for raw in samples {
            let once = s.sanitize(raw);
            assert_eq!(s.sanitize(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn fallback_survives_its_own_sanitizer() {
        let s = sanitizer();
        assert_eq!(s.clean(FALLBACK_MESSAGE).unwrap(), FALLBACK_MESSAGE);
    }
}
