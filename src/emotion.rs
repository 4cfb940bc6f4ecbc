use crate::context::ConversationContext;
use crate::error::PipelineError;
use crate::intent::{self, Intent};
use crate::logging::{log_classifier, log_error};
use crate::model::EmotionModel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ============ Labels & Results ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Joy,
    Sadness,
    Anger,
    Fear,
    Surprise,
}

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Neutral,
        Emotion::Joy,
        Emotion::Sadness,
        Emotion::Anger,
        Emotion::Fear,
        Emotion::Surprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Joy => "joy",
            Emotion::Sadness => "sadness",
            Emotion::Anger => "anger",
            Emotion::Fear => "fear",
            Emotion::Surprise => "surprise",
        }
    }

    pub fn from_str(s: &str) -> Option<Emotion> {
        match s.trim().to_lowercase().as_str() {
            "neutral" => Some(Emotion::Neutral),
            "joy" => Some(Emotion::Joy),
            "sadness" => Some(Emotion::Sadness),
            "anger" => Some(Emotion::Anger),
            "fear" => Some(Emotion::Fear),
            "surprise" => Some(Emotion::Surprise),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Emotion::Neutral => 0,
            Emotion::Joy => 1,
            Emotion::Sadness => 2,
            Emotion::Anger => 3,
            Emotion::Fear => 4,
            Emotion::Surprise => 5,
        }
    }
}

/// Label -> probability. Always holds all six labels.
pub type Distribution = BTreeMap<Emotion, f64>;

/// Scores in `Emotion::ALL` order.
pub(crate) type Scores = [f64; 6];

pub(crate) fn to_distribution(scores: &Scores) -> Distribution {
    Emotion::ALL.iter().map(|e| (*e, scores[e.index()])).collect()
}

pub(crate) fn to_scores(distribution: &Distribution) -> Scores {
    let mut scores = [0.0; 6];
    for emotion in Emotion::ALL {
        scores[emotion.index()] = distribution.get(&emotion).copied().unwrap_or(0.0);
    }
    scores
}

/// Clamp negatives and non-finite values to zero, then rescale to sum 1.
/// Returns None when nothing usable is left.
pub(crate) fn normalize(scores: &Scores) -> Option<Scores> {
    let mut cleaned = [0.0; 6];
    for (slot, value) in cleaned.iter_mut().zip(scores.iter()) {
        *slot = if value.is_finite() && *value > 0.0 { *value } else { 0.0 };
    }
    let total: f64 = cleaned.iter().sum();
    if total <= f64::EPSILON {
        return None;
    }
    for slot in cleaned.iter_mut() {
        *slot /= total;
    }
    Some(cleaned)
}

/// Which stage produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionSource {
    Rule,
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionResult {
    pub primary: Emotion,
    pub confidence: f64,
    pub distribution: Distribution,
    pub intensity: f64,       // 0-100, zero for neutral
    pub source: EmotionSource,
    pub reasoning: String,
    #[serde(default)]
    pub intent: Intent,
}

impl EmotionResult {
    fn from_scores(scores: &Scores, source: EmotionSource, reasoning: String, text: &str) -> Self {
        // First maximum in label order wins ties, keeping argmax deterministic.
        let mut best = 0;
        for (i, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = i;
            }
        }
        let primary = Emotion::ALL[best];
        let confidence = scores[best].clamp(0.0, 1.0);
        Self {
            primary,
            confidence,
            distribution: to_distribution(scores),
            intensity: intensity(text, primary, confidence),
            source,
            reasoning,
            intent: intent::detect(text),
        }
    }

    /// Neutral at low confidence, used when no rule matched and the model is unavailable.
    pub fn fallback(reason: &str) -> Self {
        Self {
            primary: Emotion::Neutral,
            confidence: 0.5,
            distribution: to_distribution(&[0.5, 0.1, 0.1, 0.1, 0.1, 0.1]),
            intensity: 0.0,
            source: EmotionSource::Fallback,
            reasoning: reason.to_string(),
            intent: Intent::General,
        }
    }

    /// Non-neutral and above the confidence threshold.
    pub fn is_salient(&self, threshold: f64) -> bool {
        self.primary != Emotion::Neutral && self.confidence > threshold
    }

    pub fn score(&self, emotion: Emotion) -> f64 {
        self.distribution.get(&emotion).copied().unwrap_or(0.0)
    }
}

// ============ Text Helpers ============

/// Lowercased word tokens. Apostrophes stay inside words ("don't", "i'm").
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Input text prepared once for every rule predicate.
struct Normalized {
    trimmed: String,
    words: Vec<String>,
    padded: String, // " word word word "
}

impl Normalized {
    fn new(text: &str) -> Self {
        let words = tokenize(text);
        let padded = format!(" {} ", words.join(" "));
        Self {
            trimmed: text.trim().to_lowercase(),
            words,
            padded,
        }
    }

    fn has_phrase(&self, phrase: &str) -> bool {
        self.padded.contains(&format!(" {} ", phrase))
    }

    fn has_any_phrase(&self, phrases: &[&str]) -> bool {
        phrases.iter().any(|p| self.has_phrase(p))
    }

    fn starts_with_any(&self, phrases: &[&str]) -> bool {
        phrases.iter().any(|p| self.padded.starts_with(&format!(" {} ", p)))
    }

    fn has_emotion_cue(&self) -> bool {
        self.words.iter().any(|w| emotion_cue(w).is_some())
    }
}

const NEGATIONS: &[&str] = &["not", "no", "never", "hardly", "barely", "nothing", "neither", "nor"];
const NEGATION_WINDOW: usize = 3;

fn is_negation(word: &str) -> bool {
    NEGATIONS.contains(&word) || word.ends_with("n't") || word == "cannot"
}

/// True when one of the few words before `idx` negates it.
fn negated_at(words: &[String], idx: usize) -> bool {
    let start = idx.saturating_sub(NEGATION_WINDOW);
    words[start..idx].iter().any(|w| is_negation(w))
}

/// Emotion-bearing words checked by negation handling and rule guards.
const EMOTION_CUES: &[(&str, Emotion)] = &[
    ("happy", Emotion::Joy),
    ("glad", Emotion::Joy),
    ("excited", Emotion::Joy),
    ("thrilled", Emotion::Joy),
    ("delighted", Emotion::Joy),
    ("joyful", Emotion::Joy),
    ("cheerful", Emotion::Joy),
    ("proud", Emotion::Joy),
    ("sad", Emotion::Sadness),
    ("unhappy", Emotion::Sadness),
    ("depressed", Emotion::Sadness),
    ("lonely", Emotion::Sadness),
    ("miserable", Emotion::Sadness),
    ("heartbroken", Emotion::Sadness),
    ("upset", Emotion::Sadness),
    ("hurt", Emotion::Sadness),
    ("crying", Emotion::Sadness),
    ("angry", Emotion::Anger),
    ("mad", Emotion::Anger),
    ("furious", Emotion::Anger),
    ("annoyed", Emotion::Anger),
    ("frustrated", Emotion::Anger),
    ("irritated", Emotion::Anger),
    ("pissed", Emotion::Anger),
    ("scared", Emotion::Fear),
    ("afraid", Emotion::Fear),
    ("worried", Emotion::Fear),
    ("anxious", Emotion::Fear),
    ("nervous", Emotion::Fear),
    ("terrified", Emotion::Fear),
    ("frightened", Emotion::Fear),
    ("surprised", Emotion::Surprise),
    ("shocked", Emotion::Surprise),
    ("amazed", Emotion::Surprise),
    ("astonished", Emotion::Surprise),
    ("stunned", Emotion::Surprise),
];

fn emotion_cue(word: &str) -> Option<Emotion> {
    EMOTION_CUES
        .iter()
        .find(|(cue, _)| *cue == word)
        .map(|(_, emotion)| *emotion)
}

// ============ Pattern Pre-check ============

/// One ordered rule: first predicate that matches decides the result.
struct PatternRule {
    name: &'static str,
    matches: fn(&Normalized) -> bool,
    scores: Scores, // neutral, joy, sadness, anger, fear, surprise
}

const GREETINGS: &[&str] = &[
    "hi", "hii", "hello", "hey", "heya", "hiya", "howdy", "yo", "sup", "greetings",
    "good morning", "good afternoon", "good evening", "what's up", "whats up",
    "how are you", "how are you doing", "how's it going", "hows it going",
];
const GREETING_OPENERS: &[&str] = &["hi", "hello", "hey", "hiya", "howdy", "yo"];
const GREETING_MAX_CHARS: usize = 15;

const QUESTION_OPENERS: &[&str] = &[
    "what is", "what are", "what's", "whats", "what does", "what do", "who is", "who was",
    "who are", "when is", "when was", "when did", "where is", "where are", "where can",
    "how do", "how does", "how to", "how can", "how many", "how much", "how long",
    "why is", "why are", "why does", "which is", "is it true", "can you explain",
    "could you explain", "explain", "define", "tell me about", "give me",
];

const FRUSTRATION_WORDS: &[&str] = &[
    "frustrated", "frustrating", "annoyed", "annoying", "irritated", "irritating",
    "furious", "infuriating", "pissed", "angry", "ugh", "argh", "wtf",
];
const FRUSTRATION_PHRASES: &[&str] = &[
    "fed up", "sick of", "hate this", "hate it", "can't stand", "doesn't work",
    "not working", "keeps crashing", "so done with",
];

const CASUAL_STATE_WORDS: &[&str] = &["hungry", "thirsty", "tired", "sleepy", "bored", "busy"];
const CASUAL_STATE_PHRASES: &[&str] = &["just chilling", "nothing much", "not much"];

const HUMOR_WORDS: &[&str] = &["joke", "jokes", "pun", "puns"];
const HUMOR_PHRASES: &[&str] = &["make me laugh", "something funny", "funny story"];

const GRATITUDE_PHRASES: &[&str] = &["thanks", "thank you", "thx", "ty", "appreciate it", "much appreciated"];

fn is_empty(n: &Normalized) -> bool {
    n.trimmed.is_empty()
}

fn is_greeting(n: &Normalized) -> bool {
    let joined = n.words.join(" ");
    if GREETINGS.contains(&joined.as_str()) {
        return true;
    }
    let short = n.trimmed.chars().count() <= GREETING_MAX_CHARS;
    short && n.starts_with_any(GREETING_OPENERS)
}

fn is_practical_question(n: &Normalized) -> bool {
    n.starts_with_any(QUESTION_OPENERS) && !n.has_emotion_cue()
}

fn is_frustration(n: &Normalized) -> bool {
    let word_hit = n.words.iter().enumerate().any(|(i, w)| {
        FRUSTRATION_WORDS.contains(&w.as_str()) && !negated_at(&n.words, i)
    });
    word_hit || n.has_any_phrase(FRUSTRATION_PHRASES)
}

fn is_casual_state(n: &Normalized) -> bool {
    if n.has_emotion_cue() || n.has_phrase("tired of") {
        return false;
    }
    n.words.iter().any(|w| CASUAL_STATE_WORDS.contains(&w.as_str()))
        || n.has_any_phrase(CASUAL_STATE_PHRASES)
}

fn is_humor_request(n: &Normalized) -> bool {
    n.words.iter().any(|w| HUMOR_WORDS.contains(&w.as_str())) || n.has_any_phrase(HUMOR_PHRASES)
}

fn is_gratitude(n: &Normalized) -> bool {
    n.has_any_phrase(GRATITUDE_PHRASES)
}

/// Evaluated top to bottom. Order is priority.
const RULES: &[PatternRule] = &[
    PatternRule { name: "empty", matches: is_empty, scores: [1.0, 0.0, 0.0, 0.0, 0.0, 0.0] },
    PatternRule { name: "greeting", matches: is_greeting, scores: [0.90, 0.04, 0.02, 0.01, 0.02, 0.01] },
    PatternRule { name: "practical_question", matches: is_practical_question, scores: [0.85, 0.08, 0.03, 0.02, 0.01, 0.01] },
    PatternRule { name: "frustration", matches: is_frustration, scores: [0.06, 0.01, 0.03, 0.88, 0.01, 0.01] },
    PatternRule { name: "casual_state", matches: is_casual_state, scores: [0.85, 0.05, 0.05, 0.02, 0.02, 0.01] },
    PatternRule { name: "humor_request", matches: is_humor_request, scores: [0.10, 0.85, 0.01, 0.005, 0.005, 0.03] },
    PatternRule { name: "gratitude", matches: is_gratitude, scores: [0.85, 0.10, 0.02, 0.01, 0.01, 0.01] },
];

fn precheck(n: &Normalized) -> Option<&'static PatternRule> {
    RULES.iter().find(|rule| (rule.matches)(n))
}

// ============ Disambiguation ============

const NEGATED_MASS: f64 = 0.8;
const TIE_MARGIN: f64 = 0.05;

const VICTIM_PHRASES: &[&str] = &[
    "blamed me", "yelled at me", "shouted at me", "screamed at me", "accused me",
    "criticized me", "criticised me", "insulted me", "humiliated me", "bullied me",
    "ignored me", "rejected me", "betrayed me", "lied to me", "dumped me", "fired me",
    "i was blamed", "i got blamed", "i was accused", "i got accused", "i got yelled at",
    "i was yelled at", "i got fired", "i was fired", "i got punished", "i was punished",
    "not my fault", "wasn't my fault", "did nothing wrong", "didn't do anything wrong",
];

/// Move mass away from negated emotion words. A negated positive flips toward
/// sadness, a negated negative or surprise falls back to neutral.
fn apply_negation(words: &[String], scores: &mut Scores) -> Vec<Emotion> {
    let mut implicated: Vec<Emotion> = Vec::new();
    for (i, word) in words.iter().enumerate() {
        if let Some(emotion) = emotion_cue(word) {
            if negated_at(words, i) && !implicated.contains(&emotion) {
                implicated.push(emotion);
            }
        }
    }
    for emotion in &implicated {
        let moved = scores[emotion.index()] * NEGATED_MASS;
        scores[emotion.index()] -= moved;
        let target = if *emotion == Emotion::Joy { Emotion::Sadness } else { Emotion::Neutral };
        scores[target.index()] += moved;
    }
    implicated
}

/// Speaker on the receiving end of a negative act reads as hurt, not hostile.
fn apply_victim_framing(n: &Normalized, scores: &mut Scores) -> bool {
    let anger = Emotion::Anger.index();
    let sadness = Emotion::Sadness.index();
    let anger_leads = scores.iter().all(|s| scores[anger] >= *s);
    if anger_leads && scores[anger] > scores[sadness] && n.has_any_phrase(VICTIM_PHRASES) {
        scores.swap(anger, sadness);
        return true;
    }
    false
}

/// Near-ties go to the emotion the user expressed last turn.
fn apply_prior_context(scores: &mut Scores, prior: Option<&ConversationContext>) -> Option<Emotion> {
    let previous = prior?.last_user_emotion()?;
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]).then(a.cmp(b)));
    let (first, second) = (order[0], order[1]);
    if scores[first] - scores[second] < TIE_MARGIN && previous.index() == second {
        scores.swap(first, second);
        return Some(previous);
    }
    None
}

// ============ Intensity ============

const INTENSITY_HIGH: &[&str] = &["extremely", "incredibly", "absolutely", "completely", "totally", "so much", "really really"];
const INTENSITY_MEDIUM: &[&str] = &["very", "quite", "pretty", "really", "definitely", "so"];
const INTENSITY_LOW: &[&str] = &["a bit", "somewhat", "kind of", "sort of", "maybe", "slightly"];

/// 0-100 scale from confidence, scaled once per intensifier level present.
pub fn intensity(text: &str, primary: Emotion, confidence: f64) -> f64 {
    if primary == Emotion::Neutral {
        return 0.0;
    }
    let n = Normalized::new(text);
    let mut value = confidence * 100.0;
    if n.has_any_phrase(INTENSITY_HIGH) || text.contains("!!!") {
        value *= 1.4;
    }
    if n.has_any_phrase(INTENSITY_MEDIUM) || text.contains("!!") {
        value *= 1.2;
    }
    if n.has_any_phrase(INTENSITY_LOW) {
        value *= 0.8;
    }
    (value.min(100.0) * 10.0).round() / 10.0
}

// ============ Classifier ============

/// Rule pre-check in front of a shared statistical model.
pub struct EmotionClassifier {
    model: Option<Arc<dyn EmotionModel>>,
}

impl EmotionClassifier {
    pub fn new(model: Arc<dyn EmotionModel>) -> Self {
        Self { model: Some(model) }
    }

    /// Pattern rules only. Unmatched text gets the low-confidence neutral.
    pub fn without_model() -> Self {
        Self { model: None }
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn model_name(&self) -> &str {
        self.model.as_ref().map(|m| m.name()).unwrap_or("rules-only")
    }

    /// Never fails: model trouble degrades to the rule result or a low-confidence neutral.
    pub fn classify(&self, text: &str, prior: Option<&ConversationContext>) -> EmotionResult {
        let result = self.classify_text(text);
        match prior {
            Some(prior) => self.with_prior(result, text, prior),
            None => result,
        }
    }

    /// Text-only classification, usable before the history lookup finishes.
    pub fn classify_text(&self, text: &str) -> EmotionResult {
        let normalized = Normalized::new(text);

        if let Some(rule) = precheck(&normalized) {
            log_classifier(None, &format!("Rule '{}' matched", rule.name));
            return EmotionResult::from_scores(
                &rule.scores,
                EmotionSource::Rule,
                format!("matched {} pattern", rule.name),
                text,
            );
        }

        let Some(model) = &self.model else {
            return EmotionResult {
                intent: intent::detect(text),
                ..EmotionResult::fallback("no pattern matched and emotion model not loaded")
            };
        };

        let predicted = model.predict(text).and_then(|distribution| {
            normalize(&to_scores(&distribution)).ok_or_else(|| {
                PipelineError::ClassificationUnavailable("model returned an empty distribution".to_string())
            })
        });
        let mut scores = match predicted {
            Ok(scores) => scores,
            Err(e) => {
                log_error(None, &format!("Emotion model failed, using neutral fallback: {}", e));
                return EmotionResult {
                    intent: intent::detect(text),
                    ..EmotionResult::fallback("emotion model unavailable")
                };
            }
        };

        let mut notes = vec![format!("{} inference", model.name())];
        let negated = apply_negation(&normalized.words, &mut scores);
        if !negated.is_empty() {
            let labels: Vec<&str> = negated.iter().map(|e| e.as_str()).collect();
            notes.push(format!("negated {}", labels.join("/")));
        }
        if apply_victim_framing(&normalized, &mut scores) {
            notes.push("victim framing prefers sadness".to_string());
        }

        let result = EmotionResult::from_scores(&scores, EmotionSource::Model, notes.join("; "), text);
        log_classifier(
            None,
            &format!("Model result {} ({:.2}): {}", result.primary.as_str(), result.confidence, result.reasoning),
        );
        result
    }

    /// Break near-ties in a model result toward the user's previous emotion.
    /// Rule and fallback results are returned untouched.
    pub fn with_prior(&self, result: EmotionResult, text: &str, prior: &ConversationContext) -> EmotionResult {
        if result.source != EmotionSource::Model {
            return result;
        }
        let mut scores = to_scores(&result.distribution);
        match apply_prior_context(&mut scores, Some(prior)) {
            Some(previous) => {
                let reasoning = format!("{}; tie broken toward prior {}", result.reasoning, previous.as_str());
                log_classifier(None, &format!("Prior turn tipped result to {}", previous.as_str()));
                EmotionResult::from_scores(&scores, EmotionSource::Model, reasoning, text)
            }
            None => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ConversationTurn, Role};
    use crate::model::LexiconModel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the built-in lexicon and counts calls.
    struct CountingModel {
        inner: LexiconModel,
        calls: AtomicUsize,
    }

    impl CountingModel {
        fn new() -> Arc<Self> {
            Arc::new(Self { inner: LexiconModel::builtin(), calls: AtomicUsize::new(0) })
        }
    }

    impl EmotionModel for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        fn predict(&self, text: &str) -> Result<Distribution, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.predict(text)
        }
    }

    struct BrokenModel;

    impl EmotionModel for BrokenModel {
        fn name(&self) -> &str {
            "broken"
        }

        fn predict(&self, _text: &str) -> Result<Distribution, PipelineError> {
            Err(PipelineError::ClassificationUnavailable("weights missing".into()))
        }
    }

    fn classifier() -> (EmotionClassifier, Arc<CountingModel>) {
        let model = CountingModel::new();
        (EmotionClassifier::new(model.clone()), model)
    }

    #[test]
    fn empty_input_is_certain_neutral_without_model_call() {
        let (classifier, model) = classifier();
        for text in ["", "   ", "\n\t"] {
            let result = classifier.classify(text, None);
            assert_eq!(result.primary, Emotion::Neutral);
            assert_eq!(result.confidence, 1.0);
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn greeting_short_circuits_the_model() {
        let (classifier, model) = classifier();
        let result = classifier.classify("Hi", None);
        assert_eq!(result.primary, Emotion::Neutral);
        assert_eq!(result.confidence, 0.90);
        assert_eq!(result.source, EmotionSource::Rule);
        assert_eq!(result.intent, Intent::Greeting);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn happy_sentence_goes_to_the_model() {
        let (classifier, model) = classifier();
        let result = classifier.classify("I'm so happy today!", None);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.primary, Emotion::Joy);
        assert!(result.confidence > 0.5);
        assert_eq!(result.source, EmotionSource::Model);
    }

    #[test]
    fn rules_fire_in_priority_order() {
        let (classifier, _) = classifier();
        let cases = [
            ("hello there!", Emotion::Neutral, "greeting"),
            ("What is the capital of France?", Emotion::Neutral, "practical_question"),
            ("This is so frustrating, nothing I try works", Emotion::Anger, "frustration"),
            ("I'm kinda hungry", Emotion::Neutral, "casual_state"),
            ("tell me a joke", Emotion::Joy, "humor_request"),
            ("thanks a lot", Emotion::Neutral, "gratitude"),
        ];
        for (text, expected, rule) in cases {
            let result = classifier.classify(text, None);
            assert_eq!(result.primary, expected, "{}", text);
            assert!(result.reasoning.contains(rule), "{} -> {}", text, result.reasoning);
        }
    }

    #[test]
    fn emotional_question_is_not_treated_as_practical() {
        let (classifier, model) = classifier();
        let result = classifier.classify("why do I feel so sad all the time", None);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.primary, Emotion::Sadness);
    }

    #[test]
    fn negated_frustration_falls_through_to_model() {
        let (classifier, model) = classifier();
        let result = classifier.classify("I'm not frustrated, just curious about the plan", None);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_ne!(result.primary, Emotion::Anger);
    }

    #[test]
    fn negated_joy_flips_away_from_joy() {
        let (classifier, _) = classifier();
        let result = classifier.classify("I am not happy with how my week went", None);
        assert_ne!(result.primary, Emotion::Joy);
        assert!(result.reasoning.contains("negated joy"));
    }

    #[test]
    fn negated_sadness_settles_on_neutral() {
        let (classifier, _) = classifier();
        let result = classifier.classify("I'm not sad at all, just checking in on the plan", None);
        assert_eq!(result.primary, Emotion::Neutral);
    }

    #[test]
    fn victim_framing_prefers_sadness() {
        let (classifier, _) = classifier();
        let result = classifier.classify("My boss yelled at me and blamed me for his mistake", None);
        assert_eq!(result.primary, Emotion::Sadness);
        assert!(result.reasoning.contains("victim"));
    }

    #[test]
    fn confidence_stays_in_range_and_distribution_sums_to_one() {
        let (classifier, _) = classifier();
        let samples = [
            "", "Hi", "I'm terrified of the exam tomorrow", "wow I did not expect that at all",
            "My dog died yesterday", "ok", "!!!", "I hate it when this happens",
            "The meeting moved to Thursday.", "ugh", "我很高兴",
        ];
        for text in samples {
            let result = classifier.classify(text, None);
            assert!((0.0..=1.0).contains(&result.confidence), "{}", text);
            assert!(Emotion::ALL.contains(&result.primary));
            assert_eq!(result.distribution.len(), 6);
            let total: f64 = result.distribution.values().sum();
            assert!((total - 1.0).abs() < 1e-6, "{} sums to {}", text, total);
            assert!(result.distribution.values().all(|v| *v >= 0.0));
        }
    }

    #[test]
    fn broken_model_degrades_to_low_confidence_neutral() {
        let classifier = EmotionClassifier::new(Arc::new(BrokenModel));
        let result = classifier.classify("My dog died yesterday", None);
        assert_eq!(result.primary, Emotion::Neutral);
        assert_eq!(result.source, EmotionSource::Fallback);
        assert!(result.confidence <= 0.5);

        // Rules still work without the model.
        let greeting = classifier.classify("hey", None);
        assert_eq!(greeting.source, EmotionSource::Rule);
    }

    #[test]
    fn rules_only_classifier_falls_back_for_unmatched_text() {
        let classifier = EmotionClassifier::without_model();
        assert!(!classifier.model_loaded());
        let result = classifier.classify("I can't believe it finally happened", None);
        assert_eq!(result.source, EmotionSource::Fallback);
        assert_eq!(result.primary, Emotion::Neutral);

        let practical = classifier.classify("the payment page keeps failing", None);
        assert_eq!(practical.source, EmotionSource::Fallback);
        assert_eq!(practical.intent, Intent::PracticalRequest);
    }

    #[test]
    fn prior_emotion_breaks_near_ties() {
        let mut scores: Scores = [0.05, 0.05, 0.42, 0.44, 0.02, 0.02];
        let mut context = ConversationContext::default();
        context.push(ConversationTurn::new(Role::User, "I lost my job", Some(Emotion::Sadness)));
        let chosen = apply_prior_context(&mut scores, Some(&context));
        assert_eq!(chosen, Some(Emotion::Sadness));
        assert!(scores[Emotion::Sadness.index()] > scores[Emotion::Anger.index()]);

        let mut wide: Scores = [0.05, 0.05, 0.20, 0.66, 0.02, 0.02];
        assert_eq!(apply_prior_context(&mut wide, Some(&context)), None);
    }

    #[test]
    fn prior_refinement_leaves_rule_results_alone() {
        let (classifier, _) = classifier();
        let mut context = ConversationContext::default();
        context.push(ConversationTurn::new(Role::User, "rough week", Some(Emotion::Sadness)));
        let text = "hello";
        let plain = classifier.classify_text(text);
        assert_eq!(classifier.with_prior(plain.clone(), text, &context), plain);
    }

    #[test]
    fn intensity_scales_with_intensifiers() {
        let plain = intensity("I am happy", Emotion::Joy, 0.5);
        let boosted = intensity("I am extremely happy!!!", Emotion::Joy, 0.5);
        let softened = intensity("I am a bit happy", Emotion::Joy, 0.5);
        assert_eq!(plain, 50.0);
        assert!(boosted > plain);
        assert!(softened < plain);
        assert!(intensity("SO SO SO happy!!!", Emotion::Joy, 0.99) <= 100.0);
        assert_eq!(intensity("whatever", Emotion::Neutral, 0.9), 0.0);
    }

    #[test]
    fn label_names_round_trip() {
        for emotion in Emotion::ALL {
            assert_eq!(Emotion::from_str(emotion.as_str()), Some(emotion));
        }
        assert_eq!(Emotion::from_str("love"), None);
    }
}
