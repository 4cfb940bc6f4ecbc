use crate::emotion::{normalize, to_distribution, tokenize, Distribution, Emotion, Scores};
use crate::error::PipelineError;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Statistical stage of the classifier. Loaded once, then shared read-only
/// across every request.
pub trait EmotionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Probability for each of the six labels.
    fn predict(&self, text: &str) -> Result<Distribution, PipelineError>;
}

const DEFAULT_INTENSIFIER_BOOST: f64 = 1.5;
const DEFAULT_INTENSIFIERS: &[&str] = &["so", "very", "really", "extremely", "super", "incredibly", "totally"];

/// Compiled-in lexicon, built on first use and shared read-only.
static BUILTIN: Lazy<Arc<LexiconModel>> = Lazy::new(|| Arc::new(LexiconModel::builtin()));

/// Built-in neutral prior: short unknown text should land on neutral.
const BUILTIN_BIAS: &[(Emotion, f64)] = &[(Emotion::Neutral, 0.5)];

/// word -> (label, weight). A trailing '*' matches any word with that prefix.
const BUILTIN_WEIGHTS: &[(&str, Emotion, f64)] = &[
    // joy
    ("happy", Emotion::Joy, 3.0),
    ("happiest", Emotion::Joy, 3.0),
    ("glad", Emotion::Joy, 2.5),
    ("excit*", Emotion::Joy, 2.5),
    ("thrilled", Emotion::Joy, 3.0),
    ("delighted", Emotion::Joy, 3.0),
    ("joy*", Emotion::Joy, 2.5),
    ("love", Emotion::Joy, 2.0),
    ("loving", Emotion::Joy, 2.0),
    ("great", Emotion::Joy, 1.5),
    ("awesome", Emotion::Joy, 2.0),
    ("wonderful", Emotion::Joy, 2.5),
    ("fantastic", Emotion::Joy, 2.5),
    ("proud", Emotion::Joy, 2.0),
    ("yay", Emotion::Joy, 2.5),
    ("celebrat*", Emotion::Joy, 2.0),
    ("promoted", Emotion::Joy, 2.0),
    ("cheerful", Emotion::Joy, 2.5),
    // sadness
    ("sad", Emotion::Sadness, 3.0),
    ("sadness", Emotion::Sadness, 3.0),
    ("unhappy", Emotion::Sadness, 3.0),
    ("depress*", Emotion::Sadness, 3.0),
    ("lonely", Emotion::Sadness, 3.0),
    ("alone", Emotion::Sadness, 1.5),
    ("miserable", Emotion::Sadness, 3.0),
    ("heartbroken", Emotion::Sadness, 3.5),
    ("upset", Emotion::Sadness, 2.0),
    ("hurt", Emotion::Sadness, 2.0),
    ("cry*", Emotion::Sadness, 2.5),
    ("tears", Emotion::Sadness, 2.0),
    ("died", Emotion::Sadness, 3.0),
    ("death", Emotion::Sadness, 2.5),
    ("lost", Emotion::Sadness, 1.5),
    ("miss", Emotion::Sadness, 1.5),
    ("grief", Emotion::Sadness, 3.0),
    ("hopeless", Emotion::Sadness, 3.0),
    ("mistake", Emotion::Sadness, 0.5),
    ("feel", Emotion::Sadness, 0.3),
    // anger
    ("angry", Emotion::Anger, 3.0),
    ("mad", Emotion::Anger, 2.5),
    ("furious", Emotion::Anger, 3.5),
    ("annoy*", Emotion::Anger, 2.5),
    ("frustrat*", Emotion::Anger, 3.0),
    ("irritat*", Emotion::Anger, 2.5),
    ("hate", Emotion::Anger, 2.5),
    ("pissed", Emotion::Anger, 3.0),
    ("rage", Emotion::Anger, 3.0),
    ("unfair", Emotion::Anger, 2.0),
    ("yelled", Emotion::Anger, 2.0),
    ("shouted", Emotion::Anger, 2.0),
    ("blamed", Emotion::Anger, 2.0),
    ("accused", Emotion::Anger, 2.0),
    ("stupid", Emotion::Anger, 1.5),
    // fear
    ("scared", Emotion::Fear, 3.0),
    ("afraid", Emotion::Fear, 3.0),
    ("fear*", Emotion::Fear, 2.5),
    ("terrified", Emotion::Fear, 3.5),
    ("frightened", Emotion::Fear, 3.0),
    ("worried", Emotion::Fear, 2.5),
    ("worry", Emotion::Fear, 2.0),
    ("anxious", Emotion::Fear, 3.0),
    ("anxiety", Emotion::Fear, 3.0),
    ("nervous", Emotion::Fear, 2.5),
    ("panic*", Emotion::Fear, 3.0),
    ("dread*", Emotion::Fear, 2.5),
    // surprise
    ("surpris*", Emotion::Surprise, 3.0),
    ("shocked", Emotion::Surprise, 3.0),
    ("amazed", Emotion::Surprise, 2.5),
    ("astonish*", Emotion::Surprise, 3.0),
    ("stunned", Emotion::Surprise, 2.5),
    ("unexpected", Emotion::Surprise, 2.5),
    ("wow", Emotion::Surprise, 2.0),
    ("whoa", Emotion::Surprise, 2.0),
    ("believe", Emotion::Surprise, 1.0),
    ("expect", Emotion::Surprise, 1.0),
    // neutral anchors
    ("curious", Emotion::Neutral, 1.0),
    ("plan", Emotion::Neutral, 0.5),
    ("meeting", Emotion::Neutral, 0.5),
    ("schedule", Emotion::Neutral, 0.5),
];

/// On-disk lexicon format, JSON:
/// `{"bias": {"neutral": 0.5}, "weights": {"happy": {"joy": 3.0}}, "intensifiers": ["so"]}`
#[derive(Debug, Deserialize)]
struct LexiconFile {
    #[serde(default)]
    bias: BTreeMap<Emotion, f64>,
    weights: HashMap<String, BTreeMap<Emotion, f64>>,
    #[serde(default)]
    intensifiers: Option<Vec<String>>,
    #[serde(default)]
    intensifier_boost: Option<f64>,
}

/// Log-linear lexicon model: per-label bias plus summed token weights,
/// softmaxed into a distribution. Holds no mutable state.
#[derive(Debug, Clone)]
pub struct LexiconModel {
    name: String,
    bias: Scores,
    exact: HashMap<String, Scores>,
    prefixes: Vec<(String, Scores)>,
    intensifiers: Vec<String>,
    intensifier_boost: f64,
}

impl LexiconModel {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bias: [0.0; 6],
            exact: HashMap::new(),
            prefixes: Vec::new(),
            intensifiers: DEFAULT_INTENSIFIERS.iter().map(|s| s.to_string()).collect(),
            intensifier_boost: DEFAULT_INTENSIFIER_BOOST,
        }
    }

    fn add_weight(&mut self, key: &str, emotion: Emotion, weight: f64) {
        let idx = Emotion::ALL.iter().position(|e| *e == emotion).unwrap_or(0);
        let key = key.to_lowercase();
        if let Some(prefix) = key.strip_suffix('*') {
            match self.prefixes.iter_mut().find(|(p, _)| p == prefix) {
                Some((_, scores)) => scores[idx] += weight,
                None => {
                    let mut scores = [0.0; 6];
                    scores[idx] = weight;
                    self.prefixes.push((prefix.to_string(), scores));
                }
            }
        } else {
            self.exact.entry(key).or_insert([0.0; 6])[idx] += weight;
        }
    }

    /// The compiled-in lexicon.
    pub fn builtin() -> Self {
        let mut model = Self::empty("lexicon-builtin");
        for (emotion, weight) in BUILTIN_BIAS {
            let idx = Emotion::ALL.iter().position(|e| e == emotion).unwrap_or(0);
            model.bias[idx] = *weight;
        }
        for (word, emotion, weight) in BUILTIN_WEIGHTS {
            model.add_weight(word, *emotion, *weight);
        }
        model
    }

    /// Load a JSON lexicon. Any failure is ClassificationUnavailable.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::ClassificationUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        let file: LexiconFile = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::ClassificationUnavailable(format!("invalid lexicon {}: {}", path.display(), e))
        })?;
        if file.weights.is_empty() {
            return Err(PipelineError::ClassificationUnavailable(format!(
                "lexicon {} has no weights",
                path.display()
            )));
        }

        let name = path
            .file_stem()
            .map(|s| format!("lexicon-{}", s.to_string_lossy()))
            .unwrap_or_else(|| "lexicon-file".to_string());
        let mut model = Self::empty(&name);
        for (emotion, weight) in &file.bias {
            let idx = Emotion::ALL.iter().position(|e| e == emotion).unwrap_or(0);
            model.bias[idx] = *weight;
        }
        for (word, labels) in &file.weights {
            for (emotion, weight) in labels {
                model.add_weight(word, *emotion, *weight);
            }
        }
        if let Some(intensifiers) = file.intensifiers {
            model.intensifiers = intensifiers.into_iter().map(|s| s.to_lowercase()).collect();
        }
        if let Some(boost) = file.intensifier_boost {
            model.intensifier_boost = boost;
        }
        Ok(model)
    }

    /// Built-in lexicon unless a path is configured.
    pub fn load(path: Option<&Path>) -> Result<Arc<Self>, PipelineError> {
        match path {
            Some(path) => Self::from_path(path).map(Arc::new),
            None => Ok(Self::shared_builtin()),
        }
    }

    pub fn shared_builtin() -> Arc<Self> {
        Arc::clone(&BUILTIN)
    }

    fn lookup(&self, word: &str) -> Option<&Scores> {
        self.exact.get(word).or_else(|| {
            self.prefixes
                .iter()
                .filter(|(prefix, _)| word.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, scores)| scores)
        })
    }

    fn logits(&self, text: &str) -> Scores {
        let mut logits = self.bias;
        let words = tokenize(text);
        for (i, word) in words.iter().enumerate() {
            let Some(weights) = self.lookup(word) else {
                continue;
            };
            let boosted = i > 0 && self.intensifiers.iter().any(|w| *w == words[i - 1]);
            let factor = if boosted { self.intensifier_boost } else { 1.0 };
            for (logit, weight) in logits.iter_mut().zip(weights.iter()) {
                *logit += weight * factor;
            }
        }
        logits
    }
}

fn softmax(logits: &Scores) -> Scores {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut out = [0.0; 6];
    for (slot, logit) in out.iter_mut().zip(logits.iter()) {
        *slot = (logit - max).exp();
    }
    out
}

impl EmotionModel for LexiconModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, text: &str) -> Result<Distribution, PipelineError> {
        let probabilities = normalize(&softmax(&self.logits(text))).ok_or_else(|| {
            PipelineError::ClassificationUnavailable("lexicon produced non-finite scores".to_string())
        })?;
        Ok(to_distribution(&probabilities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn top(distribution: &Distribution) -> (Emotion, f64) {
        distribution
            .iter()
            .fold((Emotion::Neutral, f64::MIN), |best, (e, p)| if *p > best.1 { (*e, *p) } else { best })
    }

    #[test]
    fn builtin_lexicon_picks_obvious_labels() {
        let model = LexiconModel::builtin();
        let cases = [
            ("I'm so happy today!", Emotion::Joy),
            ("I feel so lonely and sad", Emotion::Sadness),
            ("I'm terrified of the dark", Emotion::Fear),
            ("wow, that was unexpected", Emotion::Surprise),
            ("I'm furious with them", Emotion::Anger),
            ("the meeting is on tuesday", Emotion::Neutral),
        ];
        for (text, expected) in cases {
            let (label, _) = top(&model.predict(text).unwrap());
            assert_eq!(label, expected, "{}", text);
        }
    }

    #[test]
    fn distribution_is_a_probability_vector() {
        let model = LexiconModel::builtin();
        for text in ["", "happy happy happy happy happy happy", "sad angry scared wow"] {
            let distribution = model.predict(text).unwrap();
            assert_eq!(distribution.len(), 6);
            let total: f64 = distribution.values().sum();
            assert!((total - 1.0).abs() < 1e-9);
            assert!(distribution.values().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn intensifier_raises_confidence() {
        let model = LexiconModel::builtin();
        let plain = model.predict("I am happy").unwrap()[&Emotion::Joy];
        let boosted = model.predict("I am so happy").unwrap()[&Emotion::Joy];
        assert!(boosted > plain);
    }

    #[test]
    fn prefix_entries_match_inflections() {
        let model = LexiconModel::builtin();
        let (label, _) = top(&model.predict("so depressing").unwrap());
        assert_eq!(label, Emotion::Sadness);
    }

    #[test]
    fn loads_lexicon_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bias": {{"neutral": 0.1}}, "weights": {{"sunny": {{"joy": 4.0}}, "storm*": {{"fear": 4.0}}}}}}"#
        )
        .unwrap();

        let model = LexiconModel::from_path(file.path()).unwrap();
        assert!(model.name().starts_with("lexicon-"));
        assert_eq!(top(&model.predict("a sunny day").unwrap()).0, Emotion::Joy);
        assert_eq!(top(&model.predict("stormy night").unwrap()).0, Emotion::Fear);
    }

    #[test]
    fn bad_lexicon_is_classification_unavailable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            LexiconModel::from_path(file.path()),
            Err(PipelineError::ClassificationUnavailable(_))
        ));
        assert!(LexiconModel::load(Some(Path::new("/definitely/missing.json"))).is_err());
        assert!(LexiconModel::load(None).is_ok());
    }
}
