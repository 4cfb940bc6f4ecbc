use serde::{Deserialize, Serialize};

// ============ User Profile ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
    #[default]
    NotSet,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::NotSet => "not_set",
        }
    }

    /// Unknown values read as not_set.
    pub fn from_str(s: &str) -> Gender {
        match s.trim().to_lowercase().as_str() {
            "male" => Gender::Male,
            "female" => Gender::Female,
            "other" => Gender::Other,
            _ => Gender::NotSet,
        }
    }
}

/// Personality sliders, each clamped to 0-100.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserProfile {
    pub empathy_level: u8,
    pub humor_level: u8,
    pub formality_level: u8,
    pub verbosity_level: u8,
    #[serde(default)]
    pub gender: Gender,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            empathy_level: 75,
            humor_level: 50,
            formality_level: 40,
            verbosity_level: 60,
            gender: Gender::NotSet,
        }
    }
}

impl UserProfile {
    /// Build from raw store values, clamping each slider.
    pub fn clamped(empathy: i64, humor: i64, formality: i64, verbosity: i64, gender: Gender) -> Self {
        Self {
            empathy_level: clamp_level(empathy),
            humor_level: clamp_level(humor),
            formality_level: clamp_level(formality),
            verbosity_level: clamp_level(verbosity),
            gender,
        }
    }
}

/// Partial slider update. Missing fields keep their current value and
/// out-of-range values are clamped. A nested `personality` object is merged
/// over the top-level fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProfileUpdate {
    pub empathy_level: Option<f64>,
    pub humor_level: Option<f64>,
    pub formality_level: Option<f64>,
    pub verbosity_level: Option<f64>,
    pub gender: Option<String>,
    pub personality: Option<Box<ProfileUpdate>>,
}

impl ProfileUpdate {
    pub fn apply(&self, current: &UserProfile) -> UserProfile {
        let level = |update: Option<f64>, old: u8| update.map(|v| v.round() as i64).unwrap_or(i64::from(old));
        let updated = UserProfile::clamped(
            level(self.empathy_level, current.empathy_level),
            level(self.humor_level, current.humor_level),
            level(self.formality_level, current.formality_level),
            level(self.verbosity_level, current.verbosity_level),
            self.gender.as_deref().map(Gender::from_str).unwrap_or(current.gender),
        );
        match &self.personality {
            Some(nested) => nested.apply(&updated),
            None => updated,
        }
    }
}

pub fn clamp_level(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

// ============ Banded Lookup ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Low,
    Mid,
    High,
}

const LOW_BELOW: u8 = 30; // [0,30) is low
const HIGH_ABOVE: u8 = 70; // (70,100] is high

/// Three strings per slider, picked by band.
pub struct Bands<T> {
    pub low: T,
    pub mid: T,
    pub high: T,
}

pub fn band_of(value: u8) -> Band {
    if value < LOW_BELOW {
        Band::Low
    } else if value > HIGH_ABOVE {
        Band::High
    } else {
        Band::Mid
    }
}

/// Shared by every slider so band edges stay identical.
pub fn banded<T: Copy>(value: u8, bands: &Bands<T>) -> T {
    match band_of(value) {
        Band::Low => bands.low,
        Band::Mid => bands.mid,
        Band::High => bands.high,
    }
}

const EMPATHY_LENGTH: Bands<&str> = Bands {
    low: "brief supportive acknowledgment, 1–2 sentences",
    mid: "genuine empathy, 3–5 sentences",
    high: "deep empathy and detailed support, 5–7 sentences",
};

const EMPATHY_TONE: Bands<&str> = Bands {
    low: "calm and steady, acknowledge the feeling without dwelling on it",
    mid: "warm and caring, validate how they feel",
    high: "deeply compassionate, make them feel heard before anything else",
};

const VERBOSITY_LENGTH: Bands<&str> = Bands {
    low: "1–2 sentences",
    mid: "2–4 sentences",
    high: "5–7 sentences",
};

const FORMALITY: Bands<&str> = Bands {
    low: "Use casual, informal language, contractions and everyday words are fine.",
    mid: "Use a neutral, conversational register.",
    high: "Use polite, respectful language and avoid slang.",
};

const HUMOR: Bands<&str> = Bands {
    low: "Stay serious, minimal humor.",
    mid: "",
    high: "Add playfulness and light humor where appropriate.",
};

const LENGTH_BAND: Bands<LengthBand> = Bands {
    low: LengthBand::Short,
    mid: LengthBand::Medium,
    high: LengthBand::Long,
};

// ============ Directives ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthBand {
    Short,
    Medium,
    Long,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationDirectives {
    pub length_instruction: String,
    pub tone_instruction: String,
    pub humor_instruction: String,     // empty when unconstrained
    pub formality_instruction: String,
    pub length_band: LengthBand,
    pub emotion_salient: bool,
}

fn gender_tone(gender: Gender) -> &'static str {
    match gender {
        Gender::Male => "direct and supportive",
        Gender::Female => "warm and understanding",
        Gender::Other | Gender::NotSet => "friendly and supportive",
    }
}

/// Pure mapping from sliders to instructions. Length comes from empathy when
/// the emotion is salient and from verbosity otherwise, never both.
pub fn derive(profile: &UserProfile, emotion_salient: bool) -> GenerationDirectives {
    let length_source = if emotion_salient {
        profile.empathy_level
    } else {
        profile.verbosity_level
    };
    let length_instruction = if emotion_salient {
        banded(profile.empathy_level, &EMPATHY_LENGTH)
    } else {
        banded(profile.verbosity_level, &VERBOSITY_LENGTH)
    };
    let tone_instruction = if emotion_salient {
        banded(profile.empathy_level, &EMPATHY_TONE)
    } else {
        gender_tone(profile.gender)
    };

    GenerationDirectives {
        length_instruction: length_instruction.to_string(),
        tone_instruction: tone_instruction.to_string(),
        humor_instruction: banded(profile.humor_level, &HUMOR).to_string(),
        formality_instruction: banded(profile.formality_level, &FORMALITY).to_string(),
        length_band: banded(length_source, &LENGTH_BAND),
        emotion_salient,
    }
}
