use std::path::{Path, PathBuf};
use std::time::Duration;

use context_lexical::LexicalConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Full retrieval configuration, loaded from a TOML file.
///
/// Every section is optional in the file; omitted values fall back to the
/// defaults below. Validation failures are fatal at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub lexical: LexicalSection,
    pub semantic: SemanticConfig,
    pub fusion: FusionConfig,
    pub boost: BoostConfig,
    pub packing: PackingConfig,
    pub topic: TopicConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalSection {
    #[serde(flatten)]
    pub index: LexicalConfig,

    /// Candidates requested from the keyword index per query
    pub top_k: usize,
}

impl Default for LexicalSection {
    fn default() -> Self {
        Self {
            index: LexicalConfig::default(),
            top_k: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    pub enabled: bool,
    pub top_k: usize,
    pub timeout_ms: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 40,
            timeout_ms: 1500,
        }
    }
}

impl SemanticConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// RRF smoothing constant
    pub k: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { k: 60.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseConfig {
    pub phrase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl PhraseConfig {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
            weight: None,
        }
    }

    pub fn weighted(phrase: impl Into<String>, weight: f64) -> Self {
        Self {
            phrase: phrase.into(),
            weight: Some(weight),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostConfig {
    pub enabled: bool,

    /// Weight for phrases that do not carry their own
    pub default_weight: f64,

    /// Upper bound on the total boost a single document can receive
    pub max_per_document: f64,

    /// Edit distance tolerated when matching query n-grams to phrases
    pub near_match_distance: usize,

    /// Plain-text vocabulary: one phrase per line, optional `| weight` suffix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocabulary_path: Option<PathBuf>,

    pub phrases: Vec<PhraseConfig>,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_weight: 0.01,
            max_per_document: 0.03,
            near_match_distance: 1,
            vocabulary_path: None,
            phrases: Vec::new(),
        }
    }
}

impl BoostConfig {
    /// Load `vocabulary_path` (relative to `base_dir`) and append its phrases.
    pub fn load_vocabulary(&mut self, base_dir: &Path) -> Result<()> {
        let Some(path) = self.vocabulary_path.as_ref() else {
            return Ok(());
        };
        let path = if path.is_relative() {
            base_dir.join(path)
        } else {
            path.clone()
        };
        let text = std::fs::read_to_string(&path).map_err(|source| SearchError::ConfigIo {
            path: path.clone(),
            source,
        })?;
        let loaded = parse_vocabulary(&text)?;
        log::debug!("Loaded {} phrases from {}", loaded.len(), path.display());
        self.phrases.extend(loaded);
        Ok(())
    }
}

/// Parse the plain-text vocabulary format. `#` starts a comment line.
pub fn parse_vocabulary(text: &str) -> Result<Vec<PhraseConfig>> {
    let mut phrases = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.rsplit_once('|') {
            Some((phrase, weight)) => {
                let weight: f64 = weight.trim().parse().map_err(|_| {
                    SearchError::invalid_config(format!(
                        "vocabulary line {}: bad weight '{}'",
                        line_no + 1,
                        weight.trim()
                    ))
                })?;
                phrases.push(PhraseConfig::weighted(phrase.trim(), weight));
            }
            None => phrases.push(PhraseConfig::new(line)),
        }
    }
    Ok(phrases)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackingConfig {
    pub token_budget: usize,
    pub max_documents: usize,

    /// Jaccard similarity at or above which a candidate is a near-duplicate
    pub similarity_threshold: f64,

    pub chars_per_token: usize,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            token_budget: 4000,
            max_documents: 10,
            similarity_threshold: 0.85,
            chars_per_token: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Most recent turns shown to the topic strategy
    pub window_turns: usize,

    /// Most recent turns folded into an expanded query
    pub expansion_turns: usize,

    pub summary_chars: usize,
    pub timeout_ms: u64,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            window_turns: 3,
            expansion_turns: 1,
            summary_chars: 280,
            timeout_ms: 800,
        }
    }
}

impl TopicConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RetrievalConfig {
    /// Read, resolve the vocabulary file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SearchError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.boost.load_vocabulary(base_dir)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate an inline document. Relative vocabulary paths
    /// resolve against the working directory.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        config.boost.load_vocabulary(Path::new("."))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.lexical
            .index
            .validate()
            .map_err(|err| SearchError::invalid_config(err.to_string()))?;
        if self.lexical.top_k == 0 {
            return Err(SearchError::invalid_config("lexical.top_k must be at least 1"));
        }

        if self.semantic.enabled {
            if self.semantic.top_k == 0 {
                return Err(SearchError::invalid_config(
                    "semantic.top_k must be at least 1",
                ));
            }
            if self.semantic.timeout_ms == 0 {
                return Err(SearchError::invalid_config(
                    "semantic.timeout_ms must be positive",
                ));
            }
        }

        if !(self.fusion.k.is_finite() && self.fusion.k > 0.0) {
            return Err(SearchError::invalid_config(format!(
                "fusion.k must be a positive number, got {}",
                self.fusion.k
            )));
        }

        self.validate_boost()?;
        self.validate_packing()?;
        self.validate_topic()
    }

    fn validate_boost(&self) -> Result<()> {
        let boost = &self.boost;
        if !boost.enabled {
            return Ok(());
        }
        if boost.phrases.is_empty() {
            return Err(SearchError::invalid_config(
                "term boosting is enabled but the technical vocabulary is empty",
            ));
        }
        if !(boost.max_per_document.is_finite() && boost.max_per_document > 0.0) {
            return Err(SearchError::invalid_config(
                "boost.max_per_document must be positive",
            ));
        }
        for phrase in &boost.phrases {
            let words = context_lexical::split_words(&phrase.phrase).count();
            if !(2..=3).contains(&words) {
                return Err(SearchError::invalid_config(format!(
                    "vocabulary phrase '{}' must have 2 or 3 words",
                    phrase.phrase
                )));
            }
            let weight = phrase.weight.unwrap_or(boost.default_weight);
            if !(weight.is_finite() && weight > 0.0) {
                return Err(SearchError::invalid_config(format!(
                    "vocabulary phrase '{}' has non-positive weight {}",
                    phrase.phrase, weight
                )));
            }
        }
        Ok(())
    }

    fn validate_packing(&self) -> Result<()> {
        let packing = &self.packing;
        if packing.token_budget == 0 {
            return Err(SearchError::invalid_config(
                "packing.token_budget must be positive",
            ));
        }
        if packing.max_documents == 0 {
            return Err(SearchError::invalid_config(
                "packing.max_documents must be at least 1",
            ));
        }
        if !(packing.similarity_threshold > 0.0 && packing.similarity_threshold <= 1.0) {
            return Err(SearchError::invalid_config(format!(
                "packing.similarity_threshold must be in (0, 1], got {}",
                packing.similarity_threshold
            )));
        }
        if packing.chars_per_token == 0 {
            return Err(SearchError::invalid_config(
                "packing.chars_per_token must be positive",
            ));
        }
        Ok(())
    }

    fn validate_topic(&self) -> Result<()> {
        let topic = &self.topic;
        if topic.window_turns == 0 {
            return Err(SearchError::invalid_config(
                "topic.window_turns must be at least 1",
            ));
        }
        if topic.expansion_turns == 0 || topic.expansion_turns > topic.window_turns {
            return Err(SearchError::invalid_config(
                "topic.expansion_turns must be between 1 and topic.window_turns",
            ));
        }
        if topic.summary_chars == 0 {
            return Err(SearchError::invalid_config(
                "topic.summary_chars must be positive",
            ));
        }
        if topic.timeout_ms == 0 {
            return Err(SearchError::invalid_config(
                "topic.timeout_ms must be positive",
            ));
        }
        Ok(())
    }
}
