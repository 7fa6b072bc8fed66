//! Affect lexicon - keyword to emotion weights, tag phrases, sentiment valences
//!
//! Loaded once at startup and immutable afterwards. The curated built-in
//! lexicon ships inside the crate; a JSON file of the same shape replaces it.

use glyph_core::{AffectSpace, Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::info;

const BUILTIN_LEXICON: &str = include_str!("../lexicon/default.json");

/// Suffixes tried, in order, when a token misses the lexicon.
const SUFFIXES: [&str; 5] = ["ing", "ed", "ly", "es", "s"];

/// On-disk lexicon shape.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LexiconFile {
    /// word -> { emotion label -> weight }
    pub emotions: BTreeMap<String, BTreeMap<String, f64>>,
    /// tag -> synonym phrases
    pub tags: BTreeMap<String, Vec<String>>,
    /// word -> valence in [-1, 1]
    pub sentiment: BTreeMap<String, f64>,
    pub negations: Vec<String>,
    /// word -> multiplier applied to the next token's weight
    pub intensifiers: BTreeMap<String, f64>,
}

/// Validated lexicon, with emotion weights resolved to vector indices.
#[derive(Debug, Clone)]
pub struct Lexicon {
    emotions: HashMap<String, Vec<(usize, f64)>>,
    tags: BTreeMap<String, Vec<String>>,
    sentiment: HashMap<String, f64>,
    negations: HashSet<String>,
    intensifiers: HashMap<String, f64>,
}

impl Lexicon {
    /// The curated lexicon compiled into the crate.
    pub fn builtin(space: &AffectSpace) -> Result<Self> {
        let file: LexiconFile = serde_json::from_str(BUILTIN_LEXICON)?;
        Self::from_file(file, space)
    }

    /// Load a JSON lexicon from disk.
    pub fn load(path: &Path, space: &AffectSpace) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let file: LexiconFile = serde_json::from_str(&text)?;
        let lexicon = Self::from_file(file, space)?;
        info!(
            "Loaded lexicon from {} ({} emotion words, {} tags)",
            path.display(),
            lexicon.emotions.len(),
            lexicon.tags.len()
        );
        Ok(lexicon)
    }

    /// Validate a parsed lexicon against the affect space.
    ///
    /// Emotion labels outside the space are rejected rather than dropped so a
    /// lexicon written for a different inventory fails loudly at startup.
    pub fn from_file(file: LexiconFile, space: &AffectSpace) -> Result<Self> {
        let mut emotions = HashMap::with_capacity(file.emotions.len());
        for (word, weights) in file.emotions {
            let mut resolved = Vec::with_capacity(weights.len());
            for (label, weight) in weights {
                let index = space.index_of(&label).ok_or_else(|| {
                    Error::invalid_input(format!("lexicon word '{}' uses unknown emotion '{}'", word, label))
                })?;
                if !weight.is_finite() || weight < 0.0 {
                    return Err(Error::invalid_input(format!(
                        "lexicon word '{}' has invalid weight {}",
                        word, weight
                    )));
                }
                resolved.push((index, weight));
            }
            emotions.insert(word.to_lowercase(), resolved);
        }

        let mut tags = BTreeMap::new();
        for (tag, phrases) in file.tags {
            let phrases: Vec<String> = phrases
                .into_iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect();
            if !phrases.is_empty() {
                tags.insert(tag, phrases);
            }
        }

        let sentiment = file
            .sentiment
            .into_iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| (k.to_lowercase(), v.clamp(-1.0, 1.0)))
            .collect();

        Ok(Self {
            emotions,
            tags,
            sentiment,
            negations: file.negations.into_iter().map(|n| n.to_lowercase()).collect(),
            intensifiers: file
                .intensifiers
                .into_iter()
                .filter(|(_, v)| v.is_finite() && *v > 0.0)
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        })
    }

    /// Emotion weights for a token, trying light suffix stripping on a miss.
    pub fn emotion(&self, token: &str) -> Option<&[(usize, f64)]> {
        lookup_stemmed(&self.emotions, token).map(|v| v.as_slice())
    }

    pub fn valence(&self, token: &str) -> Option<f64> {
        lookup_stemmed(&self.sentiment, token).copied()
    }

    pub fn is_negation(&self, token: &str) -> bool {
        self.negations.contains(token)
    }

    pub fn intensity(&self, token: &str) -> Option<f64> {
        self.intensifiers.get(token).copied()
    }

    pub fn tags(&self) -> &BTreeMap<String, Vec<String>> {
        &self.tags
    }

    pub fn emotion_word_count(&self) -> usize {
        self.emotions.len()
    }
}

fn lookup_stemmed<'a, V>(map: &'a HashMap<String, V>, token: &str) -> Option<&'a V> {
    if let Some(v) = map.get(token) {
        return Some(v);
    }
    for suffix in SUFFIXES {
        if let Some(stem) = token.strip_suffix(suffix) {
            if stem.len() < 3 {
                continue;
            }
            if let Some(v) = map.get(stem) {
                return Some(v);
            }
            // loved -> lov -> love
            if let Some(v) = map.get(&format!("{}e", stem)) {
                return Some(v);
            }
        }
    }
    None
}

/// Lower-cased word tokens. Apostrophes stay inside words ("can't").
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .map(|w| w.trim_matches(|c| c == '\'' || c == '\u{2019}'))
        .filter(|w| !w.is_empty())
        .map(|w| w.replace('\u{2019}', "'").to_lowercase())
        .collect()
}
