//! AffectParser - fuses tagger, emotion counter, and sentiment into one analysis
//!
//! Pure and deterministic: identical text and lexicon give identical output.
//! Any analyzer can be left out; the parser then contributes zeros for it and
//! scales confidence by the share of analyzers still present.

use crate::counter::EmotionCounter;
use crate::lexicon::{tokenize, Lexicon};
use crate::sentiment::SentimentScorer;
use crate::tagger::Tagger;
use dashmap::DashMap;
use glyph_core::config::AffectConfig;
use glyph_core::{AffectAnalysis, AffectSpace, Result, Sentiment, NEUTRAL};
use tracing::debug;

/// Raw lexicon score at which confidence saturates.
const CONFIDENCE_SATURATION: f64 = 3.0;

/// Polarity magnitude needed for the sentiment fallback to pick an emotion.
const POLARITY_CUTOFF: f64 = 0.2;

const ANALYZER_COUNT: f64 = 3.0;

pub struct AffectParser {
    space: AffectSpace,
    lexicon: Lexicon,
    tagger: Option<Tagger>,
    counter: Option<EmotionCounter>,
    sentiment: Option<SentimentScorer>,
    cache: DashMap<String, AffectAnalysis>,
    cache_capacity: usize,
}

impl AffectParser {
    /// Parser with every analyzer enabled.
    pub fn new(space: AffectSpace, lexicon: Lexicon, config: &AffectConfig) -> Result<Self> {
        let tagger = Tagger::new(&lexicon, config.fuzzy_window)?;
        let counter = EmotionCounter::new(space.dims());
        Ok(Self {
            space,
            lexicon,
            tagger: Some(tagger),
            counter: Some(counter),
            sentiment: Some(SentimentScorer),
            cache: DashMap::new(),
            cache_capacity: config.cache_capacity,
        })
    }

    /// Built-in lexicon, or the configured lexicon file.
    pub fn from_config(space: AffectSpace, config: &AffectConfig) -> Result<Self> {
        let lexicon = match &config.lexicon_path {
            Some(path) => Lexicon::load(path, &space)?,
            None => Lexicon::builtin(&space)?,
        };
        Self::new(space, lexicon, config)
    }

    pub fn without_tagger(mut self) -> Self {
        self.tagger = None;
        self.cache.clear();
        self
    }

    pub fn without_counter(mut self) -> Self {
        self.counter = None;
        self.cache.clear();
        self
    }

    pub fn without_sentiment(mut self) -> Self {
        self.sentiment = None;
        self.cache.clear();
        self
    }

    pub fn space(&self) -> &AffectSpace {
        &self.space
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Analyze one text. Empty or whitespace text is neutral with confidence 0.
    pub fn parse(&self, text: &str) -> AffectAnalysis {
        if text.trim().is_empty() {
            return AffectAnalysis::neutral(&self.space);
        }
        if self.cache_capacity > 0 {
            if let Some(hit) = self.cache.get(text) {
                return hit.clone();
            }
        }

        let analysis = self.analyze(text);

        if self.cache_capacity > 0 {
            if self.cache.len() >= self.cache_capacity {
                debug!(entries = self.cache.len(), "affect cache full, clearing");
                self.cache.clear();
            }
            self.cache.insert(text.to_string(), analysis.clone());
        }
        analysis
    }

    fn analyze(&self, text: &str) -> AffectAnalysis {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return AffectAnalysis::neutral(&self.space);
        }

        let tags = self
            .tagger
            .as_ref()
            .map(|t| t.tag(&tokens))
            .unwrap_or_default();
        let scores = self
            .counter
            .as_ref()
            .map(|c| c.score(&self.lexicon, &tokens));
        let sentiment = self
            .sentiment
            .as_ref()
            .map(|s| s.score(&self.lexicon, &tokens))
            .unwrap_or_default();

        let mut vector = vec![0.0; self.space.dims()];
        let (dominant, strength) = match scores.as_ref().and_then(|s| s.top().map(|top| (s, top))) {
            Some((s, (index, top))) => {
                let total = s.total();
                for (slot, score) in vector.iter_mut().zip(&s.scores) {
                    *slot = score / total;
                }
                let label = self.space.label(index).unwrap_or(NEUTRAL).to_string();
                (label, top / CONFIDENCE_SATURATION)
            }
            None => {
                let label = polarity_label(&sentiment);
                if label != NEUTRAL {
                    if let Some(index) = self.space.index_of(label) {
                        vector[index] = sentiment.polarity.abs();
                    }
                }
                (label.to_string(), sentiment.polarity.abs())
            }
        };

        let available = [
            self.tagger.is_some(),
            self.counter.is_some(),
            self.sentiment.is_some(),
        ]
        .iter()
        .filter(|a| **a)
        .count() as f64;
        let confidence = strength.min(1.0) * (available / ANALYZER_COUNT);

        AffectAnalysis {
            // Components are already finite and within [0, 1].
            vector: self
                .space
                .vector(vector)
                .unwrap_or_else(|_| self.space.zeros()),
            tags,
            dominant_emotion: dominant,
            confidence,
            sentiment,
        }
    }
}

fn polarity_label(sentiment: &Sentiment) -> &'static str {
    if sentiment.polarity > POLARITY_CUTOFF {
        "joy"
    } else if sentiment.polarity < -POLARITY_CUTOFF {
        "sadness"
    } else {
        NEUTRAL
    }
}
