//! Sentiment polarity/subjectivity scorer

use crate::lexicon::Lexicon;
use glyph_core::Sentiment;

/// Valence multiplier for a word inside a negation's scope.
const NEGATION_FLIP: f64 = -0.5;
const NEGATION_SCOPE: usize = 3;

pub struct SentimentScorer;

impl SentimentScorer {
    /// Polarity is the mean valence of sentiment-bearing words; subjectivity
    /// is the share of tokens that carry any valence.
    pub fn score(&self, lexicon: &Lexicon, tokens: &[String]) -> Sentiment {
        if tokens.is_empty() {
            return Sentiment::default();
        }
        let mut sum = 0.0;
        let mut bearing = 0usize;
        for (i, token) in tokens.iter().enumerate() {
            let Some(valence) = lexicon.valence(token) else {
                continue;
            };
            let scope = &tokens[i.saturating_sub(NEGATION_SCOPE)..i];
            let mut v = valence;
            if scope.iter().any(|t| lexicon.is_negation(t)) {
                v *= NEGATION_FLIP;
            }
            if let Some(boost) = i.checked_sub(1).and_then(|p| lexicon.intensity(&tokens[p])) {
                v *= boost;
            }
            sum += v;
            bearing += 1;
        }
        if bearing == 0 {
            return Sentiment::default();
        }
        Sentiment {
            polarity: (sum / bearing as f64).clamp(-1.0, 1.0),
            subjectivity: (bearing as f64 / tokens.len() as f64).clamp(0.0, 1.0),
        }
    }
}
