//! Lexicon-based emotion counter

use crate::lexicon::Lexicon;

/// Tokens before a hit that are searched for a negation.
const NEGATION_SCOPE: usize = 3;

/// Raw per-dimension scores for one text.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionScores {
    pub scores: Vec<f64>,
    pub hits: usize,
}

impl EmotionScores {
    pub fn total(&self) -> f64 {
        self.scores.iter().sum()
    }

    /// Winning dimension and its raw score. First index wins ties.
    pub fn top(&self) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, s) in self.scores.iter().enumerate() {
            if *s <= 0.0 {
                continue;
            }
            match best {
                Some((_, b)) if *s <= b => {}
                _ => best = Some((i, *s)),
            }
        }
        best
    }
}

pub struct EmotionCounter {
    dims: usize,
}

impl EmotionCounter {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    pub fn score(&self, lexicon: &Lexicon, tokens: &[String]) -> EmotionScores {
        let mut scores = vec![0.0; self.dims];
        let mut hits = 0;
        for (i, token) in tokens.iter().enumerate() {
            let Some(weights) = lexicon.emotion(token) else {
                continue;
            };
            let scope = &tokens[i.saturating_sub(NEGATION_SCOPE)..i];
            if scope.iter().any(|t| lexicon.is_negation(t)) {
                continue;
            }
            let boost = i
                .checked_sub(1)
                .and_then(|p| lexicon.intensity(&tokens[p]))
                .unwrap_or(1.0);
            for (index, weight) in weights {
                if let Some(slot) = scores.get_mut(*index) {
                    *slot += weight * boost;
                }
            }
            hits += 1;
        }
        EmotionScores { scores, hits }
    }
}
