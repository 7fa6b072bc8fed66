//! Record types shared by the parser, the proto-glyph store, and the registry

use crate::error::{Error, Result};
use crate::vector::{AffectSpace, EmotionVector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Dominant emotion reported when no signal wins.
pub const NEUTRAL: &str = "neutral";

/// Categorical label emitted by the tagger - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Arc<str>);

impl Tag {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Sentiment polarity in [-1, 1] and subjectivity in [0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub polarity: f64,
    pub subjectivity: f64,
}

/// Output of the affect parser for one text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AffectAnalysis {
    pub vector: EmotionVector,
    pub tags: Vec<Tag>,
    pub dominant_emotion: String,
    pub confidence: f64,
    pub sentiment: Sentiment,
}

impl AffectAnalysis {
    pub fn neutral(space: &AffectSpace) -> Self {
        Self {
            vector: space.zeros(),
            tags: Vec::new(),
            dominant_emotion: NEUTRAL.to_string(),
            confidence: 0.0,
            sentiment: Sentiment::default(),
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.dominant_emotion == NEUTRAL
    }
}

/// What the subordinate responder reports after answering a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubordinateMatch {
    pub glyph_name: Option<String>,
    pub confidence: f64,
}

impl SubordinateMatch {
    pub fn new(glyph_name: Option<String>, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            glyph_name,
            confidence,
        }
    }

    pub fn unmatched(confidence: f64) -> Self {
        Self::new(None, confidence)
    }
}

/// Predicate a downstream responder evaluates before surfacing a glyph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateRule {
    pub trigger_threshold: f64,
    pub primary_emotions: Vec<String>,
    #[serde(default)]
    pub context_sensitive: bool,
}

impl GateRule {
    pub fn validate(&self, space: &AffectSpace) -> Result<()> {
        if !self.trigger_threshold.is_finite() || !(0.0..=1.0).contains(&self.trigger_threshold) {
            return Err(Error::invalid_input(format!(
                "gate threshold {} outside [0, 1]",
                self.trigger_threshold
            )));
        }
        if let Some(unknown) = self.primary_emotions.iter().find(|e| !space.contains(e)) {
            return Err(Error::invalid_input(format!("unknown emotion in gate rule: {}", unknown)));
        }
        Ok(())
    }
}

/// A promoted, named emotional category. Immutable once registered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Glyph {
    pub name: String,
    pub symbol: String,
    pub vector: EmotionVector,
    pub gate: GateRule,
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub activation_phrase: String,
    pub examples: Vec<String>,
    pub confidence: f64,
    pub origin_cluster: String,
    pub created_at: DateTime<Utc>,
}

impl Glyph {
    pub fn primary_emotions(&self) -> &[String] {
        &self.gate.primary_emotions
    }
}

/// A provisional category accumulating evidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtoGlyph {
    pub id: String,
    /// Creation order within the store; survives key-sorted JSON maps.
    pub seq: u64,
    pub vector: EmotionVector,
    pub examples: Vec<String>,
    #[serde(default)]
    pub context: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub promoted: bool,
    #[serde(default = "one")]
    pub observation_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

fn one() -> u64 {
    1
}

/// Derived grouping of similar protos. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub proto_ids: Vec<String>,
    pub centroid: EmotionVector,
    pub size: usize,
    pub stability: f64,
}

/// Append-only log entry written when a cluster becomes a glyph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub glyph_name: String,
    pub cluster_id: String,
    pub proto_ids: Vec<String>,
    pub stability: f64,
    pub promoted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subordinate_confidence_is_clamped() {
        assert_eq!(SubordinateMatch::unmatched(1.7).confidence, 1.0);
        assert_eq!(SubordinateMatch::unmatched(-0.3).confidence, 0.0);
        assert_eq!(SubordinateMatch::unmatched(f64::NAN).confidence, 0.0);
    }

    #[test]
    fn gate_rule_rejects_unknown_emotion() {
        let space = AffectSpace::default();
        let rule = GateRule {
            trigger_threshold: 0.7,
            primary_emotions: vec!["joy".into(), "melancholy".into()],
            context_sensitive: false,
        };
        assert!(matches!(rule.validate(&space), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn gate_rule_rejects_threshold_out_of_range() {
        let space = AffectSpace::default();
        let rule = GateRule {
            trigger_threshold: 1.2,
            primary_emotions: vec!["joy".into()],
            context_sensitive: true,
        };
        assert!(rule.validate(&space).is_err());
    }

    #[test]
    fn neutral_analysis_has_zero_vector() {
        let space = AffectSpace::default();
        let a = AffectAnalysis::neutral(&space);
        assert!(a.vector.is_zero());
        assert_eq!(a.vector.len(), 8);
        assert!(a.is_neutral());
        assert_eq!(a.confidence, 0.0);
    }
}
