//! DominantOrchestrator - novelty decisions after the subordinate has replied
//!
//! `observe` reads the registry, writes only to the proto-glyph manager, and
//! keeps a capped buffer of what it saw. The buffer holds a digest and length
//! of each text, never the text itself.

use crate::proto::ProtoGlyphManager;
use crate::registry::GlyphRegistry;
use chrono::{DateTime, Utc};
use glyph_core::config::OrchestratorConfig;
use glyph_core::{AffectSpace, EmotionVector, Result, SubordinateMatch};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Nothing to learn from this turn.
    Observe,
    /// Record the turn as (part of) a provisional pattern.
    CreateProto,
    /// Record the turn and ask for consolidation soon.
    Synthesize,
}

/// Context attached to every decision.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObservationMetadata {
    pub subordinate_glyph: Option<String>,
    pub subordinate_confidence: f64,
    pub nearest_glyph: Option<String>,
    pub nearest_similarity: Option<f64>,
    /// Proto created or grown by this observation.
    pub proto_id: Option<String>,
    /// True when an existing proto absorbed the turn instead of a new one.
    pub absorbed: bool,
    pub text_digest: u64,
    pub text_chars: usize,
    pub observed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObservationAnalysis {
    pub should_create_proto: bool,
    pub should_synthesize: bool,
    pub mismatch: f64,
    pub action: Action,
    pub metadata: ObservationMetadata,
}

/// Buffered record of one observed exchange.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Observation {
    pub text_digest: u64,
    pub text_chars: usize,
    pub subordinate: SubordinateMatch,
    pub vector: EmotionVector,
    pub mismatch: f64,
    pub action: Action,
    pub observed_at: DateTime<Utc>,
}

pub struct DominantOrchestrator {
    space: AffectSpace,
    config: OrchestratorConfig,
    registry: Arc<GlyphRegistry>,
    protos: Arc<ProtoGlyphManager>,
    buffer: Mutex<VecDeque<Observation>>,
}

impl DominantOrchestrator {
    pub fn new(
        space: AffectSpace,
        config: OrchestratorConfig,
        registry: Arc<GlyphRegistry>,
        protos: Arc<ProtoGlyphManager>,
    ) -> Self {
        Self {
            space,
            config,
            registry,
            protos,
            buffer: Mutex::new(VecDeque::new()),
        }
    }

    /// Mismatch degree of `vector` against the registry, plus the nearest glyph.
    pub async fn mismatch(&self, vector: &EmotionVector) -> Result<(f64, Option<(String, f64)>)> {
        let nearest = self.registry.max_similarity(vector).await?;
        let mismatch = match &nearest {
            Some((_, similarity)) => ((1.0 - similarity) / 2.0).clamp(0.0, 1.0),
            None => self.config.no_glyph_mismatch,
        };
        Ok((mismatch, nearest))
    }

    /// Classify one exchange and update proto-glyphs accordingly.
    pub async fn observe(
        &self,
        text: &str,
        subordinate: &SubordinateMatch,
        vector: &EmotionVector,
    ) -> Result<ObservationAnalysis> {
        self.space.check(vector)?;
        let observed_at = Utc::now();
        let text_digest = digest(text);
        let text_chars = text.chars().count();

        // A zero vector has no direction to cluster on, so it never seeds a proto.
        let (mismatch, nearest, action) =
            if subordinate.confidence >= self.config.strong_match_confidence || vector.is_zero() {
                (0.0, None, Action::Observe)
            } else {
                let (mismatch, nearest) = self.mismatch(vector).await?;
                let action = if mismatch >= self.config.mismatch_synth_threshold {
                    Action::Synthesize
                } else if mismatch >= self.config.mismatch_proto_threshold {
                    Action::CreateProto
                } else {
                    Action::Observe
                };
                (mismatch, nearest, action)
            };

        let mut proto_id = None;
        let mut absorbed = false;
        if action != Action::Observe {
            let (id, grew) = self.record_novelty(text, subordinate, vector).await?;
            proto_id = Some(id);
            absorbed = grew;
        }

        debug!(
            digest = text_digest,
            chars = text_chars,
            confidence = subordinate.confidence,
            mismatch,
            ?action,
            "Observed exchange"
        );

        self.remember(Observation {
            text_digest,
            text_chars,
            subordinate: subordinate.clone(),
            vector: vector.clone(),
            mismatch,
            action,
            observed_at,
        })
        .await;

        let (nearest_glyph, nearest_similarity) = match nearest {
            Some((name, s)) => (Some(name), Some(s)),
            None => (None, None),
        };
        Ok(ObservationAnalysis {
            should_create_proto: action != Action::Observe,
            should_synthesize: action == Action::Synthesize,
            mismatch,
            action,
            metadata: ObservationMetadata {
                subordinate_glyph: subordinate.glyph_name.clone(),
                subordinate_confidence: subordinate.confidence,
                nearest_glyph,
                nearest_similarity,
                proto_id,
                absorbed,
                text_digest,
                text_chars,
                observed_at,
            },
        })
    }

    /// Grow a close enough open proto when absorption is enabled, else create one.
    async fn record_novelty(
        &self,
        text: &str,
        subordinate: &SubordinateMatch,
        vector: &EmotionVector,
    ) -> Result<(String, bool)> {
        if let Some(threshold) = self.config.absorb_similarity_threshold {
            if let Some((id, similarity)) = self.protos.nearest_active(vector).await {
                if similarity >= threshold {
                    self.protos.add_example(&id, text, Some(vector)).await?;
                    debug!(proto_id = %id, similarity, "Absorbed observation");
                    return Ok((id, true));
                }
            }
        }
        let id = self
            .protos
            .create(
                vector.clone(),
                text,
                subordinate.glyph_name.clone(),
                1.0 - subordinate.confidence,
            )
            .await?;
        Ok((id, false))
    }

    async fn remember(&self, observation: Observation) {
        let mut buffer = self.buffer.lock().await;
        buffer.push_back(observation);
        while buffer.len() > self.config.observation_buffer_cap {
            buffer.pop_front();
        }
    }

    /// Buffered observations, oldest first.
    pub async fn observations(&self) -> Vec<Observation> {
        self.buffer.lock().await.iter().cloned().collect()
    }
}

/// Stable 64-bit digest of a text for correlation without retention.
pub fn digest(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
