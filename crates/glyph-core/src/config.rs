//! Glyph core configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use crate::error::{Error, Result};
use crate::vector::{AffectSpace, DEFAULT_LABELS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlyphConfig {
    /// Vector length and label inventory. Fixed after first run.
    pub vectors: VectorConfig,
    /// Proto-glyph clustering and stability filters.
    pub clustering: ClusteringConfig,
    /// Novelty decision thresholds.
    pub orchestrator: OrchestratorConfig,
    /// Proto-glyph store parameters.
    pub protos: ProtoConfig,
    /// Registry snapshot location.
    pub registry: RegistryConfig,
    /// Consolidation cadence.
    pub pipeline: PipelineConfig,
    /// Synthesizer mode and budget.
    pub synthesizer: SynthesizerConfig,
    /// Affect parser inputs.
    pub affect: AffectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub dimensions: usize,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Cosine similarity a proto needs to join a seed's cluster.
    pub similarity_threshold: f64,
    pub min_cluster_size: usize,
    /// Mean pairwise similarity a cluster needs before promotion.
    pub stability_threshold: f64,
    pub stable_min_size: usize,
    /// Retained examples summed across members.
    pub stable_min_evidence: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Subordinate confidence at or above which the turn is a strong match.
    pub strong_match_confidence: f64,
    pub mismatch_proto_threshold: f64,
    pub mismatch_synth_threshold: f64,
    /// Mismatch used when the registry holds no glyphs.
    pub no_glyph_mismatch: f64,
    pub observation_buffer_cap: usize,
    /// When set, a novel vector this similar to an open proto grows that proto instead.
    pub absorb_similarity_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtoConfig {
    pub example_cap: usize,
    /// Representative examples are truncated to this many characters.
    pub example_max_chars: usize,
    /// Confidence added by each `add_example`.
    pub confidence_step: f64,
    pub store_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub interval_secs: u64,
    /// Wait after a failed pass before retrying.
    pub retry_backoff_secs: u64,
    /// Capacity of the promotion event channel.
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesizerMode {
    Local,
    Oracle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    pub mode: SynthesizerMode,
    pub timeout_secs: u64,
    pub max_calls_per_day: u32,
    pub min_call_interval_secs: u64,
    pub max_tokens_per_day: u64,
    /// Output token ceiling per oracle call.
    pub max_tokens: u32,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AffectConfig {
    /// JSON lexicon; the built-in lexicon is used when unset.
    pub lexicon_path: Option<PathBuf>,
    pub cache_capacity: usize,
    /// Max token gap between consecutive words of a multi-word tag phrase.
    pub fuzzy_window: usize,
}

// ============================================================
// Defaults
// ============================================================

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_LABELS.len(),
            labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            min_cluster_size: 2,
            stability_threshold: 0.75,
            stable_min_size: 3,
            stable_min_evidence: 5,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            strong_match_confidence: 0.6,
            mismatch_proto_threshold: 0.4,
            mismatch_synth_threshold: 0.8,
            no_glyph_mismatch: 0.5,
            observation_buffer_cap: 256,
            absorb_similarity_threshold: None,
        }
    }
}

impl Default for ProtoConfig {
    fn default() -> Self {
        Self {
            example_cap: 10,
            example_max_chars: 280,
            confidence_step: 0.05,
            store_path: PathBuf::from("glyph_state/protos.json"),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            snapshot_path: Some(PathBuf::from("glyph_state/glyphs.json")),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { interval_secs: 3600, retry_backoff_secs: 60, event_capacity: 64 }
    }
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            mode: SynthesizerMode::Local,
            timeout_secs: 20,
            max_calls_per_day: 24,
            min_call_interval_secs: 60,
            max_tokens_per_day: 50_000,
            max_tokens: 512,
            model: "claude-haiku-4-5-20251001".into(),
        }
    }
}

impl Default for AffectConfig {
    fn default() -> Self {
        Self { lexicon_path: None, cache_capacity: 1024, fuzzy_window: 3 }
    }
}

// ============================================================
// Loading
// ============================================================

impl GlyphConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} - using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {} - using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Reject values the core cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.vectors.labels.len() != self.vectors.dimensions {
            return Err(Error::Config(format!(
                "vectors.dimensions is {} but {} labels are configured",
                self.vectors.dimensions,
                self.vectors.labels.len()
            )));
        }
        let unit = [
            ("clustering.similarity_threshold", self.clustering.similarity_threshold),
            ("clustering.stability_threshold", self.clustering.stability_threshold),
            ("orchestrator.strong_match_confidence", self.orchestrator.strong_match_confidence),
            ("orchestrator.mismatch_proto_threshold", self.orchestrator.mismatch_proto_threshold),
            ("orchestrator.mismatch_synth_threshold", self.orchestrator.mismatch_synth_threshold),
            ("orchestrator.no_glyph_mismatch", self.orchestrator.no_glyph_mismatch),
            ("protos.confidence_step", self.protos.confidence_step),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        if let Some(t) = self.orchestrator.absorb_similarity_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(Error::Config(format!(
                    "orchestrator.absorb_similarity_threshold must be within [0, 1], got {}",
                    t
                )));
            }
        }
        if self.orchestrator.mismatch_proto_threshold > self.orchestrator.mismatch_synth_threshold {
            return Err(Error::Config(
                "mismatch_proto_threshold exceeds mismatch_synth_threshold".into(),
            ));
        }
        let counts = [
            ("clustering.min_cluster_size", self.clustering.min_cluster_size),
            ("clustering.stable_min_size", self.clustering.stable_min_size),
            ("protos.example_cap", self.protos.example_cap),
            ("protos.example_max_chars", self.protos.example_max_chars),
            ("orchestrator.observation_buffer_cap", self.orchestrator.observation_buffer_cap),
            ("pipeline.event_capacity", self.pipeline.event_capacity),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }
        if self.pipeline.interval_secs == 0 {
            return Err(Error::Config("pipeline.interval_secs must be positive".into()));
        }
        Ok(())
    }

    /// Build the affect space the rest of the core shares.
    pub fn affect_space(&self) -> Result<AffectSpace> {
        self.validate()?;
        AffectSpace::new(self.vectors.labels.clone())
    }
}

impl PipelineConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

impl SynthesizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
