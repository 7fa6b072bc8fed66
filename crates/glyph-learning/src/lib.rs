//! Glyph Learning - proto-glyphs, clustering, synthesis, promotion
//!
//! The orchestrator records novelty as proto-glyphs; the consolidation
//! pipeline clusters them, asks a synthesizer to name stable clusters, and
//! promotes the result into the glyph registry.

pub mod orchestrator;
pub mod pipeline;
pub mod proto;
pub mod registry;
pub mod store;
pub mod synthesizer;

pub use orchestrator::{Action, DominantOrchestrator, Observation, ObservationAnalysis};
pub use pipeline::{ConsolidationPipeline, PassReport, PipelineEvent, PipelineState, PipelineStatus};
pub use proto::{ProtoGlyphManager, ProtoStats};
pub use registry::GlyphRegistry;
pub use store::{JsonFileStore, MemoryStore, ProtoStore, StoreSnapshot};
pub use synthesizer::{
    GlyphProposal, LocalSynthesizer, OracleSynthesizer, SynthesisBudget, SynthesisRequest,
    Synthesizer,
};
