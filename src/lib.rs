//! Glyphcore - an emotional-pattern learning core for conversational hosts
//!
//! The host reports each subordinate turn; the core decides whether the turn
//! is novel, accumulates novel turns as proto-glyphs, and periodically
//! consolidates stable clusters of them into named glyphs.
//!
//! ```text
//! text ──► AffectParser ──► DominantOrchestrator ──► ProtoGlyphManager
//!                                  │ nudge                  │
//!                                  ▼                        ▼
//!                        ConsolidationPipeline ──► Synthesizer ──► GlyphRegistry
//! ```

pub mod host;
pub mod worker;

pub use host::GlyphCore;
pub use worker::{Exchange, WorkerStats};
