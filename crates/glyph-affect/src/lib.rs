//! Glyph Affect - text to emotional vector, tags, dominant emotion, confidence
//!
//! Three lightweight analyzers run over the same token stream:
//! - tagger: synonym groups -> categorical tags
//! - counter: lexicon hits -> per-dimension emotion scores
//! - sentiment: valence words -> polarity and subjectivity
//!
//! The parser fuses them. No network calls, no side effects beyond a cache.

pub mod counter;
pub mod lexicon;
pub mod parser;
pub mod sentiment;
pub mod tagger;

pub use lexicon::{tokenize, Lexicon, LexiconFile};
pub use parser::AffectParser;
pub use tagger::Tagger;
