//! Glyph Core - shared records, vector space, configuration, and error handling

pub mod config;
pub mod error;
pub mod types;
pub mod vector;

pub use config::GlyphConfig;
pub use error::{Error, Result};
pub use types::*;
pub use vector::{AffectSpace, EmotionVector};
