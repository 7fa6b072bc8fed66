//! Error types for the glyph learning core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("shape mismatch: expected {expected} dimensions, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate glyph name: {0}")]
    DuplicateName(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("oracle unavailable ({}): {message}", if *.recoverable { "recoverable" } else { "unknown" })]
    OracleUnavailable { message: String, recoverable: bool },

    #[error("synthesis budget exceeded: {0}")]
    SynthesisBudgetExceeded(String),

    #[error("shutdown in progress")]
    Shutdown,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    pub fn shape(expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch { expected, actual }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn oracle(message: impl Into<String>, recoverable: bool) -> Self {
        Self::OracleUnavailable {
            message: message.into(),
            recoverable,
        }
    }

    /// Errors after which the same work may succeed on a later pass.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::OracleUnavailable { recoverable, .. } => *recoverable,
            Self::SynthesisBudgetExceeded(_)
            | Self::DuplicateName(_)
            | Self::Persistence(_)
            | Self::Io(_) => true,
            _ => false,
        }
    }
}
