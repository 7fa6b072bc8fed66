//! Glyph LLM - oracle transport for glyph synthesis
//!
//! The learning core never depends on a vendor: it talks to `LlmProvider`.
//! `AnthropicProvider` speaks the Messages API over SSE; `MockProvider`
//! replays scripted behaviors for tests and offline hosts.

pub mod anthropic;
pub mod mock;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use mock::{MockBehavior, MockProvider};
pub use provider::{complete_text, LlmError, LlmProvider, LlmResult, LlmStream};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
