//! MockProvider - deterministic oracle responses for tests and offline hosts

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmRequest, StreamDelta, Usage};
use async_stream::stream;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Mock behavior configuration
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Stream the text back in small chunks
    Text(String),
    /// Stream raw text the caller is expected to reject
    Malformed(String),
    /// Fail before streaming with a recoverable (overloaded) error
    Unavailable(String),
    /// Fail before streaming with an auth error
    AuthFailure(String),
    /// Fail mid-stream
    Error(String),
    /// Sleep before answering with the inner behavior
    Delayed(Duration, Box<MockBehavior>),
}

/// A sequence of behaviors. Each call pops the next one; once the
/// sequence is exhausted the default behavior answers.
pub struct MockProvider {
    behaviors: Mutex<Vec<MockBehavior>>,
    default_behavior: MockBehavior,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<LlmRequest>>,
    usage: Usage,
}

impl MockProvider {
    /// Create a mock that always returns the same behavior
    pub fn constant(behavior: MockBehavior) -> Self {
        Self {
            behaviors: Mutex::new(Vec::new()),
            default_behavior: behavior,
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
            usage: Usage { input_tokens: 100, output_tokens: 50 },
        }
    }

    /// Create a mock with a sequence of behaviors (consumed in order)
    pub fn sequence(behaviors: Vec<MockBehavior>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors),
            default_behavior: MockBehavior::Unavailable("mock: sequence exhausted".into()),
            ..Self::constant(MockBehavior::Text(String::new()))
        }
    }

    /// Token usage reported on every successful completion.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Number of calls made
    pub async fn call_count(&self) -> usize {
        *self.call_count.lock().await
    }

    /// Requests seen so far, oldest first.
    pub async fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_behavior(&self, request: LlmRequest) -> MockBehavior {
        *self.call_count.lock().await += 1;
        self.requests.lock().await.push(request);

        let mut behaviors = self.behaviors.lock().await;
        if behaviors.is_empty() {
            self.default_behavior.clone()
        } else {
            behaviors.remove(0)
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str { "mock" }

    fn models(&self) -> &[&str] { &["mock"] }

    fn supports_model(&self, _model: &str) -> bool { true }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let mut behavior = self.next_behavior(request).await;
        let cancel = cancel.unwrap_or_default();

        while let MockBehavior::Delayed(delay, inner) = behavior {
            tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            behavior = *inner;
        }

        let usage = self.usage;
        match behavior {
            MockBehavior::Unavailable(msg) => Err(LlmError::Overloaded(msg)),
            MockBehavior::AuthFailure(msg) => Err(LlmError::AuthFailed(msg)),
            behavior => Ok(Box::pin(stream! {
                match behavior {
                    MockBehavior::Text(text) | MockBehavior::Malformed(text) => {
                        // Chunk on char boundaries like a real stream
                        let chars: Vec<char> = text.chars().collect();
                        for chunk in chars.chunks(20) {
                            if cancel.is_cancelled() {
                                yield Err(LlmError::Cancelled);
                                return;
                            }
                            yield Ok(StreamDelta::Text(chunk.iter().collect()));
                        }
                        yield Ok(StreamDelta::Done {
                            stop_reason: Some("end_turn".into()),
                            usage: Some(usage),
                        });
                    }
                    MockBehavior::Error(msg) => {
                        yield Err(LlmError::StreamError(msg));
                    }
                    _ => {}
                }
            })),
        }
    }
}
