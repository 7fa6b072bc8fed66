//! Tests for glyph-llm: request types, error classification, providers

use glyph_llm::*;

// ===========================================================================
// LlmRequest
// ===========================================================================

#[test]
fn llm_request_default() {
    let req = LlmRequest::default();
    assert!(req.model.contains("claude"));
    assert!(req.messages.is_empty());
    assert_eq!(req.max_tokens, Some(512));
    assert!(req.temperature.is_none());
    assert!(req.system.is_none());
}

#[test]
fn llm_request_prompt_is_single_user_turn() {
    let req = LlmRequest::prompt("claude-haiku-4-5", "name this feeling");
    assert_eq!(req.model, "claude-haiku-4-5");
    assert_eq!(req.messages, vec![LlmMessage::user("name this feeling")]);
}

#[test]
fn llm_request_skips_unset_fields() {
    let req = LlmRequest {
        max_tokens: None,
        ..LlmRequest::prompt("m", "hi")
    };
    let json = serde_json::to_value(&req).unwrap();
    assert!(json.get("max_tokens").is_none());
    assert!(json.get("system").is_none());
    assert_eq!(json["messages"][0]["role"], "user");
}

// ===========================================================================
// Usage
// ===========================================================================

#[test]
fn usage_default_and_total() {
    let u = Usage::default();
    assert_eq!(u.total(), 0);
    let u = Usage { input_tokens: 300, output_tokens: 40 };
    assert_eq!(u.total(), 340);
}

#[test]
fn usage_serde_tolerates_missing_fields() {
    let u: Usage = serde_json::from_str(r#"{"output_tokens": 9}"#).unwrap();
    assert_eq!(u, Usage { input_tokens: 0, output_tokens: 9 });
}

// ===========================================================================
// LlmError
// ===========================================================================

#[test]
fn error_recoverability() {
    assert!(LlmError::RateLimited { retry_after_ms: 1000 }.is_recoverable());
    assert!(LlmError::Overloaded("529".into()).is_recoverable());
    assert!(LlmError::Cancelled.is_recoverable());
    assert!(!LlmError::AuthFailed("bad key".into()).is_recoverable());
    assert!(!LlmError::InvalidResponse("?".into()).is_recoverable());
    assert!(!LlmError::RequestFailed("400".into()).is_recoverable());
}

#[test]
fn error_display() {
    let e = LlmError::RateLimited { retry_after_ms: 2500 };
    assert_eq!(e.to_string(), "rate limited: retry after 2500ms");
}

// ===========================================================================
// MockProvider through the trait object
// ===========================================================================

#[tokio::test]
async fn mock_behind_dyn_provider() {
    let provider: Box<dyn LlmProvider> =
        Box::new(MockProvider::constant(MockBehavior::Text("{\"name\":\"x\"}".into())));
    assert_eq!(provider.name(), "mock");
    assert!(provider.supports_model("anything"));
    let out = complete_text(provider.as_ref(), LlmRequest::prompt("m", "hi"), None)
        .await
        .unwrap();
    assert_eq!(out.text, "{\"name\":\"x\"}");
}

#[tokio::test]
async fn mock_mid_stream_error_surfaces() {
    let mock = MockProvider::constant(MockBehavior::Error("connection reset".into()));
    let err = complete_text(&mock, LlmRequest::prompt("m", "hi"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::StreamError(_)));
}

#[tokio::test]
async fn mock_auth_failure_is_not_recoverable() {
    let mock = MockProvider::constant(MockBehavior::AuthFailure("no key".into()));
    let err = complete_text(&mock, LlmRequest::prompt("m", "hi"), None)
        .await
        .unwrap_err();
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn mock_custom_usage() {
    let mock = MockProvider::constant(MockBehavior::Malformed("not json".into()))
        .with_usage(Usage { input_tokens: 7, output_tokens: 3 });
    let out = complete_text(&mock, LlmRequest::prompt("m", "hi"), None).await.unwrap();
    assert_eq!(out.text, "not json");
    assert_eq!(out.usage.total(), 10);
}

// ===========================================================================
// AnthropicProvider
// ===========================================================================

#[test]
fn anthropic_provider_supports_model() {
    let provider = AnthropicProvider::new("fake");
    assert_eq!(provider.name(), "anthropic");
    assert!(provider.supports_model("claude-haiku-4-5-20251001"));
    assert!(!provider.supports_model("gpt-4"));
}

#[tokio::test]
async fn anthropic_provider_simple_text_response() {
    let api_key = match std::env::var("ANTHROPIC_API_KEY") {
        Ok(k) if !k.is_empty() => k,
        _ => { eprintln!("SKIP: no ANTHROPIC_API_KEY"); return; }
    };

    let provider = AnthropicProvider::new(api_key);
    let request = LlmRequest {
        max_tokens: Some(32),
        ..LlmRequest::prompt(
            "claude-haiku-4-5-20251001",
            "Reply with exactly the word 'pong' and nothing else.",
        )
    };

    let out = complete_text(&provider, request, None).await.expect("API call failed");
    assert!(out.text.to_lowercase().contains("pong"), "Expected 'pong', got: {}", out.text);
    assert!(out.usage.output_tokens > 0);
}
