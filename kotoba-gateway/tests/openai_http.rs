//! HTTP-level tests for the OpenAI gateway against a mock server.

use kotoba_core::gateway::{CompletionGateway, CompletionRequest, GatewayError};
use kotoba_core::message::ChatMessage;
use kotoba_gateway::{OpenAIGateway, RetryConfig, RetryingGateway};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> CompletionRequest {
    CompletionRequest {
        model: "gpt-3.5-turbo".into(),
        messages: vec![
            ChatMessage::system("你是一個害羞的吉他手。"),
            ChatMessage::user("你好"),
        ],
        temperature: 0.9,
        max_tokens: 150,
    }
}

fn success_body() -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "model": "gpt-3.5-turbo",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": "欸...你、你好。" },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 25, "completion_tokens": 9, "total_tokens": 34 }
    })
}

#[tokio::test]
async fn success_parses_text_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .mount(&server)
        .await;

    let gateway = OpenAIGateway::with_base_url("test-key", server.uri()).unwrap();
    let completion = gateway.complete(request()).await.unwrap();

    assert_eq!(completion.text, "欸...你、你好。");
    assert_eq!(completion.usage.prompt_tokens, 25);
    assert_eq!(completion.usage.completion_tokens, 9);
}

#[tokio::test]
async fn request_body_carries_model_messages_and_caps() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-3.5-turbo",
            "messages": [
                { "role": "system", "content": "你是一個害羞的吉他手。" },
                { "role": "user", "content": "你好" }
            ],
            "max_tokens": 150
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = OpenAIGateway::with_base_url("test-key", server.uri()).unwrap();
    gateway.complete(request()).await.unwrap();
}

#[tokio::test]
async fn rate_limit_carries_server_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let gateway = OpenAIGateway::with_base_url("test-key", server.uri()).unwrap();
    let err = gateway.complete(request()).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::RateLimited {
            retry_after: Some(7)
        }
    ));
}

#[tokio::test]
async fn rate_limit_without_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let gateway = OpenAIGateway::with_base_url("test-key", server.uri()).unwrap();
    let err = gateway.complete(request()).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::RateLimited { retry_after: None }
    ));
}

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let gateway = OpenAIGateway::with_base_url("test-key", server.uri()).unwrap();
    let err = gateway.complete(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Transient(_)));
}

#[tokio::test]
async fn client_error_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("model not found"))
        .mount(&server)
        .await;

    let gateway = OpenAIGateway::with_base_url("test-key", server.uri()).unwrap();
    let err = gateway.complete(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Fatal(_)));
}

#[tokio::test]
async fn malformed_success_body_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let gateway = OpenAIGateway::with_base_url("test-key", server.uri()).unwrap();
    let err = gateway.complete(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Fatal(_)));
}

#[tokio::test]
async fn empty_choices_yield_empty_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [],
            "usage": { "prompt_tokens": 12, "completion_tokens": 0 }
        })))
        .mount(&server)
        .await;

    let gateway = OpenAIGateway::with_base_url("test-key", server.uri()).unwrap();
    let completion = gateway.complete(request()).await.unwrap();
    assert!(completion.text.is_empty());
}

#[tokio::test]
async fn missing_usage_defaults_to_zero() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "content": "嗨" } }]
        })))
        .mount(&server)
        .await;

    let gateway = OpenAIGateway::with_base_url("test-key", server.uri()).unwrap();
    let completion = gateway.complete(request()).await.unwrap();
    assert_eq!(completion.text, "嗨");
    assert_eq!(completion.usage.prompt_tokens, 0);
}

#[tokio::test]
async fn retry_decorator_rides_out_rate_limits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .mount(&server)
        .await;

    let inner = OpenAIGateway::with_base_url("test-key", server.uri()).unwrap();
    let gateway = RetryingGateway::new(
        Arc::new(inner),
        RetryConfig {
            max_retries: 3,
            retry_delay: Duration::ZERO,
        },
    );

    let completion = gateway.complete(request()).await.unwrap();
    assert_eq!(completion.text, "欸...你、你好。");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}
