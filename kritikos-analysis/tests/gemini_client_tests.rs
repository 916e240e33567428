//! Gemini client against a mock HTTP server

use kritikos_analysis::llm::{GeminiClient, GeminiConfig, LlmClient, LlmError, RetryPolicy};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "gemini-test";
const ENDPOINT: &str = "/v1beta/models/gemini-test:generateContent";

fn client(server: &MockServer, max_retries: u32) -> GeminiClient {
    let mut config = GeminiConfig::new("test-key");
    config.model = MODEL.to_string();
    config.base_url = format!("{}/v1beta", server.uri());
    config.timeout = Duration::from_secs(5);
    config.retry = RetryPolicy {
        max_retries,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    };
    GeminiClient::new(config).unwrap()
}

fn reply(parts: &[&str]) -> serde_json::Value {
    let parts: Vec<_> = parts.iter().map(|text| json!({ "text": text })).collect();
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": parts },
            "finishReason": "STOP"
        }],
        "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 4, "totalTokenCount": 16 }
    })
}

#[tokio::test]
async fn test_complete_returns_joined_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [{ "role": "user", "parts": [{ "text": "Resuma isto" }] }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply(&["Objetivo: ", "ampliar o acesso."])))
        .expect(1)
        .mount(&server)
        .await;

    let text = client(&server, 0).complete("Resuma isto").await.unwrap();
    assert_eq!(text, "Objetivo: ampliar o acesso.");
    assert_eq!(client(&server, 0).model_name(), MODEL);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply(&["ok"])))
        .mount(&server)
        .await;

    let text = client(&server, 3).complete("prompt").await.unwrap();
    assert_eq!(text, "ok");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server, 2).complete("prompt").await.unwrap_err();
    match err {
        LlmError::RetriesExhausted { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("500"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(400).set_body_string("API key not valid"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, 3).complete("prompt").await.unwrap_err();
    match err {
        LlmError::Api { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("API key not valid"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_blocked_candidate_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        })))
        .mount(&server)
        .await;

    let err = client(&server, 0).complete("prompt").await.unwrap_err();
    assert!(matches!(err, LlmError::EmptyResponse));
}

#[tokio::test]
async fn test_no_candidates_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let err = client(&server, 0).complete("prompt").await.unwrap_err();
    assert!(matches!(err, LlmError::EmptyResponse));
}

#[tokio::test]
async fn test_malformed_body_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .mount(&server)
        .await;

    let err = client(&server, 0).complete("prompt").await.unwrap_err();
    assert!(matches!(err, LlmError::Parse(_)));
}
