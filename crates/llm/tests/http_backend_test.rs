//! HTTP backend tests against a local mock completion service.

use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llm::{CompletionClient, HttpBackend, RetryConfig};
use pipeline::{CompletionError, CompletionRequest, ModelId, Turn};

// ============================================================================
// Helpers
// ============================================================================

fn client(server: &MockServer, max_retries: u32) -> CompletionClient<HttpBackend> {
    let config = RetryConfig {
        request_timeout: Duration::from_secs(5),
        max_retries,
        initial_backoff: Duration::from_millis(10),
    };
    // Trailing slash must not produce `//chat/completions`.
    let base_url = format!("{}/", server.uri());
    let backend = HttpBackend::new(base_url, "test-key", config.request_timeout).unwrap();
    CompletionClient::new(backend, config)
}

fn request() -> CompletionRequest {
    CompletionRequest::new(ModelId::new("openai/gpt-4o-mini").unwrap())
        .with_turn(Turn::system("Stay in character."))
        .with_turn(Turn::user("How do you get to work?"))
        .with_max_output_tokens(Some(300))
}

fn chat_response(content: serde_json::Value, reasoning: Option<&str>) -> serde_json::Value {
    let mut message = json!({ "role": "assistant", "content": content });
    if let Some(reasoning) = reasoning {
        message["reasoning"] = json!(reasoning);
    }
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "choices": [{ "index": 0, "message": message, "finish_reason": "stop" }]
    })
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn success_sends_bearer_auth_and_wire_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(chat_response(json!("By tram."), None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server, 0).complete(&request()).await.unwrap();
    assert_eq!(result.content(), "By tram.");

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["model"], "openai/gpt-4o-mini");
    assert_eq!(body["max_tokens"], 300);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "How do you get to work?");
    assert!(body.get("temperature").is_none());
}

#[tokio::test]
async fn rate_limit_waits_for_the_retry_hint_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after-ms", "150")
                .set_body_json(json!({ "error": { "message": "slow down" } })),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(chat_response(json!("Fine now."), None)),
        )
        .mount(&server)
        .await;

    let started = Instant::now();
    let result = client(&server, 3).complete(&request()).await.unwrap();

    assert_eq!(result.content(), "Fine now.");
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn persistent_rate_limit_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_string("rate limited"),
        )
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server, 2).complete(&request()).await.unwrap_err();

    let (attempts, last) = match err {
        CompletionError::RetriesExhausted { attempts, last } => (attempts, last),
        other => panic!("expected exhausted retries, got {other:?}"),
    };
    assert_eq!(attempts, 3);
    match *last {
        CompletionError::Status {
            status,
            ref message,
            retry_after,
            ..
        } => {
            assert_eq!(status, 429);
            assert_eq!(message, "rate limited");
            assert_eq!(retry_after, Some(Duration::ZERO));
        }
        ref other => panic!("expected a status error, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_request_is_returned_without_retry() {
    let server = MockServer::start().await;
    let error_body = json!({
        "error": {
            "message": "model `nope` does not exist",
            "type": "invalid_request_error"
        }
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, 5).complete(&request()).await.unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert!(!err.retry_policy().is_retryable());
    let CompletionError::Status { message, body, .. } = &err else {
        panic!("expected a status error, got {err:?}");
    };
    assert_eq!(message, "model `nope` does not exist");
    let echoed: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(echoed, error_body);
}

#[tokio::test]
async fn reasoning_stands_in_for_empty_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(
            serde_json::Value::Null,
            Some("Mostly by bike."),
        )))
        .mount(&server)
        .await;

    let result = client(&server, 0).complete(&request()).await.unwrap();

    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.candidates[0].text, "");
    assert_eq!(result.candidates[0].reasoning.as_deref(), Some("Mostly by bike."));
    assert_eq!(result.content(), "Mostly by bike.");
}
