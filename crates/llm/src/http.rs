//! OpenAI-compatible chat-completions backend.
//!
//! Works with OpenAI, OpenRouter, Ollama and other services speaking the
//! `POST {base_url}/chat/completions` dialect. One call to
//! [`HttpBackend::send`](crate::CompletionBackend::send) is exactly one HTTP
//! request; retries belong to [`CompletionClient`](crate::CompletionClient).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pipeline::{Candidate, CompletionError, CompletionRequest, CompletionResult};

use crate::client::CompletionBackend;

/// Longest slice of a raw body quoted in an error message.
const MESSAGE_SNIPPET_LEN: usize = 200;

/// HTTP transport for the completion service.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
}

impl HttpBackend {
    /// Builds a backend whose HTTP client enforces `request_timeout` per request.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CompletionError::Transport {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            request_timeout,
        })
    }

    fn map_transport(&self, err: reqwest::Error) -> CompletionError {
        if err.is_timeout() {
            CompletionError::Timeout(self.request_timeout)
        } else {
            CompletionError::Transport {
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn send(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = %request.model, turns = request.turns.len(), "sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest::from(request))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let body = response.text().await.map_err(|e| self.map_transport(e))?;

        if !status.is_success() {
            let message = error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
            return Err(CompletionError::Status {
                status: status.as_u16(),
                message,
                body,
                retry_after,
            });
        }

        decode_response(body, retry_after)
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a CompletionRequest> for ChatRequest<'a> {
    fn from(request: &'a CompletionRequest) -> Self {
        Self {
            model: request.model.as_str(),
            messages: request
                .turns
                .iter()
                .map(|turn| ChatMessage {
                    role: turn.role.as_str(),
                    content: &turn.text,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    /// Some gateways report upstream failures inside a 200 response.
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: ChoiceMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

fn decode_response(
    body: String,
    retry_after: Option<Duration>,
) -> Result<CompletionResult, CompletionError> {
    let parsed: ChatResponse = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return Err(CompletionError::Malformed {
                message: e.to_string(),
                body,
            })
        }
    };

    if parsed.choices.is_empty() {
        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_else(|| "upstream error".to_string());
            let code = error.code.as_ref().and_then(|c| {
                c.as_u64()
                    .or_else(|| c.as_str().and_then(|s| s.parse().ok()))
            });
            return Err(match code.and_then(|c| u16::try_from(c).ok()) {
                Some(status) => CompletionError::Status {
                    status,
                    message,
                    body,
                    retry_after,
                },
                None => CompletionError::Malformed { message, body },
            });
        }
    }

    let candidates = parsed
        .choices
        .into_iter()
        .map(|choice| {
            let ChoiceMessage {
                content,
                reasoning,
                reasoning_content,
            } = choice.message;
            Candidate {
                text: content.unwrap_or_default(),
                reasoning: reasoning.or(reasoning_content),
            }
        })
        .collect();
    Ok(CompletionResult::new(candidates))
}

/// Server retry hint from `retry-after-ms` (milliseconds) or `retry-after`
/// (seconds). HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
    };
    if let Some(ms) = header("retry-after-ms") {
        return Duration::try_from_secs_f64(ms / 1000.0).ok();
    }
    header("retry-after").and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// Best human-readable message from an error body.
fn error_message(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let error = value.get("error").unwrap_or(&value);
        if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
            return Some(message.to_string());
        }
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MESSAGE_SNIPPET_LEN).collect())
}
