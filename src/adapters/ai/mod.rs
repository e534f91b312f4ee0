//! OpenAI-compatible model provider.
//!
//! Speaks the `/chat/completions` protocol used by Google's Gemini
//! OpenAI-compat endpoint. Streaming responses arrive as SSE; each data
//! line is parsed and forwarded as a chunk until the `[DONE]` marker.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::AiConfig;
use crate::domain::Role;
use crate::ports::{
    GenerationRequest, ModelChunk, ModelError, ModelProvider, TokenStream,
};

/// Provider for any endpoint speaking the OpenAI chat-completions wire format.
pub struct OpenAiCompatProvider {
    client: Client,
    api_key: Secret<String>,
    base_url: String,
}

impl OpenAiCompatProvider {
    /// Creates a provider with an explicit key and endpoint.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: Secret::new(api_key.into()),
            base_url: base_url.into(),
        }
    }

    /// Builds a provider from configuration. Fails when no API key is set.
    pub fn from_config(config: &AiConfig) -> Result<Self, ModelError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ModelError::AuthenticationFailed)?;
        Ok(Self::new(
            api_key,
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn to_wire(&self, request: &GenerationRequest, stream: bool) -> WireRequest {
        WireRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    }
                    .to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: Some(request.temperature),
            max_tokens: request.max_tokens,
            stream: if stream { Some(true) } else { None },
        }
    }

    async fn send(&self, request: &GenerationRequest, stream: bool) -> Result<Response, ModelError> {
        self.client
            .post(self.completions_url())
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(&self.to_wire(request, stream))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ModelError::Network(format!("Connection failed: {}", e))
                } else {
                    ModelError::Network(e.to_string())
                }
            })
    }

    async fn handle_response_status(&self, response: Response) -> Result<Response, ModelError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(ModelError::AuthenticationFailed),
            429 => Err(ModelError::RateLimited {
                retry_after_secs: parse_retry_after(&error_body),
            }),
            400 => Err(ModelError::InvalidRequest(error_body)),
            500..=599 => Err(ModelError::Unavailable(format!(
                "Server error {}: {}",
                status, error_body
            ))),
            _ => Err(ModelError::Network(format!(
                "Unexpected status {}: {}",
                status, error_body
            ))),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    async fn stream_generate(&self, request: GenerationRequest) -> Result<TokenStream, ModelError> {
        let response = self.send(&request, true).await?;
        let response = self.handle_response_status(response).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            // SSE lines can be split across network reads; carry the tail.
            let mut buffer = String::new();
            let mut finished = false;

            'pump: while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ModelError::Network(format!("Stream error: {}", e))))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data: ").or(line.strip_prefix("data:"))
                    else {
                        continue;
                    };
                    if data == "[DONE]" {
                        finished = true;
                        let _ = tx.send(Ok(ModelChunk::Done)).await;
                        break 'pump;
                    }
                    for item in parse_data_line(data) {
                        if tx.send(item).await.is_err() {
                            return;
                        }
                    }
                }
            }

            if !finished {
                let _ = tx
                    .send(Err(ModelError::Network(
                        "stream ended without done marker".to_string(),
                    )))
                    .await;
            }
        });

        Ok(TokenStream { receiver: rx })
    }

    async fn complete(&self, request: GenerationRequest) -> Result<String, ModelError> {
        let response = self.send(&request, false).await?;
        let response = self.handle_response_status(response).await?;

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Parse(format!("Failed to parse response: {}", e)))?;

        wire.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ModelError::Parse("No choices in response".to_string()))
    }
}

/// Parses one SSE data payload into chunks.
fn parse_data_line(data: &str) -> Vec<Result<ModelChunk, ModelError>> {
    if data.trim().is_empty() {
        return Vec::new();
    }

    let chunk: WireStreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            return vec![Err(ModelError::Parse(format!(
                "Failed to parse stream chunk: {}",
                e
            )))]
        }
    };

    let mut results = Vec::new();
    if let Some(choice) = chunk.choices.first() {
        if let Some(reasoning) = &choice.delta.reasoning_content {
            if !reasoning.is_empty() {
                results.push(Ok(ModelChunk::ReasoningDelta(reasoning.clone())));
            }
        }
        if let Some(content) = &choice.delta.content {
            if !content.is_empty() {
                results.push(Ok(ModelChunk::TextDelta(content.clone())));
            }
        }
    }
    results
}

/// Parses retry-after seconds from an error body, defaulting to 30.
fn parse_retry_after(error_body: &str) -> u32 {
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(error_body) {
        if let Some(s) = parsed
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            if let Some(idx) = s.find("try again in ") {
                let rest = &s[idx + 13..];
                let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                if let Ok(secs) = digits.parse::<u32>() {
                    return secs;
                }
            }
        }
    }
    30
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

// ----- Wire types -----

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_delta() {
        let data = r#"{"id":"c1","choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let chunks = parse_data_line(data);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].as_ref().unwrap(),
            &ModelChunk::TextDelta("Hello".to_string())
        );
    }

    #[test]
    fn parses_reasoning_before_content() {
        let data = r#"{"choices":[{"delta":{"content":"yes","reasoning_content":"hmm"}}]}"#;
        let chunks = parse_data_line(data);
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[0].as_ref().unwrap(),
            &ModelChunk::ReasoningDelta("hmm".to_string())
        );
        assert_eq!(
            chunks[1].as_ref().unwrap(),
            &ModelChunk::TextDelta("yes".to_string())
        );
    }

    #[test]
    fn empty_deltas_produce_nothing() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert!(parse_data_line(data).is_empty());
        assert!(parse_data_line("   ").is_empty());
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        let chunks = parse_data_line("{not json");
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], Err(ModelError::Parse(_))));
    }

    #[test]
    fn retry_after_parsed_from_error_message() {
        let error = r#"{"error":{"message":"Rate limit exceeded. Please try again in 12 seconds."}}"#;
        assert_eq!(parse_retry_after(error), 12);
        assert_eq!(parse_retry_after("{}"), 30);
    }
}
