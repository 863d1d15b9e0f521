//! LLM Gateway
//!
//! Uniform call surface over concrete providers. Two operations:
//! `complete` (single response) and `stream_complete` (finite chunk
//! sequence). No retries at this layer; transport and provider errors
//! surface unchanged so the scheduler can own the retry policy.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::types::CompletionRequest;
use courseforge_core::config::LlmEntry;

/// Gateway error type
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("stream terminated with finish reason '{0}'")]
    FinishReason(String),
}

/// Uniform LLM call surface
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Logical gateway name (the `llms.{key}` entry name)
    fn name(&self) -> &str;

    /// Single blocking completion
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError>;

    /// Finite sequence of non-empty text deltas
    async fn stream_complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<Vec<String>, GatewayError>;

    /// Convenience: complete with default knobs
    async fn ainvoke(&self, prompt: &str) -> Result<String, GatewayError> {
        self.complete(&CompletionRequest::new(prompt)).await
    }

    /// Diagnostics from the last call (finish reasons, if any)
    fn last_info(&self) -> Option<String> {
        None
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible

/// OpenAI-compatible chat-completions gateway
pub struct OpenAiGateway {
    name: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    max_tokens: u32,
    client: reqwest::Client,
    last_info: Mutex<Option<String>>,
}

impl OpenAiGateway {
    /// Build from a config entry
    pub fn from_entry(name: &str, entry: &LlmEntry) -> Self {
        Self {
            name: name.to_string(),
            base_url: entry
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: entry.model.clone(),
            api_key: entry.api_key.clone(),
            temperature: entry.temperature,
            max_tokens: entry.max_tokens,
            client: reqwest::Client::new(),
            last_info: Mutex::new(None),
        }
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> JsonValue {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": request.prompt}));

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature.unwrap_or(self.temperature),
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "stream": stream,
        })
    }

    async fn post(&self, body: &JsonValue) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut builder = self
            .client
            .post(&url)
            .json(body)
            .timeout(Duration::from_secs(600));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn record_info(&self, info: Option<String>) {
        if let Ok(mut guard) = self.last_info.lock() {
            *guard = info;
        }
    }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        let body = self.build_body(request, false);
        let response = self.post(&body).await?;
        let json: JsonValue = response.json().await?;
        let (content, finish_reason) = parse_chat_completion(&json)?;
        debug!(gateway = %self.name, finish_reason = ?finish_reason, "completion finished");
        self.record_info(finish_reason);
        Ok(content)
    }

    async fn stream_complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<Vec<String>, GatewayError> {
        let body = self.build_body(request, true);
        let response = self.post(&body).await?;

        let mut chunks = Vec::new();
        let mut finish_reason: Option<String> = None;
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    self.record_info(finish_reason);
                    return Ok(chunks);
                }
                let json: JsonValue = serde_json::from_str(data)
                    .map_err(|e| GatewayError::Malformed(format!("bad SSE chunk: {}", e)))?;
                if let Some(delta) = json["choices"][0]["delta"]["content"].as_str() {
                    if !delta.is_empty() {
                        chunks.push(delta.to_string());
                    }
                }
                if let Some(reason) = json["choices"][0]["finish_reason"].as_str() {
                    finish_reason = Some(reason.to_string());
                }
            }
        }

        self.record_info(finish_reason);
        Ok(chunks)
    }

    fn last_info(&self) -> Option<String> {
        self.last_info.lock().ok().and_then(|g| g.clone())
    }
}

/// Extract `(content, finish_reason)` from a chat-completions response
pub fn parse_chat_completion(json: &JsonValue) -> Result<(String, Option<String>), GatewayError> {
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| GatewayError::Malformed("no content in chat completion".to_string()))?
        .to_string();
    let finish_reason = json["choices"][0]["finish_reason"]
        .as_str()
        .map(|s| s.to_string());
    Ok((content, finish_reason))
}

// ---------------------------------------------------------------------------
// Gemini-family

/// Gemini-family generateContent gateway
pub struct GeminiGateway {
    name: String,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f64,
    max_tokens: u32,
    client: reqwest::Client,
    last_info: Mutex<Option<String>>,
}

impl GeminiGateway {
    /// Build from a config entry; the API key is required
    pub fn from_entry(name: &str, entry: &LlmEntry) -> Result<Self, GatewayError> {
        let api_key = entry
            .api_key
            .clone()
            .ok_or_else(|| GatewayError::Malformed(format!("llm entry '{}' needs api_key", name)))?;
        Ok(Self {
            name: name.to_string(),
            base_url: entry
                .base_url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: entry.model.clone(),
            api_key,
            temperature: entry.temperature,
            max_tokens: entry.max_tokens,
            client: reqwest::Client::new(),
            last_info: Mutex::new(None),
        })
    }

    fn build_body(&self, request: &CompletionRequest) -> JsonValue {
        let mut body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": {
                "temperature": request.temperature.unwrap_or(self.temperature),
                "maxOutputTokens": request.max_tokens.unwrap_or(self.max_tokens),
            }
        });
        if let Some(system) = &request.system {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": system}]});
        }
        body
    }

    async fn post(
        &self,
        method: &str,
        streaming: bool,
        body: &JsonValue,
    ) -> Result<reqwest::Response, GatewayError> {
        let alt = if streaming { "alt=sse&" } else { "" };
        let url = format!(
            "{}/models/{}:{}?{}key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            method,
            alt,
            self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(Duration::from_secs(600))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn record_info(&self, reasons: &[String]) {
        if let Ok(mut guard) = self.last_info.lock() {
            *guard = if reasons.is_empty() {
                None
            } else {
                Some(reasons.join(","))
            };
        }
    }
}

#[async_trait]
impl LlmGateway for GeminiGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        let body = self.build_body(request);
        let response = self.post("generateContent", false, &body).await?;
        let json: JsonValue = response.json().await?;

        let mut reasons = Vec::new();
        if let Some(reason) = json["candidates"][0]["finishReason"].as_str() {
            reasons.push(reason.to_string());
            // Terminal check; UNSPECIFIED is not terminal
            gemini_reason_is_stop(reason)?;
        }
        self.record_info(&reasons);

        let parts = json["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| GatewayError::Malformed("no parts in gemini response".to_string()))?;
        let text: String = parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("");
        debug!(gateway = %self.name, reasons = ?self.last_info(), "gemini completion finished");
        Ok(text)
    }

    async fn stream_complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<Vec<String>, GatewayError> {
        let body = self.build_body(request);
        let response = self.post("streamGenerateContent", true, &body).await?;

        let mut chunks = Vec::new();
        let mut reasons = Vec::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let json: JsonValue = serde_json::from_str(data.trim())
                    .map_err(|e| GatewayError::Malformed(format!("bad SSE chunk: {}", e)))?;

                if let Some(parts) = json["candidates"][0]["content"]["parts"].as_array() {
                    for part in parts {
                        if let Some(text) = part["text"].as_str() {
                            if !text.is_empty() {
                                chunks.push(text.to_string());
                            }
                        }
                    }
                }
                if let Some(reason) = json["candidates"][0]["finishReason"].as_str() {
                    reasons.push(reason.to_string());
                    if gemini_reason_is_stop(reason)? {
                        self.record_info(&reasons);
                        return Ok(chunks);
                    }
                    // UNSPECIFIED: the stream continues
                }
            }
        }

        self.record_info(&reasons);
        Ok(chunks)
    }

    fn last_info(&self) -> Option<String> {
        self.last_info.lock().ok().and_then(|g| g.clone())
    }
}

/// Classify a Gemini finish reason: `Ok(true)` for STOP, `Ok(false)` for
/// the non-terminal UNSPECIFIED family, `Err` for every other terminal
/// reason (SAFETY, MAX_TOKENS, RECITATION, ...)
pub fn gemini_reason_is_stop(reason: &str) -> Result<bool, GatewayError> {
    match reason {
        "STOP" => Ok(true),
        "FINISH_REASON_UNSPECIFIED" | "UNSPECIFIED" => Ok(false),
        other => Err(GatewayError::FinishReason(other.to_string())),
    }
}
