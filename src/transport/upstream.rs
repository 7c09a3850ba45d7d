use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::config::{MaxTokensConfig, ServerConfig, UpstreamConfig};
use crate::error::TutorError;
use crate::tutor::ChatMessage;

/// Raw SSE bytes of an open streaming completion.
pub type UpstreamByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TutorError>> + Send>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ERROR_BODY_CHARS: usize = 512;

fn encode_body(body: &Value) -> Result<Vec<u8>, TutorError> {
    serde_json::to_vec(body)
        .map_err(|e| TutorError::Internal(format!("failed to encode upstream request: {e}")))
}

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, TutorError> {
    // no overall timeout: it would also cut off long answer streams
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| TutorError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| TutorError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Body of a streaming chat-completions request.
#[must_use]
pub fn chat_stream_body(
    model: &str,
    max_tokens: u32,
    system: &str,
    history: &[ChatMessage],
    question: &str,
) -> Value {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(json!({ "role": "system", "content": system }));
    messages.extend(
        history
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content })),
    );
    messages.push(json!({ "role": "user", "content": question }));
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": messages,
        "stream": true,
    })
}

/// Body of a non-streaming messages request.
#[must_use]
pub fn messages_body(model: &str, max_tokens: u32, system: &str, messages: Vec<Value>) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "system": system,
        "messages": messages,
    })
}

/// Concatenate the text blocks of a messages response.
fn response_text(body: &Value) -> Option<String> {
    let blocks = body.get("content")?.as_array()?;
    let text: String = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

async fn upstream_error(response: reqwest::Response) -> TutorError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TutorError::Upstream {
        status,
        message: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
    }
}

/// Client for the text-generation API.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    anthropic_version: String,
    max_tokens: MaxTokensConfig,
    request_timeout: Duration,
}

impl UpstreamClient {
    /// # Errors
    ///
    /// Returns [`TutorError`] when the proxy URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(server: &ServerConfig, upstream: &UpstreamConfig) -> Result<Self, TutorError> {
        let pool_idle_timeout = if server.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(server.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            server.http_use_env_proxy,
            upstream.proxy.as_deref(),
        )?;
        Ok(Self {
            client,
            base_url: upstream.base_url.trim_end_matches('/').to_string(),
            api_key: upstream.api_key.clone(),
            model: upstream.model.clone(),
            anthropic_version: upstream.anthropic_version.clone(),
            max_tokens: upstream.max_tokens.clone(),
            request_timeout: Duration::from_secs(server.timeout),
        })
    }

    #[must_use]
    pub fn max_tokens(&self) -> &MaxTokensConfig {
        &self.max_tokens
    }

    #[must_use]
    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    #[must_use]
    pub fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    /// Start a streaming completion and return its body as a byte stream.
    ///
    /// Only opening the request is bounded by the request timeout; the stream
    /// itself is bounded by the relay's idle timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError`] when the request cannot be sent, times out, or
    /// the upstream answers with a non-success status.
    pub async fn open_chat_stream(
        &self,
        system: &str,
        history: &[ChatMessage],
        question: &str,
    ) -> Result<UpstreamByteStream, TutorError> {
        let body = chat_stream_body(
            &self.model,
            self.max_tokens.general,
            system,
            history,
            question,
        );
        let send = self
            .client
            .post(self.chat_completions_url())
            .bearer_auth(&self.api_key)
            .header(http::header::ACCEPT, "text/event-stream")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(encode_body(&body)?)
            .send();
        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| {
                TutorError::Timeout(format!(
                    "stream did not open within {}s",
                    self.request_timeout.as_secs()
                ))
            })??;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }
        tracing::debug!(status = response.status().as_u16(), "upstream stream opened");

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TutorError::from)),
        ))
    }

    /// Run a non-streaming completion and return the reply text.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError`] on transport failure, timeout, a non-success
    /// status, or a response without text content.
    pub async fn complete(
        &self,
        system: &str,
        messages: Vec<Value>,
        max_tokens: u32,
    ) -> Result<String, TutorError> {
        let body = messages_body(&self.model, max_tokens, system, messages);
        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.anthropic_version)
            .header(http::header::CONTENT_TYPE, "application/json")
            .timeout(self.request_timeout)
            .body(encode_body(&body)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }
        let bytes = response.bytes().await?;
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| TutorError::Decode(format!("invalid messages response: {e}")))?;
        response_text(&body)
            .ok_or_else(|| TutorError::Decode("response has no text content".to_string()))
    }
}
