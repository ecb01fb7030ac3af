use async_trait::async_trait;
use relay_core::{ChatMessage, CompletionClient, SamplingParams};
use reqwest::{Client, Response};
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::sse::{SseEvent, parse_sse_line};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Client for Groq's OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct GroqProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GroqProvider {
    pub fn new(api_key: String) -> Self {
        info!("Creating GroqProvider");
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: &serde_json::Value) -> anyhow::Result<Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Groq API error ({status}): {body}");
        }
        Ok(response)
    }

    /// Single-shot request; the whole generation arrives in one body.
    async fn complete_once(&self, request: &serde_json::Value) -> anyhow::Result<String> {
        let response = self.send(request).await?.json::<serde_json::Value>().await?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid response format: missing content"))?
            .to_string();
        Ok(content)
    }

    /// Streamed request; deltas are accumulated until `[DONE]` or end of body.
    async fn complete_streamed(&self, request: &serde_json::Value) -> anyhow::Result<String> {
        let response = self.send(request).await?;

        let bytes = response.bytes_stream().map(|r| r.map_err(std::io::Error::other));
        let mut lines = std::pin::pin!(LinesStream::new(StreamReader::new(bytes).lines()));

        let mut text = String::new();
        while let Some(line) = lines.next().await {
            match parse_sse_line(&line?)? {
                SseEvent::Delta(delta) => text.push_str(&delta),
                SseEvent::Done => break,
                SseEvent::Skip => {}
            }
        }
        Ok(text)
    }
}

/// Request body for `/chat/completions`.
fn build_request(messages: &[ChatMessage], params: &SamplingParams) -> serde_json::Value {
    json!({
        "model": params.model,
        "messages": messages,
        "temperature": params.temperature,
        "top_p": params.top_p,
        "max_tokens": params.max_tokens,
        "stream": params.stream,
    })
}

#[async_trait]
impl CompletionClient for GroqProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> anyhow::Result<String> {
        let request = build_request(messages, params);

        debug!(
            "Sending {} messages to Groq API: model={}, stream={}",
            messages.len(),
            params.model,
            params.stream
        );

        let text = if params.stream {
            self.complete_streamed(&request).await?
        } else {
            self.complete_once(&request).await?
        };

        debug!("Received {} chars from Groq API", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_defaults() {
        let provider = GroqProvider::new("key".to_string());
        assert_eq!(provider.base_url(), DEFAULT_BASE_URL);

        let provider = provider.with_base_url("http://localhost:8080/v1/".to_string());
        assert_eq!(provider.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn request_carries_sampling_params() {
        let params = SamplingParams::default();
        let request = build_request(&[ChatMessage::user("hi")], &params);

        assert_eq!(request["model"], "llama-3.1-70b-versatile");
        assert_eq!(request["temperature"], 1.0);
        assert_eq!(request["top_p"], 1.0);
        assert_eq!(request["max_tokens"], 1024);
        assert_eq!(request["stream"], true);
        assert_eq!(request["messages"][0]["role"], "user");
        assert_eq!(request["messages"][0]["content"], "hi");
    }
}
