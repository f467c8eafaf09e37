//! Upstream call contract and the OpenAI-compatible HTTP implementation.

use futures::StreamExt as _;
use tracing::debug;

use crate::config::OpenAiClientConfig;
use crate::errors::{RelayError, UpstreamError};
use crate::model::ChatRequest;
use crate::scope::UpstreamScope;
use crate::upstream::{ByteStream, ChunkReceiver, spawn_chunk_pump};

/// Opens a streamed completion.
///
/// Implementations return a queue that is closed once the upstream source is
/// exhausted, on the first decode error, or when the scope's deadline
/// expires.
#[async_trait::async_trait]
pub trait ChatUpstream: Send + Sync {
    async fn open_stream(
        &self,
        request: ChatRequest,
        scope: UpstreamScope,
        capacity: usize,
    ) -> Result<ChunkReceiver, RelayError>;
}

/// Client for `POST {base_url}/chat/completions` with `stream: true`.
pub struct OpenAiUpstream {
    client: reqwest::Client,
    config: OpenAiClientConfig,
}

impl OpenAiUpstream {
    pub fn new(config: OpenAiClientConfig) -> Result<Self, RelayError> {
        if config.api_key.trim().is_empty() {
            return Err(RelayError::Config(
                "upstream client config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build upstream client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a client using `CHAT_RELAY_API_KEY`.
    pub fn from_env() -> Result<Self, RelayError> {
        Self::new(OpenAiClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl ChatUpstream for OpenAiUpstream {
    async fn open_stream(
        &self,
        request: ChatRequest,
        scope: UpstreamScope,
        capacity: usize,
    ) -> Result<ChunkReceiver, RelayError> {
        debug!(model = %request.model, messages = request.messages.len(), "opening upstream stream");
        let mut http_req = self
            .client
            .post(self.config.chat_completions_url())
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request);
        if let Some(remaining) = scope.remaining() {
            if remaining.is_zero() {
                return Err(RelayError::DeadlineExceeded);
            }
            http_req = http_req.timeout(remaining);
        }

        let response = http_req.send().await.map_err(|e| {
            if e.is_timeout() {
                RelayError::DeadlineExceeded
            } else {
                RelayError::Transport(format!("upstream request failed: {e}"))
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(match serde_json::from_str::<UpstreamError>(&body) {
                Ok(envelope) => RelayError::Upstream(envelope),
                Err(_) => RelayError::Status {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream().map(|read| {
            read.map_err(|e| RelayError::Transport(format!("upstream streaming read failed: {e}")))
        }));
        Ok(spawn_chunk_pump(bytes_stream, scope.deadline(), capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;
    use crate::upstream::UpstreamItem;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = concat!(
        r#"data: {"id":"c1","created":1,"model":"deepseek-reasoner","choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#,
        "\n\n",
        ": keep-alive\n\n",
        r#"data: {"id":"c1","created":1,"model":"deepseek-reasoner","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
        "\n\n",
        "data: [DONE]\n\n",
    );

    fn request() -> ChatRequest {
        ChatRequest::streaming("deepseek-reasoner", vec![Message::user("hello")])
    }

    fn upstream(server: &MockServer) -> OpenAiUpstream {
        OpenAiUpstream::new(OpenAiClientConfig::new("secret").base_url(server.uri()))
            .expect("client")
    }

    #[tokio::test]
    async fn streams_chunks_from_event_stream_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(BODY, "text/event-stream"))
            .mount(&server)
            .await;

        let mut rx = upstream(&server)
            .open_stream(request(), UpstreamScope::default(), 8)
            .await
            .expect("open");
        let mut chunks = Vec::new();
        while let Some(item) = rx.recv().await {
            match item.expect("item") {
                UpstreamItem::Chunk(chunk) => chunks.push(chunk),
                UpstreamItem::Error(err) => panic!("unexpected upstream error {err}"),
            }
        }
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].usage.is_some());
    }

    #[tokio::test]
    async fn error_status_with_envelope_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": {"message": "Insufficient Balance", "type": "unknown_error", "param": null, "code": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let err = upstream(&server)
            .open_stream(request(), UpstreamScope::default(), 8)
            .await
            .expect_err("402");
        assert!(matches!(err, RelayError::Upstream(e) if e.message() == "Insufficient Balance"));
    }

    #[tokio::test]
    async fn error_status_without_envelope_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = upstream(&server)
            .open_stream(request(), UpstreamScope::default(), 8)
            .await
            .expect_err("503");
        assert_eq!(
            err,
            RelayError::Status {
                status: 503,
                body: "overloaded".into()
            }
        );
    }

    #[test]
    fn blank_api_key_is_rejected() {
        assert!(matches!(
            OpenAiUpstream::new(OpenAiClientConfig::new("  ")),
            Err(RelayError::Config(_))
        ));
    }
}
