use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PromptPayload, Transport, TransportError};
use crate::config::BackendConfig;
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BODY_EXCERPT_CHARS: usize = 500;

/// [`Transport`] for OpenAI-compatible chat-completions endpoints.
///
/// Per-call timeouts are enforced by the
/// [`GenerationClient`](super::GenerationClient); this transport only bounds
/// connection setup.
pub struct HttpTransport {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl HttpTransport {
    /// Build a transport from backend settings.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("quire/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn complete(&self, payload: &PromptPayload) -> std::result::Result<String, TransportError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &payload.system,
                },
                ChatMessage {
                    role: "user",
                    content: &payload.user,
                },
            ],
            temperature: payload.params.temperature,
            max_tokens: payload.params.max_output_tokens,
            response_format: payload.params.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %self.api_url, "backend responded");

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                code: status.as_u16(),
                body: text.chars().take(MAX_BODY_EXCERPT_CHARS).collect(),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Malformed(e.to_string())
            }
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| TransportError::Malformed("response contained no message content".into()))
    }
}

fn map_send_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::client::GenerationParams;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer, api_key: Option<&str>) -> HttpTransport {
        let config = BackendConfig {
            api_url: format!("{}/v1/chat/completions", server.uri()),
            api_key: api_key.map(str::to_string),
            model: "test-model".into(),
            ..BackendConfig::default()
        };
        HttpTransport::new(&config).unwrap()
    }

    fn payload(json_mode: bool) -> PromptPayload {
        PromptPayload::new(
            "system text",
            "user text",
            GenerationParams {
                temperature: 0.2,
                max_output_tokens: 128,
                json_mode,
            },
        )
    }

    #[tokio::test]
    async fn test_successful_completion() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "max_tokens": 128,
                "response_format": { "type": "json_object" },
                "messages": [
                    { "role": "system", "content": "system text" },
                    { "role": "user", "content": "user text" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"ok\":true}" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = transport(&server, Some("sk-test"))
            .complete(&payload(true))
            .await?;
        assert_eq!(text, "{\"ok\":true}");
        Ok(())
    }

    #[tokio::test]
    async fn test_plain_mode_omits_response_format() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "plain" } }]
            })))
            .mount(&server)
            .await;

        let text = transport(&server, None).complete(&payload(false)).await?;
        assert_eq!(text, "plain");

        let requests = server.received_requests().await.unwrap_or_default();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body)?;
        assert!(sent.get("response_format").is_none());
        assert!(requests[0].headers.get("authorization").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let transport = transport(&server, None);
        assert_eq!(
            transport.complete(&payload(true)).await,
            Err(TransportError::RateLimited)
        );
        assert_eq!(
            transport.complete(&payload(true)).await,
            Err(TransportError::Status {
                code: 500,
                body: "boom".into()
            })
        );
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let result = transport(&server, None).complete(&payload(true)).await;
        assert!(matches!(result, Err(TransportError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_error() {
        let config = BackendConfig {
            api_url: "http://127.0.0.1:9/v1/chat/completions".into(),
            ..BackendConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        let result = transport.complete(&payload(false)).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
