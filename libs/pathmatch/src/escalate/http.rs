//! An OpenAI-compatible chat completions transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{DisambiguationRequest, DisambiguationTransport, TransportError};

/// Connection settings for an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// The base URL; requests go to `{api_url}/chat/completions`.
    pub api_url: String,
    /// The bearer token, if the endpoint needs one.
    pub api_key: Option<String>,
}

/// A transport posting requests to a chat completions endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [Message<'a>; 2],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpTransport {
    /// Creates a transport with a default HTTP client.
    pub fn new(config: TransportConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Creates a transport using the given HTTP client.
    pub fn with_client(client: reqwest::Client, config: TransportConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        )
    }
}

fn send_error(err: reqwest::Error) -> TransportError {
    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
    TransportError {
        retryable,
        message: format!("request failed: {err}"),
    }
}

#[async_trait]
impl DisambiguationTransport for HttpTransport {
    async fn submit(&self, request: &DisambiguationRequest) -> Result<String, TransportError> {
        let user = request.user_prompt();
        let body = ChatRequest {
            model: &request.model,
            temperature: 0.0,
            messages: [
                Message {
                    role: "system",
                    content: request.system_prompt(),
                },
                Message {
                    role: "user",
                    content: &user,
                },
            ],
        };

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("endpoint returned {status}: {text}");
            return Err(TransportError {
                retryable: status.is_server_error() || status.as_u16() == 429,
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TransportError::fatal(format!("failed to parse response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TransportError::fatal("empty response from endpoint"))
    }
}
