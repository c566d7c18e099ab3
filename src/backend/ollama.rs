use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{BackendError, InferenceBackend, InferenceRequest, check_status, http_client};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for a local or remote Ollama daemon (`/api/chat`).
pub struct OllamaClient {
    client: Client,
    host: String,
}

impl OllamaClient {
    pub fn new(host: String) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client()?,
            host: host.trim_end_matches('/').to_string(),
        })
    }
}

impl InferenceBackend for OllamaClient {
    async fn invoke(&self, request: InferenceRequest) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &request.model,
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
            stream: false,
            options: Options {
                temperature: 0.0,
                num_predict: request.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&body)
            .send()
            .await?;
        let parsed = check_status(response).await?.json::<ChatResponse>().await?;

        match parsed.message.and_then(|m| m.content) {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => {
                warn!(id = request.id, model = %request.model, "empty content from ollama");
                Err(BackendError::NoContent)
            }
        }
    }
}
