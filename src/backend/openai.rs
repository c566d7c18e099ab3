//! OpenAI-compatible chat completions.
//!
//! Also covers self-hosted servers that speak the same protocol (vLLM and
//! friends) through a custom base URL.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    BackendError, InferenceBackend, InferenceRequest, check_status, http_client, non_empty,
};

const API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_completion_tokens: u32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct OpenAiClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Result<Self, BackendError> {
        Self::with_base_url(api_key, API_BASE.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, BackendError> {
        Ok(Self {
            api_key,
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl InferenceBackend for OpenAiClient {
    async fn invoke(&self, request: InferenceRequest) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &request.model,
            temperature: 0.0,
            max_completion_tokens: request.max_output_tokens,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let parsed = check_status(response).await?.json::<ChatResponse>().await?;
        non_empty(
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content),
        )
    }
}
