//! Single-model inference servers: Text Generation Inference and llama.cpp.
//!
//! Both load one model at startup, so the request's model id is ignored.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    BackendError, InferenceBackend, InferenceRequest, check_status, http_client, non_empty,
};

/// Stop sequences sent to llama.cpp so completions end at the answer.
const LLAMACPP_STOP: &[&str] = &["User:", "使用者:", "\n\n"];

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters,
}

#[derive(Debug, Serialize)]
struct GenerateParameters {
    max_new_tokens: u32,
    do_sample: bool,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    generated_text: Option<String>,
}

/// Hugging Face Text Generation Inference (`/generate`).
pub struct TgiClient {
    client: Client,
    base_url: String,
}

impl TgiClient {
    pub fn new(base_url: String) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl InferenceBackend for TgiClient {
    async fn invoke(&self, request: InferenceRequest) -> Result<String, BackendError> {
        let body = GenerateRequest {
            inputs: &request.prompt,
            parameters: GenerateParameters {
                max_new_tokens: request.max_output_tokens,
                do_sample: false,
                return_full_text: false,
            },
        };
        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await?;
        let parsed = check_status(response)
            .await?
            .json::<GenerateResponse>()
            .await?;
        non_empty(parsed.generated_text)
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    stop: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: Option<String>,
}

/// llama.cpp's bundled HTTP server (`/completion`).
pub struct LlamaCppClient {
    client: Client,
    base_url: String,
}

impl LlamaCppClient {
    pub fn new(base_url: String) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl InferenceBackend for LlamaCppClient {
    async fn invoke(&self, request: InferenceRequest) -> Result<String, BackendError> {
        let body = CompletionRequest {
            prompt: &request.prompt,
            n_predict: request.max_output_tokens,
            temperature: 0.0,
            top_p: 1.0,
            stop: LLAMACPP_STOP,
        };
        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .json(&body)
            .send()
            .await?;
        let parsed = check_status(response)
            .await?
            .json::<CompletionResponse>()
            .await?;
        non_empty(parsed.content.map(|c| c.trim().to_string()))
    }
}
