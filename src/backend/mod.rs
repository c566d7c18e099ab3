//! Model endpoints behind a single capability.
//!
//! The engine only ever sees [`InferenceBackend`]. Each provider lives in its
//! own module and [`Provider`] picks one at startup.

pub mod anthropic;
pub mod error;
pub mod ollama;
pub mod openai;
pub mod server;

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};

pub use anthropic::AnthropicClient;
pub use error::BackendError;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use server::{LlamaCppClient, TgiClient};

/// One prompt to send, correlated by the work-item id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub id: usize,
    pub prompt: String,
    pub model: String,
    pub max_output_tokens: u32,
}

/// Maps a prompt to generated text.
///
/// Implementations classify their own failures into [`BackendError`]; they
/// must not panic on bad responses, though the dispatcher survives it if they do.
pub trait InferenceBackend: Send + Sync + 'static {
    fn invoke(
        &self,
        request: InferenceRequest,
    ) -> impl Future<Output = std::result::Result<String, BackendError>> + Send;
}

/// Which provider a run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Ollama,
    Tgi,
    LlamaCpp,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Ollama => write!(f, "ollama"),
            ProviderKind::Tgi => write!(f, "tgi"),
            ProviderKind::LlamaCpp => write!(f, "llamacpp"),
        }
    }
}

/// A configured backend of any supported kind.
pub enum Provider {
    Anthropic(AnthropicClient),
    OpenAi(OpenAiClient),
    Ollama(OllamaClient),
    Tgi(TgiClient),
    LlamaCpp(LlamaCppClient),
}

impl Provider {
    pub fn from_config(kind: ProviderKind, config: &HarnessConfig) -> Result<Self> {
        let provider = match kind {
            ProviderKind::Anthropic => {
                if config.anthropic_api_key.is_empty() {
                    return Err(HarnessError::Config(
                        "ANTHROPIC_API_KEY is not set".to_string(),
                    ));
                }
                Provider::Anthropic(AnthropicClient::new(config.anthropic_api_key.clone())?)
            }
            ProviderKind::OpenAi => {
                let client = match &config.openai_api_base {
                    Some(base) => OpenAiClient::with_base_url(
                        config.openai_api_key.clone(),
                        base.clone(),
                    )?,
                    None => OpenAiClient::new(config.openai_api_key.clone())?,
                };
                Provider::OpenAi(client)
            }
            ProviderKind::Ollama => Provider::Ollama(OllamaClient::new(config.ollama_host.clone())?),
            ProviderKind::Tgi => Provider::Tgi(TgiClient::new(config.server_url.clone())?),
            ProviderKind::LlamaCpp => {
                Provider::LlamaCpp(LlamaCppClient::new(config.server_url.clone())?)
            }
        };
        Ok(provider)
    }
}

impl InferenceBackend for Provider {
    async fn invoke(
        &self,
        request: InferenceRequest,
    ) -> std::result::Result<String, BackendError> {
        match self {
            Provider::Anthropic(c) => c.invoke(request).await,
            Provider::OpenAi(c) => c.invoke(request).await,
            Provider::Ollama(c) => c.invoke(request).await,
            Provider::Tgi(c) => c.invoke(request).await,
            Provider::LlamaCpp(c) => c.invoke(request).await,
        }
    }
}

/// HTTP client shared by every provider.
///
/// The client-side timeout sits above the dispatcher's per-item deadline so the
/// dispatcher is the one that normally reports slow items.
pub(crate) fn http_client() -> std::result::Result<Client, BackendError> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(600))
        .build()?;
    Ok(client)
}

/// Turns 429 and other non-2xx responses into errors.
pub(crate) async fn check_status(
    response: Response,
) -> std::result::Result<Response, BackendError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(1000);
        return Err(BackendError::RateLimited { retry_after_ms });
    }

    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(BackendError::ApiError {
            status: status.as_u16(),
            message,
        });
    }

    Ok(response)
}

/// Rejects blank generations.
pub(crate) fn non_empty(text: Option<String>) -> std::result::Result<String, BackendError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(BackendError::NoContent),
    }
}
