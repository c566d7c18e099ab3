use reqwest::Client;

use super::types::{Message, MessagesRequest, MessagesResponse};
use crate::backend::{
    BackendError, InferenceBackend, InferenceRequest, check_status, http_client, non_empty,
};

const API_URL: &str = "https://api.anthropic.com/v1/messages";

pub struct AnthropicClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Result<Self, BackendError> {
        Self::with_base_url(api_key, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, BackendError> {
        Ok(Self {
            api_key,
            client: http_client()?,
            base_url,
        })
    }

    pub async fn send_message(
        &self,
        req: &MessagesRequest,
    ) -> Result<MessagesResponse, BackendError> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await?;

        let body = check_status(response)
            .await?
            .json::<MessagesResponse>()
            .await?;
        Ok(body)
    }
}

impl InferenceBackend for AnthropicClient {
    async fn invoke(&self, request: InferenceRequest) -> Result<String, BackendError> {
        let req = MessagesRequest {
            model: request.model,
            max_tokens: request.max_output_tokens,
            temperature: 0.0,
            messages: vec![Message {
                role: "user".into(),
                content: request.prompt,
            }],
        };
        let response = self.send_message(&req).await?;
        non_empty(Some(response.text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Failure, FailureKind};
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(prompt: &str) -> InferenceRequest {
        InferenceRequest {
            id: 0,
            prompt: prompt.into(),
            model: "claude-sonnet-4-5-20250929".into(),
            max_output_tokens: 64,
        }
    }

    #[tokio::test]
    async fn invoke_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "content": [{"type": "text", "text": "The needle is blue."}],
                "model": "claude-sonnet-4-5-20250929",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 5}
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_base_url("sk-test".into(), server.uri()).unwrap();
        let text = client.invoke(request("Where is the needle?")).await.unwrap();
        assert_eq!(text, "The needle is blue.");
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_base_url("k".into(), server.uri()).unwrap();
        let err = client.invoke(request("hi")).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::RateLimited {
                retry_after_ms: 7000
            }
        ));
    }

    #[tokio::test]
    async fn http_error_is_request_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_base_url("bad".into(), server.uri()).unwrap();
        let failure = Failure::from(client.invoke(request("hi")).await.unwrap_err());
        assert_eq!(failure.kind, FailureKind::RequestError);
        assert!(failure.detail.contains("401"));
    }

    #[tokio::test]
    async fn empty_content_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_2",
                "content": [],
                "model": "m",
                "stop_reason": "max_tokens",
                "usage": {"input_tokens": 10, "output_tokens": 0}
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_base_url("k".into(), server.uri()).unwrap();
        let err = client.invoke(request("hi")).await.unwrap_err();
        assert!(matches!(err, BackendError::NoContent));
    }
}
