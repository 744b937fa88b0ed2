use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::{Llm, LlmError};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Messages-API chat client used for plan generation.
#[derive(Clone)]
pub struct ChatClient {
    api_url: String,
    model: String,
    api_key: SecretString,
    api_version: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl Default for ChatClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatClient {
    pub fn new() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            model: DEFAULT_MODEL.into(),
            api_key: SecretString::from(std::env::var("LLM_API_KEY").unwrap_or_default()),
            api_version: DEFAULT_API_VERSION.into(),
            max_tokens: 2048,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_url<S: Into<String>>(mut self, api_url: S) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = SecretString::from(api_key.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Llm for ChatClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", self.api_version.clone())
            .header("content-type", "application/json; charset=utf-8")
            .json(&payload)
            .send()
            .await?;

        let response = match response.status().as_u16() {
            401 => {
                return Err(LlmError::AuthenticationError("invalid API key".into()))
            }
            403 => return Err(LlmError::PermissionError("permission denied".into())),
            429 => return Err(LlmError::RateLimitError("rate limit exceeded".into())),
            503 | 529 => return Err(LlmError::OverloadedError("service unavailable".into())),
            _ => response.json::<ApiResponse>().await?,
        };

        response
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| LlmError::MalformedResponse("empty completion".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_against_messages_api() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .with_status(200)
            .with_body(
                json!({
                    "content": [{"type": "text", "text": "{\"kind\": \"direct_answer\"}"}],
                    "usage": {"input_tokens": 10, "output_tokens": 5}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ChatClient::new()
            .with_api_url(format!("{}/v1/messages", server.url()))
            .with_api_key("test-key");
        let text = client.complete("you are a planner", "count CIs").await.unwrap();
        assert!(text.contains("direct_answer"));
    }

    #[tokio::test]
    async fn auth_failure_maps_to_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(401)
            .create_async()
            .await;

        let client = ChatClient::new()
            .with_api_url(format!("{}/v1/messages", server.url()))
            .with_api_key("bad-key");
        let result = client.complete("s", "u").await;
        assert!(matches!(result, Err(LlmError::AuthenticationError(_))));
    }
}
