//! OpenAI-compatible chat client
//! Talks to any endpoint implementing `POST {endpoint}/chat/completions`

use async_trait::async_trait;
use reqwest::{header::HeaderMap, header::HeaderValue, header::CONTENT_TYPE, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use super::{ChatMessage, ClientBundle, ClientFactory, LLMError, LLMResult, ModelClient};
use crate::models::ServiceConfig;

/// Endpoint used when the configuration leaves it empty
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

/// Client for one model on an OpenAI-compatible endpoint
///
/// Credentials are tried in order; authentication and rate-limit failures
/// move on to the next key.
pub struct OpenAICompatibleClient {
    client: Client,
    model: String,
    endpoint: String,
    completions_url: Url,
    api_keys: Vec<String>,
    timeout: Duration,
}

impl OpenAICompatibleClient {
    pub fn new(model: &str, endpoint: &str, api_keys: Vec<String>) -> LLMResult<Self> {
        let endpoint = if endpoint.trim().is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            endpoint.trim_end_matches('/').to_string()
        };
        let completions_url = Url::parse(&format!("{}/", endpoint))
            .and_then(|base| base.join("chat/completions"))
            .map_err(|e| LLMError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

        Ok(Self {
            client: Client::new(),
            model: model.to_string(),
            endpoint,
            completions_url,
            api_keys: api_keys.into_iter().filter(|k| !k.is_empty()).collect(),
            timeout: Duration::from_secs(60),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn completions_url(&self) -> &Url {
        &self.completions_url
    }

    pub fn credential_count(&self) -> usize {
        self.api_keys.len()
    }

    fn build_headers(&self, api_key: Option<&str>) -> LLMResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            headers.insert(
                "Authorization",
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| LLMError::Internal(format!("Invalid API key format: {}", e)))?,
            );
        }
        Ok(headers)
    }

    fn handle_error_response(status_code: u16, error_text: &str) -> LLMError {
        let message = serde_json::from_str::<OpenAIError>(error_text)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| error_text.to_string());
        match status_code {
            401 | 403 => LLMError::AuthenticationFailed(message),
            429 => LLMError::RateLimitExceeded(message),
            400 => LLMError::InvalidRequest(message),
            _ => LLMError::Internal(format!("HTTP {}: {}", status_code, message)),
        }
    }

    async fn send(&self, messages: &[ChatMessage], api_key: Option<&str>) -> LLMResult<String> {
        let request = OpenAIRequest {
            model: &self.model,
            messages,
            stream: false,
        };
        debug!("Chat request: URL={}, Model={}", self.completions_url, self.model);

        let response = self
            .client
            .post(self.completions_url.clone())
            .headers(self.build_headers(api_key)?)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Chat API error: {} - {}", status, error_text);
            return Err(Self::handle_error_response(status.as_u16(), &error_text));
        }

        let body: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Serialization(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LLMError::Serialization("response has no message content".to_string()))
    }
}

#[async_trait]
impl ModelClient for OpenAICompatibleClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chat(&self, messages: &[ChatMessage]) -> LLMResult<String> {
        if self.api_keys.is_empty() {
            return self.send(messages, None).await;
        }

        let mut last_error = None;
        for (index, key) in self.api_keys.iter().enumerate() {
            match self.send(messages, Some(key)).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_credential_failure() => {
                    warn!(model = %self.model, "Credential #{} rejected: {}", index + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| LLMError::NoCredentials(self.model.clone())))
    }
}

/// Builds OpenAI-compatible clients from a configuration
///
/// Empty low-cost fields fall back to the reasoning model's values.
#[derive(Debug, Clone)]
pub struct OpenAIClientFactory {
    timeout: Duration,
}

impl OpenAIClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for OpenAIClientFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl ClientFactory for OpenAIClientFactory {
    async fn create_clients(&self, config: &ServiceConfig) -> LLMResult<ClientBundle> {
        let reasoning =
            OpenAICompatibleClient::new(&config.model, &config.endpoint, config.api_keys.clone())?
                .with_timeout(self.timeout);

        let pick = |own: &str, fallback: &str| {
            if own.is_empty() {
                fallback.to_string()
            } else {
                own.to_string()
            }
        };
        let low_cost_keys = if config.low_cost_api_keys.is_empty() {
            config.api_keys.clone()
        } else {
            config.low_cost_api_keys.clone()
        };
        let low_cost = OpenAICompatibleClient::new(
            &pick(&config.low_cost_model, &config.model),
            &pick(&config.low_cost_endpoint, &config.endpoint),
            low_cost_keys,
        )?
        .with_timeout(self.timeout);

        Ok(ClientBundle {
            reasoning: Arc::new(reasoning),
            low_cost: Arc::new(low_cost),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn completion(text: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"content": text}}]})
    }

    #[test]
    fn test_completions_url_keeps_endpoint_path() {
        let client = OpenAICompatibleClient::new("m", "https://example.com/v1/", vec![]).unwrap();
        assert_eq!(
            client.completions_url().as_str(),
            "https://example.com/v1/chat/completions"
        );
        assert_eq!(client.endpoint(), "https://example.com/v1");

        let default = OpenAICompatibleClient::new("m", "", vec![]).unwrap();
        assert_eq!(default.endpoint(), DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        assert!(matches!(
            OpenAICompatibleClient::new("m", "not a url", vec![]),
            Err(LLMError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_error_mapping() {
        let body = r#"{"error": {"message": "bad key"}}"#;
        assert!(matches!(
            OpenAICompatibleClient::handle_error_response(401, body),
            LLMError::AuthenticationFailed(m) if m == "bad key"
        ));
        assert!(OpenAICompatibleClient::handle_error_response(429, "slow down").is_credential_failure());
        assert!(!OpenAICompatibleClient::handle_error_response(500, "oops").is_credential_failure());
    }

    #[tokio::test]
    async fn test_rejected_credential_moves_to_next_key() {
        let server = MockServer::start();
        let rejected = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer key-1");
            then.status(401).json_body(json!({"error": {"message": "bad key"}}));
        });
        let accepted = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer key-2");
            then.status(200).json_body(completion("hello from key 2"));
        });

        let client = OpenAICompatibleClient::new(
            "m",
            &format!("{}/v1", server.base_url()),
            vec!["key-1".to_string(), "key-2".to_string()],
        )
        .unwrap();
        let reply = client.chat(&[ChatMessage::user("hi")]).await.unwrap();

        assert_eq!(reply, "hello from key 2");
        rejected.assert_hits(1);
        accepted.assert_hits(1);
    }

    #[tokio::test]
    async fn test_server_error_does_not_rotate() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer key-1");
            then.status(500).body("upstream down");
        });
        let spare = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer key-2");
            then.status(200).json_body(completion("unused"));
        });

        let client = OpenAICompatibleClient::new(
            "m",
            &format!("{}/v1", server.base_url()),
            vec!["key-1".to_string(), "key-2".to_string()],
        )
        .unwrap();
        let result = client.chat(&[ChatMessage::user("hi")]).await;

        assert!(matches!(result, Err(LLMError::Internal(m)) if m.contains("500")));
        failing.assert_hits(1);
        spare.assert_hits(0);
    }

    #[tokio::test]
    async fn test_last_failure_returned_when_every_key_fails() {
        let server = MockServer::start();
        let throttled = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).json_body(json!({"error": {"message": "slow down"}}));
        });

        let client = OpenAICompatibleClient::new(
            "m",
            &format!("{}/v1", server.base_url()),
            vec!["key-1".to_string(), "key-2".to_string()],
        )
        .unwrap();
        let result = client.chat(&[ChatMessage::user("hi")]).await;

        assert!(matches!(result, Err(LLMError::RateLimitExceeded(m)) if m == "slow down"));
        throttled.assert_hits(2);
    }

    #[tokio::test]
    async fn test_factory_low_cost_falls_back_to_reasoning() {
        let config = ServiceConfig {
            model: "big".to_string(),
            endpoint: "https://example.com/v1".to_string(),
            api_keys: vec!["k1".to_string(), String::new()],
            low_cost_model: "small".to_string(),
            ..Default::default()
        };
        let bundle = OpenAIClientFactory::default().create_clients(&config).await.unwrap();
        assert_eq!(bundle.reasoning.model(), "big");
        assert_eq!(bundle.low_cost.model(), "small");
        assert_eq!(bundle.low_cost.endpoint(), "https://example.com/v1");
    }
}
