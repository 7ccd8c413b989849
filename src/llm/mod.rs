//! Model clients
//!
//! The shared service talks to language models through [`ModelClient`]s. A
//! [`ClientFactory`] builds the reasoning and low-cost clients from a
//! configuration; the multiplexer hands it tenant-merged configurations so
//! each tenant gets clients pointed at its own model, endpoint and
//! credentials.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::ServiceConfig;

pub use openai::{OpenAIClientFactory, OpenAICompatibleClient};

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Model client errors
#[derive(Error, Debug)]
pub enum LLMError {
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No credentials configured for {0}")]
    NoCredentials(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LLMError {
    /// Errors worth retrying with the next credential
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            LLMError::AuthenticationFailed(_) | LLMError::RateLimitExceeded(_)
        )
    }
}

pub type LLMResult<T> = std::result::Result<T, LLMError>;

/// A client for one configured model
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model name requests are sent for
    fn model(&self) -> &str;

    /// Endpoint requests are sent to
    fn endpoint(&self) -> &str;

    /// Run a chat completion and return the assistant text
    async fn chat(&self, messages: &[ChatMessage]) -> LLMResult<String>;
}

/// The clients the shared service needs, built from one configuration
#[derive(Clone)]
pub struct ClientBundle {
    pub reasoning: Arc<dyn ModelClient>,
    pub low_cost: Arc<dyn ModelClient>,
}

impl fmt::Debug for ClientBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBundle")
            .field("reasoning", &self.reasoning.model())
            .field("low_cost", &self.low_cost.model())
            .finish()
    }
}

/// Builds client bundles from a configuration
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create_clients(&self, config: &ServiceConfig) -> LLMResult<ClientBundle>;
}
