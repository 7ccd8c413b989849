// Tenant Mux - Rust Edition
// Runs many independently configured agents on one shared conversational service

//! # Tenant Mux Library
//!
//! A conversational service built for a single agent holds one configuration,
//! one set of model clients and one persisted user table. This crate makes
//! that single instance serve many tenants without modifying it:
//!
//! - user (and optionally channel) identities are virtualized per tenant, so
//!   persisted per-user state never collides across tenants
//! - the tenant of the event being handled is carried in a task-local scope
//!   through every await point
//! - configuration reads and model client lookups resolve per tenant through
//!   replaceable accessors
//! - the service's entry methods are wrapped to open that scope, and can be
//!   unwrapped again on shutdown
//!
//! ## Usage Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenant_mux::{MultiplexerSettings, OpenAIClientFactory, TenantMultiplexer};
//!
//! # fn main() -> tenant_mux::Result<()> {
//! let settings = MultiplexerSettings::load(None)?;
//! let mux = TenantMultiplexer::new(settings, Arc::new(OpenAIClientFactory::default()));
//! // mux.attach_when_ready(&locator, None).await;
//! // mux.dispatch("handle_message", event).await?;
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

/// Domain models: tenant records, events and the shared configuration
pub mod models;

/// Identity virtualization, tenant scope and interception
pub mod engine;

/// Model clients built per tenant
pub mod llm;

/// Settings loading
pub mod settings;

pub use engine::{
    current_tenant, run_with_tenant, ClientCache, ConfigSlot, InterceptedConfig,
    MethodInterceptor, ServiceInstance, TenantMultiplexer, TenantRegistry, VirtualizedEvent,
};
pub use llm::{ClientBundle, ClientFactory, LLMError, ModelClient, OpenAIClientFactory};
pub use models::{
    CallArg, ConfigProperty, InboundEvent, ServiceConfig, SessionView, TenantRecord, TenantStatus,
};
pub use settings::MultiplexerSettings;

/// Errors raised by the multiplexer
#[derive(Error, Debug)]
pub enum TenantMuxError {
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Already attached: {0}")]
    AlreadyAttached(String),

    #[error("Not attached: {0}")]
    NotAttached(String),

    /// The shared service instance does not exist (yet)
    #[error("Shared service unavailable")]
    ServiceUnavailable,

    /// Schema change collided with existing columns
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Model client error: {0}")]
    Client(#[from] LLMError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for TenantMuxError {
    fn from(err: std::io::Error) -> Self {
        TenantMuxError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TenantMuxError>;
