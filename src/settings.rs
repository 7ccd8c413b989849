// Multiplexer settings
// Loaded at startup and on every reload from a settings file layered under environment variables

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::engine::identity::validate_tenant_id;
use crate::models::TenantRecord;
use crate::{Result, TenantMuxError};

/// Environment variable prefix, e.g. `TENANT_MUX__VIRTUALIZE_CHANNELS=true`
pub const ENV_PREFIX: &str = "TENANT_MUX";

/// Everything the multiplexer consumes from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplexerSettings {
    /// Configured tenants, in order
    pub tenants: Vec<TenantRecord>,

    /// Whether channel identities are virtualized like user identities
    pub virtualize_channels: bool,

    /// Log every virtualization and query rewrite
    pub verbose: bool,

    /// Log every intercepted configuration read
    pub debug: bool,

    pub attach: AttachSettings,

    pub storage: StorageSettings,

    /// Entry methods of the shared service that open a tenant scope
    pub entry_methods: Vec<String>,
}

impl Default for MultiplexerSettings {
    fn default() -> Self {
        Self {
            tenants: Vec::new(),
            virtualize_channels: false,
            verbose: false,
            debug: false,
            attach: AttachSettings::default(),
            storage: StorageSettings::default(),
            entry_methods: vec![
                "handle_message".to_string(),
                "generate_reply".to_string(),
                "summarize".to_string(),
                "update_mood".to_string(),
            ],
        }
    }
}

/// How long to wait for the shared service to become available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachSettings {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for AttachSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval_ms: 1000,
        }
    }
}

/// The tenant-aware table and its identity columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub table: String,
    /// Column holding the (virtual) identity the shared service queries by
    pub identity_field: String,
    /// Added column holding the tenant id
    pub tenant_field: String,
    /// Added column holding the real identity
    pub real_identity_field: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            table: "conversation_user".to_string(),
            identity_field: "user_id".to_string(),
            tenant_field: "tenant_id".to_string(),
            real_identity_field: "real_user_id".to_string(),
        }
    }
}

impl MultiplexerSettings {
    /// Load settings from an optional file plus `TENANT_MUX__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!("Loading settings from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<MultiplexerSettings>())
            .map_err(|e| TenantMuxError::Configuration(e.to_string()))
    }

    /// Problems that make a tenant unusable; such tenants are skipped at runtime
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (index, tenant) in self.tenants.iter().enumerate() {
            if let Err(e) = validate_tenant_id(&tenant.tenant_id) {
                problems.push(format!("tenants[{}]: {}", index, e));
            }
            if let Some(affinity) = &tenant.affinity {
                if !affinity.thresholds.windows(2).all(|w| w[0] <= w[1]) {
                    problems.push(format!(
                        "tenants[{}]: affinity thresholds are not ascending",
                        index
                    ));
                }
            }
            if let Some(mood) = &tenant.mood {
                if mood.thresholds[0] > mood.thresholds[1] {
                    problems.push(format!("tenants[{}]: mood thresholds are not ascending", index));
                }
            }
        }
        if self.attach.max_attempts == 0 {
            problems.push("attach.max_attempts must be at least 1".to_string());
        }
        problems
    }
}
