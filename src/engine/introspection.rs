// Introspection commands
// Status, identity-test and reload commands for operators

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::engine::identity::{decode_user, encode_user, extract_tenant_id, validate_tenant_id};
use crate::engine::multiplexer::TenantMultiplexer;
use crate::models::TenantStatus;
use crate::settings::MultiplexerSettings;
use crate::{Result, TenantMuxError};

/// Snapshot of the multiplexer for the `status` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub attached: bool,
    pub virtualize_channels: bool,
    pub tenants: Vec<TenantStatus>,
}

impl StatusReport {
    pub fn collect(multiplexer: &TenantMultiplexer) -> Self {
        Self {
            attached: multiplexer.is_attached(),
            virtualize_channels: multiplexer.virtualize_channels(),
            tenants: multiplexer.registry().statuses(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "{} {}, channel virtualization {}\n",
            "Interception:".bold(),
            if self.attached { "attached".green() } else { "inactive".red() },
            if self.virtualize_channels { "on" } else { "off" },
        );
        if self.tenants.is_empty() {
            out.push_str("No tenants configured\n");
            return out;
        }
        for status in &self.tenants {
            let state = if status.initialized {
                "initialized".green()
            } else {
                "not initialized".yellow()
            };
            out.push_str(&format!(
                "  {} [{}] {}",
                status.tenant_id.cyan(),
                status.platform,
                state
            ));
            if let Some(error) = &status.error {
                out.push_str(&format!(" ({})", error.red()));
            }
            out.push('\n');
        }
        out
    }
}

/// Result of the `test` command: how a real identity looks for a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProbe {
    pub tenant_id: String,
    pub real_user_id: String,
    pub virtual_user_id: String,
    pub decoded_user_id: String,
    pub extracted_tenant_id: String,
}

impl IdentityProbe {
    pub fn run(tenant_id: &str, real_user_id: &str) -> Result<Self> {
        validate_tenant_id(tenant_id)?;
        if real_user_id.is_empty() {
            return Err(TenantMuxError::InvalidInput("real user id is empty".to_string()));
        }
        let virtual_user_id = encode_user(tenant_id, real_user_id);
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            real_user_id: real_user_id.to_string(),
            decoded_user_id: decode_user(&virtual_user_id),
            extracted_tenant_id: extract_tenant_id(&virtual_user_id),
            virtual_user_id,
        })
    }

    pub fn round_trips(&self) -> bool {
        self.decoded_user_id == self.real_user_id && self.extracted_tenant_id == self.tenant_id
    }

    pub fn render(&self) -> String {
        format!(
            "{} {}\n{} {}\n{} {} ({})\n",
            "Virtual:".bold(),
            self.virtual_user_id,
            "Decoded:".bold(),
            self.decoded_user_id,
            "Tenant:".bold(),
            self.extracted_tenant_id,
            if self.round_trips() { "round trip ok".green() } else { "round trip FAILED".red() }
        )
    }
}

/// Operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Test { tenant_id: String, real_user_id: String },
    Reload,
}

impl FromStr for Command {
    type Err = TenantMuxError;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next(), words.next()) {
            (Some("status"), None, None, None) => Ok(Command::Status),
            (Some("reload"), None, None, None) => Ok(Command::Reload),
            (Some("test"), Some(tenant_id), Some(real_user_id), None) => Ok(Command::Test {
                tenant_id: tenant_id.to_string(),
                real_user_id: real_user_id.to_string(),
            }),
            (Some("test"), _, _, _) => Err(TenantMuxError::InvalidInput(
                "usage: test <tenantId> <realUserId>".to_string(),
            )),
            _ => Err(TenantMuxError::InvalidInput(format!(
                "unknown command '{}', expected status, test or reload",
                line.trim()
            ))),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Status => write!(f, "status"),
            Command::Test {
                tenant_id,
                real_user_id,
            } => write!(f, "test {} {}", tenant_id, real_user_id),
            Command::Reload => write!(f, "reload"),
        }
    }
}

/// Run a command and render its textual reply
///
/// `test` only accepts configured tenants. `reload` re-reads settings from
/// `settings_path` and the environment.
pub fn execute(
    multiplexer: &TenantMultiplexer,
    command: &Command,
    settings_path: Option<&Path>,
) -> Result<String> {
    info!(command = %command, "Introspection command");
    match command {
        Command::Status => Ok(StatusReport::collect(multiplexer).render()),
        Command::Test {
            tenant_id,
            real_user_id,
        } => {
            if multiplexer.registry().lookup_by_id(tenant_id).is_none() {
                return Err(TenantMuxError::TenantNotFound(tenant_id.clone()));
            }
            Ok(IdentityProbe::run(tenant_id, real_user_id)?.render())
        }
        Command::Reload => {
            let settings = MultiplexerSettings::load(settings_path)?;
            let changed = multiplexer.reload(settings);
            Ok(format!(
                "Reloaded {} tenant(s), {} changed\n",
                multiplexer.registry().list_configured().len(),
                changed.len()
            ))
        }
    }
}
