// Tenant domain types
// Configured tenants, their overrides and the runtime status kept for introspection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between platform and self identity inside a tenant id
pub const ORIGIN_SEPARATOR: char = ':';

/// Build the tenant id for an origin (`platform:selfIdentity`)
pub fn tenant_id_for_origin(platform: &str, self_id: &str) -> String {
    format!("{}{}{}", platform, ORIGIN_SEPARATOR, self_id)
}

/// Model routing override for one model slot (reasoning or low-cost)
///
/// Every field is optional: an absent field never masks the shared value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOverride {
    /// Model name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Endpoint base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Ordered credential list, tried front to back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Vec<String>>,
}

impl ModelOverride {
    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.endpoint.is_none() && self.credentials.is_none()
    }
}

/// Affinity threshold configuration: four ascending break points, five text bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityConfig {
    /// Whether the tenant's affinity values replace the shared ones
    #[serde(default)]
    pub enabled: bool,

    /// Break points, ascending
    pub thresholds: [f64; 4],

    /// Text fragment for each band delimited by the break points
    pub texts: [String; 5],
}

/// Mood threshold configuration: two break points, three text bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodConfig {
    /// Whether the tenant's mood values replace the shared ones
    #[serde(default)]
    pub enabled: bool,

    /// Break points, ascending
    pub thresholds: [f64; 2],

    /// Text fragment for each band
    pub texts: [String; 3],
}

/// Configuration for one virtual agent sharing the underlying service
///
/// Records are immutable snapshots: a reload replaces the record for a
/// tenant id instead of mutating it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Primary key, `platform:selfIdentity`
    pub tenant_id: String,

    /// Persona text replacing the shared persona
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,

    /// Reasoning model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelOverride>,

    /// Whether the low-cost model override applies
    #[serde(default)]
    pub low_cost_enabled: bool,

    /// Low-cost model override (ignored unless `low_cost_enabled`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_cost_model: Option<ModelOverride>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<AffinityConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<MoodConfig>,
}

impl TenantRecord {
    /// Create a bare record with no overrides
    pub fn new<S: Into<String>>(tenant_id: S) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            persona: None,
            model: None,
            low_cost_enabled: false,
            low_cost_model: None,
            affinity: None,
            mood: None,
        }
    }

    pub fn with_persona<S: Into<String>>(mut self, persona: S) -> Self {
        self.persona = Some(persona.into());
        self
    }

    pub fn with_model(mut self, model: ModelOverride) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_low_cost_model(mut self, model: ModelOverride) -> Self {
        self.low_cost_enabled = true;
        self.low_cost_model = Some(model);
        self
    }

    /// Platform part of the tenant id
    pub fn platform(&self) -> &str {
        self.tenant_id
            .split_once(ORIGIN_SEPARATOR)
            .map(|(platform, _)| platform)
            .unwrap_or(&self.tenant_id)
    }

    /// Reasoning override, if any field is present
    pub fn reasoning_override(&self) -> Option<&ModelOverride> {
        self.model.as_ref().filter(|m| !m.is_empty())
    }

    /// Low-cost override, only when the tenant enabled it
    pub fn low_cost_override(&self) -> Option<&ModelOverride> {
        if !self.low_cost_enabled {
            return None;
        }
        self.low_cost_model.as_ref().filter(|m| !m.is_empty())
    }

    /// Affinity configuration, only when enabled
    pub fn active_affinity(&self) -> Option<&AffinityConfig> {
        self.affinity.as_ref().filter(|a| a.enabled)
    }

    /// Mood configuration, only when enabled
    pub fn active_mood(&self) -> Option<&MoodConfig> {
        self.mood.as_ref().filter(|m| m.enabled)
    }

    /// True when the tenant changes which model client it needs
    pub fn has_client_overrides(&self) -> bool {
        self.reasoning_override().is_some() || self.low_cost_override().is_some()
    }
}

/// Runtime status of a tenant, used only for introspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantStatus {
    pub tenant_id: String,
    pub platform: String,
    pub initialized: bool,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TenantStatus {
    pub fn new(tenant_id: &str) -> Self {
        let platform = tenant_id
            .split_once(ORIGIN_SEPARATOR)
            .map(|(platform, _)| platform.to_string())
            .unwrap_or_default();
        Self {
            tenant_id: tenant_id.to_string(),
            platform,
            initialized: false,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Merge a partial update into this status
    pub fn apply(&mut self, update: TenantStatusUpdate) {
        if let Some(platform) = update.platform {
            self.platform = platform;
        }
        if let Some(initialized) = update.initialized {
            self.initialized = initialized;
        }
        if let Some(error) = update.error {
            self.error = error;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial status update; `None` leaves the field untouched
///
/// `error: Some(None)` clears a previously recorded error.
#[derive(Debug, Clone, Default)]
pub struct TenantStatusUpdate {
    pub platform: Option<String>,
    pub initialized: Option<bool>,
    pub error: Option<Option<String>>,
}

impl TenantStatusUpdate {
    pub fn initialized() -> Self {
        Self {
            initialized: Some(true),
            error: Some(None),
            ..Default::default()
        }
    }

    pub fn failed<S: Into<String>>(error: S) -> Self {
        Self {
            initialized: Some(false),
            error: Some(Some(error.into())),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_is_prefix_of_tenant_id() {
        let record = TenantRecord::new("discord:bot1");
        assert_eq!(record.platform(), "discord");
        assert_eq!(tenant_id_for_origin("discord", "bot1"), "discord:bot1");
    }

    #[test]
    fn test_low_cost_override_requires_flag() {
        let mut record = TenantRecord::new("qq:1").with_low_cost_model(ModelOverride {
            model: Some("cheap".to_string()),
            ..Default::default()
        });
        assert!(record.low_cost_override().is_some());

        record.low_cost_enabled = false;
        assert!(record.low_cost_override().is_none());
        assert!(!record.has_client_overrides());
    }

    #[test]
    fn test_status_merge_keeps_untouched_fields() {
        let mut status = TenantStatus::new("qq:1");
        assert_eq!(status.platform, "qq");

        status.apply(TenantStatusUpdate::failed("boom"));
        assert_eq!(status.error.as_deref(), Some("boom"));

        status.apply(TenantStatusUpdate {
            platform: Some("onebot".to_string()),
            ..Default::default()
        });
        assert_eq!(status.platform, "onebot");
        assert_eq!(status.error.as_deref(), Some("boom"));

        status.apply(TenantStatusUpdate::initialized());
        assert!(status.initialized);
        assert!(status.error.is_none());
    }
}
