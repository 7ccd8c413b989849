// Configuration interception
// Makes the shared service's single configuration resolve per tenant

//! # Configuration Interception Facade
//!
//! The shared service reads its configuration through a [`ConfigSlot`]. The
//! multiplexer swaps the accessor inside the slot for an
//! [`InterceptedConfig`], so every holder of the slot goes through
//! interception without knowing it.
//!
//! Resolution of an overridable property:
//!
//! 1. no tenant is current: the original value
//! 2. a tenant is current and has an override for the property: the override
//! 3. otherwise: the original value
//!
//! Low-cost model, affinity and mood overrides only count when the tenant
//! enabled them. Writes made by the shared service (replacing its whole
//! configuration) land on the original accessor and become the new baseline
//! for every tenant.

use serde_json::Value;
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, warn};

use crate::engine::client_cache::ClientCache;
use crate::engine::context::current_tenant;
use crate::engine::registry::TenantRegistry;
use crate::models::{ConfigProperty, ServiceConfig, TenantRecord};

/// How the shared service reads and replaces its configuration
pub trait ConfigAccess: Send + Sync {
    /// Read an overridable property
    fn property(&self, property: ConfigProperty) -> Value;

    /// Read any field by name
    fn get(&self, name: &str) -> Option<Value>;

    /// The whole configuration as the caller sees it
    fn snapshot(&self) -> ServiceConfig;

    /// Replace the whole configuration
    fn replace(&self, config: ServiceConfig);
}

/// The shared service's own, uninterpreted configuration
#[derive(Debug, Default)]
pub struct PlainConfig {
    config: RwLock<Arc<ServiceConfig>>,
}

impl PlainConfig {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
        }
    }

    fn current(&self) -> Arc<ServiceConfig> {
        self.config.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ConfigAccess for PlainConfig {
    fn property(&self, property: ConfigProperty) -> Value {
        self.current().property(property)
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.current().get(name)
    }

    fn snapshot(&self) -> ServiceConfig {
        self.current().as_ref().clone()
    }

    fn replace(&self, config: ServiceConfig) {
        *self.config.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(config);
    }
}

/// The replaceable configuration accessor held by the shared service
pub struct ConfigSlot {
    accessor: RwLock<Arc<dyn ConfigAccess>>,
}

impl ConfigSlot {
    pub fn new(accessor: Arc<dyn ConfigAccess>) -> Self {
        Self {
            accessor: RwLock::new(accessor),
        }
    }

    /// Slot over a plain configuration
    pub fn plain(config: ServiceConfig) -> Self {
        Self::new(Arc::new(PlainConfig::new(config)))
    }

    pub fn current(&self) -> Arc<dyn ConfigAccess> {
        self.accessor.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Install a new accessor, returning the previous one
    pub fn replace_accessor(&self, accessor: Arc<dyn ConfigAccess>) -> Arc<dyn ConfigAccess> {
        let mut guard = self.accessor.write().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *guard, accessor)
    }
}

impl ConfigAccess for ConfigSlot {
    fn property(&self, property: ConfigProperty) -> Value {
        self.current().property(property)
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.current().get(name)
    }

    fn snapshot(&self) -> ServiceConfig {
        self.current().snapshot()
    }

    fn replace(&self, config: ServiceConfig) {
        self.current().replace(config)
    }
}

/// Tenant-specific value for a property, if the tenant overrides it
pub fn tenant_override(record: &TenantRecord, property: ConfigProperty) -> Option<Value> {
    let reasoning = record.reasoning_override();
    let low_cost = record.low_cost_override();
    let affinity = record.active_affinity();
    let mood = record.active_mood();

    match property {
        ConfigProperty::Model => reasoning?.model.clone().map(Value::from),
        ConfigProperty::Endpoint => reasoning?.endpoint.clone().map(Value::from),
        ConfigProperty::ApiKeys => reasoning?.credentials.clone().map(Value::from),
        ConfigProperty::LowCostModel => low_cost?.model.clone().map(Value::from),
        ConfigProperty::LowCostEndpoint => low_cost?.endpoint.clone().map(Value::from),
        ConfigProperty::LowCostApiKeys => low_cost?.credentials.clone().map(Value::from),
        ConfigProperty::Persona => record.persona.clone().map(Value::from),
        ConfigProperty::AffinityThreshold(i) => affinity?.thresholds.get(i).copied().map(Value::from),
        ConfigProperty::AffinityText(i) => affinity?.texts.get(i).cloned().map(Value::from),
        ConfigProperty::MoodThreshold(i) => mood?.thresholds.get(i).copied().map(Value::from),
        ConfigProperty::MoodText(i) => mood?.texts.get(i).cloned().map(Value::from),
    }
}

/// Accessor that resolves overridable properties for the current tenant
pub struct InterceptedConfig {
    original: Arc<dyn ConfigAccess>,
    registry: Arc<TenantRegistry>,
    cache: Weak<ClientCache>,
    debug: bool,
}

impl InterceptedConfig {
    pub fn new(
        original: Arc<dyn ConfigAccess>,
        registry: Arc<TenantRegistry>,
        cache: Weak<ClientCache>,
        debug: bool,
    ) -> Self {
        Self {
            original,
            registry,
            cache,
            debug,
        }
    }

    /// The accessor this one wraps
    pub fn original(&self) -> Arc<dyn ConfigAccess> {
        self.original.clone()
    }

    fn current_record(&self) -> Option<Arc<TenantRecord>> {
        current_tenant().and_then(|id| self.registry.lookup_by_id(&id))
    }

    /// Replace a tenant's overrides and drop its cached clients
    pub fn set_tenant_record(&self, record: TenantRecord) {
        let tenant_id = record.tenant_id.clone();
        self.registry.upsert(record);
        if let Some(cache) = self.cache.upgrade() {
            cache.invalidate(&tenant_id);
        }
        debug!(tenant_id = %tenant_id, "Tenant overrides replaced");
    }

    /// Whole configuration with the current tenant's overrides applied
    pub fn resolved(&self) -> ServiceConfig {
        let mut config = self.original.snapshot();
        let Some(record) = self.current_record() else {
            return config;
        };
        for property in ConfigProperty::all() {
            if let Some(value) = tenant_override(&record, property) {
                if let Err(e) = config.assign(property, value) {
                    warn!(tenant_id = %record.tenant_id, "Ignoring override for {}: {}", property, e);
                }
            }
        }
        config
    }
}

impl ConfigAccess for InterceptedConfig {
    fn property(&self, property: ConfigProperty) -> Value {
        let Some(record) = self.current_record() else {
            return self.original.property(property);
        };
        match tenant_override(&record, property) {
            Some(value) => {
                if self.debug {
                    debug!(tenant_id = %record.tenant_id, "{} resolved from tenant override", property);
                }
                value
            }
            None => self.original.property(property),
        }
    }

    fn get(&self, name: &str) -> Option<Value> {
        match ConfigProperty::parse(name) {
            Some(property) => Some(self.property(property)),
            None => self.original.get(name),
        }
    }

    fn snapshot(&self) -> ServiceConfig {
        self.resolved()
    }

    fn replace(&self, config: ServiceConfig) {
        debug!("Shared configuration replaced, new baseline for all tenants");
        self.original.replace(config);
        // Cached clients merged their overrides over the old baseline
        if let Some(cache) = self.cache.upgrade() {
            cache.invalidate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::{run_with_tenant, with_tenant_sync};
    use crate::models::{AffinityConfig, ModelOverride, MoodConfig};
    use serde_json::json;

    fn baseline() -> ServiceConfig {
        ServiceConfig {
            model: "base-model".to_string(),
            endpoint: "https://base.example/v1".to_string(),
            api_keys: vec!["base-key".to_string()],
            low_cost_model: "base-cheap".to_string(),
            persona: "base persona".to_string(),
            affinity_thresholds: [10.0, 20.0, 30.0, 40.0],
            affinity_texts: Default::default(),
            mood_thresholds: [-1.0, 1.0],
            mood_texts: ["sad".into(), "calm".into(), "glad".into()],
            ..Default::default()
        }
    }

    fn registry() -> Arc<TenantRegistry> {
        let mut bob = TenantRecord::new("platformX:bot2")
            .with_persona("P2")
            .with_model(ModelOverride {
                model: Some("m2".to_string()),
                ..Default::default()
            });
        bob.low_cost_model = Some(ModelOverride {
            model: Some("hidden-cheap".to_string()),
            ..Default::default()
        });
        bob.affinity = Some(AffinityConfig {
            enabled: false,
            thresholds: [1.0, 2.0, 3.0, 4.0],
            texts: Default::default(),
        });
        bob.mood = Some(MoodConfig {
            enabled: true,
            thresholds: [-5.0, 5.0],
            texts: ["down".into(), "ok".into(), "up".into()],
        });
        Arc::new(TenantRegistry::new(vec![
            TenantRecord::new("platformX:bot1").with_persona("P1"),
            bob,
        ]))
    }

    fn intercepted() -> InterceptedConfig {
        InterceptedConfig::new(
            Arc::new(PlainConfig::new(baseline())),
            registry(),
            Weak::new(),
            true,
        )
    }

    #[test]
    fn test_transparent_outside_scope() {
        let config = intercepted();
        let plain = baseline();
        for property in ConfigProperty::all() {
            assert_eq!(config.property(property), plain.property(property));
        }
        assert_eq!(config.snapshot(), plain);
    }

    #[test]
    fn test_override_precedence() {
        let config = intercepted();
        with_tenant_sync("platformX:bot1", || {
            assert_eq!(config.property(ConfigProperty::Persona), json!("P1"));
            assert_eq!(config.property(ConfigProperty::Model), json!("base-model"));
        });
        with_tenant_sync("platformX:bot2", || {
            assert_eq!(config.property(ConfigProperty::Persona), json!("P2"));
            assert_eq!(config.property(ConfigProperty::Model), json!("m2"));
            assert_eq!(config.property(ConfigProperty::Endpoint), json!("https://base.example/v1"));
            assert_eq!(config.get("model"), Some(json!("m2")));
        });
        with_tenant_sync("platformX:unknown", || {
            assert_eq!(config.property(ConfigProperty::Persona), json!("base persona"));
        });
    }

    #[test]
    fn test_disabled_sections_stay_hidden() {
        let config = intercepted();
        with_tenant_sync("platformX:bot2", || {
            assert_eq!(config.property(ConfigProperty::LowCostModel), json!("base-cheap"));
            assert_eq!(config.property(ConfigProperty::AffinityThreshold(0)), json!(10.0));
            assert_eq!(config.property(ConfigProperty::MoodThreshold(0)), json!(-5.0));
            assert_eq!(config.property(ConfigProperty::MoodText(2)), json!("up"));
        });
    }

    #[test]
    fn test_out_of_range_index_does_not_panic() {
        let config = intercepted();
        with_tenant_sync("platformX:bot2", || {
            assert_eq!(config.property(ConfigProperty::MoodText(3)), Value::Null);
            assert_eq!(config.property(ConfigProperty::AffinityThreshold(7)), Value::Null);
        });
    }

    #[test]
    fn test_resolved_snapshot_merges_overrides() {
        let config = intercepted();
        let resolved = with_tenant_sync("platformX:bot2", || config.resolved());
        assert_eq!(resolved.model, "m2");
        assert_eq!(resolved.persona, "P2");
        assert_eq!(resolved.api_keys, vec!["base-key"]);
        assert_eq!(resolved.mood_texts[0], "down");
        assert_eq!(resolved.affinity_thresholds, [10.0, 20.0, 30.0, 40.0]);
    }

    #[tokio::test]
    async fn test_runtime_replacement_becomes_new_baseline() {
        let config = intercepted();
        let mut next = baseline();
        next.model = "base-model-2".to_string();
        next.persona = "new base persona".to_string();
        config.replace(next);

        assert_eq!(config.property(ConfigProperty::Persona), json!("new base persona"));
        let (bot1_model, bot2_model, bot2_persona) = run_with_tenant("platformX:bot1", async {
            let bot1 = config.property(ConfigProperty::Model);
            let (m, p) = run_with_tenant("platformX:bot2", async {
                (config.property(ConfigProperty::Model), config.property(ConfigProperty::Persona))
            })
            .await;
            (bot1, m, p)
        })
        .await;
        assert_eq!(bot1_model, json!("base-model-2"));
        assert_eq!(bot2_model, json!("m2"));
        assert_eq!(bot2_persona, json!("P2"));
    }

    #[test]
    fn test_slot_swaps_accessor_for_every_holder() {
        let slot = Arc::new(ConfigSlot::plain(baseline()));
        let holder = slot.clone();
        let original = slot.current();
        slot.replace_accessor(Arc::new(InterceptedConfig::new(
            original.clone(),
            registry(),
            Weak::new(),
            false,
        )));

        let persona = with_tenant_sync("platformX:bot1", || holder.property(ConfigProperty::Persona));
        assert_eq!(persona, json!("P1"));

        slot.replace_accessor(original);
        let persona = with_tenant_sync("platformX:bot1", || holder.property(ConfigProperty::Persona));
        assert_eq!(persona, json!("base persona"));
    }

    #[test]
    fn test_set_tenant_record_updates_resolution() {
        let config = intercepted();
        config.set_tenant_record(TenantRecord::new("platformX:bot1").with_persona("P1 revised"));
        let persona = with_tenant_sync("platformX:bot1", || config.property(ConfigProperty::Persona));
        assert_eq!(persona, json!("P1 revised"));
    }
}
