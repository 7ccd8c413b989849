// Per-tenant model client cache
// Builds model clients from tenant-merged configuration and reuses them until the overrides change

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::engine::config_facade::{ConfigAccess, ConfigSlot};
use crate::engine::context::{current_tenant, run_with_tenant};
use crate::engine::registry::TenantRegistry;
use crate::llm::{ClientBundle, ClientFactory};
use crate::models::{ModelOverride, TenantRecord};
use crate::Result;

/// Value standing in for an absent override field
const UNSET: &str = "<unset>";

/// Where the shared service gets its model clients from
#[async_trait]
pub trait ClientProvider: Send + Sync {
    async fn clients(&self) -> Result<Arc<ClientBundle>>;
}

/// Provider handing out one fixed bundle
pub struct SharedClients {
    bundle: Arc<ClientBundle>,
}

impl SharedClients {
    pub fn new(bundle: ClientBundle) -> Self {
        Self {
            bundle: Arc::new(bundle),
        }
    }
}

#[async_trait]
impl ClientProvider for SharedClients {
    async fn clients(&self) -> Result<Arc<ClientBundle>> {
        Ok(self.bundle.clone())
    }
}

/// The replaceable client-factory accessor held by the shared service
pub struct ClientSlot {
    provider: RwLock<Arc<dyn ClientProvider>>,
}

impl ClientSlot {
    pub fn new(provider: Arc<dyn ClientProvider>) -> Self {
        Self {
            provider: RwLock::new(provider),
        }
    }

    pub fn current(&self) -> Arc<dyn ClientProvider> {
        self.provider.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Install a new provider, returning the previous one
    pub fn replace(&self, provider: Arc<dyn ClientProvider>) -> Arc<dyn ClientProvider> {
        let mut guard = self.provider.write().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *guard, provider)
    }

    pub async fn clients(&self) -> Result<Arc<ClientBundle>> {
        let provider = self.current();
        provider.clients().await
    }
}

fn override_fields(model: Option<&ModelOverride>) -> serde_json::Value {
    let model = model.cloned().unwrap_or_default();
    json!({
        "model": model.model.unwrap_or_else(|| UNSET.to_string()),
        "endpoint": model.endpoint.unwrap_or_else(|| UNSET.to_string()),
        "credentials": model.credentials.unwrap_or_else(|| vec![UNSET.to_string()]),
    })
}

/// Deterministic digest of the overrides that decide which clients a tenant needs
///
/// Keys are serialized in sorted order and absent fields normalized, so equal
/// configurations always produce the same fingerprint.
pub fn override_fingerprint(record: &TenantRecord) -> String {
    let canonical = json!({
        "reasoning": override_fields(record.reasoning_override()),
        "low_cost": override_fields(record.low_cost_override()),
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    format!("{:x}", digest)
}

#[derive(Clone)]
struct CachedClients {
    clients: Arc<ClientBundle>,
    fingerprint: String,
}

/// Cache of per-tenant client bundles
///
/// Entries are replaced wholesale, so a racing invalidation costs at most one
/// extra construction.
pub struct ClientCache {
    registry: Arc<TenantRegistry>,
    factory: Arc<dyn ClientFactory>,
    config: Arc<ConfigSlot>,
    baseline: Arc<dyn ClientProvider>,
    entries: DashMap<String, CachedClients>,
}

impl ClientCache {
    pub fn new(
        registry: Arc<TenantRegistry>,
        factory: Arc<dyn ClientFactory>,
        config: Arc<ConfigSlot>,
        baseline: Arc<dyn ClientProvider>,
    ) -> Self {
        Self {
            registry,
            factory,
            config,
            baseline,
            entries: DashMap::new(),
        }
    }

    /// The provider used for tenants without client overrides
    pub fn baseline(&self) -> Arc<dyn ClientProvider> {
        self.baseline.clone()
    }

    /// Clients for a tenant
    ///
    /// Tenants without reasoning or low-cost overrides share the baseline
    /// clients. Construction runs inside a scope for the tenant so the
    /// configuration it reads is the tenant's view.
    pub async fn get_client(&self, tenant_id: &str) -> Result<Arc<ClientBundle>> {
        let record = match self.registry.lookup_by_id(tenant_id) {
            Some(record) if record.has_client_overrides() => record,
            _ => return self.baseline.clients().await,
        };

        let fingerprint = override_fingerprint(&record);
        if let Some(entry) = self.entries.get(tenant_id) {
            if entry.fingerprint == fingerprint {
                return Ok(entry.clients.clone());
            }
        }

        let clients = run_with_tenant(tenant_id, async {
            let config = self.config.snapshot();
            self.factory.create_clients(&config).await
        })
        .await?;
        let clients = Arc::new(clients);

        info!(tenant_id = %tenant_id, model = %clients.reasoning.model(), "Built tenant model clients");
        self.entries.insert(
            tenant_id.to_string(),
            CachedClients {
                clients: clients.clone(),
                fingerprint,
            },
        );
        Ok(clients)
    }

    /// Drop the cached clients for a tenant
    pub fn invalidate(&self, tenant_id: &str) {
        if self.entries.remove(tenant_id).is_some() {
            debug!(tenant_id = %tenant_id, "Cached clients invalidated");
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Client provider installed over the shared service's own provider
pub struct TenantClientProvider {
    cache: Arc<ClientCache>,
}

impl TenantClientProvider {
    pub fn new(cache: Arc<ClientCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ClientProvider for TenantClientProvider {
    async fn clients(&self) -> Result<Arc<ClientBundle>> {
        match current_tenant() {
            Some(tenant_id) => self.cache.get_client(&tenant_id).await,
            None => self.cache.baseline().clients().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config_facade::InterceptedConfig;
    use crate::llm::{ChatMessage, LLMResult, ModelClient};
    use crate::models::ServiceConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClient {
        model: String,
        endpoint: String,
        observed_tenant: Option<String>,
    }

    #[async_trait]
    impl ModelClient for StubClient {
        fn model(&self) -> &str {
            &self.model
        }

        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        async fn chat(&self, _messages: &[ChatMessage]) -> LLMResult<String> {
            Ok(format!("{}:{:?}", self.model, self.observed_tenant))
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        built: AtomicUsize,
    }

    #[async_trait]
    impl ClientFactory for CountingFactory {
        async fn create_clients(&self, config: &ServiceConfig) -> LLMResult<ClientBundle> {
            self.built.fetch_add(1, Ordering::SeqCst);
            let client = Arc::new(StubClient {
                model: config.model.clone(),
                endpoint: config.endpoint.clone(),
                observed_tenant: current_tenant(),
            });
            Ok(ClientBundle {
                reasoning: client.clone(),
                low_cost: client,
            })
        }
    }

    struct Fixture {
        registry: Arc<TenantRegistry>,
        factory: Arc<CountingFactory>,
        baseline: Arc<SharedClients>,
        cache: Arc<ClientCache>,
        config: Arc<InterceptedConfig>,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(TenantRegistry::new(vec![
            TenantRecord::new("p:plain").with_persona("no model change"),
            TenantRecord::new("p:custom").with_model(ModelOverride {
                model: Some("m2".to_string()),
                endpoint: Some("https://tenant.example/v1".to_string()),
                credentials: Some(vec!["k2".to_string()]),
            }),
        ]));
        let base = ServiceConfig {
            model: "base".to_string(),
            ..Default::default()
        };
        let factory = Arc::new(CountingFactory::default());
        let baseline = Arc::new(SharedClients::new(
            factory.create_clients(&base).await.unwrap(),
        ));

        let slot = Arc::new(ConfigSlot::plain(base));
        let cache = Arc::new(ClientCache::new(
            registry.clone(),
            factory.clone(),
            slot.clone(),
            baseline.clone(),
        ));
        let config = Arc::new(InterceptedConfig::new(
            slot.current(),
            registry.clone(),
            Arc::downgrade(&cache),
            false,
        ));
        slot.replace_accessor(config.clone());

        Fixture {
            registry,
            factory,
            baseline,
            cache,
            config,
        }
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let record = TenantRecord::new("p:1").with_model(ModelOverride {
            model: Some("m".to_string()),
            ..Default::default()
        });
        assert_eq!(override_fingerprint(&record), override_fingerprint(&record.clone()));

        let mut changed = record.clone();
        changed.model.as_mut().unwrap().endpoint = Some("https://other".to_string());
        assert_ne!(override_fingerprint(&record), override_fingerprint(&changed));

        // A persona change does not affect which clients are needed
        let persona_only = record.clone().with_persona("x");
        assert_eq!(override_fingerprint(&record), override_fingerprint(&persona_only));

        // A disabled low-cost override is the same as none
        let mut disabled = record.clone().with_low_cost_model(ModelOverride {
            model: Some("cheap".to_string()),
            ..Default::default()
        });
        assert_ne!(override_fingerprint(&record), override_fingerprint(&disabled));
        disabled.low_cost_enabled = false;
        assert_eq!(override_fingerprint(&record), override_fingerprint(&disabled));
    }

    #[tokio::test]
    async fn test_tenants_without_overrides_share_baseline() {
        let f = fixture().await;
        let baseline = f.baseline.clients().await.unwrap();
        let plain = f.cache.get_client("p:plain").await.unwrap();
        let unknown = f.cache.get_client("p:unknown").await.unwrap();
        assert!(Arc::ptr_eq(&plain, &baseline));
        assert!(Arc::ptr_eq(&unknown, &baseline));
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_cached_until_overrides_change() {
        let f = fixture().await;
        let first = f.cache.get_client("p:custom").await.unwrap();
        let second = f.cache.get_client("p:custom").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.reasoning.model(), "m2");
        assert_eq!(first.reasoning.endpoint(), "https://tenant.example/v1");

        // Replacing the registry record without invalidating still rebuilds via the fingerprint
        f.registry.upsert(TenantRecord::new("p:custom").with_model(ModelOverride {
            model: Some("m3".to_string()),
            ..Default::default()
        }));
        let third = f.cache.get_client("p:custom").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.reasoning.model(), "m3");
        assert_eq!(f.factory.built.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_setter_invalidates_cached_entry() {
        let f = fixture().await;
        let first = f.cache.get_client("p:custom").await.unwrap();
        assert_eq!(f.cache.len(), 1);

        let mut record = f.registry.lookup_by_id("p:custom").unwrap().as_ref().clone();
        record.persona = Some("same models".to_string());
        f.config.set_tenant_record(record);
        assert!(f.cache.is_empty());

        let second = f.cache.get_client("p:custom").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_construction_runs_in_tenant_scope() {
        let f = fixture().await;
        let provider = TenantClientProvider::new(f.cache.clone());

        let outside = provider.clients().await.unwrap();
        assert_eq!(outside.reasoning.model(), "base");

        let clients = run_with_tenant("p:custom", provider.clients()).await.unwrap();
        let reply = clients.reasoning.chat(&[]).await.unwrap();
        assert_eq!(reply, "m2:Some(\"p:custom\")");
    }
}
