// Method interception
// Wraps the shared service's entry methods so each call runs in its tenant's scope

//! # Method Interception Layer
//!
//! The shared service is modelled as a [`ServiceInstance`]: a table of named
//! entry methods plus the slots through which it reads its configuration,
//! obtains model clients and reads persisted records. Nothing in the service
//! knows about tenants.
//!
//! [`MethodInterceptor::attach`] captures the original entry methods and
//! accessors, then installs:
//!
//! - a wrapper per entry method that finds the first session-shaped argument,
//!   resolves its tenant and runs the original inside a scope for it
//! - an [`InterceptedConfig`] in the configuration slot
//! - a [`TenantClientProvider`] in the client slot
//!
//! [`MethodInterceptor::detach`] puts every captured original back.

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::client_cache::{ClientCache, ClientProvider, ClientSlot, TenantClientProvider};
use crate::engine::config_facade::{ConfigAccess, ConfigSlot, InterceptedConfig};
use crate::engine::context::run_with_tenant;
use crate::engine::query_rewriter::ReadPathSlot;
use crate::engine::registry::TenantRegistry;
use crate::llm::ClientFactory;
use crate::models::{CallArg, TenantStatusUpdate};
use crate::{Result, TenantMuxError};

/// Future returned by an entry method
pub type MethodFuture = BoxFuture<'static, Result<Value>>;

/// A callable entry method of the shared service
pub type EntryMethod = Arc<dyn Fn(Vec<CallArg>) -> MethodFuture + Send + Sync>;

/// The live shared service instance
pub struct ServiceInstance {
    id: Uuid,
    name: String,
    methods: RwLock<HashMap<String, EntryMethod>>,
    config: Arc<ConfigSlot>,
    clients: Arc<ClientSlot>,
    reads: Option<Arc<ReadPathSlot>>,
}

impl ServiceInstance {
    pub fn new(name: &str, config: Arc<ConfigSlot>, clients: Arc<ClientSlot>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            methods: RwLock::new(HashMap::new()),
            config,
            clients,
            reads: None,
        }
    }

    pub fn with_read_path(mut self, reads: Arc<ReadPathSlot>) -> Self {
        self.reads = Some(reads);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Arc<ConfigSlot> {
        self.config.clone()
    }

    pub fn clients(&self) -> Arc<ClientSlot> {
        self.clients.clone()
    }

    pub fn read_path(&self) -> Option<Arc<ReadPathSlot>> {
        self.reads.clone()
    }

    /// Register an entry method from an async closure
    pub fn register_method<F, Fut>(&self, name: &str, method: F)
    where
        F: Fn(Vec<CallArg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let entry: EntryMethod = Arc::new(move |args| -> MethodFuture { Box::pin(method(args)) });
        self.methods
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string(), entry);
    }

    pub fn method(&self, name: &str) -> Option<EntryMethod> {
        self.methods
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }

    /// Swap an existing method, returning the one it replaced
    pub fn replace_method(&self, name: &str, method: EntryMethod) -> Result<EntryMethod> {
        let mut methods = self.methods.write().unwrap_or_else(|p| p.into_inner());
        match methods.get_mut(name) {
            Some(slot) => Ok(std::mem::replace(slot, method)),
            None => Err(TenantMuxError::MethodNotFound(name.to_string())),
        }
    }

    /// Invoke an entry method by name
    pub async fn call(&self, name: &str, args: Vec<CallArg>) -> Result<Value> {
        let method = self
            .method(name)
            .ok_or_else(|| TenantMuxError::MethodNotFound(name.to_string()))?;
        method(args).await
    }
}

/// Tenant of the first session-shaped argument
///
/// A tenant attached by the virtualizing facade wins; otherwise the session's
/// origin is looked up in the registry.
pub fn resolve_call_tenant(registry: &TenantRegistry, args: &[CallArg]) -> Option<String> {
    let origin = args.iter().find_map(CallArg::session_origin)?;
    if let Some(tenant_id) = origin.tenant_probe {
        if registry.lookup_by_id(&tenant_id).is_some() {
            return Some(tenant_id);
        }
    }
    registry
        .lookup_by_origin(&origin.platform, &origin.self_id)
        .map(|record| record.tenant_id.clone())
}

fn wrap_method(name: &str, original: EntryMethod, registry: Arc<TenantRegistry>) -> EntryMethod {
    let name = name.to_string();
    Arc::new(move |args: Vec<CallArg>| -> MethodFuture {
        let Some(tenant_id) = resolve_call_tenant(&registry, &args) else {
            return original(args);
        };
        debug!(method = %name, tenant_id = %tenant_id, "Entering tenant scope");
        let original = original.clone();
        Box::pin(run_with_tenant(tenant_id, async move { original(args).await }))
    })
}

/// Handles to the per-instance interception state
#[derive(Clone)]
pub struct Attachment {
    pub cache: Arc<ClientCache>,
    pub config: Arc<InterceptedConfig>,
}

struct AttachedInstance {
    service: Arc<ServiceInstance>,
    originals: Vec<(String, EntryMethod)>,
    original_config: Arc<dyn ConfigAccess>,
    original_clients: Arc<dyn ClientProvider>,
    attachment: Attachment,
}

/// Installs and removes interception on service instances
pub struct MethodInterceptor {
    registry: Arc<TenantRegistry>,
    factory: Arc<dyn ClientFactory>,
    entry_methods: Vec<String>,
    debug: bool,
    attached: DashMap<Uuid, AttachedInstance>,
}

impl MethodInterceptor {
    pub fn new(
        registry: Arc<TenantRegistry>,
        factory: Arc<dyn ClientFactory>,
        entry_methods: Vec<String>,
        debug: bool,
    ) -> Self {
        Self {
            registry,
            factory,
            entry_methods,
            debug,
            attached: DashMap::new(),
        }
    }

    pub fn is_attached(&self, service: &ServiceInstance) -> bool {
        self.attached.contains_key(&service.id())
    }

    pub fn attachment(&self, service: &ServiceInstance) -> Option<Attachment> {
        self.attached
            .get(&service.id())
            .map(|entry| entry.attachment.clone())
    }

    /// Wrap the instance's entry methods and accessors
    ///
    /// A second attach to the same instance fails with `AlreadyAttached` and
    /// changes nothing. Entry methods the instance lacks are skipped.
    pub fn attach(&self, service: &Arc<ServiceInstance>) -> Result<Attachment> {
        let entry = match self.attached.entry(service.id()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TenantMuxError::AlreadyAttached(service.name().to_string()));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => entry,
        };

        let mut originals = Vec::new();
        for name in &self.entry_methods {
            let Some(original) = service.method(name) else {
                warn!(service = %service.name(), "Entry method {} not found, skipping", name);
                continue;
            };
            let wrapped = wrap_method(name, original, self.registry.clone());
            match service.replace_method(name, wrapped) {
                Ok(original) => originals.push((name.clone(), original)),
                Err(e) => warn!(service = %service.name(), "Could not wrap {}: {}", name, e),
            }
        }

        let config_slot = service.config();
        let client_slot = service.clients();
        let original_config = config_slot.current();
        let original_clients = client_slot.current();

        let cache = Arc::new(ClientCache::new(
            self.registry.clone(),
            self.factory.clone(),
            config_slot.clone(),
            original_clients.clone(),
        ));
        let config = Arc::new(InterceptedConfig::new(
            original_config.clone(),
            self.registry.clone(),
            Arc::downgrade(&cache),
            self.debug,
        ));
        config_slot.replace_accessor(config.clone());
        client_slot.replace(Arc::new(TenantClientProvider::new(cache.clone())));

        for record in self.registry.list_configured() {
            self.registry
                .record_status(&record.tenant_id, TenantStatusUpdate::initialized());
        }

        let attachment = Attachment { cache, config };
        info!(
            service = %service.name(),
            methods = originals.len(),
            "Tenant interception attached"
        );
        entry.insert(AttachedInstance {
            service: service.clone(),
            originals,
            original_config,
            original_clients,
            attachment: attachment.clone(),
        });
        Ok(attachment)
    }

    /// Restore everything captured by [`attach`](Self::attach)
    ///
    /// Each restore step runs even if an earlier one failed; failures are
    /// logged.
    pub fn detach(&self, service: &ServiceInstance) -> Result<()> {
        let (_, attached) = self
            .attached
            .remove(&service.id())
            .ok_or_else(|| TenantMuxError::NotAttached(service.name().to_string()))?;

        let mut failures = 0;
        for (name, original) in attached.originals {
            if let Err(e) = attached.service.replace_method(&name, original) {
                error!(service = %service.name(), "Failed to restore {}: {}", name, e);
                failures += 1;
            }
        }
        attached.service.config().replace_accessor(attached.original_config);
        attached.service.clients().replace(attached.original_clients);
        attached.attachment.cache.invalidate_all();

        if failures > 0 {
            warn!(service = %service.name(), "Detached with {} restore failure(s)", failures);
        } else {
            info!(service = %service.name(), "Tenant interception detached");
        }
        Ok(())
    }

    /// Detach from every instance
    pub fn detach_all(&self) {
        let services: Vec<Arc<ServiceInstance>> = self
            .attached
            .iter()
            .map(|entry| entry.service.clone())
            .collect();
        for service in services {
            if let Err(e) = self.detach(&service) {
                error!(service = %service.name(), "Detach failed: {}", e);
            }
        }
    }
}
