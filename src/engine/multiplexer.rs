// Tenant multiplexer
// Lifecycle of the virtualization layer around one shared service instance

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::interceptor::{Attachment, MethodInterceptor, ServiceInstance};
use crate::engine::query_rewriter::{ensure_tenant_columns, QueryRewriter, ReadPathSlot, SchemaExtender};
use crate::engine::registry::TenantRegistry;
use crate::engine::virtual_event::VirtualizedEvent;
use crate::llm::ClientFactory;
use crate::models::{CallArg, InboundEvent, TenantRecord, TenantStatusUpdate};
use crate::settings::MultiplexerSettings;
use crate::{Result, TenantMuxError};

/// Finds the shared service instance once the host has created it
pub trait ServiceLocator: Send + Sync {
    fn locate(&self) -> Option<Arc<ServiceInstance>>;
}

impl<F> ServiceLocator for F
where
    F: Fn() -> Option<Arc<ServiceInstance>> + Send + Sync,
{
    fn locate(&self) -> Option<Arc<ServiceInstance>> {
        self()
    }
}

/// Runs many tenants on one shared service instance
///
/// Virtualization failures never stop a message from being handled: without
/// an attached service, or for an origin no tenant serves, events pass
/// through unchanged.
pub struct TenantMultiplexer {
    settings: RwLock<MultiplexerSettings>,
    registry: Arc<TenantRegistry>,
    interceptor: MethodInterceptor,
    rewriter: QueryRewriter,
    virtualize_channels: AtomicBool,
    service: RwLock<Option<Arc<ServiceInstance>>>,
    reads: RwLock<Option<Arc<ReadPathSlot>>>,
}

impl TenantMultiplexer {
    pub fn new(settings: MultiplexerSettings, factory: Arc<dyn ClientFactory>) -> Self {
        for problem in settings.validate() {
            warn!("Settings problem: {}", problem);
        }
        let registry = Arc::new(TenantRegistry::new(settings.tenants.clone()));
        let interceptor = MethodInterceptor::new(
            registry.clone(),
            factory,
            settings.entry_methods.clone(),
            settings.debug,
        );
        let rewriter = QueryRewriter::new(settings.storage.clone(), settings.verbose);
        info!(
            tenants = registry.list_configured().len(),
            virtualize_channels = settings.virtualize_channels,
            "Tenant multiplexer created"
        );

        Self {
            virtualize_channels: AtomicBool::new(settings.virtualize_channels),
            settings: RwLock::new(settings),
            registry,
            interceptor,
            rewriter,
            service: RwLock::new(None),
            reads: RwLock::new(None),
        }
    }

    pub fn registry(&self) -> Arc<TenantRegistry> {
        self.registry.clone()
    }

    pub fn settings(&self) -> MultiplexerSettings {
        self.settings.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn virtualize_channels(&self) -> bool {
        self.virtualize_channels.load(Ordering::SeqCst)
    }

    fn verbose(&self) -> bool {
        self.settings.read().unwrap_or_else(|p| p.into_inner()).verbose
    }

    /// The attached service instance, if any
    pub fn service(&self) -> Option<Arc<ServiceInstance>> {
        self.service.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_attached(&self) -> bool {
        self.service().is_some()
    }

    /// Interception handles of the attached service
    pub fn attachment(&self) -> Option<Attachment> {
        self.service()
            .and_then(|service| self.interceptor.attachment(&service))
    }

    /// Attach to a service instance that is known to exist
    ///
    /// Attaching to the instance already attached is a no-op.
    pub fn attach(&self, service: Arc<ServiceInstance>) -> Result<()> {
        match self.interceptor.attach(&service) {
            Ok(_) => {}
            Err(TenantMuxError::AlreadyAttached(name)) => {
                debug!(service = %name, "Already attached");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        if let Some(reads) = service.read_path() {
            if let Err(e) = self.attach_read_path(reads) {
                warn!("Storage query rewriting not attached: {}", e);
            }
        }
        *self.service.write().unwrap_or_else(|p| p.into_inner()) = Some(service);
        Ok(())
    }

    /// Poll for the shared service and attach once it exists
    ///
    /// Polls up to the configured number of attempts, then waits once on
    /// `readiness` if the host provides it, for at most the whole polling
    /// window again. Returns whether interception is
    /// active; when it is not, events keep flowing without virtualization.
    pub async fn attach_when_ready(
        &self,
        locator: &dyn ServiceLocator,
        readiness: Option<Arc<Notify>>,
    ) -> bool {
        let attach = self.settings().attach;
        let interval = Duration::from_millis(attach.interval_ms);

        for attempt in 1..=attach.max_attempts {
            if let Some(service) = locator.locate() {
                return self.try_attach(service);
            }
            debug!("Shared service not available (attempt {}/{})", attempt, attach.max_attempts);
            if attempt < attach.max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        if let Some(readiness) = readiness {
            let bound = interval * attach.max_attempts.max(1);
            info!("Waiting up to {:?} for the host readiness signal", bound);
            match tokio::time::timeout(bound, readiness.notified()).await {
                Ok(()) => {
                    if let Some(service) = locator.locate() {
                        return self.try_attach(service);
                    }
                }
                Err(_) => warn!("Host readiness signal not received within {:?}", bound),
            }
        }

        error!(
            "Shared service unavailable after {} attempt(s), tenant virtualization inactive",
            attach.max_attempts
        );
        let reason = TenantMuxError::ServiceUnavailable.to_string();
        for record in self.registry.list_configured() {
            self.registry
                .record_status(&record.tenant_id, TenantStatusUpdate::failed(reason.clone()));
        }
        false
    }

    fn try_attach(&self, service: Arc<ServiceInstance>) -> bool {
        match self.attach(service) {
            Ok(()) => true,
            Err(e) => {
                error!("Tenant interception failed to attach: {}", e);
                false
            }
        }
    }

    /// Add the tenant columns to the persisted table
    pub async fn prepare_storage(&self, extender: &dyn SchemaExtender) -> Result<()> {
        let storage = self.settings().storage;
        ensure_tenant_columns(extender, &storage).await
    }

    /// Rewrite tenant-aware reads going through `reads`
    pub fn attach_read_path(&self, reads: Arc<ReadPathSlot>) -> Result<()> {
        self.rewriter.attach(&reads)?;
        *self.reads.write().unwrap_or_else(|p| p.into_inner()) = Some(reads);
        Ok(())
    }

    /// Wrap an inbound event for the tenant serving its origin
    ///
    /// Hands the event back untouched when no tenant serves its origin; it
    /// is then handled with shared identities.
    pub fn wrap_event(&self, event: InboundEvent) -> std::result::Result<VirtualizedEvent, InboundEvent> {
        match self.registry.lookup_by_origin(&event.platform, &event.self_id) {
            Some(record) => {
                let wrapped = VirtualizedEvent::wrap(event, &record, self.virtualize_channels());
                if self.verbose() {
                    debug!(
                        tenant_id = %record.tenant_id,
                        user_id = %wrapped.user_id(),
                        "Event virtualized"
                    );
                }
                Ok(wrapped)
            }
            None => Err(event),
        }
    }

    /// Hand an inbound event to an entry method of the shared service
    pub async fn dispatch(&self, method: &str, event: InboundEvent) -> Result<Value> {
        let service = self.service().ok_or(TenantMuxError::ServiceUnavailable)?;
        let arg = match self.wrap_event(event) {
            Ok(wrapped) => CallArg::session(wrapped.into_shared()),
            Err(event) => CallArg::session(Arc::new(event)),
        };
        service.call(method, vec![arg]).await
    }

    /// Replace one tenant's record at runtime
    pub fn set_tenant_record(&self, record: TenantRecord) {
        match self.attachment() {
            Some(attachment) => attachment.config.set_tenant_record(record),
            None => {
                self.registry.upsert(record);
            }
        }
    }

    /// Rebuild the registry from new settings without restarting
    ///
    /// Requests already in flight keep their tenant scope. Returns the ids
    /// of tenants whose record changed.
    pub fn reload(&self, settings: MultiplexerSettings) -> Vec<String> {
        for problem in settings.validate() {
            warn!("Settings problem: {}", problem);
        }
        let changed = self.registry.replace_all(settings.tenants.clone());
        self.virtualize_channels
            .store(settings.virtualize_channels, Ordering::SeqCst);

        let attachment = self.attachment();
        for tenant_id in &changed {
            if let Some(attachment) = &attachment {
                attachment.cache.invalidate(tenant_id);
            }
            if attachment.is_some() && self.registry.lookup_by_id(tenant_id).is_some() {
                self.registry
                    .record_status(tenant_id, TenantStatusUpdate::initialized());
            }
        }

        info!(
            tenants = self.registry.list_configured().len(),
            changed = changed.len(),
            "Tenant configuration reloaded"
        );
        *self.settings.write().unwrap_or_else(|p| p.into_inner()) = settings;
        changed
    }

    /// Reload every time the host publishes new settings
    pub fn spawn_reload_listener(
        self: &Arc<Self>,
        mut updates: watch::Receiver<MultiplexerSettings>,
    ) -> JoinHandle<()> {
        let multiplexer = Arc::clone(self);
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let settings = updates.borrow_and_update().clone();
                multiplexer.reload(settings);
            }
            debug!("Settings channel closed, reload listener stopped");
        })
    }

    /// Remove all interception
    ///
    /// Every step runs even when an earlier one fails.
    pub fn shutdown(&self) {
        let service = self.service.write().unwrap_or_else(|p| p.into_inner()).take();
        let reads = self.reads.write().unwrap_or_else(|p| p.into_inner()).take();
        if service.is_none() && reads.is_none() {
            debug!("Shutdown without an attached service");
            return;
        }

        if let Some(service) = service {
            if let Err(e) = self.interceptor.detach(&service) {
                error!("Failed to detach method interception: {}", e);
            }
        }
        if let Some(reads) = reads {
            if let Err(e) = self.rewriter.restore(&reads) {
                error!("Failed to restore storage read path: {}", e);
            }
        }
        info!("Tenant multiplexer shut down");
    }
}
