// Tenant registry
// Holds the configured tenants and their runtime status

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::engine::identity::validate_tenant_id;
use crate::models::{tenant_id_for_origin, TenantRecord, TenantStatus, TenantStatusUpdate};

/// One immutable generation of tenant records
#[derive(Debug, Default)]
struct TenantSnapshot {
    /// Configuration order
    order: Vec<String>,
    records: HashMap<String, Arc<TenantRecord>>,
}

impl TenantSnapshot {
    fn build(records: Vec<TenantRecord>) -> Self {
        let mut snapshot = TenantSnapshot::default();
        for record in records {
            if record.tenant_id.is_empty() {
                continue;
            }
            if let Err(e) = validate_tenant_id(&record.tenant_id) {
                warn!("Skipping tenant: {}", e);
                continue;
            }
            let id = record.tenant_id.clone();
            if snapshot.records.insert(id.clone(), Arc::new(record)).is_some() {
                warn!(tenant_id = %id, "Duplicate tenant id, later record wins");
            } else {
                snapshot.order.push(id);
            }
        }
        snapshot
    }
}

/// Registry of configured tenants
///
/// Lookups are synchronous because configuration property reads happen in
/// plain accessor calls inside the shared service. Reads never fail: absence
/// is `None`, never an error.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    snapshot: RwLock<Arc<TenantSnapshot>>,
    status: DashMap<String, TenantStatus>,
}

impl TenantRegistry {
    pub fn new(records: Vec<TenantRecord>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(TenantSnapshot::build(records))),
            status: DashMap::new(),
        }
    }

    fn current(&self) -> Arc<TenantSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Look up a tenant by id
    pub fn lookup_by_id(&self, tenant_id: &str) -> Option<Arc<TenantRecord>> {
        if tenant_id.is_empty() {
            return None;
        }
        self.current().records.get(tenant_id).cloned()
    }

    /// Look up the tenant serving a platform account
    pub fn lookup_by_origin(&self, platform: &str, self_id: &str) -> Option<Arc<TenantRecord>> {
        self.lookup_by_id(&tenant_id_for_origin(platform, self_id))
    }

    /// Every configured tenant, in configuration order
    pub fn list_configured(&self) -> Vec<Arc<TenantRecord>> {
        let snapshot = self.current();
        snapshot
            .order
            .iter()
            .filter_map(|id| snapshot.records.get(id).cloned())
            .collect()
    }

    /// Replace every record at once
    ///
    /// Returns the ids whose record was added, changed or removed.
    pub fn replace_all(&self, records: Vec<TenantRecord>) -> Vec<String> {
        let next = Arc::new(TenantSnapshot::build(records));
        let previous = {
            let mut guard = self
                .snapshot
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *guard, next.clone())
        };

        let mut changed: Vec<String> = next
            .order
            .iter()
            .filter(|id| previous.records.get(*id) != next.records.get(*id))
            .cloned()
            .collect();
        changed.extend(
            previous
                .order
                .iter()
                .filter(|id| !next.records.contains_key(*id))
                .cloned(),
        );
        debug!("Tenant registry replaced, {} tenant(s) changed", changed.len());
        changed
    }

    /// Replace or add a single record
    pub fn upsert(&self, record: TenantRecord) -> Option<Arc<TenantRecord>> {
        if let Err(e) = validate_tenant_id(&record.tenant_id) {
            warn!("Rejecting tenant record: {}", e);
            return None;
        }
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut order = guard.order.clone();
        let mut records = guard.records.clone();
        let id = record.tenant_id.clone();
        let previous = records.insert(id.clone(), Arc::new(record));
        if previous.is_none() {
            order.push(id);
        }
        *guard = Arc::new(TenantSnapshot { order, records });
        previous
    }

    /// Merge a partial status update, creating the status on first sight
    pub fn record_status(&self, tenant_id: &str, update: TenantStatusUpdate) {
        self.status
            .entry(tenant_id.to_string())
            .or_insert_with(|| TenantStatus::new(tenant_id))
            .apply(update);
    }

    pub fn status(&self, tenant_id: &str) -> Option<TenantStatus> {
        self.status.get(tenant_id).map(|s| s.value().clone())
    }

    /// Status of every configured tenant, unseen ones reported as uninitialized
    pub fn statuses(&self) -> Vec<TenantStatus> {
        self.list_configured()
            .iter()
            .map(|record| {
                self.status(&record.tenant_id)
                    .unwrap_or_else(|| TenantStatus::new(&record.tenant_id))
            })
            .collect()
    }
}
