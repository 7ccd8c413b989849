// Storage query rewriting
// Turns reads keyed by a virtual identity into reads on the real identity plus a tenant filter

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::engine::identity::{decode_user, extract_tenant_id};
use crate::settings::StorageSettings;
use crate::{Result, TenantMuxError};

/// Equality filter: field name to expected value
pub type Query = Map<String, Value>;

/// The persistence read path the shared service uses
#[async_trait]
pub trait ReadPath: Send + Sync {
    async fn get(&self, table: &str, query: Query) -> Result<Vec<Value>>;
}

/// Column types the multiplexer adds to the shared schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    String,
}

/// One column added to a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn nullable_string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ColumnKind::String,
            nullable: true,
        }
    }
}

/// Schema migration hook of the persistence layer
#[async_trait]
pub trait SchemaExtender: Send + Sync {
    /// Add columns to a table; fails with `SchemaConflict` if one already exists
    async fn extend(&self, table: &str, columns: &[ColumnSpec]) -> Result<()>;
}

/// The replaceable read accessor held by the shared service
///
/// Every holder of the slot reads through whatever path is currently
/// installed, so swapping the path here affects all of them.
pub struct ReadPathSlot {
    path: RwLock<Arc<dyn ReadPath>>,
}

impl ReadPathSlot {
    pub fn new(path: Arc<dyn ReadPath>) -> Self {
        Self {
            path: RwLock::new(path),
        }
    }

    pub fn current(&self) -> Arc<dyn ReadPath> {
        self.path.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Install a new path, returning the previous one
    pub fn replace(&self, path: Arc<dyn ReadPath>) -> Arc<dyn ReadPath> {
        let mut guard = self.path.write().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *guard, path)
    }

    pub async fn get(&self, table: &str, query: Query) -> Result<Vec<Value>> {
        let path = self.current();
        path.get(table, query).await
    }
}

/// Rewrite a query for the tenant-aware table
///
/// Returns `None` when the query must pass through unmodified.
pub fn rewrite_query(settings: &StorageSettings, table: &str, query: &Query) -> Option<Query> {
    if table != settings.table {
        return None;
    }
    let identity = query.get(&settings.identity_field)?.as_str()?;
    let tenant_id = extract_tenant_id(identity);
    if tenant_id.is_empty() {
        return None;
    }

    let mut rewritten = query.clone();
    rewritten.remove(&settings.identity_field);
    rewritten.insert(
        settings.real_identity_field.clone(),
        Value::String(decode_user(identity)),
    );
    rewritten.insert(settings.tenant_field.clone(), Value::String(tenant_id));
    Some(rewritten)
}

/// Read path installed over the original one while the rewriter is attached
struct RewritingReadPath {
    original: Arc<dyn ReadPath>,
    settings: StorageSettings,
    verbose: bool,
}

#[async_trait]
impl ReadPath for RewritingReadPath {
    async fn get(&self, table: &str, query: Query) -> Result<Vec<Value>> {
        match rewrite_query(&self.settings, table, &query) {
            Some(rewritten) => {
                if self.verbose {
                    debug!(table, "Rewrote query {:?} -> {:?}", query, rewritten);
                }
                self.original.get(table, rewritten).await
            }
            None => self.original.get(table, query).await,
        }
    }
}

/// Attaches and detaches query rewriting on a [`ReadPathSlot`]
pub struct QueryRewriter {
    settings: StorageSettings,
    verbose: bool,
    original: Mutex<Option<Arc<dyn ReadPath>>>,
}

impl QueryRewriter {
    pub fn new(settings: StorageSettings, verbose: bool) -> Self {
        Self {
            settings,
            verbose,
            original: Mutex::new(None),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.original.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Wrap the slot's current read path
    pub fn attach(&self, slot: &ReadPathSlot) -> Result<()> {
        let mut original = self.original.lock().unwrap_or_else(|p| p.into_inner());
        if original.is_some() {
            return Err(TenantMuxError::AlreadyAttached("storage read path".to_string()));
        }
        let current = slot.current();
        slot.replace(Arc::new(RewritingReadPath {
            original: current.clone(),
            settings: self.settings.clone(),
            verbose: self.verbose,
        }));
        *original = Some(current);
        info!(table = %self.settings.table, "Storage query rewriting attached");
        Ok(())
    }

    /// Put the original read path back
    pub fn restore(&self, slot: &ReadPathSlot) -> Result<()> {
        let original = self
            .original
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| TenantMuxError::NotAttached("storage read path".to_string()))?;
        slot.replace(original);
        info!("Storage query rewriting restored");
        Ok(())
    }
}

/// Add the tenant id and real identity columns to the tenant-aware table
///
/// Each column is added on its own, so a table left with only one of them
/// is completed. A column that already exists is logged and skipped.
pub async fn ensure_tenant_columns(
    extender: &dyn SchemaExtender,
    settings: &StorageSettings,
) -> Result<()> {
    let columns = [
        ColumnSpec::nullable_string(&settings.tenant_field),
        ColumnSpec::nullable_string(&settings.real_identity_field),
    ];
    for column in &columns {
        match extender.extend(&settings.table, std::slice::from_ref(column)).await {
            Ok(()) => info!(table = %settings.table, "Added column {}", column.name),
            Err(TenantMuxError::SchemaConflict(detail)) => {
                warn!(table = %settings.table, "Column {} already present: {}", column.name, detail);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct TableData {
    columns: Vec<ColumnSpec>,
    rows: Vec<Map<String, Value>>,
}

/// In-memory persistence for development and testing
///
/// Rows match a query when every filter field is equal.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    tables: tokio::sync::RwLock<HashMap<String, TableData>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, table: &str, row: Map<String, Value>) {
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().rows.push(row);
    }

    pub async fn columns(&self, table: &str) -> Vec<ColumnSpec> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReadPath for InMemoryRecordStore {
    async fn get(&self, table: &str, query: Query) -> Result<Vec<Value>> {
        let tables = self.tables.read().await;
        let Some(data) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(data
            .rows
            .iter()
            .filter(|row| query.iter().all(|(k, v)| row.get(k) == Some(v)))
            .map(|row| Value::Object(row.clone()))
            .collect())
    }
}

#[async_trait]
impl SchemaExtender for InMemoryRecordStore {
    async fn extend(&self, table: &str, columns: &[ColumnSpec]) -> Result<()> {
        let mut tables = self.tables.write().await;
        let data = tables.entry(table.to_string()).or_default();
        if let Some(existing) = columns
            .iter()
            .find(|c| data.columns.iter().any(|e| e.name == c.name))
        {
            return Err(TenantMuxError::SchemaConflict(format!(
                "column {} already exists on {}",
                existing.name, table
            )));
        }
        data.columns.extend_from_slice(columns);
        Ok(())
    }
}
