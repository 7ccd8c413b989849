// Tenant multiplexer engine
// Identity virtualization, tenant context and interception of the shared service

//! # Engine Module
//!
//! Everything that turns one shared service instance into many isolated
//! tenants. Components, bottom-up:
//!
//! - `identity`: reversible virtual identity encoding
//! - `registry`: configured tenants, looked up by id or origin
//! - `context`: the task-scoped "current tenant"
//! - `virtual_event`: the event facade the shared service sees
//! - `query_rewriter`: tenant-aware persistence reads and schema extension
//! - `config_facade`: per-tenant configuration resolution
//! - `client_cache`: per-tenant model clients
//! - `interceptor`: entry method wrapping and restoration
//! - `multiplexer`: attach, dispatch, reload and shutdown
//! - `introspection`: operator status, identity test and reload commands

// Contains the virtual identity codec
pub mod identity;

// Contains TenantRegistry
pub mod registry;

// Contains the task-local tenant scope
pub mod context;

// Contains VirtualizedEvent
pub mod virtual_event;

// Contains the read path wrapper and InMemoryRecordStore
pub mod query_rewriter;

// Contains ConfigSlot and InterceptedConfig
pub mod config_facade;

// Contains ClientCache and the client slot
pub mod client_cache;

// Contains ServiceInstance and MethodInterceptor
pub mod interceptor;

// Contains TenantMultiplexer
pub mod multiplexer;

// Contains the operator commands
pub mod introspection;


pub use client_cache::{
    override_fingerprint, ClientCache, ClientProvider, ClientSlot, SharedClients,
    TenantClientProvider,
};
pub use config_facade::{ConfigAccess, ConfigSlot, InterceptedConfig, PlainConfig};
pub use context::{current_tenant, run_with_tenant, spawn_with_current_tenant, with_tenant_sync};
pub use identity::{decode_channel, decode_user, encode_channel, encode_user, extract_tenant_id};
pub use interceptor::{Attachment, EntryMethod, MethodInterceptor, ServiceInstance};
pub use introspection::{Command, IdentityProbe, StatusReport};
pub use multiplexer::{ServiceLocator, TenantMultiplexer};
pub use query_rewriter::{
    ensure_tenant_columns, rewrite_query, InMemoryRecordStore, Query, QueryRewriter, ReadPath,
    ReadPathSlot, SchemaExtender,
};
pub use registry::TenantRegistry;
pub use virtual_event::VirtualizedEvent;
