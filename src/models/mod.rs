// Core domain models for the tenant multiplexer
// Plain data types shared by every engine component

//! # Domain Models Module
//!
//! Data carried between the host routing layer, the multiplexer engine and
//! the shared service:
//!
//! - [`TenantRecord`]: one configured virtual agent and its overrides
//! - [`TenantStatus`]: runtime status kept for introspection
//! - [`InboundEvent`] / [`SessionView`]: what the host delivers and how the
//!   shared service reads it
//! - [`ServiceConfig`] / [`ConfigProperty`]: the shared configuration object
//!   and the fixed set of properties a tenant may override

// Contains TenantRecord, ModelOverride and the threshold configurations
pub mod tenant;

// Contains InboundEvent, SessionView and entry method arguments
pub mod event;

// Contains ServiceConfig and ConfigProperty
pub mod config;

pub use config::{ConfigProperty, ServiceConfig};
pub use event::{CallArg, InboundEvent, SessionOrigin, SessionView};
pub use tenant::{
    tenant_id_for_origin, AffinityConfig, ModelOverride, MoodConfig, TenantRecord, TenantStatus,
    TenantStatusUpdate, ORIGIN_SEPARATOR,
};
