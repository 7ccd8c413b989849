// Identity-virtualizing event facade
// Presents an inbound event with tenant-scoped identities to the shared service

use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::engine::identity::{decode_user, encode_channel, encode_user};
use crate::models::{InboundEvent, SessionView, TenantRecord};

/// Synthesized field exposing the tenant the event was wrapped for
pub const TENANT_PROBE_FIELD: &str = "_tenant_id";

/// Synthesized field exposing the tenant's persona override
pub const PERSONA_PROBE_FIELD: &str = "_persona_override";

/// Facade over an [`InboundEvent`]
///
/// Reads of the user identity return the virtual identity; the channel
/// identity is virtualized only when channel virtualization is on. The self
/// identity is never touched since downstream routing needs the real value.
/// Writes to either identity are decoded first, so the wrapped event never
/// holds virtual text.
#[derive(Debug)]
pub struct VirtualizedEvent {
    inner: RwLock<InboundEvent>,
    tenant_id: String,
    persona: Option<String>,
    virtualize_channels: bool,
}

impl VirtualizedEvent {
    /// Wrap an event for the tenant serving its origin
    pub fn wrap(event: InboundEvent, tenant: &TenantRecord, virtualize_channels: bool) -> Self {
        Self {
            inner: RwLock::new(event),
            tenant_id: tenant.tenant_id.clone(),
            persona: tenant.persona.clone(),
            virtualize_channels,
        }
    }

    /// Shorthand for handing the facade to the shared service
    pub fn into_shared(self) -> Arc<VirtualizedEvent> {
        Arc::new(self)
    }

    fn read<T>(&self, f: impl FnOnce(&InboundEvent) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        f(&guard)
    }

    fn write(&self, f: impl FnOnce(&mut InboundEvent)) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn persona_override(&self) -> Option<&str> {
        self.persona.as_deref()
    }

    /// Virtual user identity
    pub fn user_id(&self) -> String {
        self.read(|e| encode_user(&self.tenant_id, &e.user_id))
    }

    /// Store a user identity, decoding it back to the real one
    pub fn set_user_id(&self, value: &str) {
        let real = decode_user(value);
        debug!(tenant_id = %self.tenant_id, "user identity written back as {}", real);
        self.write(|e| e.user_id = real);
    }

    /// Channel identity, virtual only when channel virtualization is on
    pub fn channel_id(&self) -> String {
        self.read(|e| encode_channel(&self.tenant_id, &e.channel_id, self.virtualize_channels))
    }

    /// Store a channel identity; virtual text is decoded even when channel
    /// virtualization is off
    pub fn set_channel_id(&self, value: &str) {
        let real = decode_user(value);
        self.write(|e| e.channel_id = real);
    }

    /// Real self identity, never virtualized
    pub fn self_id(&self) -> String {
        self.read(|e| e.self_id.clone())
    }

    /// Write any field; identity fields go through their setters
    pub fn set_field(&self, name: &str, value: Value) {
        match (name, value) {
            ("user_id", Value::String(v)) => self.set_user_id(&v),
            ("channel_id", Value::String(v)) => self.set_channel_id(&v),
            (TENANT_PROBE_FIELD, _) | (PERSONA_PROBE_FIELD, _) => {}
            (name, value) => self.write(|e| {
                e.fields.insert(name.to_string(), value);
            }),
        }
    }

    /// Copy of the underlying event with real identities
    pub fn real_event(&self) -> InboundEvent {
        self.read(|e| e.clone())
    }
}

impl SessionView for VirtualizedEvent {
    fn platform(&self) -> Option<String> {
        Some(self.read(|e| e.platform.clone()))
    }

    fn self_id(&self) -> Option<String> {
        Some(VirtualizedEvent::self_id(self))
    }

    fn user_id(&self) -> Option<String> {
        Some(VirtualizedEvent::user_id(self))
    }

    fn channel_id(&self) -> Option<String> {
        Some(VirtualizedEvent::channel_id(self))
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "user_id" => Some(Value::String(VirtualizedEvent::user_id(self))),
            "channel_id" => Some(Value::String(VirtualizedEvent::channel_id(self))),
            TENANT_PROBE_FIELD => Some(Value::String(self.tenant_id.clone())),
            PERSONA_PROBE_FIELD => self.persona.clone().map(Value::String),
            other => self.read(|e| e.field(other)),
        }
    }

    fn tenant_probe(&self) -> Option<String> {
        Some(self.tenant_id.clone())
    }

    fn persona_probe(&self) -> Option<String> {
        self.persona.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> TenantRecord {
        TenantRecord::new("alice").with_persona("P1")
    }

    fn event() -> InboundEvent {
        InboundEvent::new("platformX", "bot1", "u42", "c7").with_field("content", "hello")
    }

    #[test]
    fn test_reads_virtualize_user_identity_only() {
        let facade = VirtualizedEvent::wrap(event(), &alice(), false);
        assert_eq!(facade.user_id(), "vx_alice_u42");
        assert_eq!(facade.channel_id(), "c7");
        assert_eq!(facade.self_id(), "bot1");
        assert_eq!(facade.field("content"), Some(json!("hello")));
        assert_eq!(facade.field("platform"), Some(json!("platformX")));
    }

    #[test]
    fn test_probe_fields_are_synthesized() {
        let facade = VirtualizedEvent::wrap(event(), &alice(), false);
        assert_eq!(facade.field(TENANT_PROBE_FIELD), Some(json!("alice")));
        assert_eq!(facade.field(PERSONA_PROBE_FIELD), Some(json!("P1")));
        assert!(facade.real_event().fields.get(TENANT_PROBE_FIELD).is_none());

        let plain = VirtualizedEvent::wrap(event(), &TenantRecord::new("bob"), false);
        assert_eq!(plain.field(PERSONA_PROBE_FIELD), None);
    }

    #[test]
    fn test_writes_store_real_identities() {
        let facade = VirtualizedEvent::wrap(event(), &alice(), true);
        facade.set_user_id("vx_alice_u77");
        facade.set_field("channel_id", json!("vx_alice_c9"));
        let real = facade.real_event();
        assert_eq!(real.user_id, "u77");
        assert_eq!(real.channel_id, "c9");
        assert_eq!(facade.user_id(), "vx_alice_u77");
        assert_eq!(facade.channel_id(), "vx_alice_c9");
    }

    #[test]
    fn test_unvirtualized_writes_pass_through() {
        let facade = VirtualizedEvent::wrap(event(), &alice(), false);
        facade.set_user_id("plain-user");
        facade.set_field("content", json!("edited"));
        let real = facade.real_event();
        assert_eq!(real.user_id, "plain-user");
        assert_eq!(real.fields["content"], json!("edited"));
    }

    #[test]
    fn test_virtual_channel_write_is_decoded_without_channel_virtualization() {
        let facade = VirtualizedEvent::wrap(event(), &alice(), false);
        facade.set_channel_id("vx_alice_c9");
        assert_eq!(facade.real_event().channel_id, "c9");
        assert_eq!(facade.channel_id(), "c9");

        facade.set_field("channel_id", json!("room-2"));
        assert_eq!(facade.real_event().channel_id, "room-2");
    }

    #[test]
    fn test_channel_virtualization_diverges_by_tenant() {
        let shared = InboundEvent::new("platformX", "bot1", "u1", "room");
        let a = VirtualizedEvent::wrap(shared.clone(), &alice(), false);
        let b = VirtualizedEvent::wrap(shared.clone(), &TenantRecord::new("bob"), false);
        assert_eq!(a.channel_id(), b.channel_id());

        let a = VirtualizedEvent::wrap(shared.clone(), &alice(), true);
        let b = VirtualizedEvent::wrap(shared, &TenantRecord::new("bob"), true);
        assert_ne!(a.channel_id(), b.channel_id());
    }
}
