// Identity codec
// Maps (tenant id, real identity) to a virtual identity string and back

//! Virtual identities have the form `<tag>_<tenantId>_<realIdentity>`.
//!
//! Decoding is permissive: anything that does not carry the tag and a
//! non-empty tenant segment is treated as an already-real identity and
//! returned unchanged. Tenant ids must therefore never contain
//! [`FIELD_SEPARATOR`]; [`validate_tenant_id`] is checked when tenants are
//! loaded.

use crate::{Result, TenantMuxError};

/// Marker distinguishing virtual identities from real ones
pub const VIRTUAL_TAG: &str = "vx";

/// Separator between the tag, the tenant id and the real identity
pub const FIELD_SEPARATOR: char = '_';

/// Encode a real user identity for a tenant
pub fn encode_user(tenant_id: &str, real_user_id: &str) -> String {
    format!(
        "{tag}{sep}{tenant}{sep}{real}",
        tag = VIRTUAL_TAG,
        sep = FIELD_SEPARATOR,
        tenant = tenant_id,
        real = real_user_id
    )
}

/// Recover the real user identity, or return the input if it is not virtual
pub fn decode_user(virtual_user_id: &str) -> String {
    match split_virtual(virtual_user_id) {
        Some((_, real)) => real.to_string(),
        None => virtual_user_id.to_string(),
    }
}

/// Tenant id embedded in a virtual identity, or an empty string
pub fn extract_tenant_id(virtual_user_id: &str) -> String {
    split_virtual(virtual_user_id)
        .map(|(tenant, _)| tenant.to_string())
        .unwrap_or_default()
}

/// True when the value carries the virtual marker and a tenant segment
pub fn is_virtual(value: &str) -> bool {
    split_virtual(value).is_some()
}

/// Encode a channel identity; identical to users when virtualization is on
pub fn encode_channel(tenant_id: &str, real_channel_id: &str, enabled: bool) -> String {
    if enabled {
        encode_user(tenant_id, real_channel_id)
    } else {
        real_channel_id.to_string()
    }
}

/// Decode a channel identity; a no-op when virtualization is off
pub fn decode_channel(channel_id: &str, enabled: bool) -> String {
    if enabled {
        decode_user(channel_id)
    } else {
        channel_id.to_string()
    }
}

/// Reject tenant ids the encoding cannot carry
pub fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    if tenant_id.is_empty() {
        return Err(TenantMuxError::InvalidInput("tenant id is empty".to_string()));
    }
    if tenant_id.contains(FIELD_SEPARATOR) {
        return Err(TenantMuxError::InvalidInput(format!(
            "tenant id '{}' contains the reserved separator '{}'",
            tenant_id, FIELD_SEPARATOR
        )));
    }
    Ok(())
}

fn split_virtual(value: &str) -> Option<(&str, &str)> {
    let rest = value.strip_prefix(VIRTUAL_TAG)?;
    let rest = rest.strip_prefix(FIELD_SEPARATOR)?;
    let (tenant, real) = rest.split_once(FIELD_SEPARATOR)?;
    if tenant.is_empty() || real.is_empty() {
        return None;
    }
    Some((tenant, real))
}
