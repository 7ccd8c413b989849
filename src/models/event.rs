// Inbound events and the arguments handed to shared service entry methods

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// One inbound message event as delivered by the host routing layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Platform the message arrived on
    pub platform: String,

    /// Identity the platform assigned to the receiving bot account
    pub self_id: String,

    /// Real sender identity
    pub user_id: String,

    /// Real channel identity
    pub channel_id: String,

    /// Every other event field, passed through untouched
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl InboundEvent {
    pub fn new(platform: &str, self_id: &str, user_id: &str, channel_id: &str) -> Self {
        Self {
            platform: platform.to_string(),
            self_id: self_id.to_string(),
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            fields: Map::new(),
        }
    }

    pub fn with_field<V: Into<Value>>(mut self, name: &str, value: V) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
}

/// Read access to anything shaped like a session
///
/// The shared service only ever sees sessions through this trait, so the
/// virtualizing facade can stand in for a raw event.
pub trait SessionView: Send + Sync {
    fn platform(&self) -> Option<String>;
    fn self_id(&self) -> Option<String>;
    fn user_id(&self) -> Option<String>;
    fn channel_id(&self) -> Option<String>;

    /// Any other field by name
    fn field(&self, name: &str) -> Option<Value>;

    /// Tenant the session was virtualized for, if any
    fn tenant_probe(&self) -> Option<String> {
        None
    }

    /// Persona override carried for downstream interception code
    fn persona_probe(&self) -> Option<String> {
        None
    }
}

impl SessionView for InboundEvent {
    fn platform(&self) -> Option<String> {
        Some(self.platform.clone())
    }

    fn self_id(&self) -> Option<String> {
        Some(self.self_id.clone())
    }

    fn user_id(&self) -> Option<String> {
        Some(self.user_id.clone())
    }

    fn channel_id(&self) -> Option<String> {
        Some(self.channel_id.clone())
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "platform" => Some(Value::String(self.platform.clone())),
            "self_id" => Some(Value::String(self.self_id.clone())),
            "user_id" => Some(Value::String(self.user_id.clone())),
            "channel_id" => Some(Value::String(self.channel_id.clone())),
            other => self.fields.get(other).cloned(),
        }
    }
}

/// Where a session-shaped argument came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOrigin {
    pub platform: String,
    pub self_id: String,
    /// Tenant already attached by the virtualizing facade
    pub tenant_probe: Option<String>,
}

/// One argument passed to a shared service entry method
#[derive(Clone)]
pub enum CallArg {
    /// A live session object
    Session(Arc<dyn SessionView>),
    /// Any plain value; JSON objects carrying both identity fields count as sessions
    Value(Value),
}

impl CallArg {
    pub fn session(session: Arc<dyn SessionView>) -> Self {
        CallArg::Session(session)
    }

    /// Origin of this argument if it is shaped like a session
    ///
    /// A session must carry both a user identity and a self identity.
    pub fn session_origin(&self) -> Option<SessionOrigin> {
        match self {
            CallArg::Session(session) => {
                session.user_id()?;
                let self_id = session.self_id()?;
                Some(SessionOrigin {
                    platform: session.platform().unwrap_or_default(),
                    self_id,
                    tenant_probe: session.tenant_probe(),
                })
            }
            CallArg::Value(Value::Object(map)) => {
                let text = |keys: &[&str]| {
                    keys.iter()
                        .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
                        .map(str::to_string)
                };
                text(&["user_id", "userId"])?;
                let self_id = text(&["self_id", "selfId"])?;
                Some(SessionOrigin {
                    platform: text(&["platform"]).unwrap_or_default(),
                    self_id,
                    tenant_probe: None,
                })
            }
            CallArg::Value(_) => None,
        }
    }
}

impl fmt::Debug for CallArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallArg::Session(session) => f
                .debug_struct("Session")
                .field("platform", &session.platform())
                .field("self_id", &session.self_id())
                .field("user_id", &session.user_id())
                .finish(),
            CallArg::Value(value) => f.debug_tuple("Value").field(value).finish(),
        }
    }
}

impl From<Value> for CallArg {
    fn from(value: Value) -> Self {
        CallArg::Value(value)
    }
}
