//! Events carried by the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extension::state::LifecyclePhase;

/// Dispatch key of an event.
///
/// Handlers subscribe to a kind; an event is delivered to the handlers of
/// exactly the kind its payload reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ExtensionLoaded,
    ExtensionEnabled,
    ExtensionDisabled,
    ExtensionUnloaded,
    ExtensionFailed,
    MessageSent,
    Custom(String),
}

impl EventKind {
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExtensionLoaded => f.write_str("extension_loaded"),
            Self::ExtensionEnabled => f.write_str("extension_enabled"),
            Self::ExtensionDisabled => f.write_str("extension_disabled"),
            Self::ExtensionUnloaded => f.write_str("extension_unloaded"),
            Self::ExtensionFailed => f.write_str("extension_failed"),
            Self::MessageSent => f.write_str("message_sent"),
            Self::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    ExtensionLoaded {
        extension_id: String,
        version: String,
    },
    ExtensionEnabled {
        extension_id: String,
    },
    ExtensionDisabled {
        extension_id: String,
    },
    ExtensionUnloaded {
        extension_id: String,
    },
    ExtensionFailed {
        extension_id: String,
        phase: LifecyclePhase,
        message: String,
    },
    /// A message was sent through the host's messaging layer.
    MessageSent {
        conversation_id: String,
        message_id: String,
        #[serde(default)]
        content: serde_json::Value,
    },
    Custom {
        name: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ExtensionLoaded { .. } => EventKind::ExtensionLoaded,
            Self::ExtensionEnabled { .. } => EventKind::ExtensionEnabled,
            Self::ExtensionDisabled { .. } => EventKind::ExtensionDisabled,
            Self::ExtensionUnloaded { .. } => EventKind::ExtensionUnloaded,
            Self::ExtensionFailed { .. } => EventKind::ExtensionFailed,
            Self::MessageSent { .. } => EventKind::MessageSent,
            Self::Custom { name, .. } => EventKind::Custom(name.clone()),
        }
    }

    /// Extension the payload is about, for lifecycle payloads.
    pub fn extension_id(&self) -> Option<&str> {
        match self {
            Self::ExtensionLoaded { extension_id, .. }
            | Self::ExtensionEnabled { extension_id }
            | Self::ExtensionDisabled { extension_id }
            | Self::ExtensionUnloaded { extension_id }
            | Self::ExtensionFailed { extension_id, .. } => Some(extension_id),
            _ => None,
        }
    }
}

/// Immutable event record. Delivered to handlers as `Arc<Event>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// `None` for events raised by the host itself.
    pub source_extension_id: Option<String>,
    pub payload: EventPayload,
}

impl Event {
    /// Host-originated event.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source_extension_id: None,
            payload,
        }
    }

    /// Event raised by an extension.
    pub fn from_extension(extension_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            source_extension_id: Some(extension_id.into()),
            ..Self::new(payload)
        }
    }

    pub fn custom(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(EventPayload::Custom {
            name: name.into(),
            data,
        })
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
