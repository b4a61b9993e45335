//! Host-observed extension lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an extension as seen by the manager.
///
/// ```text
/// Unloaded → Loading → Loaded → Enabling → Enabled → Disabling → Disabled → Unloading → Unloaded
///                 \________ any failed transition ________→ Error
/// ```
///
/// `Loaded` and `Disabled` are equivalent at rest (code resident, not running).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Enabling,
    Enabled,
    Disabling,
    Disabled,
    Unloading,
    Error,
}

impl ExtensionState {
    /// Code is resident and not running.
    pub fn is_at_rest(&self) -> bool {
        matches!(self, Self::Loaded | Self::Disabled)
    }

    /// A transition is currently in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Self::Loading | Self::Enabling | Self::Disabling | Self::Unloading
        )
    }

    /// Whether `op` may start from this state.
    ///
    /// Idempotent no-ops (loading a loaded extension, enabling an enabled one)
    /// are accepted here and short-circuited by the manager.
    pub fn accepts(&self, op: LifecycleOp) -> bool {
        use LifecycleOp::*;
        match self {
            Self::Unloaded => matches!(op, Load | Unload | Reload),
            Self::Loaded | Self::Disabled => true,
            Self::Enabled => true,
            Self::Error => matches!(op, Unload | Reload),
            Self::Loading | Self::Enabling | Self::Disabling | Self::Unloading => false,
        }
    }

    /// Collapse into the persisted status.
    pub fn status(&self) -> ExtensionStatus {
        match self {
            Self::Unloaded | Self::Unloading => ExtensionStatus::Installed,
            Self::Loading | Self::Loaded => ExtensionStatus::Loaded,
            Self::Enabling | Self::Enabled => ExtensionStatus::Enabled,
            Self::Disabling | Self::Disabled => ExtensionStatus::Disabled,
            Self::Error => ExtensionStatus::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Enabling => "enabling",
            Self::Enabled => "enabled",
            Self::Disabling => "disabling",
            Self::Disabled => "disabled",
            Self::Unloading => "unloading",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status recorded in a manifest and in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionStatus {
    #[default]
    Installed,
    Loaded,
    Enabled,
    Disabled,
    Error,
}

impl ExtensionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Loaded => "loaded",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }

    /// Parse a status string (case-insensitive).
    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "installed" => Some(Self::Installed),
            "loaded" => Some(Self::Loaded),
            "enabled" => Some(Self::Enabled),
            "disabled" => Some(Self::Disabled),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ExtensionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manager operations that move an extension between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOp {
    Load,
    Enable,
    Disable,
    Unload,
    Reload,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Unload => "unload",
            Self::Reload => "reload",
        })
    }
}

/// Lifecycle methods of the extension contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Instantiate,
    Initialize,
    Start,
    Stop,
    Dispose,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Instantiate => "instantiate",
            Self::Initialize => "initialize",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Dispose => "dispose",
        })
    }
}
